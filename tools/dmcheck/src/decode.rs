//! `dmcheck decode`: run the register transform on command-line words

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::*;
use serde_json::json;
use voltage_dmcontext::{PropertyVisitor, ScalarType};

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Scalar type: int16, int32, int64, float32, float64, string, bool
    #[arg(short = 't', long = "type")]
    pub data_type: ScalarType,

    /// Register count (defaults to the type width)
    #[arg(short, long)]
    pub quantity: Option<u16>,

    /// Multiplier applied to numeric values (0 = none)
    #[arg(short, long, default_value_t = 0.0)]
    pub scale: f64,

    /// Modbus function code (1-4)
    #[arg(short, long, default_value_t = 3)]
    pub function: u8,

    /// Reverse the two bytes of every register
    #[arg(long)]
    pub swap_byte: bool,

    /// Reverse the register order
    #[arg(long)]
    pub swap_register: bool,

    /// Register words, decimal or 0x-prefixed hex
    #[arg(required = true, num_args = 1..)]
    pub words: Vec<String>,
}

pub fn run(args: &DecodeArgs) -> Result<()> {
    let words = args
        .words
        .iter()
        .map(|w| parse_word(w))
        .collect::<Result<Vec<_>>>()?;

    let mut fragment = json!({
        "function": args.function,
        "address": "0",
        "type": args.data_type.as_str(),
        "scale": args.scale,
        "swapByte": args.swap_byte,
        "swapRegister": args.swap_register,
    });
    if let Some(quantity) = args.quantity {
        fragment["quantity"] = json!(quantity);
    }

    let visitor = PropertyVisitor::decode(&fragment).context("Invalid visitor parameters")?;
    let modbus = visitor
        .as_modbus()
        .ok_or_else(|| anyhow!("Parameters did not form a Modbus visitor"))?;

    let value = modbus.decode(&words)?;
    println!(
        "{} {} ({}, {} register(s), {})",
        "Value:".bright_cyan(),
        value.to_string().bright_white().bold(),
        value.scalar_type(),
        modbus.quantity,
        modbus.byte_order()
    );
    Ok(())
}

/// Parse a register word written as decimal or `0x` hex
pub fn parse_word(text: &str) -> Result<u16> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => trimmed.parse::<u16>(),
    };
    parsed.with_context(|| format!("Invalid register word '{}'", text))
}
