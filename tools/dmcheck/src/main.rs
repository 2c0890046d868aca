//! dmcheck - Driver configuration checker for VoltageEMS
//!
//! Loads a driver configuration, reports what each device decoded to and
//! applies the register transform to words typed on the command line.

mod decode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::{Path, PathBuf};
use tracing::debug;
use voltage_dmcontext::{
    AccessConfig, DeviceInfo, DriverConfig, DriverConfigLoader, PropertyVisitor,
};

#[derive(Parser)]
#[command(name = "dmcheck")]
#[command(about = "Driver configuration checker for VoltageEMS device models")]
#[command(long_about = "Driver configuration checker for VoltageEMS device models

Commands:
  validate    Load a driver configuration and report warnings
  show        Print the normalized configuration
  decode      Apply a Modbus visitor transform to raw register words

Examples:
  dmcheck validate driver.yaml
  dmcheck show driver.yaml --format json
  dmcheck decode --type float32 --swap-register 0x0000 0x41C8
  dmcheck decode --type int16 --scale 0.1 235")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a driver configuration and report warnings
    Validate {
        /// Configuration file (.yaml, .yml or .json)
        file: PathBuf,

        /// Ignore DMCONTEXT_* environment overrides
        #[arg(long)]
        no_env: bool,
    },

    /// Print the normalized configuration
    Show {
        /// Configuration file (.yaml, .yml or .json)
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,

        /// Ignore DMCONTEXT_* environment overrides
        #[arg(long)]
        no_env: bool,
    },

    /// Apply a Modbus visitor transform to raw register words
    Decode(decode::DecodeArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configure colored output
    if cli.no_color {
        colored::control::set_override(false);
    }

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Validate { file, no_env } => validate_command(&file, no_env),
        Commands::Show {
            file,
            format,
            no_env,
        } => show_command(&file, format, no_env),
        Commands::Decode(args) => decode::run(&args),
    }
}

fn load(file: &Path, no_env: bool) -> Result<DriverConfig> {
    let mut loader = DriverConfigLoader::new(file);
    if no_env {
        loader = loader.without_env();
    }
    loader
        .load()
        .with_context(|| format!("Failed to load {}", file.display()))
}

fn validate_command(file: &Path, no_env: bool) -> Result<()> {
    println!(
        "{} {}",
        "Validating driver configuration:".bright_cyan(),
        file.display().to_string().bright_yellow()
    );

    let config = load(file, no_env)?;
    let driver = if config.driver.is_empty() {
        "-"
    } else {
        config.driver.as_str()
    };
    println!("  {} {}", "Driver:".bold(), driver);
    println!("  {} {}", "Devices:".bold(), config.devices.len());

    for device in &config.devices {
        print_device(device);
    }

    let report = config.report();
    println!();
    if report.is_clean() {
        println!("{} No warnings", "✓".bright_green());
    } else {
        println!(
            "{} {} warning(s)",
            "!".yellow(),
            report.warnings.len().to_string().yellow()
        );
        for warning in &report.warnings {
            println!("  {} {}", "-".yellow(), warning);
        }
    }
    Ok(())
}

fn print_device(device: &DeviceInfo) {
    let access = match &device.access {
        None => "no access".dimmed().to_string(),
        Some(AccessConfig::Modbus(modbus)) => {
            format!("modbus unit {} via {}", modbus.id, modbus.transport)
        },
        Some(AccessConfig::Opcua(opcua)) => format!("opcua {}", opcua.endpoint),
        Some(AccessConfig::Custom(raw)) => format!("custom '{}'", raw.as_str()),
    };
    println!();
    println!("  {} {}", device.name.bright_white().bold(), access);

    for property in &device.properties {
        let visitor = match &property.visitor {
            PropertyVisitor::Modbus(m) => format!(
                "fc{} @{} x{} {} [{}]{}",
                m.function,
                m.address,
                m.quantity,
                m.data_type,
                m.byte_order(),
                if m.scale != 0.0 {
                    format!(" * {}", m.scale)
                } else {
                    String::new()
                }
            ),
            PropertyVisitor::Opcua(o) => match o.data_type {
                Some(ty) => format!("node {} as {}", o.node_id, ty),
                None => format!("node {}", o.node_id),
            },
            PropertyVisitor::Custom(raw) => format!("custom '{}'", raw.as_str()),
        };
        debug!("Property {} decoded as {}", property.name, property.visitor.protocol());
        println!(
            "    {:<20} {:<3} {}",
            property.name,
            property.mode.as_str(),
            visitor
        );
    }
}

fn show_command(file: &Path, format: OutputFormat, no_env: bool) -> Result<()> {
    let config = load(file, no_env)?;
    println!("{}", render(&config, format)?);
    Ok(())
}

/// Normalized document text in the requested format
fn render(config: &DriverConfig, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(config)?,
        OutputFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const DRIVER: &str = r#"
driver: meters
devices:
  - name: meter
    access:
      interval: 2s
      tcp: {address: 10.0.0.5, port: 502}
    properties:
      - name: voltage
        type: float32
        visitor: {function: 3, address: 40001, swapRegister: 1}
      - name: note
        visitor: free text
"#;

    fn write_driver(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_cli_parses_show_arguments() {
        let cli = Cli::try_parse_from(["dmcheck", "show", "d.yaml", "-f", "json", "--no-env"])
            .unwrap();
        match cli.command {
            Commands::Show {
                file,
                format,
                no_env,
            } => {
                assert_eq!(file, PathBuf::from("d.yaml"));
                assert_eq!(format, OutputFormat::Json);
                assert!(no_env);
            },
            _ => panic!("expected show command"),
        }
        assert!(Cli::try_parse_from(["dmcheck", "show", "d.yaml", "-f", "toml"]).is_err());
    }

    #[test]
    fn test_render_json_is_normalized() {
        let dir = TempDir::new().unwrap();
        let path = write_driver(&dir, "driver.yaml", DRIVER);
        let config = load(&path, true).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&render(&config, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["driver"], "meters");
        let device = &json["devices"][0];
        assert_eq!(device["access"]["interval"], "2s");
        assert_eq!(device["access"]["timeout"], "10s");
        let visitor = &device["properties"][0]["visitor"];
        assert_eq!(visitor["address"], "40001");
        assert_eq!(visitor["quantity"], 2);
        assert_eq!(visitor["swapRegister"], true);
        assert_eq!(device["properties"][1]["visitor"], "free text");

        assert_eq!(DriverConfig::from_json_str(&json.to_string()).unwrap(), config);
    }

    #[test]
    fn test_render_yaml_reloads() {
        let dir = TempDir::new().unwrap();
        let path = write_driver(&dir, "driver.yml", DRIVER);
        let config = load(&path, true).unwrap();

        let yaml = render(&config, OutputFormat::Yaml).unwrap();
        assert_eq!(DriverConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_validate_and_load_report_errors() {
        let dir = TempDir::new().unwrap();
        let path = write_driver(&dir, "driver.yaml", DRIVER);
        assert!(validate_command(&path, true).is_ok());

        let broken = write_driver(
            &dir,
            "broken.yaml",
            "devices: [{name: x, properties: [{name: y, visitor: {function: 9, address: 1}}]}]",
        );
        let err = load(&broken, true).unwrap_err();
        assert!(err.to_string().contains("Failed to load"));
        assert!(format!("{err:#}").contains("devices[0].properties[0].visitor"));

        assert!(load(&dir.path().join("missing.yaml"), true).is_err());
    }
}
