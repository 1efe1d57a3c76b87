//! ndispatch CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::{debug, warn};

use ndispatch_cli::logging::{init_tracing, LogFormat, TracingConfig};
use ndispatch_cli::{build_stubs, load_config, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;

    let mut tracing_config = TracingConfig::from_logging(&config.logging);
    if let Some(ref level) = cli.log_level {
        tracing_config.filter = level.clone();
    }
    if cli.json {
        tracing_config.format = LogFormat::Json;
    }
    init_tracing(tracing_config)?;

    if config.dispatch.eager {
        let stubs = build_stubs(config.dispatch.capability)?;
        if ndispatch_kernels::install(stubs).is_err() {
            warn!("native stub table already built; configured ceiling not applied");
        }
        let native = ndispatch_kernels::init()?;
        debug!(capability = %native.capability(), "eager dispatch resolution done");
    }

    match cli.command {
        Commands::Info(args) => {
            ndispatch_cli::commands::info::execute(args, &config, cli.json)?;
        }
        Commands::Bench(args) => {
            ndispatch_cli::commands::benchmark::execute(args, &config, cli.json)?;
        }
        Commands::Validate(args) => {
            ndispatch_cli::commands::validate::execute(args, cli.json)?;
        }
        Commands::Version => {
            print_version(cli.json)?;
        }
    }

    Ok(())
}

/// Print version information.
fn print_version(json: bool) -> Result<()> {
    if json {
        let version = serde_json::json!({
            "name": "ndispatch",
            "version": env!("CARGO_PKG_VERSION"),
            "rust_version": env!("CARGO_PKG_RUST_VERSION"),
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "target_arch": std::env::consts::ARCH,
        });
        println!("{}", serde_json::to_string_pretty(&version)?);
    } else {
        println!("{} {}", "ndispatch".bright_green().bold(), env!("CARGO_PKG_VERSION"));
        println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
        println!("Target: {}", std::env::consts::ARCH);
        println!();
        println!("{}", env!("CARGO_PKG_DESCRIPTION"));
    }
    Ok(())
}
