//! ndispatch CLI.

pub mod commands;
pub mod logging;
pub mod output;
pub mod progress;

use clap::{Parser, Subcommand};
use ndispatch_config::{load_default_config, Config, ConfigError, ConfigLoader, ENV_PREFIX};
use ndispatch_core::{CapabilityTag, DispatchError};
use ndispatch_kernels::NativeStubs;

/// ndispatch - capability-probed kernel dispatch.
#[derive(Parser, Debug)]
#[command(
    name = "ndispatch",
    version,
    about = "Inspect, validate and benchmark runtime kernel selection",
    long_about = "ndispatch probes the CPU once, then routes addr, weight_to_int4pack,\n\
                  int4pack_mm and int8pack_mm to the most capable registered kernel\n\
                  (generic, AVX2 or AVX-512) that the host can run."
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path.
    #[arg(short, long, global = true, env = "NDISPATCH_CONFIG")]
    pub config: Option<String>,

    /// Log level or filter directive; overrides the configuration file.
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Enable JSON output.
    #[arg(long, global = true)]
    pub json: bool,
}

/// CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show detected capability and per-operation kernel selection.
    Info(commands::info::InfoArgs),

    /// Time each operation through the dispatch stubs.
    Bench(commands::benchmark::BenchArgs),

    /// Validate a configuration file and the kernel registry.
    Validate(commands::validate::ValidateArgs),

    /// Show version information.
    Version,
}

/// Load `path` (with env overrides), or the default locations.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => ConfigLoader::new()
            .with_file(path)
            .with_env_prefix(ENV_PREFIX)
            .load(),
        None => load_default_config(),
    }
}

/// Capability of this CPU, from the process-wide cached query.
pub fn host_tag() -> CapabilityTag {
    ndispatch_core::host_capability().unwrap_or(CapabilityTag::BASELINE)
}

/// Build a stub table over the host prober, capped at `ceiling`.
pub fn build_stubs(ceiling: Option<CapabilityTag>) -> Result<NativeStubs, DispatchError> {
    NativeStubs::with_ceiling(ceiling)
}
