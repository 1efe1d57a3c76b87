//! Info command - show capability detection and kernel selection.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use ndispatch_config::Config;
use ndispatch_core::CapabilityTag;
use ndispatch_kernels::StubReport;

use crate::{build_stubs, host_tag};
use crate::output::{format_kv_list, format_table, format_tags, print_section};

/// Info command arguments.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Show CPU feature flags.
    #[arg(short, long)]
    pub detailed: bool,

    /// Cap the capability used for selection; overrides the configuration.
    #[arg(long)]
    pub capability: Option<CapabilityTag>,
}

/// Snapshot printed by `info`.
#[derive(Debug, Serialize)]
struct HostInfo {
    host: CapabilityTag,
    ceiling: Option<CapabilityTag>,
    effective: CapabilityTag,
    vector_bits: usize,
    cpus: usize,
    physical_cpus: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    features: Vec<(&'static str, bool)>,
    operations: Vec<StubReport>,
}

/// Execute the info command.
pub fn execute(args: InfoArgs, config: &Config, json: bool) -> Result<()> {
    let ceiling = args.capability.or(config.dispatch.capability);
    let stubs = build_stubs(ceiling)?;
    stubs.resolve_all()?;

    let effective = stubs.capability();
    let info = HostInfo {
        host: host_tag(),
        ceiling,
        effective,
        vector_bits: effective.vector_bits(),
        cpus: num_cpus::get(),
        physical_cpus: num_cpus::get_physical(),
        features: if args.detailed { cpu_features() } else { Vec::new() },
        operations: stubs.report(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    print_section("Capability");
    println!(
        "{}",
        format_kv_list(&[
            ("host", info.host.to_string()),
            (
                "ceiling",
                info.ceiling.map_or_else(|| "none".to_string(), |t| t.to_string()),
            ),
            ("effective", info.effective.as_str().bright_green().to_string()),
            ("vector bits", info.vector_bits.to_string()),
            ("cpus", format!("{} ({} physical)", info.cpus, info.physical_cpus)),
        ])
    );

    if args.detailed {
        print_section("CPU features");
        if info.features.is_empty() {
            println!("  (not an x86_64 host)");
        }
        for (name, present) in &info.features {
            let mark = if *present {
                "yes".bright_green()
            } else {
                "no".bright_red()
            };
            println!("  {:<10} {}", name, mark);
        }
    }

    print_section("Operations");
    let rows: Vec<Vec<String>> = info
        .operations
        .iter()
        .map(|op| {
            vec![
                op.name.to_string(),
                format_tags(&op.registered),
                op.selected.map_or_else(|| "-".to_string(), |t| t.to_string()),
            ]
        })
        .collect();
    print!("{}", format_table(&["operation", "registered", "selected"], &rows));

    Ok(())
}

#[cfg(target_arch = "x86_64")]
fn cpu_features() -> Vec<(&'static str, bool)> {
    vec![
        ("fma", is_x86_feature_detected!("fma")),
        ("avx2", is_x86_feature_detected!("avx2")),
        ("avx512f", is_x86_feature_detected!("avx512f")),
        ("avx512bw", is_x86_feature_detected!("avx512bw")),
        ("avx512vl", is_x86_feature_detected!("avx512vl")),
        ("avx512dq", is_x86_feature_detected!("avx512dq")),
    ]
}

#[cfg(not(target_arch = "x86_64"))]
fn cpu_features() -> Vec<(&'static str, bool)> {
    Vec::new()
}
