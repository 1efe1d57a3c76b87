//! Validate command - validate a configuration file and the kernel registry.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use ndispatch_config::{ConfigLoader, ENV_PREFIX};

use crate::{build_stubs, host_tag};
use crate::output::{format_tags, print_error, print_success, print_warning};

/// Validate command arguments.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration file to validate.
    pub config_file: String,

    /// Verbose output.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Outcome of a validation run.
#[derive(Debug, Default)]
pub struct Findings {
    /// Problems that make the configuration unusable.
    pub errors: Vec<String>,
    /// Settings that load but will not behave as written.
    pub warnings: Vec<String>,
    /// Checks that passed.
    pub passed: Vec<String>,
}

/// Load `path` and check it against the kernels this build registers.
pub fn check(path: &str) -> Findings {
    let mut findings = Findings::default();

    let config = match ConfigLoader::new()
        .with_file(path)
        .with_env_prefix(ENV_PREFIX)
        .load()
    {
        Ok(config) => {
            findings.passed.push("configuration loaded".to_string());
            config
        }
        Err(e) => {
            findings.errors.push(format!("failed to load configuration: {e}"));
            return findings;
        }
    };

    let ceiling = config.dispatch.capability;
    if let Some(ceiling) = ceiling {
        let host = host_tag();
        if ceiling > host {
            findings.warnings.push(format!(
                "dispatch.capability `{ceiling}` exceeds the host capability `{host}`; \
                 selection will use `{host}`"
            ));
        }
    }

    let stubs = match build_stubs(ceiling) {
        Ok(stubs) => stubs,
        Err(e) => {
            findings.errors.push(format!("kernel registration failed: {e}"));
            return findings;
        }
    };
    findings.passed.push(format!(
        "{} operations registered",
        stubs.registry().len()
    ));

    for summary in stubs.registry().summaries() {
        if !summary.has_baseline() {
            findings.errors.push(format!(
                "`{}` has no default kernel (registered: {})",
                summary.name,
                format_tags(&summary.tags)
            ));
        }
    }

    match stubs.resolve_all() {
        Ok(()) => findings.passed.push(format!(
            "all stubs resolve at `{}`",
            stubs.capability()
        )),
        Err(e) => findings.errors.push(format!("stub resolution failed: {e}")),
    }

    findings
}

/// Execute the validate command.
pub fn execute(args: ValidateArgs, json: bool) -> Result<()> {
    if !json {
        println!(
            "\n{} {}",
            "Validating".bright_green().bold(),
            args.config_file.bright_cyan()
        );
        println!();
    }

    let findings = check(&args.config_file);

    if json {
        let result = serde_json::json!({
            "valid": findings.errors.is_empty(),
            "errors": findings.errors,
            "warnings": findings.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if args.verbose {
            for passed in &findings.passed {
                print_success(passed);
            }
        }
        for warning in &findings.warnings {
            print_warning(warning);
        }
        for error in &findings.errors {
            print_error(error);
        }
        println!();
        if findings.errors.is_empty() {
            println!("{}", "Configuration is valid!".bright_green().bold());
        }
    }

    if !findings.errors.is_empty() {
        bail!("validation failed with {} error(s)", findings.errors.len());
    }

    Ok(())
}
