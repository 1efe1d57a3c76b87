//! Bench command - time each operation through its dispatch stub.

use std::time::Instant;

use anyhow::{ensure, Result};
use clap::builder::PossibleValuesParser;
use clap::Args;
use colored::Colorize;
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::debug;

use ndispatch_config::Config;
use ndispatch_core::{
    AddrIter, CapabilityTag, KernelResult, MatMut, MatRef, PackedInt4, PackedInt4Mut,
};
use ndispatch_kernels::NativeStubs;

use crate::build_stubs;
use crate::output::{format_duration, format_table, print_section};
use crate::progress::create_progress_bar;

/// Operations the bench command knows how to drive.
pub const OPERATIONS: [&str; 4] = ["addr", "weight_to_int4pack", "int4pack_mm", "int8pack_mm"];

/// Bench command arguments.
#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Operation to time; all operations when omitted.
    #[arg(long, value_parser = PossibleValuesParser::new(OPERATIONS))]
    pub op: Option<String>,

    /// Rows of the activation (and of the `addr` output).
    #[arg(short, long, default_value_t = 8)]
    pub m: usize,

    /// Output channels (and `addr` output columns).
    #[arg(short, long, default_value_t = 1024)]
    pub n: usize,

    /// Reduction dimension.
    #[arg(short, long, default_value_t = 1024)]
    pub k: usize,

    /// Quantization group size for `int4pack_mm`.
    #[arg(long, default_value_t = 128)]
    pub group_size: usize,

    /// Timed iterations per operation.
    #[arg(short, long, default_value_t = 50)]
    pub iterations: usize,

    /// Untimed warm-up iterations.
    #[arg(long, default_value_t = 5)]
    pub warmup: usize,

    /// Cap the capability used for selection; overrides the configuration.
    #[arg(long)]
    pub capability: Option<CapabilityTag>,
}

/// Timing of one operation.
#[derive(Debug, Serialize)]
struct OpResult {
    operation: &'static str,
    kernel: Option<CapabilityTag>,
    shape: String,
    iterations: usize,
    avg_seconds: f64,
    p50_seconds: f64,
    min_seconds: f64,
    max_seconds: f64,
    gflops: f64,
}

/// Full bench report.
#[derive(Debug, Serialize)]
struct BenchReport {
    capability: CapabilityTag,
    results: Vec<OpResult>,
}

/// Execute the bench command.
pub fn execute(args: BenchArgs, config: &Config, json: bool) -> Result<()> {
    ensure!(args.iterations > 0, "--iterations must be at least 1");

    let stubs = build_stubs(args.capability.or(config.dispatch.capability))?;
    stubs.resolve_all()?;

    let selected: Vec<&'static str> = match args.op.as_deref() {
        Some(op) => OPERATIONS.into_iter().filter(|name| *name == op).collect(),
        None => OPERATIONS.to_vec(),
    };

    if !json {
        println!(
            "\n{} m={} n={} k={} on {}",
            "Benchmarking".bright_green().bold(),
            args.m,
            args.n,
            args.k,
            stubs.capability().as_str().bright_cyan()
        );
    }

    let mut results = Vec::with_capacity(selected.len());
    for op in selected {
        let pb = create_progress_bar((args.warmup + args.iterations) as u64, op, !json);
        let result = run_op(op, &args, &stubs, &pb)?;
        pb.finish_and_clear();
        debug!(operation = op, avg = result.avg_seconds, "benchmark finished");
        results.push(result);
    }

    let report = BenchReport {
        capability: stubs.capability(),
        results,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_section("Results");
    let rows: Vec<Vec<String>> = report
        .results
        .iter()
        .map(|r| {
            vec![
                r.operation.to_string(),
                r.kernel.map_or_else(|| "-".to_string(), |t| t.to_string()),
                r.shape.clone(),
                format_duration(r.avg_seconds),
                format_duration(r.p50_seconds),
                format_duration(r.min_seconds),
                format_duration(r.max_seconds),
                format!("{:.2} GFLOP/s", r.gflops),
            ]
        })
        .collect();
    print!(
        "{}",
        format_table(
            &["operation", "kernel", "shape", "avg", "p50", "min", "max", "throughput"],
            &rows,
        )
    );

    Ok(())
}

fn run_op(op: &'static str, args: &BenchArgs, stubs: &NativeStubs, pb: &ProgressBar) -> Result<OpResult> {
    let (m, n, k, gs) = (args.m, args.n, args.k, args.group_size);

    let (kernel, shape, flops, samples) = match op {
        "addr" => {
            let vec1 = signal(m, 0.0);
            let vec2 = signal(n, 1.0);
            let input = signal(m * n, 2.0);
            let mut out = vec![0.0f32; m * n];
            let samples = measure(args, pb, || {
                let mut iter = AddrIter::new(
                    MatMut::new(&mut out, m, n)?,
                    MatRef::new(&input, m, n)?,
                    &vec1,
                    &vec2,
                )?;
                stubs.addr.call(&mut iter, 1.0, 0.5)
            })?;
            (stubs.addr.selected(), format!("{m}x{n}"), 3.0 * (m * n) as f64, samples)
        }
        "weight_to_int4pack" => {
            let q = nibbles(n * k);
            let mut packed = vec![0u8; PackedInt4::packed_len(n, k)];
            let samples = measure(args, pb, || {
                stubs.weight_to_int4pack.call(
                    MatRef::new(&q, n, k)?,
                    &mut PackedInt4Mut::new(&mut packed, n, k)?,
                )
            })?;
            (
                stubs.weight_to_int4pack.selected(),
                format!("{n}x{k}"),
                (n * k) as f64,
                samples,
            )
        }
        "int4pack_mm" => {
            ensure!(gs > 0 && k % gs == 0, "--group-size {gs} must divide k={k}");
            let q = nibbles(n * k);
            let mut packed = vec![0u8; PackedInt4::packed_len(n, k)];
            stubs
                .weight_to_int4pack
                .call(MatRef::new(&q, n, k)?, &mut PackedInt4Mut::new(&mut packed, n, k)?)?;
            let a = signal(m * k, 0.5);
            let sz: Vec<f32> = signal((k / gs) * n * 2, 3.0)
                .into_iter()
                .map(|v| v * 0.05)
                .collect();
            let mut out = vec![0.0f32; m * n];
            let samples = measure(args, pb, || {
                stubs.int4pack_mm.call(
                    MatRef::new(&a, m, k)?,
                    PackedInt4::new(&packed, n, k)?,
                    gs,
                    MatRef::new(&sz, k / gs, n * 2)?,
                    &mut MatMut::new(&mut out, m, n)?,
                )
            })?;
            (
                stubs.int4pack_mm.selected(),
                format!("{m}x{n}x{k}/g{gs}"),
                2.0 * (m * n * k) as f64,
                samples,
            )
        }
        _ => {
            let a = signal(m * k, 0.5);
            let b: Vec<i8> = (0..n * k).map(|i| ((i * 31 + 7) % 255) as i16 as i8).collect();
            let scales = vec![0.01f32; n];
            let mut out = vec![0.0f32; m * n];
            let samples = measure(args, pb, || {
                stubs.int8pack_mm.call(
                    MatRef::new(&a, m, k)?,
                    MatRef::new(&b, n, k)?,
                    &scales,
                    &mut MatMut::new(&mut out, m, n)?,
                )
            })?;
            (
                stubs.int8pack_mm.selected(),
                format!("{m}x{n}x{k}"),
                2.0 * (m * n * k) as f64,
                samples,
            )
        }
    };

    Ok(summarize(op, kernel, shape, flops, samples))
}

/// Run warm-up then timed iterations, returning per-call seconds.
fn measure<F>(args: &BenchArgs, pb: &ProgressBar, mut f: F) -> Result<Vec<f64>>
where
    F: FnMut() -> KernelResult,
{
    for _ in 0..args.warmup {
        f()?;
        pb.inc(1);
    }

    let mut samples = Vec::with_capacity(args.iterations);
    for _ in 0..args.iterations {
        let start = Instant::now();
        f()?;
        samples.push(start.elapsed().as_secs_f64());
        pb.inc(1);
    }
    Ok(samples)
}

fn summarize(
    operation: &'static str,
    kernel: Option<CapabilityTag>,
    shape: String,
    flops: f64,
    mut samples: Vec<f64>,
) -> OpResult {
    samples.sort_by(|a, b| a.total_cmp(b));
    let avg = samples.iter().sum::<f64>() / samples.len().max(1) as f64;
    OpResult {
        operation,
        kernel,
        shape,
        iterations: samples.len(),
        avg_seconds: avg,
        p50_seconds: percentile(&samples, 50.0),
        min_seconds: samples.first().copied().unwrap_or(0.0),
        max_seconds: samples.last().copied().unwrap_or(0.0),
        gflops: if avg > 0.0 { flops / avg / 1e9 } else { 0.0 },
    }
}

/// Nearest-rank percentile of sorted samples.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn signal(len: usize, phase: f32) -> Vec<f32> {
    (0..len).map(|i| (i as f32 * 0.37 + phase).sin()).collect()
}

fn nibbles(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + 3) % 16) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndispatch_core::Prober;
    use std::sync::Arc;

    fn args(op: &str) -> BenchArgs {
        BenchArgs {
            op: Some(op.to_string()),
            m: 2,
            n: 16,
            k: 64,
            group_size: 32,
            iterations: 3,
            warmup: 1,
            capability: None,
        }
    }

    #[test]
    fn test_percentile() {
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&samples, 50.0), 3.0);
        assert_eq!(percentile(&samples, 100.0), 5.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_run_every_op_on_baseline() {
        let stubs = NativeStubs::new(Arc::new(Prober::fixed(CapabilityTag::Default))).unwrap();
        let pb = ProgressBar::hidden();
        for op in OPERATIONS {
            let result = run_op(op, &args(op), &stubs, &pb).unwrap();
            assert_eq!(result.operation, op);
            assert_eq!(result.iterations, 3);
            assert_eq!(result.kernel, Some(CapabilityTag::Default));
            assert!(result.min_seconds <= result.max_seconds);
        }
    }

    #[test]
    fn test_rejects_non_dividing_group_size() {
        let stubs = NativeStubs::new(Arc::new(Prober::fixed(CapabilityTag::Default))).unwrap();
        let mut bad = args("int4pack_mm");
        bad.group_size = 48;
        let err = run_op("int4pack_mm", &bad, &stubs, &ProgressBar::hidden()).unwrap_err();
        assert!(err.to_string().contains("must divide"));
    }
}
