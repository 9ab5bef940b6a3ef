//! Statistics command.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use codec_bench::eval::report::read_completed;
use codec_bench::stats::Summary;
use codec_bench::timer::format_seconds;
use codec_bench::TaskOutput;

pub fn run(input: PathBuf, by_codec: bool, verbose: bool) -> Result<()> {
    if verbose {
        log::debug!("Loading results from: {}", input.display());
    }

    let results = read_completed(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    println!("Total results: {}", results.len());
    println!();
    print_overall_stats(&results);

    if by_codec {
        println!();
        print_by_codec(&results);
    }

    Ok(())
}

fn column(results: &[TaskOutput], f: impl Fn(&TaskOutput) -> f64) -> Vec<f64> {
    results.iter().map(f).collect()
}

fn print_overall_stats(results: &[TaskOutput]) {
    println!("Overall Statistics:");
    println!("{:-<60}", "");

    if let Some(summary) = Summary::compute(&column(results, |r| r.encoded_size as f64)) {
        println!("Encoded size (bytes):");
        println!("  Mean: {:.0}, Median: {:.0}", summary.mean, summary.median);
        println!("  Min: {:.0}, Max: {:.0}", summary.min, summary.max);
        println!("  StdDev: {:.0}", summary.std_dev);
    }

    if let Some(summary) = Summary::compute(&column(results, TaskOutput::bits_per_pixel)) {
        println!("Bits per pixel:");
        println!("  Mean: {:.3}, Median: {:.3}", summary.mean, summary.median);
        println!("  Min: {:.3}, Max: {:.3}", summary.min, summary.max);
    }

    let timings: [(&str, fn(&TaskOutput) -> f64); 3] = [
        ("Encoding", |r| r.encoding_duration),
        ("Decoding", |r| r.decoding_duration),
        ("Color conversion", |r| r.decoding_color_conversion_duration),
    ];
    for (label, f) in timings {
        if let Some(summary) = Summary::compute(&column(results, f)) {
            println!("{label} duration:");
            println!(
                "  Mean: {}, Median: {}, p95: {}",
                format_seconds(summary.mean),
                format_seconds(summary.median),
                format_seconds(summary.p95)
            );
        }
    }
}

fn print_by_codec(results: &[TaskOutput]) {
    println!("Statistics by Codec:");
    println!("{:-<60}", "");

    let mut by_config: BTreeMap<String, Vec<&TaskOutput>> = BTreeMap::new();
    for r in results {
        let settings = &r.task_input.codec_settings;
        let name = settings
            .codec
            .pretty_name(settings.quality.is_lossless(), settings.effort);
        by_config.entry(name).or_default().push(r);
    }

    println!(
        "{:<24} {:>8} {:>10} {:>12} {:>12}",
        "Codec", "Results", "Avg bpp", "Avg encode", "Avg decode"
    );
    println!("{:-<70}", "");

    for (name, group) in by_config {
        let avg = |f: fn(&TaskOutput) -> f64| {
            group.iter().map(|r| f(r)).sum::<f64>() / group.len().max(1) as f64
        };
        println!(
            "{:<24} {:>8} {:>10.3} {:>12} {:>12}",
            name,
            group.len(),
            avg(TaskOutput::bits_per_pixel),
            format_seconds(avg(|r| r.encoding_duration)),
            format_seconds(avg(|r| r.decoding_duration))
        );
    }
}
