//! Run command: plan the task matrix and sweep it.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use codec_bench::codec;
use codec_bench::timer::format_seconds;
use codec_bench::{
    Codec, CodecSettings, Quality, SweepConfig, SweepSession, SweepSummary, plan_tasks,
};

use crate::source;

#[derive(Args)]
pub struct RunArgs {
    /// Source PNG images, or directories of them
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Codec to benchmark (jpegxl, webp)
    #[arg(short, long)]
    codec: Codec,

    /// Qualities: levels, inclusive ranges "A..B", "lossless", or "all"
    #[arg(long, value_delimiter = ',', default_value = "all")]
    quality: Vec<String>,

    /// Efforts; the codec default when omitted
    #[arg(long, value_delimiter = ',')]
    effort: Vec<u8>,

    /// Run every task this many times; timings are averaged in the reports
    #[arg(long, default_value_t = 1)]
    repetitions: usize,

    /// Save encoded payloads in this directory
    #[arg(long, env = "CODEC_BENCH_ENCODED_DIR")]
    encoded_dir: Option<PathBuf>,

    /// Decode payloads saved in --encoded-dir by an earlier run instead of encoding
    #[arg(long, requires = "encoded_dir")]
    load_encoded: bool,

    /// CSV file of finished tasks; read to resume, appended while running
    #[arg(long, env = "CODEC_BENCH_COMPLETED_TASKS")]
    completed_tasks: Option<PathBuf>,

    /// Only aggregate the completed-tasks file, run nothing
    #[arg(long, requires = "completed_tasks")]
    skip_all_remaining: bool,

    /// Directory for per-batch JSON results
    #[arg(long, env = "CODEC_BENCH_RESULTS_DIR")]
    results_dir: Option<PathBuf>,

    /// Worker threads in addition to the main one
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Run tasks in random order
    #[arg(long)]
    random_order: bool,

    /// Seed for --random-order
    #[arg(long)]
    seed: Option<u64>,

    /// Abort when more than this fraction of tasks fails
    #[arg(long, default_value_t = 0.0)]
    abort_above_fail_ratio: f64,
}

pub fn run(args: RunArgs, quiet: bool) -> Result<()> {
    let codec = args.codec;
    let qualities = parse_qualities(codec, &args.quality)?;
    let efforts = if args.effort.is_empty() {
        vec![codec.default_effort()]
    } else {
        args.effort.clone()
    };
    if !(0.0..=1.0).contains(&args.abort_above_fail_ratio) {
        bail!("--abort-above-fail-ratio must be within 0..=1");
    }

    let images = source::collect_images(&args.images)?;
    let settings = CodecSettings::matrix(codec, &qualities, &efforts);
    let plan = plan_tasks(&images, &settings, args.encoded_dir.as_deref());
    let mut tasks = Vec::with_capacity(plan.len() * args.repetitions);
    for _ in 0..args.repetitions {
        tasks.extend(plan.iter().cloned());
    }
    log::info!(
        "{} images x {} settings x {} repetitions with {} {}",
        images.len(),
        settings.len(),
        args.repetitions,
        codec,
        codec::codec_version(codec)
    );

    let mut builder = SweepConfig::builder()
        .quiet(quiet)
        .extra_threads(args.threads)
        .abort_above_fail_ratio(args.abort_above_fail_ratio)
        .random_order(args.random_order)
        .load_encoded_from_disk(args.load_encoded)
        .skip_all_remaining(args.skip_all_remaining);
    if let Some(seed) = args.seed {
        builder = builder.seed(seed);
    }
    if let Some(path) = &args.completed_tasks {
        builder = builder.completed_tasks_file(path);
    }
    if let Some(dir) = &args.results_dir {
        builder = builder.results_dir(dir);
    }

    let session = SweepSession::new(builder.build(), Box::new(source::load_png));
    let summary = session.run(tasks).context("Sweep failed")?;
    print_summary(&summary);
    Ok(())
}

/// Expand quality arguments into sorted, deduplicated qualities.
fn parse_qualities(codec: Codec, args: &[String]) -> Result<Vec<Quality>> {
    let space = codec::quality_space(codec);
    let mut qualities = Vec::new();
    for arg in args {
        let arg = arg.trim();
        if arg.eq_ignore_ascii_case("all") {
            qualities.extend(space.iter().copied().map(Quality::Lossy));
        } else if let Some((lo, hi)) = arg.split_once("..") {
            let lo: u8 = lo.trim().parse().with_context(|| format!("bad range start in '{arg}'"))?;
            let hi: u8 = hi.trim().parse().with_context(|| format!("bad range end in '{arg}'"))?;
            qualities.extend((lo..=hi).map(Quality::Lossy));
        } else {
            qualities.push(arg.parse::<Quality>()?);
        }
    }
    for quality in &qualities {
        if let Quality::Lossy(level) = quality {
            if !space.contains(level) {
                bail!(
                    "Quality {level} is outside the {codec} quality space {}..={}",
                    space.first().copied().unwrap_or_default(),
                    space.last().copied().unwrap_or_default()
                );
            }
        }
    }
    qualities.sort();
    qualities.dedup();
    Ok(qualities)
}

fn print_summary(summary: &SweepSummary) {
    if let Some(output) = summary.single_result() {
        let input = &output.task_input;
        println!("Input settings:");
        println!("  Image: {}", input.image_path.display());
        println!("  Codec: {}", input.codec_settings);
        if let Some(path) = &input.encoded_path {
            println!("  Encoded path: {}", path.display());
        }
        println!("Output stats:");
        println!(
            "  Dimensions: {}x{}, {} bits",
            output.image_width, output.image_height, output.bit_depth
        );
        println!(
            "  Encoded size: {} bytes ({:.3} bpp)",
            output.encoded_size,
            output.bits_per_pixel()
        );
        println!("  Encoding duration: {}", format_seconds(output.encoding_duration));
        println!("  Decoding duration: {}", format_seconds(output.decoding_duration));
        println!(
            "  Color conversion duration (if available): {}",
            format_seconds(output.decoding_color_conversion_duration)
        );
        return;
    }

    println!(
        "{} tasks ({} loaded, {} run, {} failed, {} skipped) in {}",
        summary.outputs.len(),
        summary.loaded,
        summary.completed_since_start,
        summary.failures,
        summary.skipped,
        format_seconds(summary.elapsed_seconds)
    );
    println!();
    println!(
        "{:<24} {:>8} {:>10} {:>12} {:>12}",
        "Batch", "Entries", "Mean bpp", "Encode", "Decode"
    );
    println!("{:-<70}", "");
    for batch in &summary.batches {
        let mean = |s: &Option<codec_bench::Summary>| s.as_ref().map_or(0.0, |s| s.mean);
        println!(
            "{:<24} {:>8} {:>10.3} {:>12} {:>12}",
            batch.name,
            batch.entries.len(),
            mean(&batch.bits_per_pixel),
            format_seconds(mean(&batch.encoding_seconds)),
            format_seconds(mean(&batch.decoding_seconds))
        );
    }
}
