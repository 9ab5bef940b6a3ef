//! Codecs command.

use anyhow::Result;
use codec_bench::{Codec, CodecTable};
use serde::Serialize;

/// One row of the codec listing.
#[derive(Debug, Serialize)]
struct CodecInfo {
    codec: Codec,
    version: String,
    available: bool,
    min_quality: u8,
    max_quality: u8,
    min_effort: u8,
    max_effort: u8,
    default_effort: u8,
    formats: Vec<String>,
}

fn collect() -> Vec<CodecInfo> {
    CodecTable::global()
        .iter()
        .map(|adapter| {
            let codec = adapter.codec();
            let qualities = adapter.lossy_qualities();
            let efforts = codec.efforts();
            CodecInfo {
                codec,
                version: adapter.version(),
                available: adapter.is_available(),
                min_quality: qualities.first().copied().unwrap_or_default(),
                max_quality: qualities.last().copied().unwrap_or_default(),
                min_effort: *efforts.start(),
                max_effort: *efforts.end(),
                default_effort: codec.default_effort(),
                formats: adapter
                    .supported_formats()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            }
        })
        .collect()
}

pub fn run(json: bool) -> Result<()> {
    let codecs = collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&codecs)?);
        return Ok(());
    }

    println!(
        "{:<8} {:<10} {:<10} {:>9} {:>9}  {}",
        "Codec", "Version", "Available", "Quality", "Effort", "Formats"
    );
    println!("{:-<70}", "");
    for info in &codecs {
        println!(
            "{:<8} {:<10} {:<10} {:>9} {:>9}  {}",
            info.codec.name(),
            info.version,
            if info.available { "yes" } else { "no" },
            format!("{}..={}", info.min_quality, info.max_quality),
            format!("{}..={}", info.min_effort, info.max_effort),
            if info.formats.is_empty() { "-".to_string() } else { info.formats.join(", ") }
        );
    }
    Ok(())
}
