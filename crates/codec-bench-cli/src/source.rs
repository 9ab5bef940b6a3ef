//! Source image discovery and PNG loading.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use codec_bench::{Error, ImageBuffer, PixelFormat};

/// Expand directories to the PNG files they contain, sorted by path.
pub fn collect_images(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)
                .with_context(|| format!("reading directory {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_png(path))
                .collect();
            found.sort();
            images.extend(found);
        } else if input.is_file() {
            images.push(input.clone());
        } else {
            bail!("No such image or directory: {}", input.display());
        }
    }
    if images.is_empty() {
        bail!("No PNG images found");
    }
    Ok(images)
}

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"))
}

/// Load a PNG as RGB(A), 8 or 16 bits per sample.
///
/// Palette and low bit depth images are expanded; grayscale is replicated to RGB.
pub fn load_png(path: &Path) -> codec_bench::Result<ImageBuffer> {
    decode_png(path).map_err(|e| Error::ImageLoad {
        path: path.to_path_buf(),
        reason: format!("{e:#}"),
    })
}

fn decode_png(path: &Path) -> anyhow::Result<ImageBuffer> {
    let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder.read_info().context("reading PNG header")?;

    let buf_size = reader
        .output_buffer_size()
        .context("PNG output buffer size unavailable")?;
    let mut buf = vec![0u8; buf_size];
    let frame = reader.next_frame(&mut buf)?;
    let (width, height) = (frame.width, frame.height);
    let sixteen = frame.bit_depth == png::BitDepth::Sixteen;

    let (channels, alpha) = match frame.color_type {
        png::ColorType::Rgb => (3, false),
        png::ColorType::Rgba => (4, true),
        png::ColorType::Grayscale => (1, false),
        png::ColorType::GrayscaleAlpha => (2, true),
        other => bail!("Unsupported PNG color type: {other:?}"),
    };
    let format = match (sixteen, alpha) {
        (false, false) => PixelFormat::Rgb8,
        (false, true) => PixelFormat::Rgba8,
        (true, false) => PixelFormat::Rgb16,
        (true, true) => PixelFormat::Rgba16,
    };

    let sample_bytes = if sixteen { 2 } else { 1 };
    let mut data = Vec::with_capacity(width as usize * height as usize * format.bytes_per_pixel());
    for row in buf.chunks_exact(frame.line_size).take(height as usize) {
        for px in row.chunks_exact(channels * sample_bytes) {
            let sample = |i: usize| &px[i * sample_bytes..(i + 1) * sample_bytes];
            let color = if channels <= 2 { [0, 0, 0] } else { [0, 1, 2] };
            for i in color {
                push_sample(&mut data, sample(i));
            }
            if alpha {
                push_sample(&mut data, sample(channels - 1));
            }
        }
    }

    let stride = width as usize * format.bytes_per_pixel();
    Ok(ImageBuffer::from_raw(data, width, height, stride, format)?)
}

/// PNG samples are big endian; buffers hold native endian samples.
fn push_sample(data: &mut Vec<u8>, sample: &[u8]) {
    match sample {
        [hi, lo] => data.extend_from_slice(&u16::from_be_bytes([*hi, *lo]).to_ne_bytes()),
        _ => data.extend_from_slice(sample),
    }
}
