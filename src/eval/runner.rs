//! Single task execution: encode, decode, verify, measure.

use std::fs;

use crate::check;
use crate::codec;
use crate::error::{Error, Result, fail};
use crate::image::ImageBuffer;
use crate::task::{TaskInput, TaskOutput};
use crate::timer::Timer;

/// Where the encoded payload of a task comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// Encode in memory only.
    Encode,
    /// Encode and write the payload to the task's encoded path.
    EncodeAndSave,
    /// Read a payload saved by an earlier run. The encoding duration is zero.
    LoadFromDisk,
}

/// Run one task against an already loaded source image.
///
/// The decoded image must have the source dimensions, and lossless tasks must
/// reproduce the source pixels exactly.
pub fn encode_decode(
    task: &TaskInput,
    image: &ImageBuffer,
    mode: EncodeMode,
    quiet: bool,
) -> Result<TaskOutput> {
    let (encoded, encoding_duration) = match mode {
        EncodeMode::LoadFromDisk => {
            let path = encoded_path(task, quiet)?;
            let data = fs::read(path).map_err(|source| {
                fail(
                    quiet,
                    Error::EncodedRead {
                        path: path.to_path_buf(),
                        source,
                    },
                )
            })?;
            (data, 0.0)
        }
        EncodeMode::Encode | EncodeMode::EncodeAndSave => {
            let timer = Timer::new();
            let data = codec::encode(task, image, quiet)?;
            let seconds = timer.seconds();
            if mode == EncodeMode::EncodeAndSave {
                save(task, &data, quiet)?;
            }
            (data, seconds)
        }
    };

    let (decoded, timings) = codec::decode(task, &encoded, quiet)?;
    check!(
        (decoded.width(), decoded.height()) == (image.width(), image.height()),
        quiet,
        Error::DimensionMismatch {
            expected: (image.width(), image.height()),
            actual: (decoded.width(), decoded.height()),
        }
    );
    if task.codec_settings.quality.is_lossless() {
        check!(
            matches_source(image, &decoded),
            quiet,
            Error::LosslessMismatch {
                codec: task.codec_settings.codec.name(),
                image: task.image_name(),
            }
        );
    }

    Ok(TaskOutput {
        task_input: task.clone(),
        image_width: image.width(),
        image_height: image.height(),
        bit_depth: image.format().bits_per_channel(),
        encoded_size: encoded.len(),
        encoding_duration,
        decoding_duration: timings.decode,
        decoding_color_conversion_duration: timings.color_conversion,
    })
}

fn encoded_path(task: &TaskInput, quiet: bool) -> Result<&std::path::Path> {
    task.encoded_path.as_deref().ok_or_else(|| {
        fail(
            quiet,
            Error::InvalidTask(format!("no encoded path for {}", task.image_name())),
        )
    })
}

fn save(task: &TaskInput, data: &[u8], quiet: bool) -> Result<()> {
    let path = encoded_path(task, quiet)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| fail(quiet, e.into()))?;
    }
    fs::write(path, data).map_err(|e| fail(quiet, e.into()))
}

/// Bit-exact comparison that tolerates a dropped opaque alpha channel.
fn matches_source(source: &ImageBuffer, decoded: &ImageBuffer) -> bool {
    if source.format() == decoded.format() {
        source.same_pixels(decoded)
    } else {
        source.with_opaque_alpha().same_pixels(&decoded.with_opaque_alpha())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PixelFormat;
    use crate::task::{Codec, CodecSettings, Quality};

    fn gradient(width: u32, height: u32, format: PixelFormat) -> ImageBuffer {
        let bpp = format.bytes_per_pixel();
        let mut data = vec![0u8; width as usize * height as usize * bpp];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i * 7 % 251) as u8;
        }
        ImageBuffer::from_raw(data, width, height, width as usize * bpp, format).unwrap()
    }

    #[test]
    fn test_opaque_alpha_matches_rgb() {
        let rgb = gradient(3, 2, PixelFormat::Rgb8);
        let rgba = rgb.with_opaque_alpha();
        assert!(matches_source(&rgba, &rgb));
        assert!(matches_source(&rgb, &rgb));

        let mut data = rgba.clone().into_raw();
        data[3] = 254;
        let translucent = ImageBuffer::from_raw(data, 3, 2, 12, PixelFormat::Rgba8).unwrap();
        assert!(!matches_source(&translucent, &rgb));
    }

    #[test]
    fn test_load_without_encoded_path_fails() {
        let image = gradient(2, 2, PixelFormat::Rgb8);
        let task = TaskInput::new("a.png", CodecSettings::new(Codec::WebP, Quality::Lossless, 4));
        let result = encode_decode(&task, &image, EncodeMode::LoadFromDisk, true);
        assert!(matches!(result, Err(Error::InvalidTask(_))));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let image = gradient(2, 2, PixelFormat::Rgb8);
        let mut task =
            TaskInput::new("a.png", CodecSettings::new(Codec::WebP, Quality::Lossless, 4));
        task.encoded_path = Some(dir.path().join("missing.webp"));
        let result = encode_decode(&task, &image, EncodeMode::LoadFromDisk, true);
        match result {
            Err(Error::EncodedRead { path, source }) => {
                assert_eq!(path, dir.path().join("missing.webp"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(feature = "webp")]
    #[test]
    fn test_save_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let image = gradient(16, 8, PixelFormat::Rgba8);
        let mut task =
            TaskInput::new("grad.png", CodecSettings::new(Codec::WebP, Quality::Lossless, 4));
        task.encoded_path = Some(dir.path().join("nested").join("grad.webp"));

        let saved = encode_decode(&task, &image, EncodeMode::EncodeAndSave, true).unwrap();
        let on_disk = fs::metadata(task.encoded_path.as_ref().unwrap()).unwrap().len();
        assert_eq!(on_disk as usize, saved.encoded_size);
        assert_eq!(saved.bit_depth, 8);
        assert!(saved.decoding_color_conversion_duration <= saved.decoding_duration);

        let loaded = encode_decode(&task, &image, EncodeMode::LoadFromDisk, true).unwrap();
        assert_eq!(loaded.encoded_size, saved.encoded_size);
        assert_eq!(loaded.encoding_duration, 0.0);
        assert_eq!((loaded.image_width, loaded.image_height), (16, 8));
    }

    #[cfg(feature = "webp")]
    #[test]
    fn test_lossy_task_output() {
        let image = gradient(32, 32, PixelFormat::Rgb8);
        let task = TaskInput::new(
            "grad.png",
            CodecSettings::new(Codec::WebP, Quality::Lossy(75), 4),
        );
        let output = encode_decode(&task, &image, EncodeMode::Encode, true).unwrap();
        assert!(output.encoded_size > 0);
        assert!(output.encoding_duration > 0.0);
        assert!(output.bits_per_pixel() > 0.0);
        assert_eq!(output.task_input, task);
    }

    #[cfg(not(feature = "jpegxl"))]
    #[test]
    fn test_unavailable_codec_fails_task() {
        let image = gradient(2, 2, PixelFormat::Rgb8);
        let task = TaskInput::new("a.png", CodecSettings::new(Codec::JpegXl, Quality::Lossless, 7));
        let result = encode_decode(&task, &image, EncodeMode::Encode, true);
        assert!(matches!(result, Err(Error::Unavailable { .. })));
    }
}
