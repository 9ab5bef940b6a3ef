//! Codec adapters.
//!
//! Each adapter implements [`CodecAdapter`] over one native library:
//! - precondition checks on the task and the source pixels
//! - quality to native distortion mapping
//! - incremental output buffering ([`output`])
//! - the event driven decode protocol ([`decode`])
//!
//! Which adapters are live is decided at build time by cargo features. The
//! [`CodecTable`] maps every [`Codec`] to either its adapter or a stub that
//! fails with "requires backend ...", so callers never need `cfg` checks.

pub mod decode;
pub mod encode;
pub mod output;
mod unavailable;

#[cfg(feature = "jpegxl")]
#[allow(unsafe_code)]
pub mod jpegxl;

#[cfg(feature = "webp")]
#[allow(unsafe_code)]
pub mod webp;

use std::sync::OnceLock;

pub use decode::{DecodeState, Decoded, DecoderEvent};
pub use encode::EncoderStatus;
pub use unavailable::UnavailableCodec;

use crate::check;
use crate::error::{Error, Result};
use crate::image::{ImageBuffer, PixelFormat};
use crate::task::{Codec, Quality, TaskInput};
use crate::timer::Timer;

/// Generic image description handed to native encoders and read back from decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicInfo {
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u32,
    /// Zero when the image has no alpha channel.
    pub alpha_bits: u32,
    pub alpha_premultiplied: bool,
    /// Keep the original color profile instead of converting to XYB. Set for lossless.
    pub uses_original_profile: bool,
}

impl BasicInfo {
    pub fn for_image(image: &ImageBuffer, lossless: bool) -> Self {
        let format = image.format();
        let bits = format.bits_per_channel();
        Self {
            width: image.width(),
            height: image.height(),
            bits_per_sample: bits,
            alpha_bits: if format.has_alpha() { bits } else { 0 },
            alpha_premultiplied: format.is_premultiplied(),
            uses_original_profile: lossless,
        }
    }
}

/// Durations measured around a decode, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseTimings {
    /// Whole adapter decode call.
    pub decode: f64,
    /// Post-processing after the pixels were produced. Part of `decode`, not added to it.
    pub color_conversion: f64,
}

/// Uniform encode/decode contract implemented by every codec.
///
/// Adapters keep no state between calls; every call creates and releases its
/// own native handle, so one adapter can serve many threads.
pub trait CodecAdapter: Send + Sync {
    fn codec(&self) -> Codec;

    /// Native library version, for diagnostics.
    fn version(&self) -> String;

    /// Whether the native backend was compiled in.
    fn is_available(&self) -> bool {
        true
    }

    /// Pixel formats accepted by [`encode`](Self::encode).
    fn supported_formats(&self) -> &'static [PixelFormat];

    /// Ordered lossy quality levels. Never contains the lossless mode.
    fn lossy_qualities(&self) -> Vec<u8> {
        self.codec().lossy_qualities()
    }

    fn encode(&self, task: &TaskInput, image: &ImageBuffer, quiet: bool) -> Result<Vec<u8>>;

    fn decode(&self, task: &TaskInput, encoded: &[u8], quiet: bool) -> Result<Decoded>;
}

/// Precondition checks shared by the live adapters.
///
/// `required` describes `supported` for the diagnostic.
pub(crate) fn check_task(
    codec: Codec,
    supported: &[PixelFormat],
    required: &'static str,
    task: &TaskInput,
    image: &ImageBuffer,
    quiet: bool,
) -> Result<()> {
    let settings = task.codec_settings;
    let invalid = |reason: String| Error::InvalidSettings {
        codec: codec.name(),
        reason,
        image: task.image_name(),
    };

    check!(
        settings.codec == codec,
        quiet,
        invalid(format!("task targets {}", settings.codec))
    );
    check!(
        supported.contains(&image.format()),
        quiet,
        Error::UnsupportedFormat {
            codec: codec.name(),
            required,
            actual: image.format(),
            image: task.image_name(),
        }
    );
    let efforts = codec.efforts();
    check!(
        efforts.contains(&settings.effort),
        quiet,
        invalid(format!(
            "effort {} outside {}..={}",
            settings.effort,
            efforts.start(),
            efforts.end()
        ))
    );
    if let Quality::Lossy(quality) = settings.quality {
        check!(
            codec.lossy_qualities().contains(&quality),
            quiet,
            invalid(format!("quality {quality} is not in the lossy quality space"))
        );
    }
    Ok(())
}

/// Adapter per codec, resolved once from the compiled-in backends.
pub struct CodecTable {
    jpegxl: Box<dyn CodecAdapter>,
    webp: Box<dyn CodecAdapter>,
}

impl CodecTable {
    /// Build the table for this build's features.
    pub fn detect() -> Self {
        #[cfg(feature = "jpegxl")]
        let jpegxl: Box<dyn CodecAdapter> = Box::new(jpegxl::JpegXlAdapter);
        #[cfg(not(feature = "jpegxl"))]
        let jpegxl: Box<dyn CodecAdapter> = Box::new(UnavailableCodec::new(Codec::JpegXl));

        #[cfg(feature = "webp")]
        let webp: Box<dyn CodecAdapter> = Box::new(webp::WebPAdapter);
        #[cfg(not(feature = "webp"))]
        let webp: Box<dyn CodecAdapter> = Box::new(UnavailableCodec::new(Codec::WebP));

        Self { jpegxl, webp }
    }

    /// Process-wide table, built on first use.
    pub fn global() -> &'static Self {
        static TABLE: OnceLock<CodecTable> = OnceLock::new();
        TABLE.get_or_init(Self::detect)
    }

    pub fn get(&self, codec: Codec) -> &dyn CodecAdapter {
        match codec {
            Codec::JpegXl => self.jpegxl.as_ref(),
            Codec::WebP => self.webp.as_ref(),
        }
    }

    /// Adapters in [`Codec::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn CodecAdapter> {
        Codec::ALL.into_iter().map(|codec| self.get(codec))
    }

    /// Codecs whose backend is compiled in.
    pub fn available(&self) -> Vec<Codec> {
        self.iter()
            .filter(|adapter| adapter.is_available())
            .map(|adapter| adapter.codec())
            .collect()
    }
}

/// Encode `image` with the codec named by the task.
pub fn encode(task: &TaskInput, image: &ImageBuffer, quiet: bool) -> Result<Vec<u8>> {
    CodecTable::global()
        .get(task.codec_settings.codec)
        .encode(task, image, quiet)
}

/// Decode `encoded` with the codec named by the task, timing the call.
pub fn decode(
    task: &TaskInput,
    encoded: &[u8],
    quiet: bool,
) -> Result<(ImageBuffer, PhaseTimings)> {
    let adapter = CodecTable::global().get(task.codec_settings.codec);
    let timer = Timer::new();
    let decoded = adapter.decode(task, encoded, quiet)?;
    let timings = PhaseTimings {
        decode: timer.seconds(),
        color_conversion: decoded.color_conversion_seconds,
    };
    Ok((decoded.image, timings))
}

/// Lossy quality levels of `codec`, in order.
pub fn quality_space(codec: Codec) -> Vec<u8> {
    CodecTable::global().get(codec).lossy_qualities()
}

/// Native library version of `codec`, or `"n/a"` when not compiled in.
pub fn codec_version(codec: Codec) -> String {
    CodecTable::global().get(codec).version()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::capture;
    use crate::task::CodecSettings;

    fn task(codec: Codec, quality: Quality, effort: u8) -> TaskInput {
        TaskInput::new("photo.png", CodecSettings::new(codec, quality, effort))
    }

    #[test]
    fn test_quality_spaces() {
        for codec in Codec::ALL {
            let space = quality_space(codec);
            assert!(!space.is_empty(), "{codec}");
            assert!(space.windows(2).all(|w| w[0] < w[1]), "{codec}");
        }
    }

    #[test]
    fn test_table_covers_every_codec() {
        let table = CodecTable::global();
        let codecs: Vec<Codec> = table.iter().map(|a| a.codec()).collect();
        assert_eq!(codecs, Codec::ALL);
        let compiled = usize::from(cfg!(feature = "webp")) + usize::from(cfg!(feature = "jpegxl"));
        assert_eq!(table.available().len(), compiled);
    }

    #[test]
    fn test_basic_info_for_image() {
        let image = ImageBuffer::new(5, 3, PixelFormat::Rgba16).unwrap();
        let info = BasicInfo::for_image(&image, true);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.alpha_bits, 16);
        assert!(info.uses_original_profile);
        let image = ImageBuffer::new(5, 3, PixelFormat::Rgb8).unwrap();
        assert_eq!(BasicInfo::for_image(&image, false).alpha_bits, 0);
    }

    #[test]
    fn test_check_task_preconditions() {
        let rgb = ImageBuffer::new(2, 2, PixelFormat::Rgb8).unwrap();
        let gray = ImageBuffer::new(2, 2, PixelFormat::Gray8).unwrap();
        let supported = [PixelFormat::Rgb8];
        let check = |task: &TaskInput, image: &ImageBuffer| {
            check_task(Codec::JpegXl, &supported, "RGB8", task, image, true)
        };

        assert!(check(&task(Codec::JpegXl, Quality::Lossy(99), 7), &rgb).is_ok());
        assert!(matches!(
            check(&task(Codec::JpegXl, Quality::Lossy(99), 7), &gray),
            Err(Error::UnsupportedFormat { .. })
        ));
        // 100 is not part of the JPEG XL lossy space.
        assert!(matches!(
            check(&task(Codec::JpegXl, Quality::Lossy(100), 7), &rgb),
            Err(Error::InvalidSettings { .. })
        ));
        assert!(check(&task(Codec::JpegXl, Quality::Lossless, 0), &rgb).is_err());
        assert!(check(&task(Codec::WebP, Quality::Lossless, 4), &rgb).is_err());
    }

    #[test]
    fn test_unsupported_format_diagnostic() {
        let gray = ImageBuffer::new(2, 2, PixelFormat::Gray8).unwrap();
        let t = task(Codec::JpegXl, Quality::Lossless, 7);
        let (result, lines) = capture::diagnostics(|| {
            check_task(
                Codec::JpegXl,
                &[PixelFormat::Rgb8, PixelFormat::Rgba8],
                "RGB8 or RGBA8",
                &t,
                &gray,
                false,
            )
        });
        let message = result.unwrap_err().to_string();
        assert_eq!(message, "jpegxl requires RGB8 or RGBA8 but got Gray8 when encoding photo.png");
        assert_eq!(lines, vec![message]);
    }

    #[cfg(not(feature = "jpegxl"))]
    #[test]
    fn test_missing_backend_fails_with_fixed_diagnostic() {
        let image = ImageBuffer::new(2, 2, PixelFormat::Rgb8).unwrap();
        let t = task(Codec::JpegXl, Quality::Lossless, 7);

        let (result, lines) = capture::diagnostics(|| encode(&t, &image, true));
        assert!(matches!(result, Err(Error::Unavailable { .. })));
        assert!(lines.is_empty());

        let (result, lines) = capture::diagnostics(|| decode(&t, &[0xFF, 0x0A], false));
        let message = result.unwrap_err().to_string();
        assert_eq!(message, "decoding images requires backend jpegxl (jpegxl)");
        assert_eq!(lines.len(), 1);

        assert_eq!(codec_version(Codec::JpegXl), "n/a");
        assert!(!CodecTable::global().get(Codec::JpegXl).is_available());
    }
}
