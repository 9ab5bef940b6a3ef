//! WebP adapter over libwebp (`libwebp-sys`).
//!
//! libwebp encodes and decodes in one call, so the backends here present it
//! through the same stepwise protocol as the other codecs. The encoder runs
//! `WebPEncode` on the first output request and then hands out its bytes in
//! chunks. The decoder reports basic info, asks for an output buffer, then
//! runs `WebPDecode` straight into that buffer. Native handles are released
//! on drop.

use std::ffi::{c_int, c_void};
use std::marker::PhantomData;
use std::ptr;

use libwebp_sys::{
    VP8StatusCode, WEBP_CSP_MODE, WebPConfig, WebPDecode, WebPDecoderConfig, WebPEncode,
    WebPEncodingError, WebPFreeDecBuffer, WebPGetEncoderVersion, WebPGetFeatures,
    WebPMemoryWrite, WebPMemoryWriter, WebPMemoryWriterClear, WebPMemoryWriterInit,
    WebPPicture, WebPPictureFree, WebPPictureImportRGB, WebPPictureImportRGBA,
    WebPRGBABuffer,
};

use crate::codec::decode::{DecoderBackend, DecoderCalls, DecoderEvent, decode_with};
use crate::codec::encode::{EncoderBackend, EncoderCalls, EncoderStatus, encode_with};
use crate::codec::{BasicInfo, CodecAdapter, Decoded, check_task};
use crate::error::{Error, Result, fail};
use crate::image::{ImageBuffer, PixelFormat};
use crate::task::{Codec, TaskInput};

/// Largest width or height libwebp accepts.
const MAX_DIMENSION: u32 = 16383;

const SUPPORTED: &[PixelFormat] = &[PixelFormat::Rgb8, PixelFormat::Rgba8];

/// libwebp version as `major.minor.patch`.
pub fn version() -> String {
    // SAFETY: takes no arguments and only reads a compile-time constant.
    let v = unsafe { WebPGetEncoderVersion() } as u32;
    format!("{}.{}.{}", (v >> 16) & 0xff, (v >> 8) & 0xff, v & 0xff)
}

/// WebP codec adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebPAdapter;

impl CodecAdapter for WebPAdapter {
    fn codec(&self) -> Codec {
        Codec::WebP
    }

    fn version(&self) -> String {
        version()
    }

    fn supported_formats(&self) -> &'static [PixelFormat] {
        SUPPORTED
    }

    fn encode(&self, task: &TaskInput, image: &ImageBuffer, quiet: bool) -> Result<Vec<u8>> {
        check_task(Codec::WebP, SUPPORTED, "RGB8 or RGBA8", task, image, quiet)?;
        let encoder = WebPEncoder::new().map_err(|operation| {
            fail(
                quiet,
                Error::Init {
                    codec: Codec::WebP.name(),
                    operation,
                },
            )
        })?;
        encode_with(encoder, task, image, quiet)
    }

    fn decode(&self, task: &TaskInput, encoded: &[u8], quiet: bool) -> Result<Decoded> {
        let decoder = WebPDecoder::new().ok_or_else(|| {
            fail(
                quiet,
                Error::Init {
                    codec: Codec::WebP.name(),
                    operation: "WebPInitDecoderConfig()",
                },
            )
        })?;
        decode_with(decoder, task, encoded, quiet)
    }
}

struct WebPEncoder<'img> {
    config: WebPConfig,
    /// Owns the imported pixels until `WebPPictureFree`.
    picture: WebPPicture,
    /// Receives the bitstream through `WebPMemoryWrite`.
    writer: WebPMemoryWriter,
    encoded: bool,
    emitted: usize,
    error: i32,
    _frame: PhantomData<&'img ImageBuffer>,
}

impl WebPEncoder<'_> {
    fn new() -> std::result::Result<Self, &'static str> {
        let mut config = WebPConfig::new().map_err(|()| "WebPConfigInit()")?;
        // Single-threaded, like every other backend.
        config.thread_level = 0;
        let picture = WebPPicture::new().map_err(|()| "WebPPictureInit()")?;
        let mut writer = WebPMemoryWriter {
            mem: ptr::null_mut(),
            size: 0,
            max_size: 0,
            pad: [0],
        };
        // SAFETY: `writer` is a valid, exclusively borrowed struct.
        unsafe { WebPMemoryWriterInit(&mut writer) };
        Ok(Self {
            config,
            picture,
            writer,
            encoded: false,
            emitted: 0,
            error: 0,
            _frame: PhantomData,
        })
    }

    fn picture_error(&mut self) -> EncoderStatus {
        self.error = self.picture.error_code as i32;
        EncoderStatus::Error
    }

    fn run(&mut self) -> EncoderStatus {
        self.picture.writer = Some(WebPMemoryWrite);
        self.picture.custom_ptr = ptr::from_mut(&mut self.writer).cast::<c_void>();
        // SAFETY: `config` was initialized by `WebPConfigInit`, `picture` holds
        // the imported pixels and `custom_ptr` points at `self.writer`, which
        // outlives the call.
        let ok = unsafe { WebPEncode(&self.config, &mut self.picture) };
        if ok == 0 {
            return self.picture_error();
        }
        self.encoded = true;
        EncoderStatus::Success
    }

    fn bitstream(&self) -> &[u8] {
        if self.writer.mem.is_null() {
            return &[];
        }
        // SAFETY: `WebPMemoryWrite` keeps `size` initialized bytes at `mem`.
        unsafe { std::slice::from_raw_parts(self.writer.mem, self.writer.size) }
    }
}

impl Drop for WebPEncoder<'_> {
    fn drop(&mut self) {
        // SAFETY: both were initialized in `new` and are released exactly once.
        unsafe {
            WebPPictureFree(&mut self.picture);
            WebPMemoryWriterClear(&mut self.writer);
        }
    }
}

impl<'img> EncoderBackend<'img> for WebPEncoder<'img> {
    const CODEC: Codec = Codec::WebP;
    const CALLS: EncoderCalls = EncoderCalls {
        set_basic_info: "WebPPicture.width/height",
        set_color_encoding: "WebPPicture.use_argb",
        set_lossless: "WebPConfig.lossless",
        set_distortion: "WebPConfig.quality",
        set_effort: "WebPConfig.method",
        add_image_frame: "WebPPictureImportRGB(A)",
        process_output: "WebPEncode",
    };

    fn set_basic_info(&mut self, info: &BasicInfo) -> EncoderStatus {
        if info.width > MAX_DIMENSION || info.height > MAX_DIMENSION || info.bits_per_sample != 8 {
            self.error = WebPEncodingError::VP8_ENC_ERROR_BAD_DIMENSION as i32;
            return EncoderStatus::Error;
        }
        self.picture.width = info.width as c_int;
        self.picture.height = info.height as c_int;
        EncoderStatus::Success
    }

    fn set_color_encoding(&mut self) -> EncoderStatus {
        // Import sRGB samples as ARGB; lossless encoding must not go through YUV.
        self.picture.use_argb = 1;
        EncoderStatus::Success
    }

    fn set_lossless(&mut self) -> EncoderStatus {
        self.config.lossless = 1;
        // Keep RGB under fully transparent pixels, otherwise lossless is not bit-exact.
        self.config.exact = 1;
        EncoderStatus::Success
    }

    fn distortion_for_quality(&self, quality: u8) -> f32 {
        f32::from(quality)
    }

    fn set_distortion(&mut self, distortion: f32) -> EncoderStatus {
        self.config.lossless = 0;
        self.config.quality = distortion;
        EncoderStatus::Success
    }

    fn set_effort(&mut self, effort: u8) -> EncoderStatus {
        self.config.method = c_int::from(effort);
        EncoderStatus::Success
    }

    fn add_image_frame(&mut self, image: &'img ImageBuffer) -> EncoderStatus {
        let Ok(stride) = c_int::try_from(image.stride()) else {
            self.error = WebPEncodingError::VP8_ENC_ERROR_BAD_DIMENSION as i32;
            return EncoderStatus::Error;
        };
        let pixels = image.data().as_ptr();
        // SAFETY: `pixels` holds `height` rows `stride` bytes apart, each with
        // `width` pixels of the declared format. libwebp copies them.
        let ok = unsafe {
            if image.format().has_alpha() {
                WebPPictureImportRGBA(&mut self.picture, pixels, stride)
            } else {
                WebPPictureImportRGB(&mut self.picture, pixels, stride)
            }
        };
        if ok == 0 {
            return self.picture_error();
        }
        EncoderStatus::Success
    }

    fn close_input(&mut self) {}

    fn process_output(&mut self, out: &mut [u8]) -> (usize, EncoderStatus) {
        if !self.encoded && self.run() != EncoderStatus::Success {
            return (0, EncoderStatus::Error);
        }
        let emitted = self.emitted;
        let encoded = self.bitstream();
        let count = out.len().min(encoded.len() - emitted);
        out[..count].copy_from_slice(&encoded[emitted..emitted + count]);
        let done = emitted + count == encoded.len();
        self.emitted += count;
        let status = if done {
            EncoderStatus::Success
        } else {
            EncoderStatus::NeedMoreOutput
        };
        (count, status)
    }

    fn error_code(&self) -> i32 {
        self.error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Stage {
    #[default]
    Header,
    OutputBuffer,
    Pixels,
    Done,
}

struct WebPDecoder<'data> {
    config: WebPDecoderConfig,
    input: Option<&'data [u8]>,
    closed: bool,
    info: Option<BasicInfo>,
    /// Destination pixels, registered as external memory in `config.output`.
    output: Option<Vec<u8>>,
    stage: Stage,
    /// Status of the last failed native call.
    failed: Option<(&'static str, VP8StatusCode)>,
}

impl WebPDecoder<'_> {
    fn new() -> Option<Self> {
        Some(Self {
            config: WebPDecoderConfig::new().ok()?,
            input: None,
            closed: false,
            info: None,
            output: None,
            stage: Stage::Header,
            failed: None,
        })
    }

    fn error(&mut self, call: &'static str, status: VP8StatusCode) -> DecoderEvent {
        self.failed = Some((call, status));
        DecoderEvent::Error
    }

    fn read_header(&mut self) -> DecoderEvent {
        let Some(input) = self.input else {
            return DecoderEvent::NeedMoreInput;
        };
        // SAFETY: `input` is a live slice and `config.input` is owned by `self`.
        let status =
            unsafe { WebPGetFeatures(input.as_ptr(), input.len(), &mut self.config.input) };
        if status != VP8StatusCode::VP8_STATUS_OK {
            return self.error("WebPGetFeatures", status);
        }
        let features = self.config.input;
        if features.has_animation != 0 {
            return self.error("WebPGetFeatures", VP8StatusCode::VP8_STATUS_UNSUPPORTED_FEATURE);
        }
        self.info = Some(BasicInfo {
            width: features.width as u32,
            height: features.height as u32,
            bits_per_sample: 8,
            alpha_bits: if features.has_alpha != 0 { 8 } else { 0 },
            alpha_premultiplied: false,
            uses_original_profile: true,
        });
        self.stage = Stage::OutputBuffer;
        DecoderEvent::BasicInfo
    }

    fn decode_pixels(&mut self) -> DecoderEvent {
        let (Some(input), Some(info)) = (self.input, self.info) else {
            return DecoderEvent::Error;
        };
        if self.output.is_none() {
            return DecoderEvent::Error;
        }
        // SAFETY: `config.output` points at the bound buffer, which is owned by
        // `self.output` and large enough for `height` rows of `stride` bytes.
        let status = unsafe { WebPDecode(input.as_ptr(), input.len(), &mut self.config) };
        if status != VP8StatusCode::VP8_STATUS_OK {
            return self.error("WebPDecode", status);
        }
        let output = &self.config.output;
        if output.width as u32 != info.width || output.height as u32 != info.height {
            return self.error("WebPDecode", VP8StatusCode::VP8_STATUS_BITSTREAM_ERROR);
        }
        self.stage = Stage::Done;
        DecoderEvent::FullImage
    }
}

impl Drop for WebPDecoder<'_> {
    fn drop(&mut self) {
        // SAFETY: the output buffer is external memory, so only libwebp's own
        // bookkeeping is released here.
        unsafe { WebPFreeDecBuffer(&mut self.config.output) };
    }
}

impl<'data> DecoderBackend<'data> for WebPDecoder<'data> {
    const CODEC: Codec = Codec::WebP;
    const CALLS: DecoderCalls = DecoderCalls {
        subscribe: "WebPInitDecoderConfig",
        set_input: "WebPDecode",
        basic_info: "WebPGetFeatures",
        set_image_out_buffer: "WebPDecoderConfig.output",
    };

    fn subscribe(&mut self, _events: &[DecoderEvent]) -> DecoderEvent {
        DecoderEvent::Success
    }

    fn set_input(&mut self, data: &'data [u8]) -> DecoderEvent {
        self.input = Some(data);
        DecoderEvent::Success
    }

    fn close_input(&mut self) {
        self.closed = true;
    }

    fn process_input(&mut self) -> DecoderEvent {
        if !self.closed {
            return DecoderEvent::NeedMoreInput;
        }
        match self.stage {
            Stage::Header => self.read_header(),
            Stage::OutputBuffer if self.output.is_none() => DecoderEvent::NeedImageOutBuffer,
            Stage::OutputBuffer => {
                self.stage = Stage::Pixels;
                self.decode_pixels()
            }
            Stage::Pixels => self.decode_pixels(),
            Stage::Done if self.output.is_some() => DecoderEvent::Success,
            Stage::Done => DecoderEvent::Error,
        }
    }

    fn native_error(&self) -> Option<(&'static str, i32)> {
        self.failed.map(|(call, status)| (call, status as i32))
    }

    fn basic_info(&mut self) -> std::result::Result<BasicInfo, DecoderEvent> {
        self.info.ok_or(DecoderEvent::Error)
    }

    fn set_image_out_buffer(
        &mut self,
        format: PixelFormat,
        stride: usize,
        buffer: Vec<u8>,
    ) -> DecoderEvent {
        let colorspace = match format {
            PixelFormat::Rgb8 => WEBP_CSP_MODE::MODE_RGB,
            PixelFormat::Rgba8 => WEBP_CSP_MODE::MODE_RGBA,
            _ => return DecoderEvent::Error,
        };
        let Ok(stride) = c_int::try_from(stride) else {
            return DecoderEvent::Error;
        };
        let buffer = self.output.insert(buffer);
        let output = &mut self.config.output;
        output.colorspace = colorspace;
        output.is_external_memory = 1;
        output.u.RGBA = WebPRGBABuffer {
            rgba: buffer.as_mut_ptr(),
            stride,
            size: buffer.len(),
        };
        DecoderEvent::Success
    }

    fn take_image_out_buffer(&mut self) -> Option<Vec<u8>> {
        self.output.take()
    }
}
