//! JPEG XL adapter over libjxl (`jpegxl-sys`).
//!
//! Both native handles are owned by small RAII wrappers whose `Drop` calls
//! the matching `Destroy`, so every early return releases them. No parallel
//! runner is registered: libjxl runs single-threaded.

use std::mem::MaybeUninit;
use std::ptr;

use jpegxl_sys::color::color_encoding::{JxlColorEncoding, JxlRenderingIntent};
use jpegxl_sys::common::types::{JxlBool, JxlDataType, JxlEndianness, JxlPixelFormat};
use jpegxl_sys::decode::{
    JxlDecoder, JxlDecoderCloseInput, JxlDecoderCreate, JxlDecoderDestroy,
    JxlDecoderGetBasicInfo, JxlDecoderProcessInput, JxlDecoderSetImageOutBuffer,
    JxlDecoderSetInput, JxlDecoderStatus, JxlDecoderSubscribeEvents,
};
use jpegxl_sys::encoder::encode::{
    JxlColorEncodingSetToSRGB, JxlEncoder, JxlEncoderAddImageFrame, JxlEncoderCloseInput,
    JxlEncoderCreate, JxlEncoderDestroy, JxlEncoderDistanceFromQuality,
    JxlEncoderFrameSettingId, JxlEncoderFrameSettings, JxlEncoderFrameSettingsCreate,
    JxlEncoderFrameSettingsSetOption, JxlEncoderGetError, JxlEncoderInitBasicInfo,
    JxlEncoderProcessOutput, JxlEncoderSetBasicInfo, JxlEncoderSetColorEncoding,
    JxlEncoderSetFrameDistance, JxlEncoderSetFrameLossless, JxlEncoderStatus,
    JxlEncoderVersion,
};
use jpegxl_sys::metadata::codestream_header::JxlBasicInfo;

use crate::codec::decode::{DecoderBackend, DecoderCalls, DecoderEvent, decode_with};
use crate::codec::encode::{EncoderBackend, EncoderCalls, EncoderStatus, encode_with};
use crate::codec::{BasicInfo, CodecAdapter, Decoded, check_task};
use crate::error::{Error, Result, fail};
use crate::image::{ImageBuffer, PixelFormat};
use crate::task::{Codec, TaskInput};

const SUPPORTED: &[PixelFormat] = &[
    PixelFormat::Rgb8,
    PixelFormat::Rgba8,
    PixelFormat::Rgba8Premultiplied,
    PixelFormat::Rgb16,
    PixelFormat::Rgba16,
];

/// libjxl version as `major.minor.patch`.
pub fn version() -> String {
    // SAFETY: no arguments, returns a constant.
    let v = unsafe { JxlEncoderVersion() };
    format!("{}.{}.{}", v / 1_000_000, v % 1_000_000 / 1000, v % 1000)
}

fn jxl_bool(value: bool) -> JxlBool {
    if value { JxlBool::True } else { JxlBool::False }
}

fn pixel_format(format: PixelFormat, stride: usize) -> JxlPixelFormat {
    JxlPixelFormat {
        num_channels: format.channels() as u32,
        data_type: if format.bytes_per_channel() == 1 {
            JxlDataType::Uint8
        } else {
            JxlDataType::Uint16
        },
        endianness: JxlEndianness::Native,
        align: stride,
    }
}

/// JPEG XL codec adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegXlAdapter;

impl CodecAdapter for JpegXlAdapter {
    fn codec(&self) -> Codec {
        Codec::JpegXl
    }

    fn version(&self) -> String {
        version()
    }

    fn supported_formats(&self) -> &'static [PixelFormat] {
        SUPPORTED
    }

    fn encode(&self, task: &TaskInput, image: &ImageBuffer, quiet: bool) -> Result<Vec<u8>> {
        check_task(Codec::JpegXl, SUPPORTED, "RGB(A)", task, image, quiet)?;
        let encoder = JxlEncoderHandle::new().map_err(|operation| {
            fail(
                quiet,
                Error::Init {
                    codec: Codec::JpegXl.name(),
                    operation,
                },
            )
        })?;
        encode_with(encoder, task, image, quiet)
    }

    fn decode(&self, task: &TaskInput, encoded: &[u8], quiet: bool) -> Result<Decoded> {
        let decoder = JxlDecoderHandle::new().ok_or_else(|| {
            fail(
                quiet,
                Error::Init {
                    codec: Codec::JpegXl.name(),
                    operation: "JxlDecoderCreate()",
                },
            )
        })?;
        decode_with(decoder, task, encoded, quiet)
    }
}

struct JxlEncoderHandle<'img> {
    encoder: *mut JxlEncoder,
    /// Owned by `encoder`.
    frame_settings: *mut JxlEncoderFrameSettings,
    _frame: Option<&'img ImageBuffer>,
}

impl JxlEncoderHandle<'_> {
    fn new() -> std::result::Result<Self, &'static str> {
        // SAFETY: a null memory manager selects the default allocator.
        let encoder = unsafe { JxlEncoderCreate(ptr::null()) };
        if encoder.is_null() {
            return Err("JxlEncoderCreate()");
        }
        // SAFETY: `encoder` is valid; null means default settings.
        let frame_settings = unsafe { JxlEncoderFrameSettingsCreate(encoder, ptr::null()) };
        if frame_settings.is_null() {
            // SAFETY: created above and not shared.
            unsafe { JxlEncoderDestroy(encoder) };
            return Err("JxlEncoderFrameSettingsCreate()");
        }
        Ok(Self {
            encoder,
            frame_settings,
            _frame: None,
        })
    }
}

impl Drop for JxlEncoderHandle<'_> {
    fn drop(&mut self) {
        // SAFETY: the handle was created in `new` and is destroyed exactly once.
        unsafe { JxlEncoderDestroy(self.encoder) };
    }
}

fn encoder_status(status: JxlEncoderStatus) -> EncoderStatus {
    match status {
        JxlEncoderStatus::Success => EncoderStatus::Success,
        JxlEncoderStatus::NeedMoreOutput => EncoderStatus::NeedMoreOutput,
        _ => EncoderStatus::Error,
    }
}

impl<'img> EncoderBackend<'img> for JxlEncoderHandle<'img> {
    const CODEC: Codec = Codec::JpegXl;
    const CALLS: EncoderCalls = EncoderCalls {
        set_basic_info: "JxlEncoderSetBasicInfo",
        set_color_encoding: "JxlEncoderSetColorEncoding",
        set_lossless: "JxlEncoderSetFrameLossless",
        set_distortion: "JxlEncoderSetFrameDistance",
        set_effort: "JxlEncoderFrameSettingsSetOption/*effort*/",
        add_image_frame: "JxlEncoderAddImageFrame",
        process_output: "JxlEncoderProcessOutput",
    };

    fn set_basic_info(&mut self, info: &BasicInfo) -> EncoderStatus {
        let mut basic_info = MaybeUninit::<JxlBasicInfo>::uninit();
        // SAFETY: InitBasicInfo writes every field.
        let mut basic_info = unsafe {
            JxlEncoderInitBasicInfo(basic_info.as_mut_ptr());
            basic_info.assume_init()
        };
        basic_info.xsize = info.width;
        basic_info.ysize = info.height;
        basic_info.bits_per_sample = info.bits_per_sample;
        basic_info.uses_original_profile = jxl_bool(info.uses_original_profile);
        basic_info.num_color_channels = 3;
        if info.alpha_bits > 0 {
            // Alpha needs no separate extra channel info.
            basic_info.num_extra_channels = 1;
            basic_info.alpha_bits = info.alpha_bits;
            basic_info.alpha_premultiplied = jxl_bool(info.alpha_premultiplied);
        }
        // SAFETY: valid encoder and fully initialized info.
        encoder_status(unsafe { JxlEncoderSetBasicInfo(self.encoder, &basic_info) })
    }

    fn set_color_encoding(&mut self) -> EncoderStatus {
        let mut color_encoding = MaybeUninit::<JxlColorEncoding>::zeroed();
        // SAFETY: SetToSRGB fills the struct, which is plain data and valid when zeroed.
        let mut color_encoding = unsafe {
            JxlColorEncodingSetToSRGB(color_encoding.as_mut_ptr(), JxlBool::False);
            color_encoding.assume_init()
        };
        // Same rendering intent as cjxl.
        color_encoding.rendering_intent = JxlRenderingIntent::Perceptual;
        // SAFETY: valid encoder and color encoding.
        encoder_status(unsafe { JxlEncoderSetColorEncoding(self.encoder, &color_encoding) })
    }

    fn set_lossless(&mut self) -> EncoderStatus {
        // SAFETY: frame settings belong to the live encoder.
        encoder_status(unsafe { JxlEncoderSetFrameLossless(self.frame_settings, JxlBool::True) })
    }

    fn distortion_for_quality(&self, quality: u8) -> f32 {
        // SAFETY: pure function.
        unsafe { JxlEncoderDistanceFromQuality(f32::from(quality)) }
    }

    fn set_distortion(&mut self, distortion: f32) -> EncoderStatus {
        // SAFETY: frame settings belong to the live encoder.
        encoder_status(unsafe { JxlEncoderSetFrameDistance(self.frame_settings, distortion) })
    }

    fn set_effort(&mut self, effort: u8) -> EncoderStatus {
        // SAFETY: frame settings belong to the live encoder.
        encoder_status(unsafe {
            JxlEncoderFrameSettingsSetOption(
                self.frame_settings,
                JxlEncoderFrameSettingId::Effort,
                i64::from(effort),
            )
        })
    }

    fn add_image_frame(&mut self, image: &'img ImageBuffer) -> EncoderStatus {
        let format = pixel_format(image.format(), image.stride());
        self._frame = Some(image);
        // SAFETY: `image.data()` holds at least `byte_len()` bytes laid out as
        // `format` describes, and outlives the encoder.
        encoder_status(unsafe {
            JxlEncoderAddImageFrame(
                self.frame_settings,
                &format,
                image.data().as_ptr().cast(),
                image.byte_len(),
            )
        })
    }

    fn close_input(&mut self) {
        // SAFETY: valid encoder.
        unsafe { JxlEncoderCloseInput(self.encoder) };
    }

    fn process_output(&mut self, out: &mut [u8]) -> (usize, EncoderStatus) {
        let mut next_out = out.as_mut_ptr();
        let mut avail_out = out.len();
        // SAFETY: `next_out`/`avail_out` describe `out`, which stays borrowed for the call.
        let status =
            unsafe { JxlEncoderProcessOutput(self.encoder, &mut next_out, &mut avail_out) };
        (out.len() - avail_out, encoder_status(status))
    }

    fn error_code(&self) -> i32 {
        // SAFETY: valid encoder.
        unsafe { JxlEncoderGetError(self.encoder) as i32 }
    }
}

struct JxlDecoderHandle<'data> {
    decoder: *mut JxlDecoder,
    _input: Option<&'data [u8]>,
    /// Written by libjxl through the pointer registered in `set_image_out_buffer`.
    output: Option<Vec<u8>>,
}

impl JxlDecoderHandle<'_> {
    fn new() -> Option<Self> {
        // SAFETY: a null memory manager selects the default allocator.
        let decoder = unsafe { JxlDecoderCreate(ptr::null()) };
        (!decoder.is_null()).then_some(Self {
            decoder,
            _input: None,
            output: None,
        })
    }
}

impl Drop for JxlDecoderHandle<'_> {
    fn drop(&mut self) {
        // SAFETY: created in `new`, destroyed once, before `output` is freed.
        unsafe { JxlDecoderDestroy(self.decoder) };
    }
}

fn decoder_event(status: JxlDecoderStatus) -> DecoderEvent {
    DecoderEvent::from_code(status as i32)
}

impl<'data> DecoderBackend<'data> for JxlDecoderHandle<'data> {
    const CODEC: Codec = Codec::JpegXl;
    const CALLS: DecoderCalls = DecoderCalls {
        subscribe: "JxlDecoderSubscribeEvents",
        set_input: "JxlDecoderSetInput",
        basic_info: "JxlDecoderGetBasicInfo",
        set_image_out_buffer: "JxlDecoderSetImageOutBuffer",
    };

    fn subscribe(&mut self, events: &[DecoderEvent]) -> DecoderEvent {
        let wanted = events.iter().fold(0, |mask, event| mask | event.code());
        // SAFETY: valid decoder.
        decoder_event(unsafe { JxlDecoderSubscribeEvents(self.decoder, wanted) })
    }

    fn set_input(&mut self, data: &'data [u8]) -> DecoderEvent {
        self._input = Some(data);
        // SAFETY: `data` outlives the decoder.
        decoder_event(unsafe { JxlDecoderSetInput(self.decoder, data.as_ptr(), data.len()) })
    }

    fn close_input(&mut self) {
        // SAFETY: valid decoder.
        unsafe { JxlDecoderCloseInput(self.decoder) };
    }

    fn process_input(&mut self) -> DecoderEvent {
        // SAFETY: valid decoder; registered buffers are alive.
        decoder_event(unsafe { JxlDecoderProcessInput(self.decoder) })
    }

    fn basic_info(&mut self) -> std::result::Result<BasicInfo, DecoderEvent> {
        let mut info = MaybeUninit::<JxlBasicInfo>::zeroed();
        // SAFETY: valid decoder; the struct is plain data.
        let status =
            decoder_event(unsafe { JxlDecoderGetBasicInfo(self.decoder, info.as_mut_ptr()) });
        if status != DecoderEvent::Success {
            return Err(status);
        }
        // SAFETY: filled by the successful call above.
        let info = unsafe { info.assume_init() };
        Ok(BasicInfo {
            width: info.xsize,
            height: info.ysize,
            bits_per_sample: info.bits_per_sample,
            alpha_bits: info.alpha_bits,
            alpha_premultiplied: matches!(info.alpha_premultiplied, JxlBool::True),
            uses_original_profile: matches!(info.uses_original_profile, JxlBool::True),
        })
    }

    fn set_image_out_buffer(
        &mut self,
        format: PixelFormat,
        stride: usize,
        mut buffer: Vec<u8>,
    ) -> DecoderEvent {
        let pixel_format = pixel_format(format, stride);
        // SAFETY: the buffer is kept in `self.output` until the decoder is destroyed
        // or the caller takes it back after terminal success.
        let status = unsafe {
            JxlDecoderSetImageOutBuffer(
                self.decoder,
                &pixel_format,
                buffer.as_mut_ptr().cast(),
                buffer.len(),
            )
        };
        self.output = Some(buffer);
        decoder_event(status)
    }

    fn take_image_out_buffer(&mut self) -> Option<Vec<u8>> {
        self.output.take()
    }
}
