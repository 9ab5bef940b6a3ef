//! Shared decode driver.
//!
//! Native decoders are event driven: the caller feeds the whole payload, then
//! calls `process_input` and reacts to the event it returns. The benchmark
//! needs exactly one event sequence:
//!
//! ```text
//! Init ─feed─▶ InputFed ─BasicInfo─▶ BasicInfoSeen ─NeedImageOutBuffer─▶
//! AwaitingOutputBuffer ─bind─▶ BufferBound ─FullImage─▶ ImageProduced ─Success─▶ Terminal
//! ```
//!
//! Any other event fails the task with the step number and the observed code,
//! which makes protocol drift in the native library visible immediately.

use std::fmt;

use crate::check;
use crate::codec::BasicInfo;
use crate::error::{Error, Phase, Result, fail};
use crate::image::{ImageBuffer, PixelFormat};
use crate::task::{Codec, TaskInput};
use crate::timer::Timer;

/// Status or event returned by a native decoder call.
///
/// Codes follow libjxl's `JxlDecoderStatus`; other decoders map onto them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderEvent {
    Success,
    Error,
    NeedMoreInput,
    NeedImageOutBuffer,
    BasicInfo,
    FullImage,
    /// Any code the driver does not subscribe to.
    Other(i32),
}

impl DecoderEvent {
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Error => 1,
            Self::NeedMoreInput => 2,
            Self::NeedImageOutBuffer => 5,
            Self::BasicInfo => 0x40,
            Self::FullImage => 0x1000,
            Self::Other(code) => code,
        }
    }

    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::Error,
            2 => Self::NeedMoreInput,
            5 => Self::NeedImageOutBuffer,
            0x40 => Self::BasicInfo,
            0x1000 => Self::FullImage,
            other => Self::Other(other),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::NeedMoreInput => "NEED_MORE_INPUT",
            Self::NeedImageOutBuffer => "NEED_IMAGE_OUT_BUFFER",
            Self::BasicInfo => "BASIC_INFO",
            Self::FullImage => "FULL_IMAGE",
            Self::Other(_) => "event",
        }
    }
}

impl fmt::Display for DecoderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Position in the decode protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Init,
    InputFed,
    BasicInfoSeen,
    AwaitingOutputBuffer,
    BufferBound,
    ImageProduced,
    Terminal,
}

impl DecodeState {
    /// Event `process_input` must return in this state.
    ///
    /// `None` for states that wait on the driver rather than the decoder.
    pub const fn expected_event(self) -> Option<DecoderEvent> {
        match self {
            Self::InputFed => Some(DecoderEvent::BasicInfo),
            Self::BasicInfoSeen => Some(DecoderEvent::NeedImageOutBuffer),
            Self::BufferBound => Some(DecoderEvent::FullImage),
            Self::ImageProduced => Some(DecoderEvent::Success),
            Self::Init | Self::AwaitingOutputBuffer | Self::Terminal => None,
        }
    }

    /// State after the decoder returned `event`, or `None` if it was not allowed here.
    pub fn on_event(self, event: DecoderEvent) -> Option<Self> {
        match (self, event) {
            (Self::InputFed, DecoderEvent::BasicInfo) => Some(Self::BasicInfoSeen),
            (Self::BasicInfoSeen, DecoderEvent::NeedImageOutBuffer) => {
                Some(Self::AwaitingOutputBuffer)
            }
            (Self::BufferBound, DecoderEvent::FullImage) => Some(Self::ImageProduced),
            (Self::ImageProduced, DecoderEvent::Success) => Some(Self::Terminal),
            _ => None,
        }
    }

    /// State after a driver action (feeding input, binding the output buffer).
    pub fn on_action(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::InputFed),
            Self::AwaitingOutputBuffer => Some(Self::BufferBound),
            _ => None,
        }
    }
}

/// Native function names, used to label diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct DecoderCalls {
    pub subscribe: &'static str,
    pub set_input: &'static str,
    pub basic_info: &'static str,
    pub set_image_out_buffer: &'static str,
}

/// A live native decoder handle for one task.
pub trait DecoderBackend<'data> {
    const CODEC: Codec;
    const CALLS: DecoderCalls;

    fn subscribe(&mut self, events: &[DecoderEvent]) -> DecoderEvent;

    /// Hand over the whole payload. It stays borrowed until the backend is dropped.
    fn set_input(&mut self, data: &'data [u8]) -> DecoderEvent;

    fn close_input(&mut self);

    fn process_input(&mut self) -> DecoderEvent;

    /// Native call and status code behind the last `Error` event, when the
    /// library reports one separately from its events.
    fn native_error(&self) -> Option<(&'static str, i32)> {
        None
    }

    /// Image description, available after the `BasicInfo` event.
    fn basic_info(&mut self) -> std::result::Result<BasicInfo, DecoderEvent>;

    /// Give the decoder ownership of the destination pixels, rows `stride` bytes apart.
    fn set_image_out_buffer(
        &mut self,
        format: PixelFormat,
        stride: usize,
        buffer: Vec<u8>,
    ) -> DecoderEvent;

    /// Take the destination pixels back.
    fn take_image_out_buffer(&mut self) -> Option<Vec<u8>>;
}

/// Decoded pixels plus the nested post-processing time.
#[derive(Debug)]
pub struct Decoded {
    pub image: ImageBuffer,
    /// Seconds between the full image event and terminal success.
    pub color_conversion_seconds: f64,
}

/// Tracks the state machine and numbers `process_input` calls.
struct Protocol<'t> {
    codec: Codec,
    task: &'t TaskInput,
    quiet: bool,
    state: DecodeState,
    step: usize,
}

impl Protocol<'_> {
    fn act(&mut self) {
        if let Some(next) = self.state.on_action() {
            self.state = next;
        }
    }

    fn expect(&mut self, event: DecoderEvent) -> Result<()> {
        self.step += 1;
        match self.state.on_event(event) {
            Some(next) => {
                self.state = next;
                Ok(())
            }
            None => Err(fail(
                self.quiet,
                Error::UnexpectedEvent {
                    codec: self.codec.name(),
                    step: self.step,
                    expected: self.state.expected_event().map_or("no event", DecoderEvent::name),
                    observed: event,
                    image: self.task.image_name(),
                },
            )),
        }
    }

    /// Call `process_input` and advance the state machine.
    fn process<'data, B: DecoderBackend<'data>>(&mut self, backend: &mut B) -> Result<()> {
        let event = backend.process_input();
        if event == DecoderEvent::Error {
            if let Some((call, code)) = backend.native_error() {
                self.step += 1;
                return Err(fail(
                    self.quiet,
                    Error::Native {
                        codec: self.codec.name(),
                        operation: format!("{call}()"),
                        code,
                        phase: Phase::Decoding,
                        image: self.task.image_name(),
                    },
                ));
            }
        }
        self.expect(event)
    }

    fn native(&self, operation: String, status: DecoderEvent) -> Error {
        Error::Native {
            codec: self.codec.name(),
            operation,
            code: status.code(),
            phase: Phase::Decoding,
            image: self.task.image_name(),
        }
    }
}

/// Decode `encoded` with `backend`.
///
/// The returned image is only built after the decoder reported terminal
/// success, so a failing payload never yields partially filled pixels.
pub fn decode_with<'data, B: DecoderBackend<'data>>(
    mut backend: B,
    task: &TaskInput,
    encoded: &'data [u8],
    quiet: bool,
) -> Result<Decoded> {
    use DecoderEvent::Success;

    let calls = B::CALLS;
    let mut protocol = Protocol {
        codec: B::CODEC,
        task,
        quiet,
        state: DecodeState::Init,
        step: 0,
    };

    let status = backend.subscribe(&[DecoderEvent::BasicInfo, DecoderEvent::FullImage]);
    check!(
        status == Success,
        quiet,
        protocol.native(format!("{}()", calls.subscribe), status)
    );
    let status = backend.set_input(encoded);
    check!(
        status == Success,
        quiet,
        protocol.native(format!("{}({} bytes)", calls.set_input, encoded.len()), status)
    );
    backend.close_input();
    protocol.act();

    protocol.process(&mut backend)?;
    let info = backend.basic_info().map_err(|status| {
        fail(quiet, protocol.native(format!("{}()", calls.basic_info), status))
    })?;
    let format = PixelFormat::rgb(
        info.bits_per_sample,
        info.alpha_bits > 0,
        info.alpha_premultiplied,
    );
    let Some(format) = format else {
        return Err(fail(
            quiet,
            Error::InvalidImage(format!(
                "{} bits per sample{} in {} ({})",
                info.bits_per_sample,
                if info.alpha_premultiplied { " with premultiplied alpha" } else { "" },
                task.image_name(),
                B::CODEC
            )),
        ));
    };

    protocol.process(&mut backend)?;
    let buffer = ImageBuffer::new(info.width, info.height, format).map_err(|e| fail(quiet, e))?;
    let stride = buffer.stride();
    let status = backend.set_image_out_buffer(format, stride, buffer.into_raw());
    check!(
        status == Success,
        quiet,
        protocol.native(format!("{}({format})", calls.set_image_out_buffer), status)
    );
    protocol.act();

    protocol.process(&mut backend)?;
    // The decoder may still convert colors after the pixels are written.
    let color_conversion = Timer::new();
    protocol.process(&mut backend)?;
    let color_conversion_seconds = color_conversion.seconds();
    debug_assert_eq!(protocol.state, DecodeState::Terminal);

    let Some(data) = backend.take_image_out_buffer() else {
        return Err(fail(
            quiet,
            protocol.native(format!("{}()", calls.set_image_out_buffer), Success),
        ));
    };
    let image = ImageBuffer::from_raw(data, info.width, info.height, stride, format)
        .map_err(|e| fail(quiet, e))?;
    Ok(Decoded {
        image,
        color_conversion_seconds,
    })
}
