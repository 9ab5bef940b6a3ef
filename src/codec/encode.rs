//! Shared encode driver.
//!
//! Every native encoder is driven through the same sequence: describe the
//! image, choose lossless or a lossy distortion, pass the effort, submit the
//! whole frame, then drain output into a growing buffer. Codecs implement
//! [`EncoderBackend`] over their native handle and call [`encode_with`].

use crate::check;
use crate::codec::BasicInfo;
use crate::codec::output::{self, INITIAL_OUTPUT_SIZE};
use crate::error::{Error, Phase, Result};
use crate::image::ImageBuffer;
use crate::task::{Codec, Quality, TaskInput};

/// Status of a native encoder call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderStatus {
    Success,
    /// The output chunk is full; call again with more space.
    NeedMoreOutput,
    Error,
}

/// Native function names, used to label diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct EncoderCalls {
    pub set_basic_info: &'static str,
    pub set_color_encoding: &'static str,
    pub set_lossless: &'static str,
    pub set_distortion: &'static str,
    pub set_effort: &'static str,
    pub add_image_frame: &'static str,
    pub process_output: &'static str,
}

/// A live native encoder handle for one task.
///
/// The handle is created by the adapter and released when the backend is
/// dropped, whichever way [`encode_with`] returns.
pub trait EncoderBackend<'img> {
    const CODEC: Codec;
    const CALLS: EncoderCalls;

    fn set_basic_info(&mut self, info: &BasicInfo) -> EncoderStatus;

    /// Declare the color space of submitted pixels.
    fn set_color_encoding(&mut self) -> EncoderStatus {
        EncoderStatus::Success
    }

    fn set_lossless(&mut self) -> EncoderStatus;

    /// Codec-native distortion parameter for a lossy quality level.
    ///
    /// Must be monotonic over the codec's quality space.
    fn distortion_for_quality(&self, quality: u8) -> f32;

    fn set_distortion(&mut self, distortion: f32) -> EncoderStatus;

    fn set_effort(&mut self, effort: u8) -> EncoderStatus;

    /// Submit the whole frame. The image stays borrowed until the backend is dropped.
    fn add_image_frame(&mut self, image: &'img ImageBuffer) -> EncoderStatus;

    fn close_input(&mut self);

    /// Write as much output as fits into `out`; returns the byte count and status.
    fn process_output(&mut self, out: &mut [u8]) -> (usize, EncoderStatus);

    /// Detailed error code of the last failure.
    fn error_code(&self) -> i32;
}

fn native_error<'img, B: EncoderBackend<'img>>(
    backend: &B,
    operation: String,
    task: &TaskInput,
) -> Error {
    Error::Native {
        codec: B::CODEC.name(),
        operation,
        code: backend.error_code(),
        phase: Phase::Encoding,
        image: task.image_name(),
    }
}

/// Encode `image` with `backend` according to the task settings.
///
/// The image must already have passed the adapter's format and settings
/// checks.
pub fn encode_with<'img, B: EncoderBackend<'img>>(
    mut backend: B,
    task: &TaskInput,
    image: &'img ImageBuffer,
    quiet: bool,
) -> Result<Vec<u8>> {
    use EncoderStatus::Success;

    let settings = task.codec_settings;
    let calls = B::CALLS;

    let info = BasicInfo::for_image(image, settings.quality.is_lossless());
    check!(
        backend.set_basic_info(&info) == Success,
        quiet,
        native_error(&backend, format!("{}()", calls.set_basic_info), task)
    );
    check!(
        backend.set_color_encoding() == Success,
        quiet,
        native_error(&backend, format!("{}()", calls.set_color_encoding), task)
    );

    match settings.quality {
        Quality::Lossless => {
            check!(
                backend.set_lossless() == Success,
                quiet,
                native_error(&backend, format!("{}(true)", calls.set_lossless), task)
            );
        }
        Quality::Lossy(quality) => {
            let distortion = backend.distortion_for_quality(quality);
            check!(
                backend.set_distortion(distortion) == Success,
                quiet,
                native_error(
                    &backend,
                    format!("{}({distortion})", calls.set_distortion),
                    task
                )
            );
        }
    }

    check!(
        backend.set_effort(settings.effort) == Success,
        quiet,
        native_error(
            &backend,
            format!("{}({})", calls.set_effort, settings.effort),
            task
        )
    );
    check!(
        backend.add_image_frame(image) == Success,
        quiet,
        native_error(&backend, format!("{}()", calls.add_image_frame), task)
    );
    backend.close_input();

    let (data, status) = output::drain(INITIAL_OUTPUT_SIZE, |out| backend.process_output(out));
    check!(
        status == Success,
        quiet,
        native_error(&backend, format!("{}()", calls.process_output), task)
    );

    log::trace!(
        "{} encoded {} to {} bytes",
        B::CODEC,
        task.image_name(),
        data.len()
    );
    Ok(data)
}
