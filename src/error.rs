//! Error types for codec-bench operations.
//!
//! Every fallible operation returns [`Result`]. Adapter failures are created
//! through [`check!`](crate::check) or [`fail`], which emit the diagnostic on
//! the log side channel unless the caller asked for quiet failures. Failures
//! propagated with `?` are never reported twice.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::codec::decode::DecoderEvent;
use crate::image::PixelFormat;

/// Result type alias for codec-bench operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Log target used for failure diagnostics.
pub const DIAGNOSTIC_TARGET: &str = "codec_bench::diagnostic";

/// Direction of the codec call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Encoding,
    Decoding,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding => f.write_str("encoding"),
            Self::Decoding => f.write_str("decoding"),
        }
    }
}

/// Errors that can occur while benchmarking codecs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The source image uses a pixel format the codec cannot consume.
    #[error("{codec} requires {required} but got {actual} when encoding {image}")]
    UnsupportedFormat {
        /// Codec identifier.
        codec: &'static str,
        /// Human readable list of accepted formats.
        required: &'static str,
        /// Format of the submitted image.
        actual: PixelFormat,
        /// Image identifier of the task.
        image: String,
    },

    /// The task settings are outside what the codec accepts.
    #[error("Invalid {codec} settings for {image}: {reason}")]
    InvalidSettings {
        /// Codec identifier.
        codec: &'static str,
        /// What is wrong with the settings.
        reason: String,
        /// Image identifier of the task.
        image: String,
    },

    /// A pixel buffer violates its layout invariants.
    #[error("Invalid image buffer: {0}")]
    InvalidImage(String),

    /// Failed to load a source image.
    #[error("Image load failed: {path}: {reason}")]
    ImageLoad {
        /// Path to the image that failed to load.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// Failed to read an encoded payload saved by an earlier run.
    #[error("Encoded file read failed: {path}: {source}")]
    EncodedRead {
        /// Path of the saved payload.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The native encoder or decoder handle could not be created.
    #[error("{operation} failed ({codec})")]
    Init {
        /// Codec identifier.
        codec: &'static str,
        /// Native constructor that failed.
        operation: &'static str,
    },

    /// A native call returned a non-success status.
    #[error("{operation} failed with error code {code} when {phase} {image} ({codec})")]
    Native {
        /// Codec identifier.
        codec: &'static str,
        /// Native call, with relevant parameter values.
        operation: String,
        /// Native status or error code.
        code: i32,
        /// Whether the task was encoding or decoding.
        phase: Phase,
        /// Image identifier of the task.
        image: String,
    },

    /// The native decoder reported an event the protocol did not allow at this step.
    #[error(
        "Call #{step} to process_input() unexpectedly returned {observed} instead of {expected} when decoding {image} ({codec})"
    )]
    UnexpectedEvent {
        /// Codec identifier.
        codec: &'static str,
        /// Ordinal of the processing call (1-based).
        step: usize,
        /// Event required at this step.
        expected: &'static str,
        /// Event the decoder returned.
        observed: DecoderEvent,
        /// Image identifier of the task.
        image: String,
    },

    /// The codec backend was not compiled in.
    #[error("{phase} images requires backend {backend} ({codec})")]
    Unavailable {
        /// Codec identifier.
        codec: &'static str,
        /// Cargo feature that provides the backend.
        backend: &'static str,
        /// Requested operation.
        phase: Phase,
    },

    /// Decoded dimensions don't match the source image.
    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Expected dimensions (width, height).
        expected: (u32, u32),
        /// Actual dimensions (width, height).
        actual: (u32, u32),
    },

    /// A lossless task did not reproduce its source pixels.
    #[error("Lossless round trip of {image} with {codec} is not bit-exact")]
    LosslessMismatch {
        /// Codec identifier.
        codec: &'static str,
        /// Image identifier of the task.
        image: String,
    },

    /// A task description could not be parsed.
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// Sweep level failure (scheduling, resume, thread pool).
    #[error("Sweep error: {0}")]
    Sweep(String),

    /// I/O error wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Turn `error` into a failure, emitting its diagnostic unless `quiet`.
pub fn fail(quiet: bool, error: Error) -> Error {
    if !quiet {
        log::error!(target: DIAGNOSTIC_TARGET, "{error}");
    }
    error
}

/// Return `Err(error)` from the enclosing function when `cond` is false.
///
/// The error expression is only evaluated on failure. Unless `quiet` is set,
/// the diagnostic is also logged at error level.
///
/// ```
/// use codec_bench::{check, Error, Result};
///
/// fn positive(value: i32, quiet: bool) -> Result<i32> {
///     check!(value > 0, quiet, Error::InvalidTask(format!("{value} is not positive")));
///     Ok(value)
/// }
///
/// assert!(positive(3, true).is_ok());
/// assert!(positive(-1, true).is_err());
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr, $quiet:expr, $err:expr $(,)?) => {
        if !$cond {
            return Err($crate::error::fail($quiet, $err));
        }
    };
}

/// Per-thread capture of failure diagnostics for tests.
#[cfg(test)]
pub(crate) mod capture {
    use std::cell::RefCell;
    use std::sync::Once;

    thread_local! {
        static LINES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    struct ThreadCapture;

    impl log::Log for ThreadCapture {
        fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
            metadata.target() == super::DIAGNOSTIC_TARGET
        }

        fn log(&self, record: &log::Record<'_>) {
            if self.enabled(record.metadata()) {
                LINES.with(|lines| lines.borrow_mut().push(record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: ThreadCapture = ThreadCapture;
    static INIT: Once = Once::new();

    /// Run `f` and return its output with the diagnostics it emitted on this thread.
    pub(crate) fn diagnostics<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
        INIT.call_once(|| {
            // Another logger may already be installed by a different harness.
            let _ = log::set_logger(&LOGGER);
            log::set_max_level(log::LevelFilter::Trace);
        });
        LINES.with(|lines| lines.borrow_mut().clear());
        let output = f();
        let lines = LINES.with(|lines| lines.borrow_mut().drain(..).collect());
        (output, lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guarded(value: u8, quiet: bool) -> Result<u8> {
        check!(
            value < 10,
            quiet,
            Error::InvalidTask(format!("value {value} too large"))
        );
        Ok(value)
    }

    fn forwarded(value: u8, quiet: bool) -> Result<u8> {
        let checked = guarded(value, quiet)?;
        Ok(checked * 2)
    }

    #[test]
    fn test_check_passes_through_success() {
        let (result, lines) = capture::diagnostics(|| forwarded(3, false));
        assert_eq!(result.unwrap(), 6);
        assert!(lines.is_empty());
    }

    #[test]
    fn test_quiet_failure_emits_nothing() {
        let (result, lines) = capture::diagnostics(|| forwarded(42, true));
        assert!(matches!(result, Err(Error::InvalidTask(_))));
        assert!(lines.is_empty());
    }

    #[test]
    fn test_loud_failure_emits_exactly_once() {
        let (result, lines) = capture::diagnostics(|| forwarded(42, false));
        let error = result.unwrap_err();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], error.to_string());
        assert!(lines[0].contains("value 42 too large"));
    }

    #[test]
    fn test_native_error_message() {
        let error = Error::Native {
            codec: "jpegxl",
            operation: "JxlEncoderSetBasicInfo()".to_string(),
            code: 4,
            phase: Phase::Encoding,
            image: "kodim01.png".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "JxlEncoderSetBasicInfo() failed with error code 4 when encoding kodim01.png (jpegxl)"
        );
    }

    #[test]
    fn test_unavailable_message() {
        let error = Error::Unavailable {
            codec: "jpegxl",
            backend: "jpegxl",
            phase: Phase::Decoding,
        };
        assert_eq!(
            error.to_string(),
            "decoding images requires backend jpegxl (jpegxl)"
        );
    }
}
