//! # codec-bench
//!
//! Image codec benchmarking over native codec libraries.
//!
//! Every codec is wrapped in a [`codec::CodecAdapter`] with the same contract:
//! validate the task and the source pixels, map the quality to the native
//! parameter, drive the native encoder and decoder, and report failures as
//! [`Error`] values instead of status codes. On top of that, [`eval`] runs a
//! planned matrix of tasks, times every encode and decode, and writes the
//! results.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use codec_bench::{Codec, CodecSettings, Quality, SweepConfig, SweepSession, plan_tasks};
//!
//! let qualities = [Quality::Lossy(75), Quality::Lossless];
//! let settings = CodecSettings::matrix(Codec::WebP, &qualities, &[4]);
//! let tasks = plan_tasks(&images, &settings, None);
//!
//! let config = SweepConfig::builder()
//!     .extra_threads(3)
//!     .results_dir("./results")
//!     .build();
//!
//! let summary = SweepSession::new(config, Box::new(load_image)).run(tasks)?;
//! ```
//!
//! ## Modules
//!
//! - [`error`]: Error type and the `check!` failure primitive
//! - [`timer`]: Monotonic stopwatch
//! - [`image`]: Pixel buffers and formats
//! - [`task`]: Codec settings, task inputs and outputs, task planning
//! - [`codec`]: Codec adapters and the native protocol drivers
//! - [`eval`]: Task runner, sweep session and reports
//! - [`stats`]: Descriptive statistics

pub mod codec;
pub mod error;
pub mod eval;
pub mod image;
pub mod stats;
pub mod task;
pub mod timer;

// Re-export commonly used types
pub use codec::{CodecAdapter, CodecTable, PhaseTimings};
pub use error::{Error, Result};
pub use eval::{
    report::{BatchReport, TaskRecord},
    runner::{EncodeMode, encode_decode},
    session::{LoadFn, SweepConfig, SweepSession, SweepSummary},
};
pub use image::{ImageBuffer, PixelFormat};
pub use stats::Summary;
pub use task::{Codec, CodecSettings, Quality, TaskInput, TaskOutput, plan_tasks};
pub use timer::Timer;
