//! Task execution and sweep orchestration.
//!
//! - [`runner`]: one task, encode then decode, with timings
//! - [`session::SweepSession`]: a planned matrix of tasks on a worker pool
//! - [`report`]: completed-tasks CSV and per-batch JSON reports

pub mod report;
pub mod runner;
pub mod session;

pub use report::{BatchEntry, BatchReport, CompletedTasksWriter, TaskRecord};
pub use runner::{EncodeMode, encode_decode};
pub use session::{LoadFn, SweepConfig, SweepConfigBuilder, SweepSession, SweepSummary};
