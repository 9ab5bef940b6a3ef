//! CLI command implementations.

pub mod codecs;
pub mod run;
pub mod stats;
