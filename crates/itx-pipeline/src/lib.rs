//! itx-pipeline crate
//!
//! Discover → fetch → classify → persist, one bounded chunk of blocks at a time.

pub mod config;
pub mod driver;

pub use config::PipelineConfig;
pub use driver::{PassReport, Pipeline};
