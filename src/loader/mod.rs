//! Load pipeline: table lifecycle, chunked inserts and whole-job execution

pub mod chunked;
pub mod job;
pub mod manager;
pub mod task;

pub use job::{LoadJob, LoadOptions, LoadOptionsBuilder, LoadReport, Source};
pub use manager::InsertMode;
