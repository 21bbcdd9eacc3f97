//! File format readers producing in-memory datasets

pub mod delimited;
pub mod json;
pub mod parquet;
pub mod reader;
pub mod xlsx;

pub use delimited::DelimitedReader;
pub use json::JsonReader;
pub use parquet::ParquetReader;
pub use reader::{DatasetReader, DelimitedConfig, Format, discover_files};
pub use xlsx::{SheetSelector, XlsxReader};
