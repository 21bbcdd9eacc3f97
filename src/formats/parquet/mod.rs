//! Parquet file format support.
//!
//! Files are decoded with Arrow and converted column by column into a dataset.

mod conversion;
mod reader;

pub use reader::ParquetReader;
