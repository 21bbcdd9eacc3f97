//! Parquet file reader implementation.

use anyhow::{Context, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::Path;

use crate::dataset::{ColumnBuilder, Dataset};
use crate::formats::reader::DatasetReader;

use super::conversion::append_record_batch;

/// Reads a whole Parquet file into memory, one record batch at a time
pub struct ParquetReader;

impl DatasetReader for ParquetReader {
    fn read(&self, path: &Path) -> Result<Dataset> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .with_context(|| format!("Failed to read Parquet metadata of {}", path.display()))?;

        let mut columns: Vec<ColumnBuilder> = builder
            .schema()
            .fields()
            .iter()
            .map(|field| ColumnBuilder::new(field.name().clone()))
            .collect();

        let reader = builder.build().context("Failed to build Parquet reader")?;
        for batch in reader {
            let batch = batch
                .with_context(|| format!("Failed to read record batch from {}", path.display()))?;
            append_record_batch(&batch, &mut columns)?;
        }

        Dataset::from_builders(columns)
    }
}
