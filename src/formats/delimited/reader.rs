use anyhow::{Context, Result, bail};
use std::path::Path;

use crate::dataset::{Cell, ColumnBuilder, Dataset};
use crate::formats::reader::{DatasetReader, DelimitedConfig, unique_column_names};

/// Delimited file reader. The header row gives the column names.
pub struct DelimitedReader {
    config: DelimitedConfig,
}

impl DelimitedReader {
    pub fn new(config: DelimitedConfig) -> Self {
        Self { config }
    }

    fn read_from<R: std::io::Read>(&self, source: R) -> Result<Dataset> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.config.delimiter)
            .quote(self.config.quote)
            .has_headers(true)
            .flexible(true)
            .from_reader(source);

        let headers = reader.headers().context("Failed to read header row")?.clone();
        let names = unique_column_names(headers.iter());
        let mut builders: Vec<ColumnBuilder> = names.into_iter().map(ColumnBuilder::new).collect();

        for (row_idx, record) in reader.records().enumerate() {
            // Data rows are numbered from 2, after the header
            let line = row_idx + 2;
            let record = record.with_context(|| format!("Failed to parse record {}", line))?;

            if record.len() > builders.len() {
                bail!(
                    "Record {} has {} fields, header has {}",
                    line,
                    record.len(),
                    builders.len()
                );
            }

            for (idx, builder) in builders.iter_mut().enumerate() {
                let cell = record.get(idx).map(Cell::parse).unwrap_or(Cell::Null);
                builder.push(cell);
            }
        }

        Dataset::from_builders(builders)
    }
}

impl DatasetReader for DelimitedReader {
    fn read(&self, path: &Path) -> Result<Dataset> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        self.read_from(file)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}
