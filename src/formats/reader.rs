use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::dataset::Dataset;

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Json,
    Xlsx,
    Parquet,
}

impl Format {
    /// Parse format from string (case-insensitive)
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "json" => Ok(Format::Json),
            "xlsx" => Ok(Format::Xlsx),
            "parquet" => Ok(Format::Parquet),
            _ => bail!(
                "Unsupported format: {}. Supported formats: csv, json, xlsx, parquet",
                s
            ),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Json => "json",
            Format::Xlsx => "xlsx",
            Format::Parquet => "parquet",
        }
    }

    /// Detect the format of a file from its extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::parse(ext).ok()
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(self.extension()))
    }
}

/// Reads one file into a dataset. Implementations are blocking and are
/// driven from `spawn_blocking` by the load job.
pub trait DatasetReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Dataset>;
}

/// Configuration for delimited file reading
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub quote: u8,
}

impl DelimitedConfig {
    /// Create from the string form accepted on the command line
    pub fn from_delimiter(delimiter: &str) -> Result<Self> {
        let delimiter = if delimiter == "\\t" {
            b'\t'
        } else if delimiter.len() == 1 {
            delimiter.as_bytes()[0]
        } else {
            bail!("Delimiter must be a single character or \\t");
        };

        Ok(Self {
            delimiter,
            ..Self::default()
        })
    }
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

/// Resolve a source path into the files to load.
///
/// A file path is returned as-is when its extension matches. A directory yields
/// its direct children with a matching extension, sorted by file name.
pub fn discover_files(path: &Path, format: Format) -> Result<Vec<PathBuf>> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Cannot access source path {}", path.display()))?;

    if metadata.is_file() {
        if !format.matches(path) {
            bail!(
                "{} does not have the .{} extension",
                path.display(),
                format.extension()
            );
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)
        .with_context(|| format!("Failed to list directory {}", path.display()))?
    {
        let entry = entry?;
        let candidate = entry.path();
        if entry.file_type()?.is_file() && format.matches(&candidate) {
            files.push(candidate);
        }
    }
    files.sort();

    Ok(files)
}

/// Turn raw header fields into unique column names. Blank headers become
/// `Unnamed: <idx>`; repeated names get a `.N` suffix.
pub(crate) fn unique_column_names<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();

    for (idx, raw) in headers.enumerate() {
        let base = if raw.trim().is_empty() {
            format!("Unnamed: {}", idx)
        } else {
            raw.to_string()
        };

        let mut name = base.clone();
        let mut suffix = 1;
        while !seen.insert(name.clone()) {
            name = format!("{}.{}", base, suffix);
            suffix += 1;
        }
        names.push(name);
    }

    names
}
