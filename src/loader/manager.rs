//! Table lifecycle and bulk insertion for one target table.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::dataset::Dataset;
use crate::db::schema::drop_ddl;
use crate::db::{Database, InsertBatch, InsertRows, TableName, TableSpec, query};

/// How values are sent to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// Every value is converted to text and the server coerces it to the
    /// declared column type. A value that does not parse as the declared type
    /// fails the whole insert, and nothing checks this in advance.
    #[default]
    Text,
    /// Numbers are sent as JSON numbers and nulls as JSON null
    Typed,
}

/// Creates, replaces and fills one table
pub struct UploadManager {
    db: Arc<dyn Database>,
    table: TableName,
    insert_mode: InsertMode,
}

impl UploadManager {
    pub fn new(db: Arc<dyn Database>, table: TableName, insert_mode: InsertMode) -> Self {
        Self {
            db,
            table,
            insert_mode,
        }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Create the table from the dataset's schema.
    ///
    /// With `drop` the table is dropped first and always recreated. Without
    /// it, an existing table is left as it is, even if its columns differ;
    /// the mismatch surfaces on the next insert.
    pub async fn ensure_table(&self, dataset: &Dataset, drop: bool) -> Result<TableSpec> {
        let spec = TableSpec::from_dataset(self.table.clone(), dataset);

        if drop {
            self.db
                .execute(&drop_ddl(&self.table))
                .await
                .with_context(|| format!("Failed to drop table {}", self.table))?;
            info!("Table {} dropped", self.table);
        }

        self.db
            .execute(&spec.create_ddl())
            .await
            .with_context(|| format!("Failed to create table {}", self.table))?;

        info!(
            "Table {} {} with {} columns: {}",
            self.table,
            if drop { "created" } else { "created if missing" },
            spec.columns.len(),
            spec.column_clause()
        );

        Ok(spec)
    }

    /// Insert every row of the dataset in a single call. Returns the number
    /// of rows sent; an empty dataset makes no call.
    pub async fn insert(&self, dataset: &Dataset) -> Result<usize> {
        let rows = dataset.num_rows();
        if dataset.is_empty() {
            return Ok(0);
        }

        let batch = self.batch(dataset);
        self.db
            .insert(&self.table, batch)
            .await
            .with_context(|| format!("Failed to insert {} rows into {}", rows, self.table))?;

        Ok(rows)
    }

    pub async fn count_rows(&self) -> Result<u64> {
        query::count_rows(self.db.as_ref(), &self.table).await
    }

    fn batch(&self, dataset: &Dataset) -> InsertBatch {
        let columns = dataset
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let rows = match self.insert_mode {
            InsertMode::Text => InsertRows::Text(dataset.to_text_rows()),
            InsertMode::Typed => InsertRows::Typed(dataset.to_json_rows()),
        };

        InsertBatch { columns, rows }
    }
}
