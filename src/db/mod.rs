//! Database layer - ClickHouse HTTP client, schema mapping, and read helpers

pub mod client;
#[cfg(test)]
pub mod memory;
pub mod query;
pub mod schema;
mod tsv;

pub use client::{ClickHouseClient, Database, InsertBatch, InsertRows};
pub use schema::{TableName, TableSpec};
