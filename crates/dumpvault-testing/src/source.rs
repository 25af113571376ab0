//! # In-memory source database
//!
//! Tables with a change-tracking timestamp per row, for incremental passes
//! that never touch a server.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dumpvault_core::{DatabaseName, TableName, VaultResult};
use dumpvault_engine::{ColumnInfo, Row, SourceDatabase};

#[derive(Debug, Clone, Default)]
struct FakeTable {
    columns: Vec<ColumnInfo>,
    /// Matched on the first value when upserting.
    rows: Vec<(DateTime<Utc>, Row)>,
}

/// [`SourceDatabase`] backed by maps.
///
/// Rows carry the time they were last changed next to their values; the
/// change-tracking column's value itself is whatever the test wrote.
#[derive(Debug, Default)]
pub struct InMemorySource {
    tables: Mutex<HashMap<(String, String), FakeTable>>,
}

impl InMemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a table definition, dropping its rows
    pub fn define_table(&self, database: &str, table: &str, columns: Vec<ColumnInfo>) {
        self.tables.lock().unwrap().insert(
            (database.to_string(), table.to_string()),
            FakeTable {
                columns,
                rows: Vec::new(),
            },
        );
    }

    /// Insert or replace the row whose first value matches, stamping it
    /// with `changed_at`
    pub fn upsert(&self, database: &str, table: &str, values: &[Option<&str>], changed_at: DateTime<Utc>) {
        let row: Row = values.iter().map(|v| v.map(|s| s.as_bytes().to_vec())).collect();
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .get_mut(&(database.to_string(), table.to_string()))
            .expect("table defined before upsert");
        table.rows.retain(|(_, existing)| existing.first() != row.first());
        table.rows.push((changed_at, row));
    }

    /// Number of rows in a table
    pub fn row_count(&self, database: &str, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(&(database.to_string(), table.to_string()))
            .map_or(0, |t| t.rows.len())
    }
}

#[async_trait]
impl SourceDatabase for InMemorySource {
    async fn columns(&self, database: &DatabaseName, table: &TableName) -> VaultResult<Vec<ColumnInfo>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&(database.to_string(), table.to_string()))
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn changed_rows(
        &self,
        database: &DatabaseName,
        table: &TableName,
        _columns: &[ColumnInfo],
        _timestamp_column: &str,
        since: DateTime<Utc>,
    ) -> VaultResult<Vec<Row>> {
        let tables = self.tables.lock().unwrap();
        let Some(table) = tables.get(&(database.to_string(), table.to_string())) else {
            return Ok(Vec::new());
        };
        let mut changed: Vec<&(DateTime<Utc>, Row)> =
            table.rows.iter().filter(|(at, _)| *at >= since).collect();
        changed.sort_by_key(|(at, _)| *at);
        Ok(changed.into_iter().map(|(_, row)| row.clone()).collect())
    }
}
