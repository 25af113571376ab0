//! Read access to the live database for incremental passes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dumpvault_core::error::ParseError;
use dumpvault_core::{DatabaseName, TableName, VaultResult};

use crate::commands::MysqlCommands;
use crate::process::{ProcessRunner, Supervisor};

/// Column metadata as reported by `information_schema.COLUMNS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// `DATA_TYPE`, e.g. `varchar`, `int`, `datetime`.
    pub data_type: String,
    /// `COLUMN_TYPE`, e.g. `varchar(255)`, `tinyint(1)`.
    pub column_type: String,
}

impl ColumnInfo {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        column_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            column_type: column_type.into(),
        }
    }

    /// How values of this column are written back as SQL literals.
    pub fn class(&self) -> ColumnClass {
        let data_type = self.data_type.to_ascii_lowercase();
        let column_type = self.column_type.to_ascii_lowercase();

        if data_type.contains("bool") || column_type.starts_with("tinyint(1)") || column_type == "bit(1)" {
            ColumnClass::Boolean
        } else if data_type.contains("binary") || data_type.contains("blob") {
            ColumnClass::Binary
        } else if ["int", "decimal", "numeric", "float", "double", "real", "bit", "year"]
            .iter()
            .any(|t| data_type.contains(t))
        {
            ColumnClass::Numeric
        } else {
            ColumnClass::Text
        }
    }

    pub fn quoted_name(&self) -> String {
        format!("`{}`", self.name.replace('`', "``"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    /// Strings, temporal values, enums, JSON and anything unrecognised.
    Text,
    Numeric,
    Boolean,
    Binary,
}

/// One result row in column order. `None` is SQL NULL.
pub type Row = Vec<Option<Vec<u8>>>;

/// The database whose rows incremental backups read.
#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// Columns of `table` in ordinal order; empty when the table does not
    /// exist.
    async fn columns(&self, database: &DatabaseName, table: &TableName)
    -> VaultResult<Vec<ColumnInfo>>;

    /// Rows whose `timestamp_column` is at or after `since`, oldest first.
    async fn changed_rows(
        &self,
        database: &DatabaseName,
        table: &TableName,
        columns: &[ColumnInfo],
        timestamp_column: &str,
        since: DateTime<Utc>,
    ) -> VaultResult<Vec<Row>>;
}

/// [`SourceDatabase`] backed by the `mysql` command line client.
///
/// Values are fetched hex encoded so tabs, newlines and binary data survive
/// the batch output format. The session runs in UTC so timestamp columns
/// compare against the UTC baseline.
pub struct MysqlCliSource {
    runner: Arc<dyn ProcessRunner>,
    commands: MysqlCommands,
    grace: Duration,
}

impl MysqlCliSource {
    pub fn new(runner: Arc<dyn ProcessRunner>, commands: MysqlCommands, grace: Duration) -> Self {
        Self {
            runner,
            commands,
            grace,
        }
    }

    async fn query(&self, database: &DatabaseName, sql: &str) -> VaultResult<Vec<u8>> {
        let spec = self.commands.query(database, sql);
        Supervisor::new(self.runner.as_ref(), self.grace)
            .output(&spec)
            .await
    }
}

#[async_trait]
impl SourceDatabase for MysqlCliSource {
    async fn columns(
        &self,
        database: &DatabaseName,
        table: &TableName,
    ) -> VaultResult<Vec<ColumnInfo>> {
        let out = self.query(database, &columns_query(database, table)).await?;
        parse_columns(&out)
    }

    async fn changed_rows(
        &self,
        database: &DatabaseName,
        table: &TableName,
        columns: &[ColumnInfo],
        timestamp_column: &str,
        since: DateTime<Utc>,
    ) -> VaultResult<Vec<Row>> {
        let sql = changed_rows_query(table, columns, timestamp_column, since);
        let out = self.query(database, &sql).await?;
        parse_rows(&out, columns.len())
    }
}

fn columns_query(database: &DatabaseName, table: &TableName) -> String {
    // Identifiers are validated, so they cannot close the string literal.
    format!(
        "SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE FROM information_schema.COLUMNS \
         WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' ORDER BY ORDINAL_POSITION",
        database.as_str(),
        table.as_str()
    )
}

fn value_expression(column: &ColumnInfo) -> String {
    let name = column.quoted_name();
    let text = match column.class() {
        ColumnClass::Numeric | ColumnClass::Boolean => format!("CAST({name} + 0 AS CHAR)"),
        ColumnClass::Text | ColumnClass::Binary => name.clone(),
    };
    format!("IF({name} IS NULL, 'N', CONCAT('V', HEX({text})))")
}

fn changed_rows_query(
    table: &TableName,
    columns: &[ColumnInfo],
    timestamp_column: &str,
    since: DateTime<Utc>,
) -> String {
    let values: Vec<String> = columns.iter().map(value_expression).collect();
    let ts = format!("`{}`", timestamp_column.replace('`', "``"));
    format!(
        "SET time_zone = '+00:00'; SELECT {} FROM {} WHERE {ts} >= '{}' ORDER BY {ts} ASC",
        values.join(", "),
        table.quoted(),
        since.format("%Y-%m-%d %H:%M:%S%.6f"),
    )
}

fn unrecognized(message: impl Into<String>) -> ParseError {
    ParseError::UnrecognizedOutput {
        source_name: "mysql".to_string(),
        message: message.into(),
    }
}

fn parse_columns(out: &[u8]) -> VaultResult<Vec<ColumnInfo>> {
    let text = String::from_utf8_lossy(out);
    text.lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut fields = line.split('\t');
            match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(data_type), Some(column_type)) => {
                    Ok(ColumnInfo::new(name, data_type, column_type))
                }
                _ => Err(unrecognized(format!("column row '{line}'")).into()),
            }
        })
        .collect()
}

fn parse_rows(out: &[u8], width: usize) -> VaultResult<Vec<Row>> {
    let mut rows = Vec::new();
    for line in out.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
        let row = line
            .split(|b| *b == b'\t')
            .map(parse_field)
            .collect::<Result<Row, ParseError>>()?;
        if row.len() != width {
            return Err(unrecognized(format!(
                "expected {width} columns, got {}",
                row.len()
            ))
            .into());
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_field(field: &[u8]) -> Result<Option<Vec<u8>>, ParseError> {
    match field.split_first() {
        Some((b'N', [])) => Ok(None),
        Some((b'V', hex)) => decode_hex(hex)
            .map(Some)
            .ok_or_else(|| unrecognized("malformed hex value")),
        _ => Err(unrecognized("unexpected field marker")),
    }
}

fn decode_hex(hex: &[u8]) -> Option<Vec<u8>> {
    fn nibble(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chunks(2)
        .map(|pair| Some(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}
