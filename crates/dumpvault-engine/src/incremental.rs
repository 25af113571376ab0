//! Incremental backups
//!
//! An incremental pass reads the rows of one table whose change-tracking
//! column is at or after the baseline and writes them as `REPLACE INTO`
//! statements, so replaying an artifact twice leaves the table in the same
//! state. Deleted rows are not captured: the statements can only insert or
//! overwrite.

use chrono::{DateTime, Utc};
use tracing::info;

use dumpvault_core::error::{FilesystemError, FsOperation};
use dumpvault_core::{DatabaseName, TableName, VaultResult};

use crate::commands::MysqlCommands;
use crate::fsutil::{discard, ensure_dir};
use crate::full::compress;
use crate::layout::ArtifactPaths;
use crate::process::Supervisor;
use crate::source::{ColumnClass, ColumnInfo, Row, SourceDatabase};

/// Marker written in place of statements when nothing changed.
pub const NO_CHANGES_MARKER: &str = "-- No changes detected since the last backup";

const DELETIONS_NOTE: &str = "-- Row deletions are not captured by incremental backups";

/// Everything an incremental pass needs, resolved before its job row is
/// created.
#[derive(Debug, Clone)]
pub struct IncrementalPlan {
    pub database: DatabaseName,
    pub table: TableName,
    pub columns: Vec<ColumnInfo>,
    pub timestamp_column: String,
    /// Completion time of the baseline backup.
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementalOutcome {
    pub file_size: u64,
    pub rows: usize,
}

/// Quote `text` as a MySQL string literal.
pub fn quote_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("''"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn looks_numeric(text: &str) -> bool {
    !text.is_empty()
        && text
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E'))
        && text.parse::<f64>().is_ok()
}

/// Render one value as a literal for `column`.
///
/// Booleans become `0`/`1`, numbers are written bare, binary data as a hex
/// literal and everything else as a quoted string.
pub fn escape_value(value: Option<&[u8]>, column: &ColumnInfo) -> String {
    let Some(bytes) = value else {
        return "NULL".to_string();
    };
    let text = String::from_utf8_lossy(bytes);

    match column.class() {
        ColumnClass::Boolean => {
            let truthy = match text.trim().parse::<f64>() {
                Ok(n) => n != 0.0,
                Err(_) => !text.is_empty(),
            };
            let digit = if truthy { "1" } else { "0" };
            digit.to_string()
        }
        ColumnClass::Numeric if looks_numeric(text.trim()) => text.trim().to_string(),
        ColumnClass::Binary => {
            let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
            format!("X'{hex}'")
        }
        ColumnClass::Numeric | ColumnClass::Text => quote_string(&text),
    }
}

/// The artifact body for `rows`.
pub fn render_incremental(plan: &IncrementalPlan, rows: &[Row], generated_at: DateTime<Utc>) -> String {
    let mut sql = String::new();
    sql.push_str("-- Incremental backup\n");
    sql.push_str(&format!("-- Table: {}\n", plan.table));
    sql.push_str(&format!("-- Database: {}\n", plan.database));
    sql.push_str(&format!(
        "-- Period: {} to {}\n",
        plan.since.format("%Y-%m-%d %H:%M:%S UTC"),
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    sql.push_str(&format!("-- Rows: {}\n", rows.len()));
    sql.push_str(&format!("-- Generated: {}\n", generated_at.to_rfc3339()));
    sql.push_str(DELETIONS_NOTE);
    sql.push_str("\n\n");
    sql.push_str(&format!("USE {};\n\n", plan.database.quoted()));

    if rows.is_empty() {
        sql.push_str(NO_CHANGES_MARKER);
        sql.push('\n');
        return sql;
    }

    let names: Vec<String> = plan.columns.iter().map(ColumnInfo::quoted_name).collect();
    let head = format!("REPLACE INTO {} ({}) VALUES (", plan.table.quoted(), names.join(", "));
    for row in rows {
        let values: Vec<String> = row
            .iter()
            .zip(&plan.columns)
            .map(|(value, column)| escape_value(value.as_deref(), column))
            .collect();
        sql.push_str(&head);
        sql.push_str(&values.join(", "));
        sql.push_str(");\n");
    }
    sql
}

/// Read the changed rows, write the artifact and compress it.
pub(crate) async fn run_incremental(
    supervisor: &mut Supervisor<'_>,
    commands: &MysqlCommands,
    source: &dyn SourceDatabase,
    plan: &IncrementalPlan,
    paths: &ArtifactPaths,
) -> VaultResult<IncrementalOutcome> {
    let result: VaultResult<IncrementalOutcome> = async {
        let rows = supervisor
            .guard(source.changed_rows(
                &plan.database,
                &plan.table,
                &plan.columns,
                &plan.timestamp_column,
                plan.since,
            ))
            .await?;

        let body = render_incremental(plan, &rows, Utc::now());
        if let Some(ticket) = supervisor.ticket() {
            ticket.add_progress(body.len() as u64);
        }

        ensure_dir(&paths.directory).await?;
        tokio::fs::write(&paths.dump, body.as_bytes())
            .await
            .map_err(|e| FilesystemError::io(FsOperation::Write, &paths.dump, &e))?;

        let file_size = compress(supervisor, commands, &paths.dump, &paths.artifact).await?;
        info!(
            database = %plan.database,
            table = %plan.table,
            rows = rows.len(),
            "incremental pass written"
        );
        Ok(IncrementalOutcome {
            file_size,
            rows: rows.len(),
        })
    }
    .await;

    if let Err(err) = &result
        && err.is_abort()
    {
        discard(&[&paths.dump, &paths.artifact]).await;
    }
    result
}
