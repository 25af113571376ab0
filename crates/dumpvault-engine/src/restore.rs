//! Restore pipelines
//!
//! A restore streams SQL into the `mysql` client. Whole-database restores
//! read the artifact directly, through `gzip -dc` when it is compressed.
//! Table restores first extract the requested blocks into an uncompressed
//! scratch fragment and stream that.
//!
//! Progress counts the bytes read from the file being fed. For a compressed
//! artifact that is the compressed size, which runs ahead of the real work
//! only loosely, so the ratio is scaled by [`COMPRESSED_PROGRESS_SCALE`] and
//! capped at 100.

use tracing::info;

use dumpvault_core::{BackupJob, TableName, VaultResult};

use crate::commands::MysqlCommands;
use crate::extract::TableExtractor;
use crate::fsutil::artifact_len;
use crate::layout::is_compressed;
use crate::process::Supervisor;

/// Scale applied to compressed-byte progress.
pub const COMPRESSED_PROGRESS_SCALE: f64 = 120.0;

const PLAIN_PROGRESS_SCALE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Bytes fed to the first stage of the pipeline.
    pub bytes_fed: u64,
    /// Tables restored; empty for a whole-database restore.
    pub tables: Vec<String>,
}

pub(crate) async fn run_restore(
    supervisor: &mut Supervisor<'_>,
    commands: &MysqlCommands,
    extractor: &TableExtractor,
    job: &BackupJob,
    tables: &[TableName],
) -> VaultResult<RestoreOutcome> {
    let artifact = &job.file_path;
    let client = commands.client(&job.database);

    if !tables.is_empty() {
        let fragment = extractor.extract_with(supervisor, artifact, tables).await?;
        if let Some(ticket) = supervisor.ticket() {
            ticket.set_total(fragment.bytes, PLAIN_PROGRESS_SCALE);
        }
        let bytes_fed = supervisor.feed_file(fragment.path(), &[client]).await?;
        info!(job.id = %job.id, tables = ?fragment.tables, bytes = bytes_fed, "tables restored");
        return Ok(RestoreOutcome {
            bytes_fed,
            tables: fragment.tables.clone(),
        });
    }

    let total = artifact_len(artifact).await?;
    let bytes_fed = if is_compressed(artifact) {
        if let Some(ticket) = supervisor.ticket() {
            ticket.set_total(total, COMPRESSED_PROGRESS_SCALE);
        }
        supervisor
            .feed_file(artifact, &[commands.decompress_stream(), client])
            .await?
    } else {
        if let Some(ticket) = supervisor.ticket() {
            ticket.set_total(total, PLAIN_PROGRESS_SCALE);
        }
        supervisor.feed_file(artifact, &[client]).await?
    };
    info!(job.id = %job.id, bytes = bytes_fed, "database restored");

    Ok(RestoreOutcome {
        bytes_fed,
        tables: Vec::new(),
    })
}
