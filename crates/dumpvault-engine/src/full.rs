//! Full backup steps: dump to an uncompressed file, then compress it in
//! place into the final artifact.

use std::path::Path;

use tracing::{debug, info};

use dumpvault_core::error::FilesystemError;
use dumpvault_core::{DatabaseName, TableName, VaultResult};

use crate::commands::MysqlCommands;
use crate::fsutil::{artifact_len, discard, ensure_dir, file_len};
use crate::layout::ArtifactPaths;
use crate::process::Supervisor;

/// Dump `database` (restricted to `tables` when non-empty) into
/// `paths.dump`, then compress it into `paths.artifact`. Returns the
/// artifact size.
///
/// On abort both files are removed. Any other failure leaves the
/// uncompressed dump in place for inspection.
pub(crate) async fn dump_and_compress(
    supervisor: &mut Supervisor<'_>,
    commands: &MysqlCommands,
    database: &DatabaseName,
    tables: &[TableName],
    paths: &ArtifactPaths,
) -> VaultResult<u64> {
    ensure_dir(&paths.directory).await?;

    let result = async {
        let written = supervisor
            .run_to_file(&commands.dump(database, tables), &paths.dump, true)
            .await?;
        debug!(path = %paths.dump.display(), bytes = written, "dump written");

        if file_len(&paths.dump).await? == 0 {
            return Err(FilesystemError::EmptyDump {
                path: paths.dump.clone(),
            }
            .into());
        }
        compress(supervisor, commands, &paths.dump, &paths.artifact).await
    }
    .await;

    if let Err(err) = &result
        && err.is_abort()
    {
        discard(&[&paths.dump, &paths.artifact]).await;
    }
    result
}

/// Compress `dump` in place and return the size of `artifact`, which the
/// compressor must have produced.
pub(crate) async fn compress(
    supervisor: &mut Supervisor<'_>,
    commands: &MysqlCommands,
    dump: &Path,
    artifact: &Path,
) -> VaultResult<u64> {
    supervisor.run(&commands.compress(dump)).await?;
    let size = artifact_len(artifact).await?;
    info!(path = %artifact.display(), bytes = size, "artifact compressed");
    Ok(size)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::TokioProcessRunner;
    use dumpvault_core::config::{MysqlConfig, ToolsConfig};
    use std::path::PathBuf;
    use std::time::Duration;

    fn commands(dump_program: &str) -> MysqlCommands {
        MysqlCommands::new(
            ToolsConfig {
                mysqldump: dump_program.to_string(),
                ..ToolsConfig::default()
            },
            MysqlConfig::default(),
        )
    }

    fn paths(root: &Path) -> ArtifactPaths {
        let directory = root.join("daily").join("shopdb");
        ArtifactPaths {
            dump: directory.join("shopdb_2024-01-01_000000.sql"),
            artifact: directory.join("shopdb_2024-01-01_000000.sql.gz"),
            directory: PathBuf::from(&directory),
        }
    }

    #[tokio::test]
    async fn test_dump_output_is_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let runner = TokioProcessRunner::new();
        let mut supervisor = Supervisor::new(&runner, Duration::from_secs(1));

        // `echo` prints its arguments, standing in for a dump tool.
        let size = dump_and_compress(
            &mut supervisor,
            &commands("echo"),
            &DatabaseName::new_unchecked("shopdb"),
            &[],
            &paths,
        )
        .await
        .unwrap();

        assert!(size > 0);
        assert!(paths.artifact.exists());
        assert!(!paths.dump.exists());
    }

    #[tokio::test]
    async fn test_empty_dump_is_kept_for_inspection() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let runner = TokioProcessRunner::new();
        let mut supervisor = Supervisor::new(&runner, Duration::from_secs(1));

        let err = dump_and_compress(
            &mut supervisor,
            &commands("true"),
            &DatabaseName::new_unchecked("shopdb"),
            &[],
            &paths,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            dumpvault_core::VaultError::Filesystem(FilesystemError::EmptyDump { .. })
        ));
        assert!(paths.dump.exists());
        assert!(!paths.artifact.exists());
    }
}
