//! Selective table extraction
//!
//! Pulls the complete block of one or more tables out of a full dump so it
//! can be restored on its own. A block starts at the first line referencing
//! a selected table (`DROP TABLE`, `CREATE TABLE`, `LOCK TABLES` or
//! `INSERT INTO`) and ends at `UNLOCK TABLES;`. Lines are handled as bytes so
//! dumps with non-UTF-8 data pass through verbatim.
//!
//! [`BlockExtractor`] is the pure state machine; [`TableExtractor`] runs it
//! over dump files, decompressing `.gz` dumps to a scratch file first.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info};

use dumpvault_core::error::{FilesystemError, FsOperation, ParseError};
use dumpvault_core::{TableName, VaultResult};

use crate::commands::MysqlCommands;
use crate::layout::is_compressed;
use crate::process::{ProcessRunner, Supervisor};
use crate::scratch::ScratchFile;

static ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:DROP TABLE[^`\n]*IF EXISTS|CREATE TABLE|LOCK TABLES|INSERT INTO)[^`\n]*`([^`\n]+)`",
    )
    .unwrap()
});

/// Session directives written ahead of the extracted blocks.
pub const FRAGMENT_PREAMBLE: &str = "\
-- dumpvault table fragment
SET SQL_MODE = \"NO_AUTO_VALUE_ON_ZERO\";
SET time_zone = \"+00:00\";
/*!40101 SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT */;
/*!40101 SET @OLD_CHARACTER_SET_RESULTS=@@CHARACTER_SET_RESULTS */;
/*!40101 SET @OLD_COLLATION_CONNECTION=@@COLLATION_CONNECTION */;
/*!40101 SET NAMES utf8mb4 */;
/*!40014 SET @OLD_FOREIGN_KEY_CHECKS=@@FOREIGN_KEY_CHECKS, FOREIGN_KEY_CHECKS=0 */;

";

/// Written after the last block.
pub const FRAGMENT_TRAILER: &str = "/*!40014 SET FOREIGN_KEY_CHECKS=@OLD_FOREIGN_KEY_CHECKS */;\n";

/// Table named by an anchor line, if `line` is one.
pub fn anchor_table(line: &[u8]) -> Option<&[u8]> {
    ANCHOR
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_bytes())
}

fn is_unlock(line: &[u8]) -> bool {
    line.trim_ascii().starts_with(b"UNLOCK TABLES;")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanState {
    Scanning,
    InBlock(Vec<u8>),
}

/// Line-at-a-time block extraction.
#[derive(Debug)]
pub struct BlockExtractor {
    selected: HashSet<Vec<u8>>,
    state: ScanState,
    block: Vec<u8>,
    found: Vec<String>,
}

impl BlockExtractor {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            selected: tables
                .into_iter()
                .map(|t| t.as_ref().as_bytes().to_vec())
                .collect(),
            state: ScanState::Scanning,
            block: Vec::new(),
            found: Vec::new(),
        }
    }

    /// Feed one line, terminator included. Completed blocks are appended to
    /// `out`.
    pub fn push_line(&mut self, line: &[u8], out: &mut Vec<u8>) {
        if let Some(table) = anchor_table(line) {
            // A different table before UNLOCK TABLES closes the open block.
            if matches!(&self.state, ScanState::InBlock(current) if current.as_slice() != table) {
                self.emit(out);
            }
            if matches!(self.state, ScanState::InBlock(_)) {
                self.block.extend_from_slice(line);
            } else if self.selected.contains(table) {
                self.state = ScanState::InBlock(table.to_vec());
                self.block.extend_from_slice(line);
            }
            return;
        }

        if let ScanState::InBlock(_) = self.state {
            self.block.extend_from_slice(line);
            if is_unlock(line) {
                self.emit(out);
            }
        }
    }

    /// Flush a block left open at end of input and return the tables found,
    /// in dump order.
    pub fn finish(mut self, out: &mut Vec<u8>) -> Vec<String> {
        self.emit(out);
        self.found
    }

    fn emit(&mut self, out: &mut Vec<u8>) {
        let ScanState::InBlock(table) = std::mem::replace(&mut self.state, ScanState::Scanning) else {
            return;
        };
        out.append(&mut self.block);
        if !out.ends_with(b"\n") {
            out.push(b'\n');
        }
        out.push(b'\n');

        let name = String::from_utf8_lossy(&table).into_owned();
        if !self.found.contains(&name) {
            self.found.push(name);
        }
    }
}

/// Result of [`extract_blocks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Concatenated blocks without preamble.
    pub sql: Vec<u8>,
    pub tables: Vec<String>,
}

/// Extract the blocks of `tables` from an in-memory sequence of lines.
pub fn extract_blocks<'l, I, S>(lines: I, tables: &[S]) -> Extraction
where
    I: IntoIterator<Item = &'l [u8]>,
    S: AsRef<str>,
{
    let mut extractor = BlockExtractor::new(tables.iter().map(AsRef::as_ref));
    let mut sql = Vec::new();
    for line in lines {
        extractor.push_line(line, &mut sql);
    }
    let tables = extractor.finish(&mut sql);
    Extraction { sql, tables }
}

/// A restorable fragment in the scratch directory, removed when dropped.
#[derive(Debug)]
pub struct ExtractedFragment {
    pub file: ScratchFile,
    pub tables: Vec<String>,
    pub bytes: u64,
}

impl ExtractedFragment {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Runs [`BlockExtractor`] over dump files.
pub struct TableExtractor {
    runner: Arc<dyn ProcessRunner>,
    commands: MysqlCommands,
    scratch_dir: PathBuf,
    grace: Duration,
}

impl TableExtractor {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        commands: MysqlCommands,
        scratch_dir: PathBuf,
        grace: Duration,
    ) -> Self {
        Self {
            runner,
            commands,
            scratch_dir,
            grace,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Extract outside any registered operation.
    pub async fn extract(&self, dump: &Path, tables: &[TableName]) -> VaultResult<ExtractedFragment> {
        let mut supervisor = Supervisor::new(self.runner.as_ref(), self.grace);
        self.extract_with(&mut supervisor, dump, tables).await
    }

    /// Extract under `supervisor`, so cancelling its operation stops the
    /// decompression and the scan. Scratch files are removed on every exit
    /// path.
    pub async fn extract_with(
        &self,
        supervisor: &mut Supervisor<'_>,
        dump: &Path,
        tables: &[TableName],
    ) -> VaultResult<ExtractedFragment> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| FilesystemError::io(FsOperation::CreateDir, &self.scratch_dir, &e))?;

        let decompressed = if is_compressed(dump) {
            let scratch = ScratchFile::new(&self.scratch_dir, "decompressed", "sql");
            debug!(dump = %dump.display(), scratch = %scratch.path().display(), "decompressing dump");
            supervisor
                .run_to_file(&self.commands.decompress_file(dump), scratch.path(), false)
                .await?;
            Some(scratch)
        } else {
            None
        };
        let source = decompressed.as_ref().map_or(dump, ScratchFile::path);

        let fragment = ScratchFile::new(&self.scratch_dir, "restore_tables", "sql");
        let (found, bytes) = supervisor
            .guard(scan_into(source, fragment.path(), tables))
            .await?;

        if found.is_empty() {
            return Err(ParseError::NoMatchingTables {
                dump: dump.to_path_buf(),
                requested: tables.iter().map(|t| t.as_str().to_string()).collect(),
            }
            .into());
        }
        info!(dump = %dump.display(), tables = ?found, bytes, "tables extracted");

        Ok(ExtractedFragment {
            file: fragment,
            tables: found,
            bytes,
        })
    }
}

async fn scan_into(
    source: &Path,
    fragment: &Path,
    tables: &[TableName],
) -> VaultResult<(Vec<String>, u64)> {
    let read_err = |e: std::io::Error| FilesystemError::io(FsOperation::Read, source, &e);
    let write_err = |e: std::io::Error| FilesystemError::io(FsOperation::Write, fragment, &e);

    let mut reader = BufReader::new(File::open(source).await.map_err(read_err)?);
    let out_file = File::create(fragment)
        .await
        .map_err(|e| FilesystemError::io(FsOperation::Create, fragment, &e))?;
    let mut writer = BufWriter::new(out_file);

    writer
        .write_all(FRAGMENT_PREAMBLE.as_bytes())
        .await
        .map_err(write_err)?;
    let mut bytes = FRAGMENT_PREAMBLE.len() as u64;

    let mut extractor = BlockExtractor::new(tables.iter().map(TableName::as_str));
    let mut line = Vec::new();
    let mut out = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await.map_err(read_err)? == 0 {
            break;
        }
        extractor.push_line(&line, &mut out);
        if !out.is_empty() {
            writer.write_all(&out).await.map_err(write_err)?;
            bytes += out.len() as u64;
            out.clear();
        }
    }
    let found = extractor.finish(&mut out);
    out.extend_from_slice(FRAGMENT_TRAILER.as_bytes());
    writer.write_all(&out).await.map_err(write_err)?;
    bytes += out.len() as u64;
    writer.flush().await.map_err(write_err)?;

    Ok((found, bytes))
}
