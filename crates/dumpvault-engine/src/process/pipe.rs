//! Byte stream plumbing between children, files and the engine.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::ProcessReader;

const CHUNK_SIZE: usize = 64 * 1024;

/// Which side of a copy failed.
#[derive(Debug)]
pub(crate) enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

impl CopyError {
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            CopyError::Read(e) | CopyError::Write(e) => e,
        }
    }
}

/// Copy `reader` into `writer`, calling `on_chunk` with the size of every
/// chunk written. The writer is flushed and shut down at end of input so a
/// child reading from it sees EOF.
pub(crate) async fn copy_counting<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    mut on_chunk: F,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64),
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(CopyError::Read)?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(CopyError::Write)?;
        total += n as u64;
        on_chunk(n as u64);
    }
    writer.flush().await.map_err(CopyError::Write)?;
    writer.shutdown().await.map_err(CopyError::Write)?;
    Ok(total)
}

/// Most stderr kept per child. Older output is discarded.
pub(crate) const STDERR_TAIL: usize = 64 * 1024;

/// Drain a child's stderr, keeping its last [`STDERR_TAIL`] bytes. The
/// stream is read to the end so the child never blocks on a full pipe.
pub(crate) async fn read_stderr(reader: Option<ProcessReader>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut tail = Vec::with_capacity(CHUNK_SIZE);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut dropped = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > 2 * STDERR_TAIL {
                    tail.drain(..tail.len() - STDERR_TAIL);
                    dropped = true;
                }
            }
            Err(e) => {
                debug!(error = %e, "stderr stream ended early");
                break;
            }
        }
    }
    if tail.len() > STDERR_TAIL {
        tail.drain(..tail.len() - STDERR_TAIL);
        dropped = true;
    }
    if dropped {
        // Start at a line boundary when one is available.
        if let Some(newline) = tail.iter().position(|b| *b == b'\n')
            && newline + 1 < tail.len()
        {
            tail.drain(..=newline);
        }
        debug!(kept = tail.len(), "stderr truncated to its tail");
    }
    String::from_utf8_lossy(&tail).into_owned()
}
