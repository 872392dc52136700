//! Thin, deterministic file system operations over [`OsFile`].
//!
//! All operations are async (`tokio::fs`) and fallible; errors carry the
//! attempted operation and path. Existence checks map "does not exist" to
//! `Ok(false)` rather than an error.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::file::OsFile;

/// A file system operation failure, annotated with the operation name and
/// the OS path it targeted.
#[derive(Debug, Error)]
#[error("storage {operation} failed for {}: {source}", path.display())]
pub struct StorageError {
    operation: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
}

impl StorageError {
    fn new(operation: &'static str, file: &OsFile, source: io::Error) -> Self {
        Self {
            operation,
            path: file.os_path(),
            source,
        }
    }

    /// The underlying I/O error kind.
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

/// Returns whether the file exists. A missing entry is not an error.
pub async fn exists(file: &OsFile) -> Result<bool, StorageError> {
    match fs::metadata(file.os_path()).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StorageError::new("stat", file, err)),
    }
}

/// Creates an empty regular file, truncating any previous content.
///
/// Fails if the parent directory does not exist.
pub async fn create(file: &OsFile) -> Result<(), StorageError> {
    fs::File::create(file.os_path())
        .await
        .map_err(|err| StorageError::new("create", file, err))?;
    Ok(())
}

/// Idempotent mkdir-p for the directory the file denotes.
pub async fn create_dir_if_not_exists(file: &OsFile) -> Result<(), StorageError> {
    fs::create_dir_all(file.os_path())
        .await
        .map_err(|err| StorageError::new("mkdir", file, err))
}

/// Reads the file size in bytes.
pub async fn read_size(file: &OsFile) -> Result<u64, StorageError> {
    let metadata = fs::metadata(file.os_path())
        .await
        .map_err(|err| StorageError::new("stat", file, err))?;
    Ok(metadata.len())
}

/// Lists the names of the direct children of the directory the file denotes.
///
/// Order is unspecified. Entry names that are not valid UTF-8 are skipped.
pub async fn list_names(file: &OsFile) -> Result<Vec<String>, StorageError> {
    let mut entries = fs::read_dir(file.os_path())
        .await
        .map_err(|err| StorageError::new("list", file, err))?;
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| StorageError::new("list", file, err))?
    {
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

/// Appends exactly `chunk` to the file.
///
/// Fails if the file does not exist.
pub async fn append_write(file: &OsFile, chunk: &[u8]) -> Result<(), StorageError> {
    let mut handle = fs::OpenOptions::new()
        .append(true)
        .open(file.os_path())
        .await
        .map_err(|err| StorageError::new("open for append", file, err))?;
    handle
        .write_all(chunk)
        .await
        .map_err(|err| StorageError::new("append", file, err))?;
    handle
        .flush()
        .await
        .map_err(|err| StorageError::new("append", file, err))
}

/// Streams the file into `sink` in chunks of at most `buf_size` bytes.
///
/// Reads through a buffered reader; chunk sizes may be smaller near EOF.
/// Returns the total number of bytes streamed. The first read or sink error
/// aborts the stream.
pub async fn stream_read<W>(
    file: &OsFile,
    buf_size: usize,
    sink: &mut W,
) -> Result<u64, StorageError>
where
    W: AsyncWrite + Unpin,
{
    let handle = fs::File::open(file.os_path())
        .await
        .map_err(|err| StorageError::new("open", file, err))?;
    let mut reader = BufReader::with_capacity(buf_size, handle);
    let mut buf = vec![0u8; buf_size];
    let mut total = 0u64;
    let mut chunks = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|err| StorageError::new("read", file, err))?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])
            .await
            .map_err(|err| StorageError::new("stream", file, err))?;
        total += n as u64;
        chunks += 1;
    }
    trace!(path = %file.os_path().display(), bytes = total, chunks, "streaming completed");
    Ok(total)
}
