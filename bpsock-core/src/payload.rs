//! Bundle payload storage: in memory, backed by a file, or a temporary file removed once consumed.

use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DtnError;

/// Where the engine should place a received payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadLocation {
    File,
    #[default]
    Memory,
    TemporaryFile,
}

impl PayloadLocation {
    /// Engine value of the location.
    pub fn value(self) -> i32 {
        match self {
            PayloadLocation::File => 0,
            PayloadLocation::Memory => 1,
            PayloadLocation::TemporaryFile => 2,
        }
    }

    pub fn from_value(v: i32) -> Option<Self> {
        match v {
            0 => Some(PayloadLocation::File),
            1 => Some(PayloadLocation::Memory),
            2 => Some(PayloadLocation::TemporaryFile),
            _ => None,
        }
    }
}

/// A payload file, read lazily and cached after the first full read.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    cache: OnceLock<Vec<u8>>,
}

impl FileSource {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            cache: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Memory(Vec<u8>),
    File(FileSource),
    TemporaryFile(FileSource),
}

impl Payload {
    /// In-memory payload holding a copy of `data`.
    pub fn memory(data: &[u8]) -> Self {
        Payload::Memory(data.to_vec())
    }

    pub fn file(path: impl Into<PathBuf>) -> Result<Self, DtnError> {
        Ok(Payload::File(FileSource::new(checked_path(path.into())?)))
    }

    /// File payload whose file is deleted once its content has been consumed.
    pub fn temporary_file(path: impl Into<PathBuf>) -> Result<Self, DtnError> {
        Ok(Payload::TemporaryFile(FileSource::new(checked_path(
            path.into(),
        )?)))
    }

    pub fn location(&self) -> PayloadLocation {
        match self {
            Payload::Memory(_) => PayloadLocation::Memory,
            Payload::File(_) => PayloadLocation::File,
            Payload::TemporaryFile(_) => PayloadLocation::TemporaryFile,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Payload::Memory(_) => None,
            Payload::File(src) | Payload::TemporaryFile(src) => Some(src.path()),
        }
    }

    /// Raw payload bytes. File payloads are read once and cached; a temporary file is deleted after the read.
    pub fn data(&self) -> io::Result<&[u8]> {
        match self {
            Payload::Memory(bytes) => Ok(bytes.as_slice()),
            Payload::File(src) => read_cached(src, false),
            Payload::TemporaryFile(src) => read_cached(src, true),
        }
    }

    /// Byte stream over the payload. Uncached file payloads stream straight from disk;
    /// for a temporary file the file is removed when the stream is dropped.
    pub fn reader(&self) -> io::Result<Box<dyn Read + Send + '_>> {
        match self {
            Payload::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
            Payload::File(src) => match src.cache.get() {
                Some(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
                None => Ok(Box::new(File::open(&src.path)?)),
            },
            Payload::TemporaryFile(src) => match src.cache.get() {
                Some(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
                None => Ok(Box::new(DeleteOnClose {
                    file: File::open(&src.path)?,
                    path: src.path.clone(),
                })),
            },
        }
    }

    pub fn text_reader(&self) -> io::Result<BufReader<Box<dyn Read + Send + '_>>> {
        Ok(BufReader::new(self.reader()?))
    }

    /// Payload length in bytes without forcing a file read.
    pub fn len(&self) -> io::Result<u64> {
        match self {
            Payload::Memory(bytes) => Ok(bytes.len() as u64),
            Payload::File(src) | Payload::TemporaryFile(src) => match src.cache.get() {
                Some(bytes) => Ok(bytes.len() as u64),
                None => Ok(fs::metadata(&src.path)?.len()),
            },
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn checked_path(path: PathBuf) -> Result<PathBuf, DtnError> {
    if path.as_os_str().is_empty() {
        return Err(DtnError::InvalidArgument(
            "payload file path can't be empty".into(),
        ));
    }
    Ok(path)
}

fn read_cached(src: &FileSource, delete_after: bool) -> io::Result<&[u8]> {
    if let Some(bytes) = src.cache.get() {
        return Ok(bytes.as_slice());
    }
    let bytes = fs::read(&src.path)?;
    if delete_after {
        remove_quietly(&src.path);
    }
    Ok(src.cache.get_or_init(|| bytes).as_slice())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to delete temporary payload");
        }
    }
}

/// File reader that deletes its file when dropped.
struct DeleteOnClose {
    file: File,
    path: PathBuf,
}

impl Read for DeleteOnClose {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Drop for DeleteOnClose {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}
