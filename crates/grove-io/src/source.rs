//! Byte-range read primitive consumed by the chunked accessor.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::IoError;

/// A random-access byte source: the only storage operation the dataset
/// accessor needs.
pub trait ByteSource {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Return `true` if the source holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::ShortRead`] | the range extends past the end of the source |
    /// | [`IoError::Read`] | the underlying read fails |
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), IoError>;
}

fn check_range(offset: u64, len: usize, source_len: u64) -> Result<(), IoError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= source_len => Ok(()),
        _ => Err(IoError::ShortRead {
            offset,
            len,
            source_len,
        }),
    }
}

/// A dataset file read through seek + read.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: File,
    len: u64,
}

impl FileSource {
    /// Open `path` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::FileNotFound`] if the file cannot be opened or stat'ed.
    #[instrument(fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, IoError> {
        let not_found = |e| IoError::FileNotFound {
            path: path.to_path_buf(),
            source: e,
        };
        let file = File::open(path).map_err(not_found)?;
        let len = file.metadata().map_err(not_found)?.len();
        debug!(len, "opened dataset file");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    /// Path the source was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), IoError> {
        check_range(offset, buf.len(), self.len)?;
        let len = buf.len();
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(buf))
            .map_err(|e| IoError::Read {
                offset,
                len,
                source: e,
            })
    }
}

/// An in-memory byte source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    bytes: Vec<u8>,
}

impl MemorySource {
    /// Wrap an owned byte buffer.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Borrow the underlying bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), IoError> {
        check_range(offset, buf.len(), self.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_source_reads_ranges() {
        let mut src = MemorySource::new((0u8..10).collect());
        let mut buf = [0u8; 3];
        src.read_at(4, &mut buf).unwrap();
        assert_eq!(buf, [4, 5, 6]);
        let err = src.read_at(8, &mut buf).unwrap_err();
        assert!(matches!(err, IoError::ShortRead { offset: 8, len: 3, source_len: 10 }));
    }

    #[test]
    fn file_source_reads_ranges() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, [9u8, 8, 7, 6, 5]).unwrap();
        let mut src = FileSource::open(&path).unwrap();
        assert_eq!(src.len(), 5);
        let mut buf = [0u8; 2];
        src.read_at(3, &mut buf).unwrap();
        assert_eq!(buf, [6, 5]);
        src.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [9, 8]);
    }

    #[test]
    fn missing_file_error() {
        let err = FileSource::open(Path::new("/nonexistent/grove/data.bin")).unwrap_err();
        assert!(matches!(err, IoError::FileNotFound { .. }));
    }
}
