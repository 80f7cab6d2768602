//! File-backed [`ByteSource`]
//!
//! Reads go through one aligned block cache. Header probes during a resync
//! scan hit the same block over and over, so the file is only touched when
//! the scan crosses a block boundary.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parsely_core::{ByteSource, SourceError};

use crate::error::ReaderError;

/// Size of the read-ahead block
pub const BLOCK_SIZE: usize = 64 * 1024;

pub struct FileSource {
    file: File,
    path: PathBuf,
    len: u64,
    block: Vec<u8>,
    block_start: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        let file = File::open(path).map_err(|e| ReaderError::io(path, e))?;
        let len = file.metadata().map_err(|e| ReaderError::io(path, e))?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            block: Vec::with_capacity(BLOCK_SIZE),
            block_start: 0,
        })
    }

    fn fill_block(&mut self, offset: u64) -> io::Result<()> {
        let start = offset - offset % BLOCK_SIZE as u64;
        let size = (self.len - start).min(BLOCK_SIZE as u64) as usize;
        self.block.resize(size, 0);
        self.file.seek(SeekFrom::Start(start))?;
        if let Err(e) = self.file.read_exact(&mut self.block) {
            self.block.clear();
            return Err(e);
        }
        self.block_start = start;
        Ok(())
    }

    fn cached(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let rel = offset.checked_sub(self.block_start)? as usize;
        self.block.get(rel..rel + len)
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SourceError> {
        let end = offset.saturating_add(buf.len() as u64);
        if end > self.len {
            return Err(SourceError::new(
                offset,
                format!("read of {} bytes past end of {}", buf.len(), self.path.display()),
            ));
        }

        if let Some(hit) = self.cached(offset, buf.len()) {
            buf.copy_from_slice(hit);
            return Ok(());
        }

        // Large reads bypass the cache
        if buf.len() > BLOCK_SIZE / 2 {
            return self
                .file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| self.file.read_exact(buf))
                .map_err(|e| SourceError::new(offset, e.to_string()));
        }

        self.fill_block(offset)
            .map_err(|e| SourceError::new(offset, e.to_string()))?;
        if let Some(hit) = self.cached(offset, buf.len()) {
            buf.copy_from_slice(hit);
            return Ok(());
        }

        // Straddles two blocks
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(buf))
            .map_err(|e| SourceError::new(offset, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source_with(data: &[u8]) -> (tempfile::NamedTempFile, FileSource) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        let source = FileSource::open(file.path()).unwrap();
        (file, source)
    }

    #[test]
    fn test_reads_across_blocks() {
        let data: Vec<u8> = (0..BLOCK_SIZE * 2 + 100).map(|i| (i % 251) as u8).collect();
        let (_file, mut src) = source_with(&data);
        assert_eq!(src.len(), data.len() as u64);

        let mut buf = [0u8; 16];
        src.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[10..26]);

        let edge = BLOCK_SIZE as u64 - 8;
        src.read_at(edge, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[edge as usize..edge as usize + 16]);

        let big = src.read_vec(5, BLOCK_SIZE).unwrap();
        assert_eq!(&big[..], &data[5..5 + BLOCK_SIZE]);

        let tail = src.read_vec(data.len() as u64 - 4, 4).unwrap();
        assert_eq!(&tail[..], &data[data.len() - 4..]);
    }

    #[test]
    fn test_read_past_end() {
        let (_file, mut src) = source_with(&[1, 2, 3]);
        let mut buf = [0u8; 4];
        let err = src.read_at(0, &mut buf).unwrap_err();
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileSource::open(&dir.path().join("absent.s7k"));
        assert!(matches!(result, Err(ReaderError::Io { .. })));
    }
}
