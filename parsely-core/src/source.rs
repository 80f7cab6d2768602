//! Byte access abstraction for platform-independent parsing code.
//!
//! The demarcator never touches files directly. It reads through a
//! [`ByteSource`], so the same scanning logic runs over an in-memory buffer
//! (tests, network captures) or a file-backed source provided by the
//! `parsely` crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use parsely_core::source::{ByteSource, MemorySource};
//!
//! let mut src = MemorySource::new(vec![0u8; 128]);
//! let mut header = [0u8; 20];
//! src.read_at(0, &mut header)?;
//! ```

use crate::error::SourceError;

// =============================================================================
// ByteSource Trait
// =============================================================================

/// Random-access, read-only byte provider.
pub trait ByteSource {
    /// Total length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Reading past the end is an error; callers check [`len`](Self::len)
    /// first.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SourceError>;

    /// Read `len` bytes at `offset` into a fresh buffer
    fn read_vec(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, SourceError> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SourceError> {
        (**self).read_at(offset, buf)
    }
}

// =============================================================================
// In-memory source
// =============================================================================

/// [`ByteSource`] over any owned or borrowed byte buffer
#[derive(Debug, Clone)]
pub struct MemorySource<T> {
    data: T,
}

impl<T: AsRef<[u8]>> MemorySource<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T: AsRef<[u8]>> ByteSource for MemorySource<T> {
    fn len(&self) -> u64 {
        self.data.as_ref().len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SourceError> {
        let data = self.data.as_ref();
        let start = usize::try_from(offset).map_err(|_| SourceError::new(offset, "offset out of range"))?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                SourceError::new(
                    offset,
                    format!("read of {} bytes past end of {}-byte buffer", buf.len(), data.len()),
                )
            })?;
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_reads() {
        let mut src = MemorySource::new(&[1u8, 2, 3, 4, 5][..]);
        assert_eq!(src.len(), 5);

        let mut buf = [0u8; 2];
        src.read_at(3, &mut buf).unwrap();
        assert_eq!(buf, [4, 5]);

        assert_eq!(src.read_vec(0, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_memory_source_past_end() {
        let mut src = MemorySource::new(vec![0u8; 4]);
        let mut buf = [0u8; 2];
        let err = src.read_at(3, &mut buf).unwrap_err();
        assert_eq!(err.offset, 3);

        let mut empty = MemorySource::new(Vec::<u8>::new());
        assert!(empty.is_empty());
        assert!(empty.read_at(0, &mut []).is_ok());
    }
}
