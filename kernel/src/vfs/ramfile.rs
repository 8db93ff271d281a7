use crate::vfs::{Error, File, Result};
use alloc::vec::Vec;
use core::cmp::min;

/// A file kept entirely in memory.
///
/// Writes past the end grow the file, up to `capacity` bytes if one is set.
#[derive(Default)]
pub struct RamFile {
    data: Vec<u8>,
    offset: u64,
    capacity: Option<usize>,
}

impl RamFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    fn position(&self) -> Result<usize> {
        usize::try_from(self.offset).map_err(|_| Error::InvalidOffset)
    }
}

impl File for RamFile {
    fn offset(&self) -> u64 {
        self.offset
    }

    fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let start = self.position()?;
        if start >= self.data.len() {
            return Ok(0);
        }
        let len = min(buf.len(), self.data.len() - start);
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        self.offset += len as u64;
        Ok(len)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let start = self.position()?;
        let limit = self.capacity.unwrap_or(usize::MAX);
        if start >= limit {
            return Err(Error::NoSpace);
        }
        let len = min(buf.len(), limit - start);
        let end = start + len;
        if end > self.data.len() {
            self.data
                .try_reserve(end - self.data.len())
                .map_err(|_| Error::NoSpace)?;
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(&buf[..len]);
        self.offset += len as u64;
        Ok(len)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
