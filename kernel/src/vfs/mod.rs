//! The file interface swap I/O goes through.

pub mod ramfile;

pub use ramfile::RamFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// no space left on device
    NoSpace,
    /// offset past the end of what the file can address
    InvalidOffset,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoSpace => write!(f, "no space left on device"),
            Self::InvalidOffset => write!(f, "invalid file offset"),
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// An open file with a current position, like a kernel `struct file`.
///
/// `read` and `write` transfer as much as they can starting at the current
/// offset and advance it by the number of bytes moved.
pub trait File: Send {
    fn offset(&self) -> u64;

    fn set_offset(&mut self, offset: u64);

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Size in bytes
    fn size(&self) -> u64;
}
