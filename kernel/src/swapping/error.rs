use crate::vfs;
use core::fmt::{Debug, Display, Formatter};

pub enum SwapError {
    /// No swap file has been bound yet.
    NoBackingStore,
    AlreadyBound,
    /// Every swap slot is taken.
    NoSpace,
    /// The page-table entry does not hold a swapped-out page.
    NotSwapped,
    UnknownProcess,
    ShortTransfer {
        expected: usize,
        actual: usize,
    },
    Io(vfs::Error),
}

impl Debug for SwapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            SwapError::NoBackingStore => write!(f, "NoBackingStore"),
            SwapError::AlreadyBound => write!(f, "AlreadyBound"),
            SwapError::NoSpace => write!(f, "NoSpace"),
            SwapError::NotSwapped => write!(f, "NotSwapped"),
            SwapError::UnknownProcess => write!(f, "UnknownProcess"),
            SwapError::ShortTransfer { expected, actual } => {
                write!(f, "ShortTransfer({actual} of {expected})")
            }
            SwapError::Io(e) => write!(f, "Io({e:?})"),
        }
    }
}

impl Display for SwapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            SwapError::NoBackingStore => write!(f, "no swap file bound"),
            SwapError::AlreadyBound => write!(f, "swap file already bound"),
            SwapError::NoSpace => write!(f, "swap area full"),
            SwapError::NotSwapped => write!(f, "page is not swapped out"),
            SwapError::UnknownProcess => write!(f, "page belongs to no known process"),
            SwapError::ShortTransfer { expected, actual } => {
                write!(f, "transferred {actual} of {expected} bytes")
            }
            SwapError::Io(e) => write!(f, "swap file error: {e}"),
        }
    }
}

impl core::error::Error for SwapError {}

impl From<vfs::Error> for SwapError {
    fn from(e: vfs::Error) -> Self {
        SwapError::Io(e)
    }
}
