use crate::sizes::{KB, MB};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;
pub const HUGE_PAGE_SIZE: usize = 4 * MB;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x80000000;

/// Page directory entries below this index map user space.
pub const USER_PDE_LIMIT: usize = OFFSET / HUGE_PAGE_SIZE;

/// "Upper memory" (as opposed to "lower memory") starts at 1MB. Physical
/// frames handed out to page tables and user pages start here.
pub const UPPER_MEMORY_START: u32 = MB as u32;
