//! Virtual memory swapping for a 32-bit x86 kernel.
//!
//! [`SwapSystem`] owns the swap slot allocator, the active/inactive LRU
//! lists and the binding to the backing store. The kernel hands it the page
//! tables through [`mem::PageTableAccess`] and its processes through
//! [`threading::process::ProcessTable`].

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod mem;
pub mod swapping;
pub mod sync;
pub mod threading;
pub mod vfs;

pub use swapping::{SwapConfig, SwapError, SwapStats, SwapSystem};
