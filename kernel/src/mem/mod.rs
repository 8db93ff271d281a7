//! The page-table side of swapping.
//!
//! The swap subsystem never touches hardware page tables directly. It reads
//! and rewrites entries through [`PageTableAccess`], addressing each page by
//! the physical address of the page-table entry that maps it.

// Entry offsets are bounded by the page size.
#![allow(clippy::cast_possible_truncation)]

pub mod frame_allocator;
pub mod page_table;

pub use page_table::PageTableArena;

use crate::threading::process::Pid;
use core::{fmt, mem::size_of};
use kswap_shared::{
    mem::{PAGE_FRAME_SIZE, USER_PDE_LIMIT},
    paging::{PageDirectory, PageTableEntry, SwapEntry},
};

/// The contents of one physical page.
pub type Frame = [u8; PAGE_FRAME_SIZE];

/// Physical address of a page-table entry.
///
/// This is the identity the LRU lists track: a page table occupies one frame,
/// so all 1024 entries of a table fall inside `[table, table + PAGE_FRAME_SIZE)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PteAddr(pub u32);

impl PteAddr {
    /// Address of the first entry of the page table held by physical frame `pfn`.
    pub fn of_table(pfn: u32) -> Self {
        Self(pfn << 12)
    }

    pub fn entry(self, index: usize) -> Self {
        Self(self.0 + (index * size_of::<PageTableEntry>()) as u32)
    }

    /// Address of the page table this entry lives in.
    pub fn table(self) -> Self {
        Self(self.0 & !(PAGE_FRAME_SIZE as u32 - 1))
    }

    pub fn index(self) -> usize {
        (self.0 as usize & (PAGE_FRAME_SIZE - 1)) / size_of::<PageTableEntry>()
    }
}

impl fmt::Debug for PteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PteAddr({:#010x})", self.0)
    }
}

impl fmt::Display for PteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// What the swap subsystem needs from the memory-management unit.
///
/// Implementations panic when handed an address that is not inside a live
/// page table; that can only come from a corrupted LRU entry or swap walk.
pub trait PageTableAccess {
    fn entry(&self, pte: PteAddr) -> PageTableEntry;

    fn set_entry(&mut self, pte: PteAddr, entry: PageTableEntry);

    /// Contents of the frame a present entry maps.
    fn frame(&self, pte: PteAddr) -> Option<&Frame>;

    /// Gives the page a fresh frame holding `data` and marks it present.
    ///
    /// Returns `false` when physical memory is exhausted.
    fn install_frame(&mut self, pte: PteAddr, data: &Frame) -> bool;

    /// Returns the frame behind a present entry to the frame allocator. The
    /// entry itself is left for the caller to rewrite.
    fn release_frame(&mut self, pte: PteAddr);

    /// The process whose page directory holds this entry.
    fn owner(&self, pte: PteAddr) -> Option<Pid>;

    fn is_accessed(&self, pte: PteAddr) -> bool {
        self.entry(pte).accessed()
    }

    fn clear_accessed(&mut self, pte: PteAddr) {
        let entry = self.entry(pte).with_accessed(false);
        self.set_entry(pte, entry);
    }

    fn is_present(&self, pte: PteAddr) -> bool {
        self.entry(pte).present()
    }

    /// Replaces a resident mapping with a swapped-out one.
    fn encode_swap(&mut self, pte: PteAddr, slot: SwapEntry) {
        self.set_entry(pte, PageTableEntry::swapped(slot));
    }

    fn decode_swap(&self, pte: PteAddr) -> Option<SwapEntry> {
        self.entry(pte).swap_entry()
    }
}

/// Page tables mapping the user half of `dir`.
pub fn user_page_tables(dir: &PageDirectory) -> impl Iterator<Item = PteAddr> + '_ {
    dir.iter()
        .take(USER_PDE_LIMIT)
        .filter(|pde| pde.present())
        .map(|pde| PteAddr::of_table(pde.page_table_address().value()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_addresses_stay_inside_their_table() {
        let table = PteAddr::of_table(0x101);
        assert_eq!(table.0, 0x0010_1000);

        let last = table.entry(1023);
        assert_eq!(last.0, 0x0010_1ffc);
        assert_eq!(last.table(), table);
        assert_eq!(last.index(), 1023);
    }
}
