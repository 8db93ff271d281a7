// https://wiki.osdev.org/Paging
// https://www.kernel.org/doc/gorman/html/understand/understand014.html

// Avoids lots of warnings about casting usize to u32 which cannot result in
// truncation on a 32-bit platform, which is all we support. It would be nice if
// you could tell clippy that you were only dealing with 32-bit usizes...
#![allow(clippy::cast_possible_truncation)]

use crate::mem::PAGE_FRAME_SIZE;
use arbitrary_int::{u10, u12, u20, u24, u6};
use bitbybit::bitfield;
use core::{
    mem::size_of,
    ops::{Deref, DerefMut},
};

pub const PAGE_DIRECTORY_LEN: usize = PAGE_FRAME_SIZE / size_of::<PageDirectoryEntry>();

#[repr(align(4096))]
pub struct PageDirectory(pub [PageDirectoryEntry; PAGE_DIRECTORY_LEN]);

impl PageDirectory {
    pub const DEFAULT: Self = Self([PageDirectoryEntry::DEFAULT; PAGE_DIRECTORY_LEN]);
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Deref for PageDirectory {
    type Target = [PageDirectoryEntry; PAGE_DIRECTORY_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PageDirectory {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[bitfield(u32, default = 0)]
pub struct PageDirectoryEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(7, rw)]
    page_size: bool,
    #[bits(12..=31, rw)]
    page_table_address: u20,
}

pub const PAGE_TABLE_LEN: usize = PAGE_FRAME_SIZE / size_of::<PageTableEntry>();

#[repr(align(4096))]
pub struct PageTable(pub [PageTableEntry; PAGE_TABLE_LEN]);

impl Default for PageTable {
    fn default() -> Self {
        Self([PageTableEntry::default(); PAGE_TABLE_LEN])
    }
}

impl Deref for PageTable {
    type Target = [PageTableEntry; PAGE_TABLE_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PageTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bit(7, rw)]
    page_attribute_table: bool,
    #[bit(8, rw)]
    global: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

impl PageTableEntry {
    /// A non-present user entry holding `entry` in place of a frame address.
    pub fn swapped(entry: SwapEntry) -> Self {
        Self::new_with_raw_value(entry.raw_value()).with_user_supervisor(true)
    }

    /// Decodes the swap entry stored in a swapped-out page.
    ///
    /// Only entries that are not present but still user accessible hold a
    /// swap entry; an all-zero entry is simply unmapped.
    pub fn swap_entry(&self) -> Option<SwapEntry> {
        if self.present() || !self.user_supervisor() {
            return None;
        }
        // The user bit shares bit 2 with the area field, which is why only
        // area 0 is ever encoded.
        Some(SwapEntry::new_with_raw_value(
            self.with_user_supervisor(false).raw_value(),
        ))
    }
}

/// Location of a swapped-out page, stored in a PTE whose present bit is clear.
///
/// Bit 0 must stay clear. Bit 7 is reserved for PROT_NONE pages. A 24-bit
/// offset allows swap areas up to 64GB with 4KB pages.
#[bitfield(u32, default = 0)]
pub struct SwapEntry {
    #[bits(1..=6, rw)]
    area: u6,
    #[bits(8..=31, rw)]
    offset: u24,
}

impl SwapEntry {
    pub fn from_parts(area: u6, offset: u24) -> Self {
        Self::DEFAULT.with_area(area).with_offset(offset)
    }

    /// Slot index within the swap map.
    pub fn slot(&self) -> usize {
        self.offset().value() as usize
    }
}

#[bitfield(u32)]
pub struct VirtualAddress {
    #[bits(22..=31, r)]
    page_directory_index: u10,
    #[bits(12..=21, r)]
    page_table_index: u10,
    #[bits(0..=11, r)]
    offset: u12,
}
