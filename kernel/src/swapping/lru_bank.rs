//! Page-sized pool of LRU list entries.
//!
//! List nodes are never allocated one at a time. The bank hands out slots
//! from page-sized chunks and grows by a whole chunk when every slot is
//! taken. Chunks are never given back.

use crate::mem::PteAddr;
use alloc::{boxed::Box, vec::Vec};
use core::mem::size_of;
use kswap_shared::{mem::PAGE_FRAME_SIZE, println};

/// Bytes of each bank page spent on its own bookkeeping (chain links and
/// used count).
pub const LRU_HEADER_SIZE: usize = 12;

/// Entries that fit in one bank page next to the header, with each entry
/// taking a 32-bit address and a 32-bit link.
pub const LRU_ENTRIES_PER_PAGE: usize = (PAGE_FRAME_SIZE - LRU_HEADER_SIZE) / (2 * size_of::<u32>());

/// Stable name of a bank slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryHandle {
    page: usize,
    slot: usize,
}

#[derive(Clone, Copy, Default)]
pub struct LruEntry {
    /// `None` while the slot sits free in the bank.
    pub addr: Option<PteAddr>,
    pub next: Option<EntryHandle>,
}

struct BankPage {
    slots: Box<[LruEntry]>,
    used: usize,
}

impl BankPage {
    fn new(entries: usize) -> Option<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(entries).ok()?;
        slots.resize(entries, LruEntry::default());
        Some(Self {
            slots: slots.into_boxed_slice(),
            used: 0,
        })
    }
}

pub struct EntryBank {
    pages: Vec<BankPage>,
    entries_per_page: usize,
    page_limit: Option<usize>,
}

impl EntryBank {
    /// Creates the bank with its first page.
    pub fn new(entries_per_page: usize, page_limit: Option<usize>) -> Self {
        assert!(entries_per_page > 0, "lru bank pages must hold entries");
        let mut bank = Self {
            pages: Vec::new(),
            entries_per_page,
            page_limit,
        };
        bank.grow();
        bank
    }

    fn grow(&mut self) -> usize {
        if self.page_limit.is_some_and(|limit| self.pages.len() >= limit) {
            panic!(
                "lru bank: cannot allocate page {} (limit reached)",
                self.pages.len()
            );
        }
        let page = self
            .pages
            .try_reserve(1)
            .ok()
            .and_then(|()| BankPage::new(self.entries_per_page))
            .unwrap_or_else(|| panic!("lru bank: out of memory for a new page"));
        self.pages.push(page);
        let index = self.pages.len() - 1;
        if index > 0 {
            println!(
                "kernel: lru bank grew to {} pages ({} entries)",
                self.pages.len(),
                self.capacity()
            );
        }
        index
    }

    /// Takes a free slot for `addr`, growing the bank by one page if every
    /// existing slot is in use.
    pub fn acquire_entry(&mut self, addr: PteAddr) -> EntryHandle {
        let found = self.pages.iter().enumerate().find_map(|(page, bank_page)| {
            if bank_page.used >= self.entries_per_page {
                return None;
            }
            bank_page
                .slots
                .iter()
                .position(|entry| entry.addr.is_none())
                .map(|slot| EntryHandle { page, slot })
        });
        let handle = match found {
            Some(handle) => handle,
            None => EntryHandle {
                page: self.grow(),
                slot: 0,
            },
        };

        let page = &mut self.pages[handle.page];
        page.used += 1;
        page.slots[handle.slot] = LruEntry {
            addr: Some(addr),
            next: None,
        };
        handle
    }

    /// Returns a slot to the bank.
    pub fn release_entry(&mut self, handle: EntryHandle) {
        let Some(page) = self.pages.get_mut(handle.page) else {
            panic!("lru bank: no page owns entry {handle:?}");
        };
        let Some(entry) = page.slots.get_mut(handle.slot) else {
            panic!("lru bank: no page owns entry {handle:?}");
        };
        if entry.addr.is_none() {
            panic!("lru bank: entry {handle:?} released twice");
        }
        *entry = LruEntry::default();
        page.used -= 1;
    }

    pub fn get(&self, handle: EntryHandle) -> &LruEntry {
        &self.pages[handle.page].slots[handle.slot]
    }

    pub fn get_mut(&mut self, handle: EntryHandle) -> &mut LruEntry {
        &mut self.pages[handle.page].slots[handle.slot]
    }

    pub fn pages(&self) -> usize {
        self.pages.len()
    }

    pub fn capacity(&self) -> usize {
        self.pages.len() * self.entries_per_page
    }

    pub fn in_use(&self) -> usize {
        self.pages.iter().map(|page| page.used).sum()
    }
}
