//! Active and inactive page lists.
//!
//! New pages go on the head of one of two singly-linked lists. Rotation
//! demotes pages whose accessed bit stayed clear and promotes pages whose bit
//! got set, a clock-style approximation of LRU. The tail of the inactive list
//! is where victims come from.

use super::lru_bank::{EntryBank, EntryHandle};
use crate::mem::{PageTableAccess, PteAddr};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListKind {
    Active,
    Inactive,
}

#[derive(Clone, Copy, Default)]
struct ListHead {
    first: Option<EntryHandle>,
    count: usize,
}

pub struct LruLists {
    bank: EntryBank,
    active: ListHead,
    inactive: ListHead,
}

impl LruLists {
    pub fn new(bank: EntryBank) -> Self {
        Self {
            bank,
            active: ListHead::default(),
            inactive: ListHead::default(),
        }
    }

    fn head_mut(&mut self, kind: ListKind) -> &mut ListHead {
        match kind {
            ListKind::Active => &mut self.active,
            ListKind::Inactive => &mut self.inactive,
        }
    }

    fn head(&self, kind: ListKind) -> &ListHead {
        match kind {
            ListKind::Active => &self.active,
            ListKind::Inactive => &self.inactive,
        }
    }

    fn push_front(&mut self, kind: ListKind, handle: EntryHandle) {
        let first = self.head(kind).first;
        self.bank.get_mut(handle).next = first;
        let head = self.head_mut(kind);
        head.first = Some(handle);
        head.count += 1;
    }

    /// Unlinks `handle`, whose predecessor in `kind` is `prev`.
    fn unlink(&mut self, kind: ListKind, prev: Option<EntryHandle>, handle: EntryHandle) {
        let next = self.bank.get(handle).next;
        match prev {
            Some(prev) => self.bank.get_mut(prev).next = next,
            None => self.head_mut(kind).first = next,
        }
        self.bank.get_mut(handle).next = None;
        self.head_mut(kind).count -= 1;
    }

    fn addr(&self, handle: EntryHandle) -> PteAddr {
        match self.bank.get(handle).addr {
            Some(addr) => addr,
            None => panic!("lru: free bank entry {handle:?} linked into a list"),
        }
    }

    /// Starts tracking a resident page. Hot pages go straight to the active
    /// list, cold ones to the inactive list.
    pub fn add<M: PageTableAccess + ?Sized>(&mut self, mmu: &mut M, addr: PteAddr, hot: bool) {
        let handle = self.bank.acquire_entry(addr);
        let kind = if hot {
            ListKind::Active
        } else {
            ListKind::Inactive
        };
        self.push_front(kind, handle);
        mmu.clear_accessed(addr);
    }

    /// Stops tracking every page whose entry address lies in
    /// `[addr, addr + range]`, active list first. With `range == 0` at most
    /// one entry is removed. Returns how many were.
    pub fn remove(&mut self, addr: PteAddr, range: u32) -> usize {
        let low = u64::from(addr.0);
        let high = low + u64::from(range);
        let mut removed = 0;

        for kind in [ListKind::Active, ListKind::Inactive] {
            let mut prev = None;
            let mut cursor = self.head(kind).first;
            while let Some(handle) = cursor {
                let entry = *self.bank.get(handle);
                cursor = entry.next;
                let Some(found) = entry
                    .addr
                    .filter(|a| (low..=high).contains(&u64::from(a.0)))
                else {
                    prev = Some(handle);
                    continue;
                };

                swap_trace!("kernel: removing lru entry {} from {:?} list", found, kind);
                self.unlink(kind, prev, handle);
                self.bank.release_entry(handle);
                removed += 1;
                if range == 0 {
                    return removed;
                }
            }
        }
        removed
    }

    /// Moves a page to the head of the active list with its accessed bit
    /// cleared. Returns `false` if the page is not tracked.
    pub fn activate<M: PageTableAccess + ?Sized>(&mut self, mmu: &mut M, addr: PteAddr) -> bool {
        mmu.clear_accessed(addr);
        if self.remove(addr, 0) == 0 {
            return false;
        }
        self.add(mmu, addr, true);
        true
    }

    /// Demotes unaccessed active pages until the active list is at most 2/5
    /// of all tracked pages, and moves accessed ones to the front.
    fn refill_inactive<M: PageTableAccess + ?Sized>(&mut self, mmu: &mut M) {
        let total = self.active.count + self.inactive.count;
        let target = 2 * total / 5;
        let mut quota = self.active.count.saturating_sub(target);
        swap_trace!(
            "kernel: refill_inactive: target {} active {} inactive {} demoting up to {}",
            target,
            self.active.count,
            self.inactive.count,
            quota
        );

        let mut prev = None;
        let mut cursor = self.active.first;
        while let Some(handle) = cursor {
            cursor = self.bank.get(handle).next;
            let addr = self.addr(handle);
            let accessed = mmu.is_accessed(addr);

            if !accessed && quota > 0 {
                self.unlink(ListKind::Active, prev, handle);
                self.push_front(ListKind::Inactive, handle);
                quota -= 1;
            } else if accessed {
                mmu.clear_accessed(addr);
                if prev.is_some() {
                    self.unlink(ListKind::Active, prev, handle);
                    self.push_front(ListKind::Active, handle);
                } else {
                    prev = Some(handle);
                }
            } else {
                prev = Some(handle);
            }
        }
    }

    /// Promotes every inactive page whose accessed bit got set.
    fn refill_active<M: PageTableAccess + ?Sized>(&mut self, mmu: &mut M) {
        let mut prev = None;
        let mut cursor = self.inactive.first;
        while let Some(handle) = cursor {
            cursor = self.bank.get(handle).next;
            let addr = self.addr(handle);
            if mmu.is_accessed(addr) {
                swap_trace!("kernel: promoting {} to the active list", addr);
                mmu.clear_accessed(addr);
                self.unlink(ListKind::Inactive, prev, handle);
                self.push_front(ListKind::Active, handle);
            } else {
                prev = Some(handle);
            }
        }
    }

    pub fn rotate<M: PageTableAccess + ?Sized>(&mut self, mmu: &mut M) {
        self.refill_inactive(mmu);
        self.refill_active(mmu);
    }

    /// Tracked pages of one list, head first.
    pub fn iter(&self, kind: ListKind) -> impl Iterator<Item = PteAddr> + '_ {
        let mut cursor = self.head(kind).first;
        core::iter::from_fn(move || {
            let handle = cursor?;
            cursor = self.bank.get(handle).next;
            Some(self.addr(handle))
        })
    }

    pub fn find(&self, addr: PteAddr) -> Option<ListKind> {
        [ListKind::Active, ListKind::Inactive]
            .into_iter()
            .find(|&kind| self.iter(kind).any(|a| a == addr))
    }

    pub fn active_count(&self) -> usize {
        self.active.count
    }

    pub fn inactive_count(&self) -> usize {
        self.inactive.count
    }

    pub fn bank(&self) -> &EntryBank {
        &self.bank
    }
}
