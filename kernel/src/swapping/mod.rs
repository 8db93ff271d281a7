//! Swapping of user pages to a swap file.
//!
//! A [`SwapSystem`] is the single owner of the swap state: the slot allocator
//! over the swap area, the active/inactive LRU lists with their entry bank,
//! and the bound swap file. Page tables and processes are passed in by the
//! caller on every operation.
//!
//! Locking follows the area/list split. Slot operations take the slot
//! allocator's ordering and device locks together, list operations take the
//! LRU lock, and no operation holds locks from both at once.

#[cfg(feature = "swap_trace")]
macro_rules! swap_trace {
    ($($arg:tt)*) => {
        kswap_shared::println!($($arg)*)
    };
}

#[cfg(not(feature = "swap_trace"))]
macro_rules! swap_trace {
    ($($arg:tt)*) => {{
        if false {
            kswap_shared::println!($($arg)*)
        }
    }};
}

mod error;
pub mod lru;
pub mod lru_bank;
pub mod page_replacement;
pub mod swap_info;
pub mod swap_io;

pub use error::SwapError;

use crate::{
    mem::{user_page_tables, Frame, PageTableAccess, PteAddr},
    sync::mutex::Mutex,
    threading::process::{ProcessControlBlock, ProcessTable},
    vfs::File,
};
use alloc::boxed::Box;
use core::mem::size_of;
use kswap_shared::{
    mem::PAGE_FRAME_SIZE,
    paging::{SwapEntry, PAGE_TABLE_LEN},
    println,
    sizes::{SWAPFILE_CLUSTER, SWAPFILE_PAGES},
};
use lru::LruLists;
use lru_bank::{EntryBank, LRU_ENTRIES_PER_PAGE};
use page_replacement::{PageReplacementPolicy, SecondChance};
use swap_info::SlotAllocator;
use swap_io::{SwapHeader, SwapIo};

#[derive(Clone, Copy, Debug)]
pub struct SwapConfig {
    /// Page-sized slots in the swap area.
    pub slots: usize,
    pub cluster: usize,
    pub lru_entries_per_page: usize,
    /// Most pages the LRU entry bank may grow to; `None` means unbounded.
    pub lru_bank_page_limit: Option<usize>,
    /// Rotations tried before victim selection gives up.
    pub victim_attempts: usize,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            slots: SWAPFILE_PAGES,
            cluster: SWAPFILE_CLUSTER,
            lru_entries_per_page: LRU_ENTRIES_PER_PAGE,
            lru_bank_page_limit: None,
            victim_attempts: SecondChance::default().attempts,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapStats {
    pub total_slots: usize,
    pub free_slots: usize,
    pub active_pages: usize,
    pub inactive_pages: usize,
    pub bank_pages: usize,
}

/// What tearing down one process gave back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reclaimed {
    pub slots_freed: usize,
    pub lru_entries_removed: usize,
}

pub struct SwapSystem {
    slots: SlotAllocator,
    lru: Mutex<LruLists>,
    io: SwapIo,
    policy: SecondChance,
}

impl Default for SwapSystem {
    fn default() -> Self {
        Self::new(SwapConfig::default())
    }
}

impl SwapSystem {
    pub fn new(config: SwapConfig) -> Self {
        let map_bytes = config.slots * size_of::<u16>();
        println!(
            "kernel: initializing swap info: {} slots, swap map {} bytes ({} pages)",
            config.slots,
            map_bytes,
            1 + map_bytes / PAGE_FRAME_SIZE
        );
        println!(
            "kernel: lru entries per bank page: {}",
            config.lru_entries_per_page
        );

        Self {
            slots: SlotAllocator::new(config.slots, config.cluster),
            lru: Mutex::new(LruLists::new(EntryBank::new(
                config.lru_entries_per_page,
                config.lru_bank_page_limit,
            ))),
            io: SwapIo::new(),
            policy: SecondChance {
                attempts: config.victim_attempts,
            },
        }
    }

    /// Binds the swap file. Swap I/O fails with
    /// [`SwapError::NoBackingStore`] until this succeeds.
    pub fn bind_swap_file(&self, file: Box<dyn File>) -> Result<(), SwapError> {
        self.io.bind(file, self.slots.total_pages())
    }

    pub fn swap_header(&self) -> Result<SwapHeader, SwapError> {
        self.io.header()
    }

    pub fn lru_add<M: PageTableAccess + ?Sized>(&self, mmu: &mut M, addr: PteAddr, hot: bool) {
        swap_trace!(
            "kernel: adding {} pte {} to lru cache",
            if hot { "hot" } else { "cold" },
            addr
        );
        self.lru.lock().add(mmu, addr, hot);
    }

    /// Removes the entries for `[addr, addr + range]`; see [`LruLists::remove`].
    pub fn lru_remove(&self, addr: PteAddr, range: u32) -> usize {
        self.lru.lock().remove(addr, range)
    }

    /// Notes that a page was just used by moving it to the active list.
    pub fn mark_page_accessed<M: PageTableAccess + ?Sized>(
        &self,
        mmu: &mut M,
        addr: PteAddr,
    ) -> bool {
        self.lru.lock().activate(mmu, addr)
    }

    pub fn rotate_lists<M: PageTableAccess + ?Sized>(&self, mmu: &mut M) {
        self.lru.lock().rotate(mmu);
    }

    /// Picks the next page to evict.
    ///
    /// # Panics
    ///
    /// If no resident, unaccessed page turns up within the configured number
    /// of rotations.
    pub fn select_victim<M: PageTableAccess + ?Sized>(&self, mmu: &mut M) -> PteAddr {
        let mut lru = self.lru.lock();
        match self.policy.select_victim(&mut lru, mmu) {
            Some(victim) => victim,
            None => panic!("No LRU inactive pages present in physical memory"),
        }
    }

    pub fn allocate_slot(&self) -> Option<SwapEntry> {
        self.slots.allocate()
    }

    pub fn duplicate(&self, entry: SwapEntry) -> u16 {
        self.slots.duplicate(entry)
    }

    pub fn free(&self, entry: SwapEntry) -> u16 {
        let count = self.slots.free(entry);
        swap_trace!("kernel: freed slot {}, refcount now {}", entry.slot(), count);
        count
    }

    pub fn refcount(&self, offset: usize) -> u16 {
        self.slots.refcount(offset)
    }

    pub fn write_out(
        &self,
        frame: &Frame,
        slot: SwapEntry,
        owner: &ProcessControlBlock,
    ) -> Result<(), SwapError> {
        self.io.write_out(frame, slot, owner)
    }

    pub fn read_in(
        &self,
        frame: &mut Frame,
        slot: SwapEntry,
        owner: &ProcessControlBlock,
    ) -> Result<(), SwapError> {
        self.io.read_in(frame, slot, owner)
    }

    /// Frees one frame by pushing a page out to swap, and returns the slot
    /// now holding it.
    ///
    /// # Panics
    ///
    /// Running out of both memory and swap is not recoverable, and neither
    /// is a failed write: the victim's frame is about to be reused.
    pub fn evict_one_page<M: PageTableAccess + ?Sized>(
        &self,
        mmu: &mut M,
        procs: &ProcessTable,
    ) -> SwapEntry {
        let victim = self.select_victim(mmu);
        let Some(owner) = mmu.owner(victim).and_then(|pid| procs.get(pid)) else {
            panic!("evict: victim {victim} belongs to no process");
        };
        let Some(slot) = self.allocate_slot() else {
            panic!("evict: out of memory and swap space");
        };
        let Some(frame) = mmu.frame(victim) else {
            panic!("evict: victim {victim} has no frame");
        };
        if let Err(e) = self.io.write_out(frame, slot, owner) {
            panic!("evict: writing {victim} to slot {}: {e}", slot.slot());
        }

        self.lru_remove(victim, 0);
        mmu.release_frame(victim);
        mmu.encode_swap(victim, slot);
        println!(
            "kernel: swapped out {} of process [{}] to slot {}",
            victim,
            owner.name,
            slot.slot()
        );
        slot
    }

    /// Brings a swapped-out page back after a fault on `pte`, evicting
    /// another page first if no frame is free.
    pub fn swap_in_page<M: PageTableAccess + ?Sized>(
        &self,
        mmu: &mut M,
        procs: &ProcessTable,
        pte: PteAddr,
    ) -> Result<(), SwapError> {
        let slot = mmu.decode_swap(pte).ok_or(SwapError::NotSwapped)?;
        if !self.slots.transaction().in_use(slot) {
            return Err(SwapError::NotSwapped);
        }
        let owner = mmu
            .owner(pte)
            .and_then(|pid| procs.get(pid))
            .ok_or(SwapError::UnknownProcess)?;

        let mut page: Box<Frame> = Box::new([0; PAGE_FRAME_SIZE]);
        self.io.read_in(&mut page, slot, owner)?;
        // The contents are safe in `page`, so the slot can go back before
        // an eviction below needs one.
        self.free(slot);

        if !mmu.install_frame(pte, &page) {
            self.evict_one_page(mmu, procs);
            if !mmu.install_frame(pte, &page) {
                panic!("swap in: no frame for {pte} after evicting");
            }
        }
        self.lru_add(mmu, pte, true);
        println!(
            "kernel: swapped in {} of process [{}] from slot {}",
            pte,
            owner.name,
            slot.slot()
        );
        Ok(())
    }

    /// Drops the slot references held by every swapped-out page of `pcb`,
    /// all under one slot transaction. Returns how many references went.
    pub fn free_swap_pages<M: PageTableAccess + ?Sized>(
        &self,
        mmu: &M,
        pcb: &ProcessControlBlock,
    ) -> usize {
        let mut txn = self.slots.transaction();
        let mut freed = 0;
        for table in user_page_tables(&pcb.page_dir) {
            for index in 0..PAGE_TABLE_LEN {
                let Some(slot) = mmu.decode_swap(table.entry(index)) else {
                    continue;
                };
                if txn.in_use(slot) {
                    let count = txn.free(slot);
                    swap_trace!(
                        "kernel: process [{}] exiting. freeing slot {}, refcount now {}",
                        pcb.name,
                        slot.slot(),
                        count
                    );
                    freed += 1;
                }
            }
        }
        freed
    }

    /// Removes the LRU entries of every page table of `pcb`, under one list
    /// lock.
    pub fn lru_remove_proc_pages(&self, pcb: &ProcessControlBlock) -> usize {
        let mut lru = self.lru.lock();
        user_page_tables(&pcb.page_dir)
            .map(|table| lru.remove(table, PAGE_FRAME_SIZE as u32 - 1))
            .sum()
    }

    /// Releases everything the swap subsystem holds for an exiting process.
    pub fn reclaim_process<M: PageTableAccess + ?Sized>(
        &self,
        mmu: &M,
        pcb: &ProcessControlBlock,
    ) -> Reclaimed {
        let reclaimed = Reclaimed {
            slots_freed: self.free_swap_pages(mmu, pcb),
            lru_entries_removed: self.lru_remove_proc_pages(pcb),
        };
        println!(
            "kernel: process [{}] exiting: freed {} swap slots, removed {} lru entries",
            pcb.name, reclaimed.slots_freed, reclaimed.lru_entries_removed
        );
        reclaimed
    }

    pub fn stats(&self) -> SwapStats {
        let lru = self.lru.lock();
        SwapStats {
            total_slots: self.slots.total_pages(),
            free_slots: self.slots.free_pages(),
            active_pages: lru.active_count(),
            inactive_pages: lru.inactive_count(),
            bank_pages: lru.bank().pages(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mem::PageTableArena, threading::process::Pid, vfs::RamFile};
    use alloc::vec::Vec;
    use kswap_shared::paging::VirtualAddress;

    struct Machine {
        arena: PageTableArena,
        procs: ProcessTable,
        swap: SwapSystem,
        pid: Pid,
    }

    impl Machine {
        fn new(frames: usize, config: SwapConfig) -> Self {
            let mut procs = ProcessTable::default();
            let pid = procs.spawn("test");
            Self {
                arena: PageTableArena::new(frames),
                procs,
                swap: SwapSystem::new(config),
                pid,
            }
        }

        fn bound(frames: usize) -> Self {
            let machine = Self::new(frames, SwapConfig::default());
            machine
                .swap
                .bind_swap_file(Box::new(RamFile::new()))
                .unwrap();
            machine
        }

        /// Maps page `n` filled with `n` and tracks it as cold.
        fn map(&mut self, n: u8) -> Option<PteAddr> {
            let pcb = self.procs.get_mut(self.pid).unwrap();
            let va = VirtualAddress::new_with_raw_value(u32::from(n) * 0x1000);
            let pte = self
                .arena
                .map_user_page(pcb, va, &[n; PAGE_FRAME_SIZE])?;
            self.swap.lru_add(&mut self.arena, pte, false);
            Some(pte)
        }

        fn evict(&mut self) -> SwapEntry {
            self.swap.evict_one_page(&mut self.arena, &self.procs)
        }

        fn pcb(&self) -> &ProcessControlBlock {
            self.procs.get(self.pid).unwrap()
        }
    }

    #[test]
    fn eviction_writes_the_oldest_page_out() {
        let mut m = Machine::bound(8);
        let ptes: Vec<_> = (0..3).map(|n| m.map(n).unwrap()).collect();
        let free_before = m.arena.free_frames();

        let slot = m.evict();
        assert!(!m.arena.is_present(ptes[0]));
        assert_eq!(
            m.arena.decode_swap(ptes[0]).map(|e| e.slot()),
            Some(slot.slot())
        );
        assert_eq!(m.swap.refcount(slot.slot()), 1);
        assert_eq!(m.pcb().swapped_out(), 1);
        assert_eq!(m.arena.free_frames(), free_before + 1);

        let stats = m.swap.stats();
        assert_eq!(stats.active_pages + stats.inactive_pages, 2);
        assert_eq!(stats.free_slots, stats.total_slots - 1);
    }

    #[test]
    fn fault_in_restores_contents_and_frees_the_slot() {
        let mut m = Machine::bound(8);
        let ptes: Vec<_> = (0..3).map(|n| m.map(n + 1).unwrap()).collect();
        let slot = m.evict();

        m.swap
            .swap_in_page(&mut m.arena, &m.procs, ptes[0])
            .unwrap();
        assert!(m.arena.is_present(ptes[0]));
        assert_eq!(m.arena.frame(ptes[0]).map(|f| f[100]), Some(1));
        assert_eq!(m.swap.refcount(slot.slot()), 0);
        assert_eq!(m.pcb().swapped_out(), 0);
        assert_eq!(
            m.swap.lru.lock().find(ptes[0]),
            Some(lru::ListKind::Active)
        );
    }

    #[test]
    fn fault_in_under_memory_pressure_evicts_first() {
        // One page table and two data frames.
        let mut m = Machine::bound(3);
        let a = m.map(1).unwrap();
        let b = m.map(2).unwrap();
        m.evict();
        let c = m.map(3).unwrap();
        assert_eq!(m.arena.free_frames(), 0);

        m.swap.swap_in_page(&mut m.arena, &m.procs, a).unwrap();
        assert_eq!(m.arena.frame(a).map(|f| f[0]), Some(1));
        assert!(!m.arena.is_present(b));
        assert!(m.arena.is_present(c));
        assert_eq!(m.pcb().swapped_out(), 1);
    }

    #[test]
    fn fault_on_resident_page_is_rejected() {
        let mut m = Machine::bound(4);
        let pte = m.map(0).unwrap();
        assert!(matches!(
            m.swap.swap_in_page(&mut m.arena, &m.procs, pte),
            Err(SwapError::NotSwapped)
        ));
    }

    #[test]
    fn reclaim_frees_swapped_pages_only() {
        let mut m = Machine::bound(8);
        for n in 0..3 {
            m.map(n).unwrap();
        }
        for _ in 0..3 {
            m.evict();
        }

        let reclaimed = m.swap.reclaim_process(&m.arena, m.pcb());
        assert_eq!(
            reclaimed,
            Reclaimed {
                slots_freed: 3,
                lru_entries_removed: 0
            }
        );
        assert_eq!(m.swap.stats().free_slots, SWAPFILE_PAGES);
    }

    #[test]
    fn reclaim_removes_resident_lru_entries() {
        let mut m = Machine::bound(16);
        for n in 0..5 {
            m.map(n).unwrap();
        }
        m.evict();
        m.evict();

        let reclaimed = m.swap.reclaim_process(&m.arena, m.pcb());
        assert_eq!(reclaimed.slots_freed, 2);
        assert_eq!(reclaimed.lru_entries_removed, 3);
        let stats = m.swap.stats();
        assert_eq!(stats.active_pages + stats.inactive_pages, 0);
    }

    #[test]
    fn shared_slot_survives_one_reclaim() {
        let mut m = Machine::bound(8);
        m.map(0).unwrap();
        let slot = m.evict();
        m.swap.duplicate(slot);

        assert_eq!(m.swap.reclaim_process(&m.arena, m.pcb()).slots_freed, 1);
        assert_eq!(m.swap.refcount(slot.slot()), 1);
    }

    #[test]
    fn mark_page_accessed_protects_from_eviction() {
        let mut m = Machine::bound(8);
        let ptes: Vec<_> = (0..4).map(|n| m.map(n).unwrap()).collect();
        assert!(m.swap.mark_page_accessed(&mut m.arena, ptes[0]));
        m.arena.touch(ptes[0]);

        m.evict();
        assert!(m.arena.is_present(ptes[0]));
        assert!(!m.arena.is_present(ptes[1]));
    }

    #[test]
    #[should_panic(expected = "no swap file bound")]
    fn eviction_without_swap_file_is_fatal() {
        let mut m = Machine::new(8, SwapConfig::default());
        m.map(0).unwrap();
        m.evict();
    }

    #[test]
    #[should_panic(expected = "out of memory and swap space")]
    fn eviction_with_full_swap_is_fatal() {
        let mut m = Machine::new(
            8,
            SwapConfig {
                slots: 1,
                ..SwapConfig::default()
            },
        );
        m.swap.bind_swap_file(Box::new(RamFile::new())).unwrap();
        m.map(0).unwrap();
        m.map(1).unwrap();
        m.evict();
        m.evict();
    }

    #[test]
    #[should_panic(expected = "No LRU inactive pages present in physical memory")]
    fn victim_selection_with_nothing_tracked_is_fatal() {
        let mut m = Machine::bound(4);
        m.swap.select_victim(&mut m.arena);
    }

    #[test]
    fn bank_grows_with_tracked_pages() {
        let mut m = Machine::new(
            32,
            SwapConfig {
                lru_entries_per_page: 16,
                ..SwapConfig::default()
            },
        );
        for n in 0..20 {
            m.map(n).unwrap();
        }
        assert_eq!(m.swap.stats().bank_pages, 2);
    }

    #[test]
    fn header_is_written_on_bind() {
        let m = Machine::bound(4);
        let header = m.swap.swap_header().unwrap();
        assert!(header.is_valid());
        assert_eq!(header.last_page as usize, SWAPFILE_PAGES);
        assert!(matches!(
            m.swap.bind_swap_file(Box::new(RamFile::new())),
            Err(SwapError::AlreadyBound)
        ));
    }
}
