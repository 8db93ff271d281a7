// Physical addresses are 32 bits wide and frame counts stay far below 2^20.
#![allow(clippy::cast_possible_truncation)]

use super::{
    frame_allocator::{placement_algorithms::NextFit, FrameAllocator},
    user_page_tables, Frame, PageTableAccess, PteAddr,
};
use crate::threading::process::{Pid, ProcessControlBlock};
use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};
use arbitrary_int::u20;
use kswap_shared::{
    mem::{UPPER_MEMORY_START, USER_PDE_LIMIT},
    paging::{PageDirectory, PageDirectoryEntry, PageTable, PageTableEntry, VirtualAddress},
};

const FIRST_PFN: u32 = UPPER_MEMORY_START >> 12;

fn pfn(frame: usize) -> u32 {
    FIRST_PFN + frame as u32
}

fn frame_index(pfn: u32) -> usize {
    match pfn.checked_sub(FIRST_PFN) {
        Some(index) => index as usize,
        None => panic!("pfn {pfn:#x} is below managed memory"),
    }
}

struct OwnedTable {
    owner: Pid,
    table: Box<PageTable>,
}

/// Simulated physical memory: page tables and user frames carved out of
/// one core map, addressed the way the MMU would address them.
pub struct PageTableArena {
    frames: FrameAllocator<NextFit>,
    tables: BTreeMap<usize, OwnedTable>,
    data: BTreeMap<usize, Box<Frame>>,
}

impl PageTableArena {
    pub fn new(num_frames: usize) -> Self {
        Self {
            frames: FrameAllocator::new(num_frames),
            tables: BTreeMap::new(),
            data: BTreeMap::new(),
        }
    }

    pub fn free_frames(&self) -> usize {
        self.frames.frames_free()
    }

    fn table(&self, pte: PteAddr) -> &OwnedTable {
        let index = frame_index(pte.table().0 >> 12);
        match self.tables.get(&index) {
            Some(table) => table,
            None => panic!("no page table holds entry {pte}"),
        }
    }

    fn table_mut(&mut self, pte: PteAddr) -> &mut OwnedTable {
        let index = frame_index(pte.table().0 >> 12);
        match self.tables.get_mut(&index) {
            Some(table) => table,
            None => panic!("no page table holds entry {pte}"),
        }
    }

    /// Maps a fresh user page at `va` holding `contents`, creating the page
    /// table if needed. Returns `None` if memory is full.
    pub fn map_user_page(
        &mut self,
        pcb: &mut ProcessControlBlock,
        va: VirtualAddress,
        contents: &Frame,
    ) -> Option<PteAddr> {
        let pde_index = va.page_directory_index().value() as usize;
        assert!(
            pde_index < USER_PDE_LIMIT,
            "{:#010x} is not a user address",
            va.raw_value()
        );

        let mut pde = pcb.page_dir[pde_index];
        if !pde.present() {
            let frame = self.frames.alloc(1, true)?.start;
            self.tables.insert(
                frame,
                OwnedTable {
                    owner: pcb.pid,
                    table: Box::default(),
                },
            );
            pde = PageDirectoryEntry::DEFAULT
                .with_present(true)
                .with_read_write(true)
                .with_user_supervisor(true)
                .with_page_table_address(u20::new(pfn(frame)));
            pcb.page_dir[pde_index] = pde;
        }

        let pte = PteAddr::of_table(pde.page_table_address().value())
            .entry(va.page_table_index().value() as usize);
        assert!(
            self.entry(pte).raw_value() == 0,
            "{:#010x} is already mapped",
            va.raw_value()
        );
        self.install_frame(pte, contents).then_some(pte)
    }

    /// Entry mapping `va` in `dir`, if its page table exists.
    pub fn pte_addr(&self, dir: &PageDirectory, va: VirtualAddress) -> Option<PteAddr> {
        let pde = dir[va.page_directory_index().value() as usize];
        pde.present().then(|| {
            PteAddr::of_table(pde.page_table_address().value())
                .entry(va.page_table_index().value() as usize)
        })
    }

    /// Sets the accessed bit, as the CPU does on a reference.
    pub fn touch(&mut self, pte: PteAddr) {
        let entry = self.entry(pte).with_accessed(true);
        self.set_entry(pte, entry);
    }

    /// Gives back every frame of an exiting process, its page tables
    /// included. Swap slots must already have been reclaimed.
    pub fn release_process(&mut self, pcb: &mut ProcessControlBlock) -> usize {
        let tables: Vec<PteAddr> = user_page_tables(&pcb.page_dir).collect();
        let mut released = 0;
        for table in tables {
            for index in 0..kswap_shared::paging::PAGE_TABLE_LEN {
                let pte = table.entry(index);
                if self.is_present(pte) {
                    self.release_frame(pte);
                    released += 1;
                }
            }
            let frame = frame_index(table.0 >> 12);
            self.tables.remove(&frame);
            released += self.frames.dealloc(frame);
        }
        for pde in pcb.page_dir.iter_mut().take(USER_PDE_LIMIT) {
            *pde = PageDirectoryEntry::DEFAULT;
        }
        released
    }
}

impl PageTableAccess for PageTableArena {
    fn entry(&self, pte: PteAddr) -> PageTableEntry {
        self.table(pte).table[pte.index()]
    }

    fn set_entry(&mut self, pte: PteAddr, entry: PageTableEntry) {
        self.table_mut(pte).table[pte.index()] = entry;
    }

    fn frame(&self, pte: PteAddr) -> Option<&Frame> {
        let entry = self.entry(pte);
        if !entry.present() {
            return None;
        }
        let index = frame_index(entry.page_frame_address().value());
        self.data.get(&index).map(|frame| &**frame)
    }

    fn install_frame(&mut self, pte: PteAddr, data: &Frame) -> bool {
        let Some(frames) = self.frames.alloc(1, false) else {
            return false;
        };
        self.data.insert(frames.start, Box::new(*data));
        self.set_entry(
            pte,
            PageTableEntry::DEFAULT
                .with_present(true)
                .with_read_write(true)
                .with_user_supervisor(true)
                .with_accessed(true)
                .with_page_frame_address(u20::new(pfn(frames.start))),
        );
        true
    }

    fn release_frame(&mut self, pte: PteAddr) {
        let entry = self.entry(pte);
        assert!(entry.present(), "releasing frame of non-present entry {pte}");
        let index = frame_index(entry.page_frame_address().value());
        assert!(
            !self.frames.is_kernel(index),
            "entry {pte} maps kernel frame {index}"
        );
        self.data.remove(&index);
        self.frames.dealloc(index);
    }

    fn owner(&self, pte: PteAddr) -> Option<Pid> {
        let index = frame_index(pte.table().0 >> 12);
        self.tables.get(&index).map(|table| table.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kswap_shared::mem::PAGE_FRAME_SIZE;

    fn va(addr: u32) -> VirtualAddress {
        VirtualAddress::new_with_raw_value(addr)
    }

    #[test]
    fn mapping_creates_table_and_frame() {
        let mut arena = PageTableArena::new(4);
        let mut pcb = ProcessControlBlock::new(1, "init");
        let page = [7; PAGE_FRAME_SIZE];

        let pte = arena.map_user_page(&mut pcb, va(0x0040_2000), &page).unwrap();
        assert_eq!(arena.free_frames(), 2);
        assert_eq!(arena.pte_addr(&pcb.page_dir, va(0x0040_2000)), Some(pte));
        assert_eq!(pte.index(), 2);
        assert_eq!(arena.owner(pte), Some(1));
        assert!(arena.is_present(pte));
        assert_eq!(arena.frame(pte).map(|f| f[0]), Some(7));
    }

    #[test]
    fn release_process_returns_every_frame() {
        let mut arena = PageTableArena::new(8);
        let mut pcb = ProcessControlBlock::new(1, "init");
        let page = [0; PAGE_FRAME_SIZE];
        for i in 0..3 {
            arena.map_user_page(&mut pcb, va(i * 0x1000), &page).unwrap();
        }
        assert_eq!(arena.free_frames(), 4);
        assert_eq!(arena.release_process(&mut pcb), 4);
        assert_eq!(arena.free_frames(), 8);
        assert_eq!(user_page_tables(&pcb.page_dir).count(), 0);
    }

    #[test]
    fn full_memory_fails_mapping() {
        let mut arena = PageTableArena::new(2);
        let mut pcb = ProcessControlBlock::new(1, "init");
        let page = [0; PAGE_FRAME_SIZE];
        assert!(arena.map_user_page(&mut pcb, va(0), &page).is_some());
        assert!(arena.map_user_page(&mut pcb, va(0x1000), &page).is_none());
    }

    #[test]
    #[should_panic(expected = "no page table holds entry")]
    fn unknown_entry_is_fatal() {
        let arena = PageTableArena::new(2);
        arena.entry(PteAddr(0x0090_0000));
    }
}
