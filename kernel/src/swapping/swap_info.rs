//! The swap area descriptor and its reference-counted slot map.
//!
//! Two locks guard the area. The ordering lock covers the allocation-order
//! bookkeeping (free bounds, cluster cursor, free count); the device lock
//! covers the map itself. A scan needs both for its whole duration, so the
//! only way to touch either is through a [`SlotTransaction`] holding the two
//! guards, always taken in that order.

use crate::sync::mutex::{Mutex, MutexGuard};
use alloc::{boxed::Box, vec};
use arbitrary_int::{u24, u6};
use bitbybit::bitfield;
use kswap_shared::{paging::SwapEntry, sizes::SWAP_MAP_MAX};

#[bitfield(u8, default = 0)]
pub struct SwapFlags {
    #[bit(0, rw)]
    used: bool,
    #[bit(1, rw)]
    writable: bool,
}

impl SwapFlags {
    /// An area slots can be allocated from.
    pub fn write_ok(&self) -> bool {
        self.used() && self.writable()
    }
}

/// Allocation-order state.
///
/// When no slot is free, `lowest == capacity` and `highest == 0`.
struct SlotOrder {
    lowest: usize,
    highest: usize,
    cluster_next: usize,
    cluster_nr: usize,
    free_pages: usize,
}

struct SwapMap {
    flags: SwapFlags,
    counts: Box<[u16]>,
}

pub struct SlotAllocator {
    capacity: usize,
    cluster: usize,
    order: Mutex<SlotOrder>,
    map: Mutex<SwapMap>,
}

impl SlotAllocator {
    pub fn new(capacity: usize, cluster: usize) -> Self {
        assert!(capacity > 0, "swap area needs at least one slot");
        assert!(
            capacity < 1 << 24,
            "swap area of {capacity} slots does not fit a swap entry"
        );
        Self {
            capacity,
            cluster,
            order: Mutex::new(SlotOrder {
                lowest: 0,
                highest: capacity - 1,
                cluster_next: 0,
                cluster_nr: cluster,
                free_pages: capacity,
            }),
            map: Mutex::new(SwapMap {
                flags: SwapFlags::DEFAULT.with_used(true).with_writable(true),
                counts: vec![0; capacity].into_boxed_slice(),
            }),
        }
    }

    /// Locks the whole area for a sequence of operations.
    pub fn transaction(&self) -> SlotTransaction {
        let order = self.order.lock();
        let map = self.map.lock();
        SlotTransaction {
            capacity: self.capacity,
            cluster: self.cluster,
            order,
            map,
        }
    }

    pub fn allocate(&self) -> Option<SwapEntry> {
        self.transaction().allocate()
    }

    pub fn duplicate(&self, entry: SwapEntry) -> u16 {
        self.transaction().duplicate(entry)
    }

    pub fn free(&self, entry: SwapEntry) -> u16 {
        self.transaction().free(entry)
    }

    pub fn refcount(&self, offset: usize) -> u16 {
        self.transaction().refcount(offset)
    }

    pub fn free_pages(&self) -> usize {
        self.order.lock().free_pages
    }

    pub fn total_pages(&self) -> usize {
        self.capacity
    }

    pub fn set_writable(&self, writable: bool) {
        let mut map = self.map.lock();
        map.flags = map.flags.with_writable(writable);
    }
}

/// Exclusive access to the slot map and its bookkeeping.
pub struct SlotTransaction<'a> {
    capacity: usize,
    cluster: usize,
    order: MutexGuard<'a, SlotOrder>,
    map: MutexGuard<'a, SwapMap>,
}

impl SlotTransaction<'_> {
    /// Finds a free slot and takes the first reference to it.
    pub fn allocate(&mut self) -> Option<SwapEntry> {
        if self.order.free_pages == 0 || !self.map.flags.write_ok() {
            return None;
        }
        let offset = self.scan()?;
        Some(SwapEntry::from_parts(u6::new(0), u24::new(offset as u32)))
    }

    fn scan(&mut self) -> Option<usize> {
        let order = &mut *self.order;
        let counts = &mut self.map.counts;

        let offset = 'found: {
            // Keep filling the current cluster.
            if order.cluster_nr > 0 {
                while order.cluster_next <= order.highest {
                    let offset = order.cluster_next;
                    order.cluster_next += 1;
                    if counts[offset] == 0 {
                        order.cluster_nr -= 1;
                        break 'found offset;
                    }
                }
            }
            order.cluster_nr = self.cluster;

            // Look for a fully free run to start a new cluster in. It need
            // not be aligned.
            let mut offset = order.lowest;
            while self.cluster > 0 && offset + self.cluster - 1 <= order.highest {
                match counts[offset..offset + self.cluster]
                    .iter()
                    .rposition(|&count| count != 0)
                {
                    Some(used) => offset += used + 1,
                    None => break 'found offset,
                }
            }

            // No free run; take the first free slot.
            let mut offset = order.lowest;
            while offset <= order.highest && offset < self.capacity {
                if counts[offset] == 0 {
                    order.lowest = offset + 1;
                    break 'found offset;
                }
                offset += 1;
            }

            order.lowest = self.capacity;
            order.highest = 0;
            return None;
        };

        if offset == order.lowest {
            order.lowest += 1;
        }
        let mut exhausted = false;
        if offset == order.highest {
            match order.highest.checked_sub(1) {
                Some(highest) => order.highest = highest,
                None => exhausted = true,
            }
        }
        if exhausted || order.lowest > order.highest {
            order.lowest = self.capacity;
            order.highest = 0;
        }

        counts[offset] = 1;
        order.free_pages -= 1;
        order.cluster_next = offset + 1;
        if order.free_pages == 0 {
            order.lowest = self.capacity;
            order.highest = 0;
        }
        Some(offset)
    }

    /// Adds a reference to an allocated slot and returns the new count.
    ///
    /// A count that reaches [`SWAP_MAP_MAX`] stays there.
    pub fn duplicate(&mut self, entry: SwapEntry) -> u16 {
        let offset = self.checked_offset(entry.slot(), "swap_duplicate");
        let count = &mut self.map.counts[offset];
        assert!(*count != 0, "swap_duplicate: slot {offset} is free");
        if *count < SWAP_MAP_MAX {
            *count += 1;
        }
        *count
    }

    /// Drops one reference and returns the remaining count; 0 means the slot
    /// is free again.
    pub fn free(&mut self, entry: SwapEntry) -> u16 {
        let offset = self.checked_offset(entry.slot(), "swap_free");
        let count = self.map.counts[offset];
        assert!(count != 0, "swap_free: slot {offset} is already free");
        if count >= SWAP_MAP_MAX {
            return count;
        }

        let count = count - 1;
        self.map.counts[offset] = count;
        if count == 0 {
            let order = &mut *self.order;
            order.lowest = order.lowest.min(offset);
            order.highest = order.highest.max(offset);
            order.free_pages += 1;
        }
        count
    }

    pub fn refcount(&self, offset: usize) -> u16 {
        let offset = self.checked_offset(offset, "swap_refcount");
        self.map.counts[offset]
    }

    /// Whether `entry` names an in-range slot that is in use.
    pub fn in_use(&self, entry: SwapEntry) -> bool {
        self.map
            .counts
            .get(entry.slot())
            .is_some_and(|&count| count != 0)
    }

    fn checked_offset(&self, offset: usize, operation: &str) -> usize {
        if offset >= self.capacity {
            panic!(
                "{operation}: slot {offset} out of range (capacity {})",
                self.capacity
            );
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use kswap_shared::sizes::{SWAPFILE_CLUSTER, SWAPFILE_PAGES};

    fn entry(offset: u32) -> SwapEntry {
        SwapEntry::from_parts(u6::new(0), u24::new(offset))
    }

    /// xorshift32, so failures replay from the seed.
    struct Rng(u32);

    impl Rng {
        fn next(&mut self) -> u32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            self.0
        }

        fn below(&mut self, n: usize) -> usize {
            self.next() as usize % n
        }
    }

    fn assert_consistent(slots: &SlotAllocator) {
        let txn = slots.transaction();
        let free: Vec<usize> = (0..slots.capacity)
            .filter(|&slot| txn.map.counts[slot] == 0)
            .collect();
        assert_eq!(txn.order.free_pages, free.len());
        if free.is_empty() {
            assert_eq!((txn.order.lowest, txn.order.highest), (slots.capacity, 0));
        }
        for slot in free {
            assert!(
                (txn.order.lowest..=txn.order.highest).contains(&slot),
                "free slot {slot} outside [{}, {}]",
                txn.order.lowest,
                txn.order.highest
            );
        }
    }

    fn allocate_checked(slots: &SlotAllocator) -> Option<SwapEntry> {
        let any_free = slots.free_pages() > 0;
        let entry = slots.allocate();
        assert_eq!(entry.is_some(), any_free);
        if let Some(entry) = entry {
            assert_eq!(slots.refcount(entry.slot()), 1);
        }
        entry
    }

    #[test]
    fn exhausts_after_capacity_allocations() {
        let slots = SlotAllocator::new(SWAPFILE_PAGES, SWAPFILE_CLUSTER);
        for _ in 0..SWAPFILE_PAGES {
            let entry = slots.allocate().unwrap();
            assert_eq!(slots.refcount(entry.slot()), 1);
        }
        assert_eq!(slots.free_pages(), 0);
        assert!(slots.allocate().is_none());
    }

    #[test]
    fn every_slot_is_handed_out_once() {
        let slots = SlotAllocator::new(SWAPFILE_PAGES, 4);
        let mut seen = [false; SWAPFILE_PAGES];
        while let Some(entry) = slots.allocate() {
            assert!(!seen[entry.slot()], "slot {} handed out twice", entry.slot());
            seen[entry.slot()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn cluster_allocations_are_contiguous() {
        let slots = SlotAllocator::new(64, SWAPFILE_CLUSTER);
        let first = slots.allocate().unwrap().slot();
        for i in 1..SWAPFILE_CLUSTER {
            assert_eq!(slots.allocate().unwrap().slot(), first + i);
        }
    }

    #[test]
    fn new_cluster_skips_partially_used_runs() {
        let slots = SlotAllocator::new(32, 4);
        let taken: Vec<_> = (0..4).map(|_| slots.allocate().unwrap()).collect();
        // Hole at slot 1 is too small for a cluster.
        slots.free(taken[1]);
        assert_eq!(slots.allocate().unwrap().slot(), 4);
    }

    #[test]
    fn falls_back_to_single_free_slot() {
        let slots = SlotAllocator::new(SWAPFILE_PAGES, SWAPFILE_CLUSTER);
        let taken: Vec<_> = (0..SWAPFILE_PAGES)
            .map(|_| slots.allocate().unwrap())
            .collect();
        assert_eq!(slots.free(taken[5]), 0);
        assert_eq!(slots.free_pages(), 1);

        let again = slots.allocate().unwrap();
        assert_eq!(again.slot(), 5);
        assert!(slots.allocate().is_none());
    }

    #[test]
    fn duplicate_then_two_frees() {
        let slots = SlotAllocator::new(SWAPFILE_PAGES, SWAPFILE_CLUSTER);
        let entry = slots.allocate().unwrap();
        assert_eq!(slots.duplicate(entry), 2);
        let free_before = slots.free_pages();

        assert_eq!(slots.free(entry), 1);
        assert_eq!(slots.free_pages(), free_before);
        assert_eq!(slots.free(entry), 0);
        assert_eq!(slots.free_pages(), free_before + 1);
    }

    #[test]
    fn pinned_slot_never_frees() {
        let slots = SlotAllocator::new(SWAPFILE_PAGES, SWAPFILE_CLUSTER);
        let entry = slots.allocate().unwrap();
        {
            let mut txn = slots.transaction();
            for _ in 1..SWAP_MAP_MAX {
                txn.duplicate(entry);
            }
            assert_eq!(txn.duplicate(entry), SWAP_MAP_MAX);
            assert_eq!(txn.free(entry), SWAP_MAP_MAX);
        }
        assert_eq!(slots.refcount(entry.slot()), SWAP_MAP_MAX);
    }

    #[test]
    fn non_writable_area_allocates_nothing() {
        let slots = SlotAllocator::new(SWAPFILE_PAGES, SWAPFILE_CLUSTER);
        slots.set_writable(false);
        assert!(slots.allocate().is_none());
        slots.set_writable(true);
        assert!(slots.allocate().is_some());
    }

    #[test]
    fn in_use_tolerates_out_of_range() {
        let slots = SlotAllocator::new(4, 2);
        let txn = slots.transaction();
        assert!(!txn.in_use(entry(4)));
        assert!(!txn.in_use(entry(0)));
    }

    #[test]
    #[should_panic(expected = "swap_refcount: slot 18 out of range")]
    fn refcount_at_capacity_is_fatal() {
        let slots = SlotAllocator::new(SWAPFILE_PAGES, SWAPFILE_CLUSTER);
        slots.refcount(SWAPFILE_PAGES);
    }

    #[test]
    #[should_panic(expected = "swap_duplicate")]
    fn duplicate_out_of_range_is_fatal() {
        let slots = SlotAllocator::new(SWAPFILE_PAGES, SWAPFILE_CLUSTER);
        slots.duplicate(entry(100));
    }

    #[test]
    fn filling_the_last_hole_from_the_cluster_cursor_empties_the_range() {
        let slots = SlotAllocator::new(3, 1);
        let taken: Vec<_> = (0..3).map(|_| slots.allocate().unwrap()).collect();
        slots.free(taken[0]);
        slots.free(taken[2]);

        // Slot 0 starts a cluster; the cursor then skips slot 1 and takes 2
        // while `lowest` still sits on the used slot 1.
        assert_eq!(slots.allocate().unwrap().slot(), 0);
        assert_eq!(slots.allocate().unwrap().slot(), 2);
        assert_eq!(slots.free_pages(), 0);
        assert_consistent(&slots);
        assert!(slots.allocate().is_none());
    }

    #[test]
    fn every_short_sequence_keeps_bounds_tight() {
        // Each base-4 digit is one step: 0 allocates, d frees slot d - 1.
        const STEPS: u32 = 7;
        for cluster in [0, 1, 2] {
            for script in 0..4usize.pow(STEPS) {
                let slots = SlotAllocator::new(3, cluster);
                let mut digits = script;
                for _ in 0..STEPS {
                    match digits % 4 {
                        0 => {
                            allocate_checked(&slots);
                        }
                        d => {
                            if slots.refcount(d - 1) != 0 {
                                slots.free(entry((d - 1) as u32));
                            }
                        }
                    }
                    digits /= 4;
                    assert_consistent(&slots);
                }
            }
        }
    }

    #[test]
    fn random_allocate_duplicate_free() {
        for capacity in [1, 2, 3, 5, SWAPFILE_PAGES, 40] {
            for cluster in [0, 1, 3, SWAPFILE_CLUSTER] {
                let slots = SlotAllocator::new(capacity, cluster);
                let mut rng = Rng(0x9e37_79b9 ^ ((capacity as u32) << 8) ^ cluster as u32);
                // One element per reference held.
                let mut held: Vec<SwapEntry> = Vec::new();

                for _ in 0..2000 {
                    match rng.below(5) {
                        0..=2 => held.extend(allocate_checked(&slots)),
                        3 if !held.is_empty() => {
                            let entry = held[rng.below(held.len())];
                            assert_eq!(
                                usize::from(slots.duplicate(entry)),
                                held.iter().filter(|e| e.slot() == entry.slot()).count() + 1
                            );
                            held.push(entry);
                        }
                        _ if !held.is_empty() => {
                            let entry = held.swap_remove(rng.below(held.len()));
                            let left = held.iter().filter(|e| e.slot() == entry.slot()).count();
                            assert_eq!(usize::from(slots.free(entry)), left);
                        }
                        _ => {}
                    }
                    assert_consistent(&slots);
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "already free")]
    fn double_free_is_fatal() {
        let slots = SlotAllocator::new(SWAPFILE_PAGES, SWAPFILE_CLUSTER);
        let entry = slots.allocate().unwrap();
        slots.free(entry);
        slots.free(entry);
    }
}
