use super::lru::{ListKind, LruLists};
use crate::mem::{PageTableAccess, PteAddr};

pub trait PageReplacementPolicy {
    /// Picks the page to evict next, or `None` if nothing is evictable.
    fn select_victim<M: PageTableAccess + ?Sized>(
        &self,
        lists: &mut LruLists,
        mmu: &mut M,
    ) -> Option<PteAddr>;
}

/// Rotate the lists, then take the oldest inactive page that is resident
/// and was not touched since it was demoted. Retries a bounded number of
/// rotations before giving up.
pub struct SecondChance {
    pub attempts: usize,
}

impl Default for SecondChance {
    fn default() -> Self {
        Self { attempts: 2 }
    }
}

impl PageReplacementPolicy for SecondChance {
    fn select_victim<M: PageTableAccess + ?Sized>(
        &self,
        lists: &mut LruLists,
        mmu: &mut M,
    ) -> Option<PteAddr> {
        for _ in 0..self.attempts {
            lists.rotate(mmu);
            // Pages are pushed at the head, so the last match is the oldest.
            let victim = lists
                .iter(ListKind::Inactive)
                .filter(|&pte| !mmu.is_accessed(pte) && mmu.is_present(pte))
                .last();
            if victim.is_some() {
                return victim;
            }
        }
        None
    }
}
