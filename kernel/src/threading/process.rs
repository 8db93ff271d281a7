use alloc::{boxed::Box, collections::BTreeMap, string::String};
use core::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use kswap_shared::paging::PageDirectory;

pub type Pid = u16;
pub type AtomicPid = AtomicU16;

/// The parts of a process the swap subsystem reads or updates.
pub struct ProcessControlBlock {
    pub pid: Pid,
    pub name: String,
    pub page_dir: Box<PageDirectory>,
    /// Pages of this process currently held in swap.
    pub pages_swapped_out: AtomicUsize,
}

impl ProcessControlBlock {
    pub fn new(pid: Pid, name: &str) -> Self {
        Self {
            pid,
            name: name.into(),
            page_dir: Box::default(),
            pages_swapped_out: AtomicUsize::new(0),
        }
    }

    pub fn swapped_out(&self) -> usize {
        self.pages_swapped_out.load(Ordering::SeqCst)
    }
}

pub struct ProcessTable {
    content: BTreeMap<Pid, ProcessControlBlock>,
    next_pid: AtomicPid,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self {
            content: BTreeMap::new(),
            next_pid: AtomicPid::new(1),
        }
    }
}

impl ProcessTable {
    pub fn allocate_pid(&self) -> Pid {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        if pid == 0 {
            panic!("PID overflow");
        }
        pid
    }

    /// Creates an empty process and returns its pid.
    pub fn spawn(&mut self, name: &str) -> Pid {
        let pid = self.allocate_pid();
        self.add(ProcessControlBlock::new(pid, name));
        pid
    }

    pub fn add(&mut self, pcb: ProcessControlBlock) {
        assert!(
            !self.content.contains_key(&pcb.pid),
            "PCB with pid {} already added to process table.",
            pcb.pid
        );
        self.content.insert(pcb.pid, pcb);
    }

    pub fn remove(&mut self, pid: Pid) -> Option<ProcessControlBlock> {
        self.content.remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&ProcessControlBlock> {
        self.content.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessControlBlock> {
        self.content.get_mut(&pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_hands_out_increasing_pids() {
        let mut table = ProcessTable::default();
        let first = table.spawn("init");
        let second = table.spawn("sh");
        assert_eq!((first, second), (1, 2));
        assert_eq!(table.get(second).map(|p| p.name.as_str()), Some("sh"));
        assert!(table.remove(first).is_some());
        assert!(table.get(first).is_none());
    }

    #[test]
    #[should_panic(expected = "already added")]
    fn duplicate_pid_is_rejected() {
        let mut table = ProcessTable::default();
        table.add(ProcessControlBlock::new(7, "a"));
        table.add(ProcessControlBlock::new(7, "b"));
    }
}
