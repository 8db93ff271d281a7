pub const KB: usize = 1024;
pub const MB: usize = KB * KB;

// Number of page-sized slots in the swap area. Slot N lives at page N + 1 of
// the backing store; page 0 holds the swap header.
pub const SWAPFILE_PAGES: usize = 18;

// Sequential allocations are grouped into runs of this many slots.
pub const SWAPFILE_CLUSTER: usize = 16;

// A slot whose reference count reaches SWAP_MAP_MAX is pinned for good.
pub const SWAP_MAP_MAX: u16 = 0x7fff;
