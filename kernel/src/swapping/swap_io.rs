//! Moving pages between frames and the swap file.
//!
//! Page 0 of the swap file is a header; slot N lives at page N + 1.

use super::SwapError;
use crate::{
    mem::Frame,
    sync::mutex::Mutex,
    threading::process::ProcessControlBlock,
    vfs::File,
};
use alloc::boxed::Box;
use core::{mem::size_of, sync::atomic::Ordering};
use kswap_shared::{mem::PAGE_FRAME_SIZE, paging::SwapEntry, println};
use once_cell::race::OnceBox;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub const SWAP_MAGIC: &[u8; 10] = b"SWAPSPACE2";

/// Header occupying the first page of the swap file.
#[derive(FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct SwapHeader {
    pub bootbits: [u8; 1024],
    pub version: u32,
    pub last_page: u32,
    pub nr_badpages: u32,
    pub padding: [u32; 125],
    pub reserved: [u8; PAGE_FRAME_SIZE - 1546],
    pub magic: [u8; 10],
}

const _: () = assert!(size_of::<SwapHeader>() == PAGE_FRAME_SIZE);

impl SwapHeader {
    pub fn new(slots: usize) -> Self {
        let mut header = Self::new_zeroed();
        header.version = 1;
        // The last usable page of the file; page 0 is this header.
        header.last_page = u32::try_from(slots).unwrap_or(u32::MAX);
        header.magic = *SWAP_MAGIC;
        header
    }

    pub fn is_valid(&self) -> bool {
        self.magic == *SWAP_MAGIC
    }
}

/// Byte offset of a slot in the swap file.
pub fn slot_offset(slot: usize) -> u64 {
    ((slot + 1) * PAGE_FRAME_SIZE) as u64
}

#[derive(Default)]
pub struct SwapIo {
    file: OnceBox<Mutex<Box<dyn File>>>,
}

impl SwapIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.file.get().is_some()
    }

    /// Makes `file` the swap file and writes its header. Only the first call
    /// succeeds.
    pub fn bind(&self, mut file: Box<dyn File>, slots: usize) -> Result<(), SwapError> {
        if self.is_bound() {
            return Err(SwapError::AlreadyBound);
        }
        let header = SwapHeader::new(slots);
        let saved = file.offset();
        file.set_offset(0);
        let written = file.write(header.as_bytes());
        file.set_offset(saved);
        check_transfer(written?)?;

        self.file
            .set(Box::new(Mutex::new(file)))
            .map_err(|_| SwapError::AlreadyBound)?;
        println!(
            "kernel: swap file bound, {} slots of {} bytes",
            slots, PAGE_FRAME_SIZE
        );
        Ok(())
    }

    /// Reads back the header page.
    pub fn header(&self) -> Result<SwapHeader, SwapError> {
        let mut header = SwapHeader::new_zeroed();
        self.at_offset(0, |file| file.read(header.as_bytes_mut()))?;
        Ok(header)
    }

    fn at_offset(
        &self,
        offset: u64,
        op: impl FnOnce(&mut dyn File) -> crate::vfs::Result<usize>,
    ) -> Result<(), SwapError> {
        let file = self.file.get().ok_or(SwapError::NoBackingStore)?;
        let mut file = file.lock();
        let saved = file.offset();
        file.set_offset(offset);
        let result = op(&mut **file);
        file.set_offset(saved);
        check_transfer(result?)
    }

    /// Writes `frame` to `slot` on behalf of `owner`.
    pub fn write_out(
        &self,
        frame: &Frame,
        slot: SwapEntry,
        owner: &ProcessControlBlock,
    ) -> Result<(), SwapError> {
        self.at_offset(slot_offset(slot.slot()), |file| file.write(frame))?;
        owner.pages_swapped_out.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Reads `slot` into `frame` on behalf of `owner`.
    pub fn read_in(
        &self,
        frame: &mut Frame,
        slot: SwapEntry,
        owner: &ProcessControlBlock,
    ) -> Result<(), SwapError> {
        self.at_offset(slot_offset(slot.slot()), |file| file.read(frame))?;
        // A process bound after its pages went out never counted them.
        owner
            .pages_swapped_out
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok();
        Ok(())
    }
}

fn check_transfer(actual: usize) -> Result<(), SwapError> {
    if actual == PAGE_FRAME_SIZE {
        Ok(())
    } else {
        Err(SwapError::ShortTransfer {
            expected: PAGE_FRAME_SIZE,
            actual,
        })
    }
}
