//! Physical page pool.
//!
//! One pool owns every page the hypervisor may hand to guests, tracked
//! by a byte-per-page occupancy map. Allocation scans circularly from
//! the last satisfied request so freshly freed pages are not
//! immediately recycled, and every page is zeroed before it is handed
//! out so no guest ever reads another guest's leftovers.

use crate::error::Error;
use alloc::vec;
use alloc::vec::Vec;
use hal::{Pa, PAGE_SIZE};

pub struct PagePool {
    start: Pa,
    /// Where the managed range is addressable from hypervisor code. On
    /// hardware this equals `start` (identity map); under test it is a
    /// heap arena.
    base: *mut u8,
    map: Vec<bool>,
    cursor: usize,
    used: usize,
}

// The raw base pointer is only dereferenced through &mut self.
unsafe impl Send for PagePool {}

impl PagePool {
    /// Build a pool over `pages` pages of physical memory starting at
    /// `start`.
    ///
    /// # Safety
    ///
    /// `base` must point to `pages * PAGE_SIZE` bytes, writable by the
    /// caller for the pool's whole lifetime, such that physical address
    /// `start + n` is accessed at `base + n`.
    pub unsafe fn new(start: Pa, pages: usize, base: *mut u8) -> Self {
        Self {
            start,
            base,
            map: vec![false; pages],
            cursor: 0,
            used: 0,
        }
    }

    /// Pool backed by a leaked heap arena, for host-side tests.
    #[cfg(not(target_arch = "aarch64"))]
    pub fn with_arena(start: Pa, pages: usize) -> Self {
        let arena = vec![0u8; pages * PAGE_SIZE as usize].leak();
        unsafe { Self::new(start, pages, arena.as_mut_ptr()) }
    }

    /// Take one zeroed page.
    pub fn allocate(&mut self) -> Result<Pa, Error> {
        let pages = self.map.len();
        for step in 0..pages {
            let idx = (self.cursor + 1 + step) % pages;
            if !self.map[idx] {
                self.map[idx] = true;
                self.cursor = idx;
                self.used += 1;
                unsafe {
                    core::ptr::write_bytes(
                        self.base.add(idx * PAGE_SIZE as usize),
                        0,
                        PAGE_SIZE as usize,
                    );
                }
                return Ok(self.start + (idx as u64) * PAGE_SIZE);
            }
        }
        Err(Error::OutOfPages)
    }

    /// Return a page to the pool.
    pub fn free(&mut self, page: Pa) {
        let idx = self.index_of(page);
        assert!(self.map[idx], "double free of {}", page);
        self.map[idx] = false;
        self.used -= 1;
    }

    /// Hypervisor-addressable location of a pooled physical address.
    pub fn virt(&self, pa: Pa) -> *mut u8 {
        let off = pa.into_u64() - self.start.into_u64();
        assert!((off as usize) < self.map.len() * PAGE_SIZE as usize);
        unsafe { self.base.add(off as usize) }
    }

    /// Whether `pa` lies inside the managed range.
    pub fn contains(&self, pa: Pa) -> bool {
        let pa = pa.into_u64();
        let start = self.start.into_u64();
        pa >= start && pa < start + (self.map.len() as u64) * PAGE_SIZE
    }

    pub fn pages_used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    fn index_of(&self, page: Pa) -> usize {
        assert!(page.is_page_aligned() && self.contains(page));
        ((page.into_u64() - self.start.into_u64()) / PAGE_SIZE) as usize
    }
}
