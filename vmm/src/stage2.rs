//! Stage-2 translation tables.
//!
//! Each guest owns a three-level radix tree turning guest-physical
//! addresses into host-physical ones. The input space is 38 bits wide
//! (the walk starts at the concatenated first level), each level
//! resolves nine bits, and leaves are 4 KiB pages.
//!
//! Pages the guest may touch freely are mapped with [`Stage2Flags::NORMAL`].
//! The peripheral window is mapped with [`Stage2Flags::MMIO`]: valid and
//! access-flagged but with no stage-2 access permission, so every guest
//! load or store there raises a permission fault and lands in the
//! device emulation instead of silicon.

use crate::error::Error;
use crate::mm::PagePool;
use bitflags::bitflags;
use hal::{Ipa, Pa, PAGE_SHIFT};

const LV1_SHIFT: u64 = 30;
const LV2_SHIFT: u64 = 21;
const INDEX_MASK: u64 = 0x1FF;
const DESC_TABLE: u64 = 0b11;
const DESC_PA_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// VTCR_EL2 configuration the tables are built for: 38-bit input,
/// start at level 1, 4 KiB granule, inner-shareable write-back walks,
/// 36-bit physical range.
pub const VTCR_EL2: u64 = (64 - 38) | (1 << 6) | (1 << 8) | (1 << 10) | (3 << 12) | (1 << 16);

bitflags! {
    /// Stage-2 descriptor bits.
    pub struct Stage2Flags: u64 {
        const VALID = 1 << 0;
        /// Page descriptor at the leaf level (table descriptor above it).
        const PAGE = 1 << 1;
        /// MemAttr: normal memory, inner+outer write-back cacheable.
        const MEMATTR_NORMAL = 0b1111 << 2;
        /// S2AP read+write.
        const S2AP_RW = 0b11 << 6;
        /// Inner shareable.
        const SH_INNER = 0b11 << 8;
        /// Access flag. Left set even on MMIO pages so trapped accesses
        /// report permission faults, not access-flag faults.
        const AF = 1 << 10;
    }
}

impl Stage2Flags {
    /// Guest RAM.
    pub const NORMAL: Stage2Flags = Stage2Flags::from_bits_truncate(
        Stage2Flags::VALID.bits()
            | Stage2Flags::PAGE.bits()
            | Stage2Flags::MEMATTR_NORMAL.bits()
            | Stage2Flags::S2AP_RW.bits()
            | Stage2Flags::SH_INNER.bits()
            | Stage2Flags::AF.bits(),
    );

    /// Trapped peripheral page: no access permission in either
    /// direction.
    pub const MMIO: Stage2Flags = Stage2Flags::from_bits_truncate(
        Stage2Flags::VALID.bits() | Stage2Flags::PAGE.bits() | Stage2Flags::AF.bits(),
    );
}

/// One guest's stage-2 address space.
pub struct AddressSpace {
    root: Pa,
}

impl AddressSpace {
    /// Allocate an empty top-level table.
    pub fn new(pool: &mut PagePool) -> Result<Self, Error> {
        Ok(Self {
            root: pool.allocate()?,
        })
    }

    /// Physical address of the top-level table.
    pub fn root(&self) -> Pa {
        self.root
    }

    /// VTTBR_EL2 value selecting this address space.
    pub fn vttbr(&self, vmid: u8) -> u64 {
        self.root.into_u64() | (vmid as u64) << 48
    }

    /// Install a leaf mapping, growing intermediate tables on demand.
    ///
    /// Returns the number of table pages allocated along the way.
    pub fn map_page(
        &mut self,
        pool: &mut PagePool,
        ipa: Ipa,
        pa: Pa,
        flags: Stage2Flags,
    ) -> Result<usize, Error> {
        let ipa = ipa.page_base().into_u64();
        let mut new_tables = 0;
        let mut table = self.root;
        for shift in [LV1_SHIFT, LV2_SHIFT] {
            let idx = (ipa >> shift) & INDEX_MASK;
            let entry = unsafe { entry_ptr(pool, table, idx).read() };
            table = if entry & Stage2Flags::VALID.bits() == 0 {
                let next = pool.allocate()?;
                new_tables += 1;
                unsafe { entry_ptr(pool, table, idx).write(next.into_u64() | DESC_TABLE) };
                next
            } else {
                Pa::new(entry & DESC_PA_MASK)
            };
        }
        let idx = (ipa >> PAGE_SHIFT) & INDEX_MASK;
        unsafe { entry_ptr(pool, table, idx).write(pa.page_base().into_u64() | flags.bits()) };
        Ok(new_tables)
    }

    /// Install a trapping leaf with no backing frame: valid and
    /// access-flagged but permissionless, so every guest touch of the
    /// page raises a permission fault.
    ///
    /// Returns the number of table pages allocated along the way.
    pub fn mark_inaccessible(&mut self, pool: &mut PagePool, ipa: Ipa) -> Result<usize, Error> {
        self.map_page(pool, ipa, Pa::new(0), Stage2Flags::MMIO)
    }

    /// Walk the tables without modifying them.
    pub fn translate(&self, pool: &PagePool, ipa: Ipa) -> Option<Pa> {
        let raw = ipa.into_u64();
        let mut table = self.root;
        for shift in [LV1_SHIFT, LV2_SHIFT] {
            let idx = (raw >> shift) & INDEX_MASK;
            let entry = unsafe { entry_ptr(pool, table, idx).read() };
            if entry & Stage2Flags::VALID.bits() == 0 {
                return None;
            }
            table = Pa::new(entry & DESC_PA_MASK);
        }
        let idx = (raw >> PAGE_SHIFT) & INDEX_MASK;
        let entry = unsafe { entry_ptr(pool, table, idx).read() };
        if entry & Stage2Flags::VALID.bits() == 0 {
            return None;
        }
        Some(Pa::new((entry & DESC_PA_MASK) | ipa.page_offset()))
    }
}

/// Pointer to the `idx`-th descriptor of the table page at `table`.
///
/// # Safety
///
/// `table` must be a table page allocated from `pool` and `idx` below
/// 512.
unsafe fn entry_ptr(pool: &PagePool, table: Pa, idx: u64) -> *mut u64 {
    (pool.virt(table) as *mut u64).add(idx as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL_START: u64 = 0x40_0000;

    fn pool() -> PagePool {
        PagePool::with_arena(Pa::new(POOL_START), 64)
    }

    #[test]
    fn map_then_translate() {
        let mut pool = pool();
        let mut space = AddressSpace::new(&mut pool).unwrap();
        let page = pool.allocate().unwrap();
        space
            .map_page(&mut pool, Ipa::new(0x8_0000), page, Stage2Flags::NORMAL)
            .unwrap();
        assert_eq!(
            space.translate(&pool, Ipa::new(0x8_0123)),
            Some(page + 0x123)
        );
    }

    #[test]
    fn unmapped_translates_to_none() {
        let mut pool = pool();
        let space = AddressSpace::new(&mut pool).unwrap();
        assert_eq!(space.translate(&pool, Ipa::new(0x8_0000)), None);
    }

    #[test]
    fn neighbours_share_intermediate_tables() {
        let mut pool = pool();
        let mut space = AddressSpace::new(&mut pool).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let first = space
            .map_page(&mut pool, Ipa::new(0x10_0000), a, Stage2Flags::NORMAL)
            .unwrap();
        let second = space
            .map_page(&mut pool, Ipa::new(0x10_1000), b, Stage2Flags::NORMAL)
            .unwrap();
        assert_eq!(first, 2);
        assert_eq!(second, 0);
        assert_eq!(space.translate(&pool, Ipa::new(0x10_1000)), Some(b));
    }

    #[test]
    fn inaccessible_pages_are_mapped_but_point_nowhere() {
        let mut pool = pool();
        let mut space = AddressSpace::new(&mut pool).unwrap();
        space
            .mark_inaccessible(&mut pool, Ipa::new(0x3F21_5000))
            .unwrap();
        // The walk succeeds (no translation fault to demand-page on)
        // but the leaf carries no physical frame.
        assert_eq!(
            space.translate(&pool, Ipa::new(0x3F21_5040)),
            Some(Pa::new(0x40))
        );
    }

    #[test]
    fn distant_addresses_do_not_collide() {
        let mut pool = pool();
        let mut space = AddressSpace::new(&mut pool).unwrap();
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        space
            .map_page(&mut pool, Ipa::new(0x0), a, Stage2Flags::NORMAL)
            .unwrap();
        space
            .map_page(&mut pool, Ipa::new(0x3F00_0000), b, Stage2Flags::MMIO)
            .unwrap();
        assert_eq!(space.translate(&pool, Ipa::new(0x0)), Some(a));
        assert_eq!(space.translate(&pool, Ipa::new(0x3F00_0000)), Some(b));
    }
}
