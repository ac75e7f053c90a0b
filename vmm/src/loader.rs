//! Raw guest image loading.
//!
//! Guests are flat binaries, the same format the Pi firmware expects
//! as `kernel8.img`. The whole image is copied into freshly allocated
//! pages and mapped before the VM first runs; everything the guest
//! touches beyond the image is faulted in on demand.
//!
//! [`TaskManager::create_vm`] does not load anything itself: it takes
//! a loader callback, and [`raw_image`] is the stock one. Anything
//! else that can populate guest memory and the initial register frame
//! (a kernel plus a device tree, a test stub) is just another closure.
//!
//! [`TaskManager::create_vm`]: crate::task::TaskManager::create_vm

use crate::error::Error;
use crate::mm::PagePool;
use crate::stage2::Stage2Flags;
use crate::task::Vm;
use hal::raspi3::DEVICE_BASE;
use hal::{Hardware, Ipa, PAGE_SIZE};

/// A flat binary plus the placement and initial frame it wants.
pub struct RawImage<'a> {
    pub image: &'a [u8],
    pub load_addr: Ipa,
    pub entry: u64,
    pub sp: u64,
}

impl<'a> RawImage<'a> {
    /// Copy the image into guest memory and fill the initial frame.
    pub fn load<D>(&self, pool: &mut PagePool, vm: &mut Vm<D>) -> Result<(), Error> {
        load_raw(pool, vm, self.image, self.load_addr)?;
        vm.pt_regs.pc = self.entry;
        vm.pt_regs.sp = self.sp;
        Ok(())
    }

    /// Adapt into the callback shape `create_vm` takes.
    pub fn loader<D>(
        self,
    ) -> impl FnOnce(&dyn Hardware, &mut PagePool, &mut Vm<D>) -> Result<(), Error> + 'a {
        move |_hw, pool, vm| self.load(pool, vm)
    }
}

/// Loader placing `image` at the board's firmware entry point.
pub fn raw_image<D>(
    image: &[u8],
) -> impl FnOnce(&dyn Hardware, &mut PagePool, &mut Vm<D>) -> Result<(), Error> + '_ {
    move |hw, pool, vm| {
        let entry = hw.vm_entry_point();
        RawImage {
            image,
            load_addr: Ipa::new(entry),
            entry,
            sp: 0,
        }
        .load(pool, vm)
    }
}

/// Copy `image` into guest memory at `base` and map it.
pub fn load_raw<D>(
    pool: &mut PagePool,
    vm: &mut Vm<D>,
    image: &[u8],
    base: Ipa,
) -> Result<(), Error> {
    let end = base.into_u64() + image.len() as u64;
    if end > DEVICE_BASE {
        return Err(Error::ImageTooLarge);
    }
    for (i, chunk) in image.chunks(PAGE_SIZE as usize).enumerate() {
        let page = pool.allocate()?;
        unsafe {
            core::ptr::copy_nonoverlapping(chunk.as_ptr(), pool.virt(page), chunk.len());
        }
        let ipa = base + (i as u64) * PAGE_SIZE;
        let tables = vm.stage2.map_page(pool, ipa, page, Stage2Flags::NORMAL)?;
        vm.stats.pages_mapped += 1 + tables as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::tests::null_vm;
    use hal::Pa;

    #[test]
    fn image_lands_at_load_address() {
        let mut pool = PagePool::with_arena(Pa::new(0x40_0000), 32);
        let mut vm = null_vm(&mut pool);
        let image: Vec<u8> = (0..PAGE_SIZE as usize + 100).map(|i| i as u8).collect();
        load_raw(&mut pool, &mut vm, &image, Ipa::new(0x8_0000)).unwrap();

        // Spot-check a byte in each page through the installed mapping.
        for probe in [0u64, 0x1000, 0x1063] {
            let pa = vm
                .stage2
                .translate(&pool, Ipa::new(0x8_0000 + probe))
                .unwrap();
            let byte = unsafe { *pool.virt(pa) };
            assert_eq!(byte, image[probe as usize]);
        }
    }

    #[test]
    fn raw_image_fills_the_initial_frame() {
        let mut pool = PagePool::with_arena(Pa::new(0x40_0000), 32);
        let mut vm = null_vm(&mut pool);
        let image = [0xAAu8; 32];
        RawImage {
            image: &image,
            load_addr: Ipa::new(0x20_0000),
            entry: 0x20_0000,
            sp: 0x8_0000,
        }
        .load(&mut pool, &mut vm)
        .unwrap();

        assert_eq!(vm.pt_regs.pc, 0x20_0000);
        assert_eq!(vm.pt_regs.sp, 0x8_0000);
        assert!(vm.stage2.translate(&pool, Ipa::new(0x20_0000)).is_some());
    }

    #[test]
    fn rejects_image_overlapping_peripherals() {
        let mut pool = PagePool::with_arena(Pa::new(0x40_0000), 8);
        let mut vm = null_vm(&mut pool);
        let image = [0u8; 16];
        assert_eq!(
            load_raw(&mut pool, &mut vm, &image, Ipa::new(DEVICE_BASE - 8)),
            Err(Error::ImageTooLarge)
        );
    }
}
