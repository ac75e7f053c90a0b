//! Data abort dispatch.
//!
//! Stage-2 faults are the engine's workhorse: a translation fault in
//! guest RAM means the page has simply never been touched and is
//! faulted in on the spot, while a permission fault can only come from
//! the deliberately unreadable peripheral window and is forwarded to
//! the board's register emulation. Everything else is a bug in the
//! guest or in us.

use crate::board::Board;
use crate::error::Error;
use crate::mm::PagePool;
use crate::stage2::Stage2Flags;
use crate::task::{PtRegs, Vm};
use hal::raspi3::DEVICE_BASE;
use hal::{Gva, Hardware, Ipa};
use num_enum::TryFromPrimitive;

/// Exception class for a data abort taken from a lower exception
/// level.
pub const EC_DATA_ABORT_LOWER: u64 = 0x24;

/// Register number encoding the zero register in the ISS.
pub const XZR: usize = 31;

/// Decoded ESR_EL2 for a data abort.
#[derive(Clone, Copy)]
pub struct Syndrome(u64);

impl Syndrome {
    pub const fn new(esr: u64) -> Self {
        Self(esr)
    }

    /// Exception class.
    pub fn ec(&self) -> u64 {
        (self.0 >> 26) & 0x3F
    }

    /// Data fault status code.
    pub fn dfsc(&self) -> u64 {
        self.0 & 0x3F
    }

    /// Register transferred by the faulting access.
    pub fn srt(&self) -> usize {
        ((self.0 >> 16) & 0x1F) as usize
    }

    /// Whether the faulting access was a store.
    pub fn is_write(&self) -> bool {
        self.0 & (1 << 6) != 0
    }
}

/// The DFSC families the dispatcher knows, keyed by `dfsc >> 2` (the
/// level bits stripped).
#[derive(Debug, TryFromPrimitive)]
#[repr(u64)]
pub enum AbortClass {
    Translation = 1,
    Permission = 3,
}

/// Turn the faulting guest-virtual address of a data abort into the
/// guest-physical address the guest was actually touching, using the
/// guest's own stage-1 tables.
pub fn resolve_fault_address(hw: &dyn Hardware, far: Gva) -> Result<Ipa, Error> {
    Ok(hw.guest_ipa(far)?)
}

/// Resolve one stage-2 data abort taken while `vm` was running.
///
/// On success the trap frame in `regs` is ready to eret: advanced past
/// the instruction for emulated accesses, untouched (so the access
/// replays) for demand paging.
pub fn handle_data_abort<B: Board>(
    hw: &dyn Hardware,
    pool: &mut PagePool,
    board: &B,
    vm: &mut Vm<B::Device>,
    regs: &mut PtRegs,
    esr: u64,
    fault_ipa: Ipa,
) -> Result<(), Error> {
    vm.stats.data_aborts += 1;
    let syndrome = Syndrome::new(esr);
    match AbortClass::try_from(syndrome.dfsc() >> 2) {
        Ok(AbortClass::Translation) => {
            if fault_ipa.into_u64() >= DEVICE_BASE {
                return Err(Error::OutOfRange(fault_ipa));
            }
            let page = pool.allocate()?;
            let tables = vm
                .stage2
                .map_page(pool, fault_ipa, page, Stage2Flags::NORMAL)?;
            vm.stats.pages_mapped += 1 + tables as u64;
            Ok(())
        }
        Ok(AbortClass::Permission) => {
            let srt = syndrome.srt();
            if syndrome.is_write() {
                let value = if srt == XZR { 0 } else { regs.regs[srt] };
                board.mmio_write(hw, pool, vm, fault_ipa, value);
                vm.stats.mmio_writes += 1;
            } else {
                let value = board.mmio_read(hw, pool, vm, fault_ipa);
                if srt != XZR {
                    regs.regs[srt] = value;
                }
                vm.stats.mmio_reads += 1;
            }
            regs.pc += 4;
            Ok(())
        }
        Err(_) => Err(Error::UnhandledAbort {
            esr,
            far: fault_ipa,
        }),
    }
}
