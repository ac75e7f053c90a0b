//! In-memory [`Hardware`] for host-side unit tests.

use crate::addressing::{Gva, Ipa, Pa};
use crate::context::{CpuContext, CpuSysRegs};
use crate::hardware::{AtFault, Hardware};
use crate::raspi3::{TIMER_CHI, TIMER_CLO};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

/// Fake machine backed by a register map.
///
/// Device registers live in a `BTreeMap` keyed by physical address and
/// read back whatever was last written (zero if never written), console
/// output is captured, and the virtual interrupt lines and context
/// switches are recorded for assertions.
pub struct MockHardware {
    regs: RefCell<BTreeMap<u64, u32>>,
    console: RefCell<Vec<u8>>,
    virq: Cell<bool>,
    vfiq: Cell<bool>,
    switches: Cell<usize>,
    sysregs: RefCell<CpuSysRegs>,
    vttbr: Cell<u64>,
    entry: u64,
}

impl MockHardware {
    pub fn new() -> Self {
        Self {
            regs: RefCell::new(BTreeMap::new()),
            console: RefCell::new(Vec::new()),
            virq: Cell::new(false),
            vfiq: Cell::new(false),
            switches: Cell::new(0),
            vttbr: Cell::new(0),
            // A freshly reset guest has its stage-1 MMU enabled bit
            // set here so tests can watch the loader clear it.
            sysregs: RefCell::new(CpuSysRegs {
                sctlr_el1: 0x30d0_0801,
                ..CpuSysRegs::default()
            }),
            entry: 0x8_0000,
        }
    }

    /// Seed a device register.
    pub fn set_reg(&self, addr: u64, value: u32) {
        self.regs.borrow_mut().insert(addr, value);
    }

    /// Last value written to a device register.
    pub fn reg(&self, addr: u64) -> u32 {
        self.regs.borrow().get(&addr).copied().unwrap_or(0)
    }

    /// Set the free-running timer to an absolute count.
    pub fn set_timer(&self, count: u64) {
        self.set_reg(TIMER_CLO, count as u32);
        self.set_reg(TIMER_CHI, (count >> 32) as u32);
    }

    /// Move the free-running timer forward.
    pub fn advance_timer(&self, ticks: u64) {
        let now = self.timer_count();
        self.set_timer(now + ticks);
    }

    /// Everything printed on the operator console so far.
    pub fn console_bytes(&self) -> Vec<u8> {
        self.console.borrow().clone()
    }

    pub fn virtual_irq(&self) -> bool {
        self.virq.get()
    }

    pub fn virtual_fiq(&self) -> bool {
        self.vfiq.get()
    }

    /// Number of context switches performed.
    pub fn switch_count(&self) -> usize {
        self.switches.get()
    }

    /// Last stage-2 root installed.
    pub fn vttbr(&self) -> u64 {
        self.vttbr.get()
    }
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl Hardware for MockHardware {
    fn read32(&self, addr: Pa) -> u32 {
        self.reg(addr.into_u64())
    }

    fn write32(&self, addr: Pa, value: u32) {
        self.set_reg(addr.into_u64(), value);
    }

    fn guest_ipa(&self, gva: Gva) -> Result<Ipa, AtFault> {
        // The mock guest runs with an identity stage-1 mapping.
        Ok(Ipa::new(gva.into_u64()))
    }

    fn sysregs_snapshot(&self) -> CpuSysRegs {
        *self.sysregs.borrow()
    }

    fn restore_sysregs(&self, regs: &CpuSysRegs) {
        *self.sysregs.borrow_mut() = *regs;
    }

    fn set_virtual_interrupts(&self, irq: bool, fiq: bool) {
        self.virq.set(irq);
        self.vfiq.set(fiq);
    }

    fn console_putc(&self, byte: u8) {
        self.console.borrow_mut().push(byte);
    }

    fn vm_entry_point(&self) -> u64 {
        self.entry
    }

    fn vm_launch_entry(&self) -> u64 {
        0
    }

    fn set_stage2_root(&self, vttbr: u64) {
        self.vttbr.set(vttbr);
    }

    unsafe fn switch_context(&self, _prev: *mut CpuContext, _next: *const CpuContext) {
        self.switches.set(self.switches.get() + 1);
    }
}
