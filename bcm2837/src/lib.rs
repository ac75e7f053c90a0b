//! Raspberry Pi 3 (BCM2837) board model.
//!
//! Implements [`Board`] for the engine: every guest sees the
//! interrupt controller, system timer, AUX mini UART and VideoCore
//! mailbox at their hardware addresses, all backed by per-VM state in
//! [`Bcm2837State`]. The peripheral window is stage-2 mapped without
//! access permission, so each guest register access arrives here as a
//! permission fault.

#![cfg_attr(not(test), no_std)]

pub mod aux;
pub mod intctrl;
pub mod mbox;
pub mod systimer;

use aux::MiniUart;
use fifo::ConsoleFifo;
use hal::raspi3::{
    AUX_IRQ, AUX_IRQ_BIT, AUX_MU_BAUD_REG, DEVICE_BASE, DISABLE_BASIC_IRQS, GPFSEL0, GPFSEL1,
    GPPUDCLK1, IRQ_BASIC_PENDING, MBOX_CONFIG, MBOX_READ, MBOX_WRITE, PHYS_MEMORY_SIZE, TIMER_C1,
    TIMER_C3, TIMER_CLO, TIMER_CS, TIMER_CS_M1,
};
use hal::{Hardware, Ipa, Pa, PAGE_SIZE};
use intctrl::{IntCtrl, IrqSources};
use mbox::Mailbox;
use systimer::SysTimer;
use vmm::{Board, Error, PagePool, Vm};

/// Physical ticks between scheduler ticks (channel 1 of the physical
/// system timer, 1 MHz): 0.4 s per slice unit.
pub const SCHEDULER_TICK: u32 = 400_000;

/// GPFSEL1 with pins 14/15 on ALT5: the mini UART's TXD1/RXD1 routing,
/// reported to guests probing whether the serial pins are set up.
pub const GPFSEL1_MINI_UART: u32 = (0b010 << 12) | (0b010 << 15);

/// Per-VM peripheral state.
#[derive(Default)]
pub struct Bcm2837State {
    pub intctrl: IntCtrl,
    pub uart: MiniUart,
    pub timer: SysTimer,
    pub mbox: Mailbox,
}

/// The board itself. Stateless: everything per-VM lives in
/// [`Bcm2837State`].
pub struct Bcm2837;

fn irq_sources(device: &Bcm2837State, rx: &ConsoleFifo) -> IrqSources {
    let mut pending_1 = device.timer.irq_bits();
    if device.uart.irq_pending(rx) {
        pending_1 |= AUX_IRQ_BIT;
    }
    IrqSources {
        pending_1,
        pending_2: 0,
        basic: 0,
    }
}

impl Bcm2837 {
    /// The physical compare channel 3 fired: latch expired virtual
    /// compares of the guest that was running and re-arm.
    pub fn handle_timer_irq(&self, hw: &dyn Hardware, vm: &mut Vm<Bcm2837State>) {
        vm.device.timer.check_matches(hw);
        vm.device.timer.rearm_physical(hw);
    }

    /// Arm the physical scheduler tick on compare channel 1.
    pub fn arm_scheduler_tick(&self, hw: &dyn Hardware) {
        let now = hw.read32(Pa::new(TIMER_CLO));
        hw.write32(Pa::new(TIMER_C1), now.wrapping_add(SCHEDULER_TICK));
        hw.write32(Pa::new(TIMER_CS), TIMER_CS_M1);
    }
}

impl Board for Bcm2837 {
    type Device = Bcm2837State;

    fn initialize(
        &self,
        _hw: &dyn Hardware,
        pool: &mut PagePool,
        vm: &mut Vm<Bcm2837State>,
    ) -> Result<(), Error> {
        // Cover the whole peripheral window with trapping leaf
        // mappings so no guest access ever reaches the real devices.
        let mut addr = DEVICE_BASE;
        while addr < PHYS_MEMORY_SIZE {
            let tables = vm.stage2.mark_inaccessible(pool, Ipa::new(addr))?;
            vm.stats.pages_mapped += tables as u64;
            addr += PAGE_SIZE;
        }
        Ok(())
    }

    fn mmio_read(
        &self,
        hw: &dyn Hardware,
        _pool: &mut PagePool,
        vm: &mut Vm<Bcm2837State>,
        addr: Ipa,
    ) -> u64 {
        let Vm {
            device,
            console_in,
            console_out,
            ..
        } = vm;
        let addr = addr.into_u64();
        match addr {
            TIMER_CS..=TIMER_C3 => device.timer.read(hw, addr) as u64,
            IRQ_BASIC_PENDING..=DISABLE_BASIC_IRQS => {
                let sources = irq_sources(device, console_in);
                device.intctrl.read(addr, sources) as u64
            }
            AUX_IRQ..=AUX_MU_BAUD_REG => device.uart.read(addr, console_in, console_out) as u64,
            MBOX_READ..=MBOX_CONFIG => device.mbox.read(addr) as u64,
            GPFSEL1 => GPFSEL1_MINI_UART as u64,
            GPFSEL0..=GPPUDCLK1 => {
                hal::warning!("unimplemented gpio read at {:#x}", addr);
                0
            }
            _ => 0,
        }
    }

    fn mmio_write(
        &self,
        hw: &dyn Hardware,
        pool: &mut PagePool,
        vm: &mut Vm<Bcm2837State>,
        addr: Ipa,
        value: u64,
    ) {
        let Vm {
            device,
            console_in,
            console_out,
            stage2,
            ..
        } = vm;
        let addr = addr.into_u64();
        let value = value as u32;
        match addr {
            TIMER_CS..=TIMER_C3 => device.timer.write(hw, addr, value),
            IRQ_BASIC_PENDING..=DISABLE_BASIC_IRQS => device.intctrl.write(addr, value),
            AUX_IRQ..=AUX_MU_BAUD_REG => device.uart.write(addr, value, console_in, console_out),
            MBOX_READ..=MBOX_WRITE => device.mbox.write(pool, stage2, addr, value),
            _ => {}
        }
    }

    fn receive_byte(&self, _hw: &dyn Hardware, vm: &mut Vm<Bcm2837State>, byte: u8) -> bool {
        let Vm {
            device, console_in, ..
        } = vm;
        device.uart.push_rx(console_in, byte)
    }

    fn entering_vm(&self, hw: &dyn Hardware, vm: &mut Vm<Bcm2837State>) {
        vm.device.timer.entering_vm(hw);
    }

    fn leaving_vm(&self, hw: &dyn Hardware, vm: &mut Vm<Bcm2837State>) {
        vm.device.timer.leaving_vm(hw);
    }

    fn is_irq_asserted(&self, _hw: &dyn Hardware, vm: &Vm<Bcm2837State>) -> bool {
        vm.device
            .intctrl
            .irq_asserted(irq_sources(&vm.device, &vm.console_in))
    }

    fn is_fiq_asserted(&self, _hw: &dyn Hardware, vm: &Vm<Bcm2837State>) -> bool {
        vm.device
            .intctrl
            .fiq_asserted(irq_sources(&vm.device, &vm.console_in))
    }
}
