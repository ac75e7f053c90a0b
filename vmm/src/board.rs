//! What a guest-visible machine looks like to the engine.

use crate::error::Error;
use crate::mm::PagePool;
use crate::task::Vm;
use hal::{Hardware, Ipa};

/// A board model: the set of emulated peripherals one VM sees.
///
/// The engine is generic over this trait; all register-level knowledge
/// of the emulated machine lives behind it. `Device` is the mutable
/// per-VM peripheral state, stored inside each [`Vm`].
pub trait Board {
    type Device: Default + Send;

    /// Prepare a freshly created VM: map whatever the board wants
    /// mapped up front and reset the device state.
    fn initialize(
        &self,
        hw: &dyn Hardware,
        pool: &mut PagePool,
        vm: &mut Vm<Self::Device>,
    ) -> Result<(), Error>;

    /// Emulate a trapped load from a peripheral register.
    fn mmio_read(
        &self,
        hw: &dyn Hardware,
        pool: &mut PagePool,
        vm: &mut Vm<Self::Device>,
        addr: Ipa,
    ) -> u64;

    /// Emulate a trapped store to a peripheral register.
    fn mmio_write(
        &self,
        hw: &dyn Hardware,
        pool: &mut PagePool,
        vm: &mut Vm<Self::Device>,
        addr: Ipa,
        value: u64,
    );

    /// Deliver one byte of operator input to the VM's virtual serial
    /// line. Boards with a UART model override this to account for
    /// bytes lost to a full receive queue.
    ///
    /// Returns whether the byte was delivered.
    fn receive_byte(&self, _hw: &dyn Hardware, vm: &mut Vm<Self::Device>, byte: u8) -> bool {
        vm.console_in.enqueue(byte).is_ok()
    }

    /// The VM is about to be put on the CPU.
    fn entering_vm(&self, hw: &dyn Hardware, vm: &mut Vm<Self::Device>);

    /// The VM is about to be taken off the CPU.
    fn leaving_vm(&self, hw: &dyn Hardware, vm: &mut Vm<Self::Device>);

    /// Whether the board is currently pulling the VM's IRQ line.
    fn is_irq_asserted(&self, hw: &dyn Hardware, vm: &Vm<Self::Device>) -> bool;

    /// Whether the board is currently pulling the VM's FIQ line.
    fn is_fiq_asserted(&self, hw: &dyn Hardware, vm: &Vm<Self::Device>) -> bool;
}
