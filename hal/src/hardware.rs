//! The seam between emulation and silicon.

use crate::addressing::{Gva, Ipa, Pa};
use crate::context::{CpuContext, CpuSysRegs};

/// The guest-side stage-1 walk failed, so there is no guest-physical
/// address to report. Carries the fault status returned by the
/// address-translation instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtFault(pub u64);

/// Everything the virtualization engine needs from the machine it runs
/// on.
///
/// Passing `&dyn Hardware` through the engine instead of touching
/// registers directly keeps every device model and the scheduler
/// testable off-target: unit tests substitute a mock that replays
/// register values and records side effects.
pub trait Hardware {
    /// Read a 32-bit device register.
    fn read32(&self, addr: Pa) -> u32;

    /// Write a 32-bit device register.
    fn write32(&self, addr: Pa, value: u32);

    /// Current value of the free-running 64-bit system timer.
    ///
    /// The two halves live in separate registers; the default re-reads
    /// the high word to detect a carry between the two accesses.
    fn timer_count(&self) -> u64 {
        use crate::raspi3::{TIMER_CHI, TIMER_CLO};
        loop {
            let hi = self.read32(Pa::new(TIMER_CHI));
            let lo = self.read32(Pa::new(TIMER_CLO));
            if self.read32(Pa::new(TIMER_CHI)) == hi {
                return (hi as u64) << 32 | lo as u64;
            }
        }
    }

    /// Resolve a guest-virtual address through the guest's own stage-1
    /// tables, yielding the guest-physical address the guest believes
    /// it is touching.
    fn guest_ipa(&self, gva: Gva) -> Result<Ipa, AtFault>;

    /// Capture the EL1 system registers of the currently loaded guest.
    fn sysregs_snapshot(&self) -> CpuSysRegs;

    /// Load a guest's EL1 system registers onto the CPU.
    fn restore_sysregs(&self, regs: &CpuSysRegs);

    /// Drive the virtual IRQ and FIQ lines of the currently loaded
    /// guest.
    fn set_virtual_interrupts(&self, irq: bool, fiq: bool);

    /// Emit one byte on the operator's physical console.
    fn console_putc(&self, byte: u8);

    /// Guest-physical address execution starts at in a fresh VM.
    fn vm_entry_point(&self) -> u64;

    /// Address of the EL2 stub a fresh VM's switch frame resumes at.
    ///
    /// The stub expects a pointer to the VM's trap frame in `x19` and
    /// drops to EL1 from it.
    fn vm_launch_entry(&self) -> u64;

    /// Install a stage-2 root (a VTTBR_EL2 value) and invalidate the
    /// stale guest TLB entries.
    fn set_stage2_root(&self, vttbr: u64);

    /// Save the callee-saved frame into `prev` and resume from `next`.
    ///
    /// # Safety
    ///
    /// `next` must hold a frame previously produced by this function or
    /// prepared by the task loader: a valid stack pointer and a resume
    /// address that expects the callee-saved registers in the frame.
    unsafe fn switch_context(&self, prev: *mut CpuContext, next: *const CpuContext);
}
