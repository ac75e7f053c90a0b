//! AArch64 EL2 implementation of [`Hardware`].

use crate::addressing::{Gva, Ipa, Pa};
use crate::context::{for_each_sysreg, CpuContext, CpuSysRegs};
use crate::hardware::{AtFault, Hardware};
use crate::kprint::ConsoleSink;
use crate::raspi3::{
    AUX_ENABLES, AUX_MU_BAUD_REG, AUX_MU_CNTL_REG, AUX_MU_IER_REG, AUX_MU_IO_REG, AUX_MU_LCR_REG,
    AUX_MU_LSR_REG, AUX_MU_MCR_REG, GPFSEL1, GPPUD, GPPUDCLK0,
};
use core::arch::{asm, global_asm};

const HCR_VF: u64 = 1 << 6;
const HCR_VI: u64 = 1 << 7;

// PAR_EL1 after a successful `at` walk: fault bit clear, PA in [47:12].
const PAR_F: u64 = 1;
const PAR_PA_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// Guest raw images are dropped where the Pi firmware would have put a
/// kernel.
const VM_ENTRY: u64 = 0x8_0000;

/// The physical Raspberry Pi 3.
pub struct PhysHardware;

macro_rules! impl_sysreg_ops {
    ($($reg:ident,)*) => {
        fn snapshot_sysregs() -> CpuSysRegs {
            let mut regs = CpuSysRegs::default();
            unsafe {
                $(asm!(
                    concat!("mrs {}, ", stringify!($reg)),
                    out(reg) regs.$reg,
                    options(nomem, nostack),
                );)*
            }
            regs
        }

        fn load_sysregs(regs: &CpuSysRegs) {
            unsafe {
                $(asm!(
                    concat!("msr ", stringify!($reg), ", {}"),
                    in(reg) regs.$reg,
                    options(nomem, nostack),
                );)*
                asm!("isb", options(nomem, nostack));
            }
        }
    };
}
for_each_sysreg!(impl_sysreg_ops);

impl Hardware for PhysHardware {
    fn read32(&self, addr: Pa) -> u32 {
        unsafe { core::ptr::read_volatile(addr.into_u64() as *const u32) }
    }

    fn write32(&self, addr: Pa, value: u32) {
        unsafe { core::ptr::write_volatile(addr.into_u64() as *mut u32, value) }
    }

    fn guest_ipa(&self, gva: Gva) -> Result<Ipa, AtFault> {
        let par: u64;
        unsafe {
            asm!(
                "at s1e1r, {gva}",
                "isb",
                "mrs {par}, par_el1",
                gva = in(reg) gva.into_u64(),
                par = out(reg) par,
                options(nomem, nostack),
            );
        }
        if par & PAR_F != 0 {
            Err(AtFault(par))
        } else {
            Ok(Ipa::new((par & PAR_PA_MASK) | gva.page_offset()))
        }
    }

    fn sysregs_snapshot(&self) -> CpuSysRegs {
        snapshot_sysregs()
    }

    fn restore_sysregs(&self, regs: &CpuSysRegs) {
        load_sysregs(regs)
    }

    fn set_virtual_interrupts(&self, irq: bool, fiq: bool) {
        let mut hcr: u64;
        unsafe {
            asm!("mrs {}, hcr_el2", out(reg) hcr, options(nomem, nostack));
        }
        hcr &= !(HCR_VI | HCR_VF);
        if irq {
            hcr |= HCR_VI;
        }
        if fiq {
            hcr |= HCR_VF;
        }
        unsafe {
            asm!("msr hcr_el2, {}", in(reg) hcr, options(nomem, nostack));
        }
    }

    fn console_putc(&self, byte: u8) {
        while self.read32(Pa::new(AUX_MU_LSR_REG)) & 0x20 == 0 {
            core::hint::spin_loop();
        }
        self.write32(Pa::new(AUX_MU_IO_REG), byte as u32);
    }

    fn vm_entry_point(&self) -> u64 {
        VM_ENTRY
    }

    fn vm_launch_entry(&self) -> u64 {
        vm_launch as usize as u64
    }

    fn set_stage2_root(&self, vttbr: u64) {
        unsafe {
            asm!(
                "msr vttbr_el2, {}",
                "tlbi vmalls12e1",
                "dsb ish",
                "isb",
                in(reg) vttbr,
                options(nomem, nostack),
            );
        }
    }

    unsafe fn switch_context(&self, prev: *mut CpuContext, next: *const CpuContext) {
        cpu_switch_to(prev, next)
    }
}

impl PhysHardware {
    /// Poll the physical UART for an input byte.
    pub fn try_getc(&self) -> Option<u8> {
        if self.read32(Pa::new(AUX_MU_LSR_REG)) & 0x01 != 0 {
            Some(self.read32(Pa::new(AUX_MU_IO_REG)) as u8)
        } else {
            None
        }
    }

    /// Route GPIO 14/15 to the mini UART and bring it up at 115200.
    pub fn uart_init(&self) {
        let mut sel = self.read32(Pa::new(GPFSEL1));
        sel &= !((7 << 12) | (7 << 15));
        sel |= (2 << 12) | (2 << 15);
        self.write32(Pa::new(GPFSEL1), sel);

        self.write32(Pa::new(GPPUD), 0);
        delay(150);
        self.write32(Pa::new(GPPUDCLK0), (1 << 14) | (1 << 15));
        delay(150);
        self.write32(Pa::new(GPPUDCLK0), 0);

        self.write32(Pa::new(AUX_ENABLES), 1);
        self.write32(Pa::new(AUX_MU_CNTL_REG), 0);
        self.write32(Pa::new(AUX_MU_IER_REG), 0);
        self.write32(Pa::new(AUX_MU_LCR_REG), 3);
        self.write32(Pa::new(AUX_MU_MCR_REG), 0);
        self.write32(Pa::new(AUX_MU_BAUD_REG), 270);
        self.write32(Pa::new(AUX_MU_CNTL_REG), 3);
    }
}

fn delay(cycles: u64) {
    for _ in 0..cycles {
        unsafe { asm!("nop", options(nomem, nostack)) }
    }
}

/// Console sink writing through the polled mini UART.
pub struct UartConsole;

impl ConsoleSink for UartConsole {
    fn putc(&mut self, byte: u8) {
        PhysHardware.console_putc(byte);
    }
}

/// Unmask IRQs at the current exception level.
pub fn enable_irq() {
    unsafe { asm!("msr daifclr, #2", options(nomem, nostack)) }
}

/// Mask IRQs at the current exception level.
pub fn disable_irq() {
    unsafe { asm!("msr daifset, #2", options(nomem, nostack)) }
}

extern "C" {
    fn cpu_switch_to(prev: *mut CpuContext, next: *const CpuContext);
    /// Boot-code stub: restores a trap frame pointed to by `x19` and
    /// erets into the guest.
    fn vm_launch();
}

// Stores the callee-saved frame of `prev` and resumes `next`. The
// store order matches the field order of `CpuContext`.
global_asm!(
    r#"
.global cpu_switch_to
cpu_switch_to:
    mov x10, x0
    mov x9, sp
    stp x19, x20, [x10], #16
    stp x21, x22, [x10], #16
    stp x23, x24, [x10], #16
    stp x25, x26, [x10], #16
    stp x27, x28, [x10], #16
    stp x29, x9, [x10], #16
    str x30, [x10]
    mov x10, x1
    ldp x19, x20, [x10], #16
    ldp x21, x22, [x10], #16
    ldp x23, x24, [x10], #16
    ldp x25, x26, [x10], #16
    ldp x27, x28, [x10], #16
    ldp x29, x9, [x10], #16
    ldr x30, [x10]
    mov sp, x9
    ret
"#
);
