//! BCM2837 (Raspberry Pi 3B) physical register map and memory layout.
//!
//! Guests see the peripheral block at the same guest-physical addresses
//! it occupies on real hardware, so these constants serve double duty:
//! the physical driver pokes them through [`Hardware`] and the board
//! emulation matches trapped guest accesses against them.
//!
//! [`Hardware`]: crate::hardware::Hardware

/// Base of the memory-mapped peripheral block.
pub const DEVICE_BASE: u64 = 0x3F00_0000;
/// Total addressable RAM on the board.
pub const PHYS_MEMORY_SIZE: u64 = 0x4000_0000;
/// 2 MiB block-mapping granularity of the boot-time identity map.
pub const SECTION_SIZE: u64 = 0x0020_0000;
/// First page the page pool may hand out; everything below is the
/// hypervisor image and boot stacks.
pub const LOW_MEMORY: u64 = 2 * SECTION_SIZE;
/// Pages managed by the board's page pool.
pub const PAGING_PAGES: usize = ((DEVICE_BASE - LOW_MEMORY) / crate::PAGE_SIZE) as usize;

// Interrupt controller.
pub const IRQ_BASIC_PENDING: u64 = DEVICE_BASE + 0xB200;
pub const IRQ_PENDING_1: u64 = DEVICE_BASE + 0xB204;
pub const IRQ_PENDING_2: u64 = DEVICE_BASE + 0xB208;
pub const FIQ_CONTROL: u64 = DEVICE_BASE + 0xB20C;
pub const ENABLE_IRQS_1: u64 = DEVICE_BASE + 0xB210;
pub const ENABLE_IRQS_2: u64 = DEVICE_BASE + 0xB214;
pub const ENABLE_BASIC_IRQS: u64 = DEVICE_BASE + 0xB218;
pub const DISABLE_IRQS_1: u64 = DEVICE_BASE + 0xB21C;
pub const DISABLE_IRQS_2: u64 = DEVICE_BASE + 0xB220;
pub const DISABLE_BASIC_IRQS: u64 = DEVICE_BASE + 0xB224;

pub const SYSTEM_TIMER_IRQ_1: u32 = 1 << 1;
pub const SYSTEM_TIMER_IRQ_3: u32 = 1 << 3;
pub const AUX_IRQ_BIT: u32 = 1 << 29;

// System timer.
pub const TIMER_CS: u64 = DEVICE_BASE + 0x3000;
pub const TIMER_CLO: u64 = DEVICE_BASE + 0x3004;
pub const TIMER_CHI: u64 = DEVICE_BASE + 0x3008;
pub const TIMER_C0: u64 = DEVICE_BASE + 0x300C;
pub const TIMER_C1: u64 = DEVICE_BASE + 0x3010;
pub const TIMER_C2: u64 = DEVICE_BASE + 0x3014;
pub const TIMER_C3: u64 = DEVICE_BASE + 0x3018;

pub const TIMER_CS_M1: u32 = 1 << 1;
pub const TIMER_CS_M3: u32 = 1 << 3;

// AUX block (mini UART).
pub const AUX_IRQ: u64 = DEVICE_BASE + 0x21_5000;
pub const AUX_ENABLES: u64 = DEVICE_BASE + 0x21_5004;
pub const AUX_MU_IO_REG: u64 = DEVICE_BASE + 0x21_5040;
pub const AUX_MU_IER_REG: u64 = DEVICE_BASE + 0x21_5044;
pub const AUX_MU_IIR_REG: u64 = DEVICE_BASE + 0x21_5048;
pub const AUX_MU_LCR_REG: u64 = DEVICE_BASE + 0x21_504C;
pub const AUX_MU_MCR_REG: u64 = DEVICE_BASE + 0x21_5050;
pub const AUX_MU_LSR_REG: u64 = DEVICE_BASE + 0x21_5054;
pub const AUX_MU_MSR_REG: u64 = DEVICE_BASE + 0x21_5058;
pub const AUX_MU_SCRATCH: u64 = DEVICE_BASE + 0x21_505C;
pub const AUX_MU_CNTL_REG: u64 = DEVICE_BASE + 0x21_5060;
pub const AUX_MU_STAT_REG: u64 = DEVICE_BASE + 0x21_5064;
pub const AUX_MU_BAUD_REG: u64 = DEVICE_BASE + 0x21_5068;

// GPIO function select / pull-up-down, used to route the mini UART pins.
pub const GPFSEL0: u64 = DEVICE_BASE + 0x20_0000;
pub const GPFSEL1: u64 = DEVICE_BASE + 0x20_0004;
pub const GPPUD: u64 = DEVICE_BASE + 0x20_0094;
pub const GPPUDCLK0: u64 = DEVICE_BASE + 0x20_0098;
pub const GPPUDCLK1: u64 = DEVICE_BASE + 0x20_009C;

// VideoCore mailbox.
pub const VIDEOCORE_MBOX: u64 = DEVICE_BASE + 0xB880;
pub const MBOX_READ: u64 = VIDEOCORE_MBOX;
pub const MBOX_POLL: u64 = VIDEOCORE_MBOX + 0x10;
pub const MBOX_SENDER: u64 = VIDEOCORE_MBOX + 0x14;
pub const MBOX_STATUS: u64 = VIDEOCORE_MBOX + 0x18;
pub const MBOX_CONFIG: u64 = VIDEOCORE_MBOX + 0x1C;
pub const MBOX_WRITE: u64 = VIDEOCORE_MBOX + 0x20;

/// Peripherals appear on the VideoCore bus at an alias of their
/// physical address.
#[inline]
pub const fn bus_to_phys(bus: u64) -> u64 {
    bus & !0xC000_0000
}

/// Inverse of [`bus_to_phys`].
#[inline]
pub const fn phys_to_bus(phys: u64) -> u64 {
    phys | 0xC000_0000
}
