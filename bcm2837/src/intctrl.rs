//! Emulated BCM2837 interrupt controller.
//!
//! Only the enable and FIQ-select registers are real state. Pending
//! registers are derived on every read from the live device sources,
//! the same way the silicon wires them, so there is no pending bit to
//! keep coherent.

use hal::raspi3::{
    DISABLE_BASIC_IRQS, DISABLE_IRQS_1, DISABLE_IRQS_2, ENABLE_BASIC_IRQS, ENABLE_IRQS_1,
    ENABLE_IRQS_2, FIQ_CONTROL, IRQ_BASIC_PENDING, IRQ_PENDING_1, IRQ_PENDING_2,
};

const FIQ_ENABLE: u32 = 1 << 7;
const FIQ_SOURCE_MASK: u32 = 0x7F;

/// Current interrupt source levels, as the controller's inputs see
/// them.
#[derive(Debug, Clone, Copy, Default)]
pub struct IrqSources {
    pub pending_1: u32,
    pub pending_2: u32,
    pub basic: u32,
}

#[derive(Debug, Default)]
pub struct IntCtrl {
    enable_1: u32,
    enable_2: u32,
    enable_basic: u32,
    fiq_control: u32,
}

impl IntCtrl {
    pub fn read(&self, addr: u64, sources: IrqSources) -> u32 {
        match addr {
            IRQ_PENDING_1 => self.enable_1 & sources.pending_1,
            IRQ_PENDING_2 => self.enable_2 & sources.pending_2,
            IRQ_BASIC_PENDING => {
                let mut pending = self.enable_basic & sources.basic;
                if self.enable_1 & sources.pending_1 != 0 {
                    pending |= 1 << 8;
                }
                if self.enable_2 & sources.pending_2 != 0 {
                    pending |= 1 << 9;
                }
                pending
            }
            FIQ_CONTROL => self.fiq_control,
            ENABLE_IRQS_1 => self.enable_1,
            ENABLE_IRQS_2 => self.enable_2,
            ENABLE_BASIC_IRQS => self.enable_basic,
            // The disable registers read back as the masked-off lines.
            DISABLE_IRQS_1 => !self.enable_1,
            DISABLE_IRQS_2 => !self.enable_2,
            DISABLE_BASIC_IRQS => !self.enable_basic,
            _ => 0,
        }
    }

    pub fn write(&mut self, addr: u64, value: u32) {
        match addr {
            ENABLE_IRQS_1 => self.enable_1 |= value,
            ENABLE_IRQS_2 => self.enable_2 |= value,
            ENABLE_BASIC_IRQS => self.enable_basic |= value,
            DISABLE_IRQS_1 => self.enable_1 &= !value,
            DISABLE_IRQS_2 => self.enable_2 &= !value,
            DISABLE_BASIC_IRQS => self.enable_basic &= !value,
            FIQ_CONTROL => self.fiq_control = value,
            _ => {}
        }
    }

    /// Whether any enabled IRQ source is high.
    pub fn irq_asserted(&self, sources: IrqSources) -> bool {
        self.enable_1 & sources.pending_1 != 0
            || self.enable_2 & sources.pending_2 != 0
            || self.enable_basic & sources.basic != 0
    }

    /// Whether the FIQ routing selects a source that is currently high.
    ///
    /// A source routed to FIQ fires regardless of the IRQ enable bits.
    pub fn fiq_asserted(&self, sources: IrqSources) -> bool {
        if self.fiq_control & FIQ_ENABLE == 0 {
            return false;
        }
        let source = self.fiq_control & FIQ_SOURCE_MASK;
        match source {
            0..=31 => sources.pending_1 & (1 << source) != 0,
            32..=63 => sources.pending_2 & (1 << (source - 32)) != 0,
            64..=71 => sources.basic & (1 << (source - 64)) != 0,
            _ => false,
        }
    }
}
