//! Emulated AUX mini UART.
//!
//! The virtual serial line is the pair of per-VM byte queues owned by
//! the task: the receive queue is filled by the console multiplexer,
//! the transmit queue is drained by it. This model translates the
//! guest's register accesses into queue operations and derives every
//! status register from the live queue state, so nothing here can go
//! stale.
//!
//! The block is dead until the guest sets bit 0 of `AUX_ENABLES`;
//! while disabled, data reads return zero and writes are discarded.

use fifo::ConsoleFifo;
use hal::raspi3::{
    AUX_ENABLES, AUX_IRQ, AUX_MU_BAUD_REG, AUX_MU_CNTL_REG, AUX_MU_IER_REG, AUX_MU_IIR_REG,
    AUX_MU_IO_REG, AUX_MU_LCR_REG, AUX_MU_LSR_REG, AUX_MU_MCR_REG, AUX_MU_MSR_REG, AUX_MU_SCRATCH,
    AUX_MU_STAT_REG,
};

const ENABLE_MINI_UART: u32 = 1 << 0;
/// Divisor latch access bit: while set, the IO and IER registers
/// address the baud divisor instead.
const LCR_DLAB: u32 = 1 << 7;

const IER_RX: u32 = 1 << 0;
const IER_TX: u32 = 1 << 1;

const LSR_DATA_READY: u32 = 1 << 0;
const LSR_RX_OVERRUN: u32 = 1 << 1;
const LSR_TX_EMPTY: u32 = 1 << 5;
const LSR_TX_IDLE: u32 = 1 << 6;

const STAT_RX_OVERRUN: u32 = 1 << 4;

#[derive(Debug, Default)]
pub struct MiniUart {
    enables: u32,
    ier: u32,
    lcr: u32,
    mcr: u32,
    cntl: u32,
    scratch: u32,
    baud: u32,
    /// A receive byte was lost to a full queue. Reading LSR clears it.
    overrun: bool,
}

impl MiniUart {
    fn enabled(&self) -> bool {
        self.enables & ENABLE_MINI_UART != 0
    }

    fn dlab(&self) -> bool {
        self.lcr & LCR_DLAB != 0
    }

    pub fn read(&mut self, addr: u64, rx: &mut ConsoleFifo, tx: &ConsoleFifo) -> u32 {
        match addr {
            AUX_IRQ => {
                if self.irq_pending(rx) {
                    1
                } else {
                    0
                }
            }
            AUX_ENABLES => self.enables,
            AUX_MU_IO_REG => {
                if self.dlab() {
                    // Touching the low divisor byte ends the latch
                    // sequence.
                    self.lcr &= !LCR_DLAB;
                    self.baud & 0xFF
                } else if self.enabled() {
                    rx.dequeue().unwrap_or(0) as u32
                } else {
                    0
                }
            }
            AUX_MU_IER_REG => {
                if self.dlab() {
                    (self.baud >> 8) & 0xFF
                } else {
                    self.ier
                }
            }
            AUX_MU_IIR_REG => {
                if self.enabled() && self.ier & IER_RX != 0 && !rx.is_empty() {
                    0b100
                } else if self.enabled() && self.ier & IER_TX != 0 {
                    0b010
                } else {
                    0b001
                }
            }
            AUX_MU_LCR_REG => self.lcr,
            AUX_MU_MCR_REG => self.mcr,
            AUX_MU_LSR_REG => {
                let mut lsr = 0;
                if !rx.is_empty() {
                    lsr |= LSR_DATA_READY;
                }
                if self.overrun {
                    lsr |= LSR_RX_OVERRUN;
                    self.overrun = false;
                }
                if !tx.is_full() {
                    lsr |= LSR_TX_EMPTY;
                }
                if tx.is_empty() {
                    lsr |= LSR_TX_IDLE;
                }
                lsr
            }
            AUX_MU_MSR_REG => 0,
            AUX_MU_SCRATCH => self.scratch,
            AUX_MU_CNTL_REG => self.cntl,
            AUX_MU_STAT_REG => {
                let mut stat = 0;
                if !rx.is_empty() {
                    stat |= 1 << 0;
                }
                if !tx.is_full() {
                    stat |= 1 << 1;
                }
                if self.overrun {
                    stat |= STAT_RX_OVERRUN;
                }
                if tx.is_empty() {
                    stat |= 1 << 9;
                }
                stat |= ((rx.used().min(8) as u32) & 0xF) << 16;
                stat |= ((tx.used().min(8) as u32) & 0xF) << 24;
                stat
            }
            AUX_MU_BAUD_REG => self.baud,
            _ => 0,
        }
    }

    pub fn write(&mut self, addr: u64, value: u32, rx: &mut ConsoleFifo, tx: &mut ConsoleFifo) {
        match addr {
            AUX_ENABLES => {
                self.enables = value;
                if !self.enabled() {
                    rx.clear();
                    tx.clear();
                }
            }
            AUX_MU_IO_REG => {
                if self.dlab() {
                    self.baud = (self.baud & !0xFF) | (value & 0xFF);
                    self.lcr &= !LCR_DLAB;
                } else if self.enabled() {
                    // A full transmit queue drops the byte, like an
                    // overrun on the wire.
                    let _ = tx.enqueue(value as u8);
                }
            }
            AUX_MU_IER_REG => {
                if self.dlab() {
                    self.baud = (self.baud & !0xFF00) | ((value & 0xFF) << 8);
                } else {
                    self.ier = value & 0x3;
                }
            }
            AUX_MU_IIR_REG => {
                // FIFO clear bits.
                if value & 0b010 != 0 {
                    rx.clear();
                }
                if value & 0b100 != 0 {
                    tx.clear();
                }
            }
            AUX_MU_LCR_REG => self.lcr = value,
            AUX_MU_MCR_REG => self.mcr = value,
            AUX_MU_SCRATCH => self.scratch = value,
            AUX_MU_CNTL_REG => self.cntl = value,
            AUX_MU_BAUD_REG => self.baud = value & 0xFFFF,
            _ => {}
        }
    }

    /// Deliver one received byte, latching the overrun flag when the
    /// queue is full and the byte is lost.
    pub fn push_rx(&mut self, rx: &mut ConsoleFifo, byte: u8) -> bool {
        if rx.enqueue(byte).is_ok() {
            true
        } else {
            self.overrun = true;
            false
        }
    }

    /// Whether the mini UART is pulling the AUX interrupt line.
    pub fn irq_pending(&self, rx: &ConsoleFifo) -> bool {
        if !self.enabled() {
            return false;
        }
        (self.ier & IER_RX != 0 && !rx.is_empty()) || self.ier & IER_TX != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queues() -> (ConsoleFifo, ConsoleFifo) {
        (ConsoleFifo::new(), ConsoleFifo::new())
    }

    #[test]
    fn disabled_uart_is_inert() {
        let (mut rx, mut tx) = queues();
        let mut uart = MiniUart::default();
        rx.enqueue(b'x').unwrap();

        uart.write(AUX_MU_IO_REG, b'y' as u32, &mut rx, &mut tx);
        assert!(tx.is_empty());
        assert_eq!(uart.read(AUX_MU_IO_REG, &mut rx, &tx), 0);
        // The queued byte was not consumed by the dead block...
        assert_eq!(rx.used(), 1);
        // ...but writing ENABLES with the enable bit clear flushes it.
        uart.write(AUX_ENABLES, 0, &mut rx, &mut tx);
        assert!(rx.is_empty());
    }

    #[test]
    fn io_round_trips_through_queues() {
        let (mut rx, mut tx) = queues();
        let mut uart = MiniUart::default();
        uart.write(AUX_ENABLES, 1, &mut rx, &mut tx);

        rx.enqueue(b'a').unwrap();
        assert_eq!(uart.read(AUX_MU_IO_REG, &mut rx, &tx), b'a' as u32);
        assert_eq!(uart.read(AUX_MU_IO_REG, &mut rx, &tx), 0);

        uart.write(AUX_MU_IO_REG, b'b' as u32, &mut rx, &mut tx);
        assert_eq!(tx.dequeue(), Some(b'b'));
    }

    #[test]
    fn dlab_redirects_io_and_ier_to_the_divisor() {
        let (mut rx, mut tx) = queues();
        let mut uart = MiniUart::default();
        uart.write(AUX_ENABLES, 1, &mut rx, &mut tx);
        rx.enqueue(b'q').unwrap();

        uart.write(AUX_MU_LCR_REG, LCR_DLAB, &mut rx, &mut tx);
        uart.write(AUX_MU_IER_REG, 0x01, &mut rx, &mut tx);
        uart.write(AUX_MU_IO_REG, 0x0E, &mut rx, &mut tx);
        assert_eq!(uart.read(AUX_MU_BAUD_REG, &mut rx, &tx), 0x010E);
        // The data byte is still queued: DLAB accesses never touch it.
        assert_eq!(rx.used(), 1);

        // The low-byte access dropped DLAB by itself; IO and IER are
        // back to data and interrupt-enable duty.
        assert_eq!(uart.read(AUX_MU_LCR_REG, &mut rx, &tx) & LCR_DLAB, 0);
        assert_eq!(uart.read(AUX_MU_IO_REG, &mut rx, &tx), b'q' as u32);
        // IER was not clobbered by the divisor write.
        assert_eq!(uart.read(AUX_MU_IER_REG, &mut rx, &tx), 0);
    }

    #[test]
    fn reading_the_low_divisor_byte_also_clears_dlab() {
        let (mut rx, mut tx) = queues();
        let mut uart = MiniUart::default();
        uart.write(AUX_ENABLES, 1, &mut rx, &mut tx);
        uart.write(AUX_MU_BAUD_REG, 0x270, &mut rx, &mut tx);

        uart.write(AUX_MU_LCR_REG, LCR_DLAB, &mut rx, &mut tx);
        assert_eq!(uart.read(AUX_MU_IO_REG, &mut rx, &tx), 0x70);
        assert_eq!(uart.read(AUX_MU_LCR_REG, &mut rx, &tx) & LCR_DLAB, 0);
    }

    #[test]
    fn lsr_tracks_queue_levels() {
        let (mut rx, mut tx) = queues();
        let mut uart = MiniUart::default();
        uart.write(AUX_ENABLES, 1, &mut rx, &mut tx);

        assert_eq!(
            uart.read(AUX_MU_LSR_REG, &mut rx, &tx),
            LSR_TX_EMPTY | LSR_TX_IDLE
        );
        rx.enqueue(b'x').unwrap();
        tx.enqueue(b'y').unwrap();
        assert_eq!(
            uart.read(AUX_MU_LSR_REG, &mut rx, &tx),
            LSR_DATA_READY | LSR_TX_EMPTY
        );
    }

    #[test]
    fn lost_rx_byte_latches_the_overrun_bit() {
        let (mut rx, mut tx) = queues();
        let mut uart = MiniUart::default();
        uart.write(AUX_ENABLES, 1, &mut rx, &mut tx);

        while uart.push_rx(&mut rx, b'x') {}
        assert_eq!(
            uart.read(AUX_MU_STAT_REG, &mut rx, &tx) & STAT_RX_OVERRUN,
            STAT_RX_OVERRUN
        );
        let lsr = uart.read(AUX_MU_LSR_REG, &mut rx, &tx);
        assert_eq!(lsr & LSR_RX_OVERRUN, LSR_RX_OVERRUN);
        // Reading LSR acknowledged the overrun.
        assert_eq!(
            uart.read(AUX_MU_LSR_REG, &mut rx, &tx) & LSR_RX_OVERRUN,
            0
        );
    }

    #[test]
    fn rx_interrupt_follows_queue_and_enable() {
        let (mut rx, mut tx) = queues();
        let mut uart = MiniUart::default();
        uart.write(AUX_ENABLES, 1, &mut rx, &mut tx);
        uart.write(AUX_MU_IER_REG, IER_RX, &mut rx, &mut tx);

        assert!(!uart.irq_pending(&rx));
        rx.enqueue(b'x').unwrap();
        assert!(uart.irq_pending(&rx));
        assert_eq!(uart.read(AUX_MU_IIR_REG, &mut rx, &tx), 0b100);

        // Draining the queue drops the line.
        uart.read(AUX_MU_IO_REG, &mut rx, &tx);
        assert!(!uart.irq_pending(&rx));
        assert_eq!(uart.read(AUX_MU_IIR_REG, &mut rx, &tx), 0b001);
    }
}
