//! Emulated BCM2836/7 system timer.
//!
//! Each guest sees its own free-running counter, derived from the
//! physical one minus the time the guest spent off the CPU, so a
//! guest's clock only advances while it runs. Compare channels are
//! virtual: a write arms the channel, and the hypervisor re-arms the
//! physical channel 3 to fire when the soonest virtual compare would,
//! then turns that physical interrupt back into sticky match bits in
//! the guest's `TIMER_CS`.

use hal::raspi3::{TIMER_C0, TIMER_C1, TIMER_C2, TIMER_C3, TIMER_CHI, TIMER_CLO, TIMER_CS};
use hal::{Hardware, Pa};

/// Never arm the physical compare closer than this many ticks out, or
/// the interrupt fires before the handler has returned.
pub const MIN_EXPIRE: u32 = 10_000;

#[derive(Debug, Default)]
pub struct SysTimer {
    /// Sticky match bits, write-1-to-clear by the guest.
    cs: u32,
    compare: [u32; 4],
    armed: [bool; 4],
    /// Physical ticks that elapsed while this guest was off the CPU.
    offset: u64,
    /// Physical count at the moment the guest was descheduled.
    left_at: Option<u64>,
}

impl SysTimer {
    fn virtual_now(&self, hw: &dyn Hardware) -> u64 {
        hw.timer_count() - self.offset
    }

    pub fn read(&self, hw: &dyn Hardware, addr: u64) -> u32 {
        match addr {
            TIMER_CS => self.cs,
            TIMER_CLO => self.virtual_now(hw) as u32,
            TIMER_CHI => (self.virtual_now(hw) >> 32) as u32,
            TIMER_C0 => self.compare[0],
            TIMER_C1 => self.compare[1],
            TIMER_C2 => self.compare[2],
            TIMER_C3 => self.compare[3],
            _ => 0,
        }
    }

    pub fn write(&mut self, hw: &dyn Hardware, addr: u64, value: u32) {
        match addr {
            TIMER_CS => self.cs &= !value,
            TIMER_C0 | TIMER_C1 | TIMER_C2 | TIMER_C3 => {
                let channel = ((addr - TIMER_C0) / 4) as usize;
                self.compare[channel] = value;
                self.armed[channel] = true;
                self.rearm_physical(hw);
            }
            _ => {}
        }
    }

    /// Latch any virtual compare the clock has run past into `CS`.
    pub fn check_matches(&mut self, hw: &dyn Hardware) {
        let now = self.virtual_now(hw) as u32;
        for channel in 0..4 {
            if self.armed[channel] && now.wrapping_sub(self.compare[channel]) < u32::MAX / 2 {
                self.cs |= 1 << channel;
                self.armed[channel] = false;
            }
        }
    }

    /// Point the physical channel 3 at the soonest armed virtual
    /// compare.
    pub fn rearm_physical(&self, hw: &dyn Hardware) {
        let now = self.virtual_now(hw) as u32;
        let soonest = (0..4)
            .filter(|&n| self.armed[n])
            .map(|n| self.compare[n].wrapping_sub(now))
            .min();
        if let Some(remaining) = soonest {
            let expire = remaining.max(MIN_EXPIRE);
            let phys_now = hw.read32(Pa::new(TIMER_CLO));
            hw.write32(Pa::new(TIMER_C3), phys_now.wrapping_add(expire));
        }
    }

    /// The guest is coming on CPU: account the time it was away and
    /// refresh the compare machinery.
    pub fn entering_vm(&mut self, hw: &dyn Hardware) {
        if let Some(left_at) = self.left_at.take() {
            self.offset += hw.timer_count() - left_at;
        }
        self.check_matches(hw);
        self.rearm_physical(hw);
    }

    /// The guest is going off CPU: freeze its clock.
    pub fn leaving_vm(&mut self, hw: &dyn Hardware) {
        self.left_at = Some(hw.timer_count());
    }

    /// Match bits as interrupt sources (IRQ lines 0 to 3).
    pub fn irq_bits(&self) -> u32 {
        self.cs & 0xF
    }
}
