//! Console multiplexer.
//!
//! One physical serial line is shared by the hypervisor and every
//! guest. Console 0 is the hypervisor's own shell; console `n` is
//! VM `n - 1`. While a VM is selected, input bytes flow into its
//! receive queue and output it has queued is drained back to the physical
//! line; while the shell is selected, input is handed to the operator
//! front-end untouched. An escape prefix (`@`) steals the next byte
//! for the multiplexer: a digit selects a console, `l` lists the VMs,
//! a second `@` delivers a literal `@`.

use crate::board::Board;
use crate::task::TaskManager;
use hal::Hardware;

/// What [`ConsoleMux::receive`] did with a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxEvent {
    /// Byte belongs to the hypervisor shell.
    Shell(u8),
    /// Byte queued on the selected VM's receive line.
    Forwarded,
    /// Byte dropped: the VM's receive queue is full.
    Dropped,
    /// Escape prefix consumed; next byte is a command.
    Escape,
    /// Console switched: 0 is the shell, `n` is VM `n - 1`.
    Switched(usize),
    /// VM list printed.
    Listed,
    /// Unrecognized escape command.
    Ignored,
}

pub struct ConsoleMux {
    /// 0 selects the hypervisor shell; `n` forwards to VM `n - 1`.
    selected: usize,
    escaped: bool,
}

impl ConsoleMux {
    pub const fn new() -> Self {
        Self {
            selected: 0,
            escaped: false,
        }
    }

    /// Currently selected console: 0 is the shell, `n` is VM `n - 1`.
    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Feed one byte of operator input through the escape machine.
    pub fn receive<B: Board>(
        &mut self,
        hw: &dyn Hardware,
        tm: &mut TaskManager<B>,
        byte: u8,
    ) -> MuxEvent {
        if self.escaped {
            self.escaped = false;
            return match byte {
                b'0'..=b'9' => self.select(hw, tm, (byte - b'0') as usize),
                b'l' => {
                    self.print_vm_list(tm);
                    MuxEvent::Listed
                }
                b'@' => self.deliver(hw, tm, b'@'),
                _ => MuxEvent::Ignored,
            };
        }
        if byte == b'@' {
            self.escaped = true;
            return MuxEvent::Escape;
        }
        self.deliver(hw, tm, byte)
    }

    /// Point the console at `target`: 0 for the shell, `n` for
    /// VM `n - 1`. Output the VM queued while it was off-console is
    /// flushed immediately.
    pub fn select<B: Board>(
        &mut self,
        hw: &dyn Hardware,
        tm: &mut TaskManager<B>,
        target: usize,
    ) -> MuxEvent {
        if target > tm.vm_count() {
            return MuxEvent::Ignored;
        }
        self.selected = target;
        self.flush(hw, tm);
        MuxEvent::Switched(target)
    }

    /// Drain the selected VM's pending output to the physical line.
    /// No-op while the shell is selected; the shell prints directly.
    pub fn flush<B: Board>(&mut self, hw: &dyn Hardware, tm: &mut TaskManager<B>) {
        if let Some(id) = self.selected.checked_sub(1) {
            if let Some(vm) = tm.vm_mut(id) {
                while let Some(byte) = vm.console_out.dequeue() {
                    hw.console_putc(byte);
                }
            }
        }
    }

    fn deliver<B: Board>(
        &mut self,
        hw: &dyn Hardware,
        tm: &mut TaskManager<B>,
        byte: u8,
    ) -> MuxEvent {
        let id = match self.selected.checked_sub(1) {
            Some(id) => id,
            None => return MuxEvent::Shell(byte),
        };
        if tm.queue_input(hw, id, byte) {
            // Fresh input may raise the virtual UART interrupt of the
            // running guest.
            tm.refresh_interrupts(hw);
            MuxEvent::Forwarded
        } else {
            MuxEvent::Dropped
        }
    }

    fn print_vm_list<B: Board>(&self, tm: &TaskManager<B>) {
        hal::println!();
        for vm in tm.vms() {
            hal::println!(
                "{} vm{} [{}] prio={} aborts={} mmio={}r/{}w pages={}",
                if vm.id + 1 == self.selected { '*' } else { ' ' },
                vm.id,
                vm.name,
                vm.priority,
                vm.stats.data_aborts,
                vm.stats.mmio_reads,
                vm.stats.mmio_writes,
                vm.stats.pages_mapped,
            );
        }
    }
}

impl Default for ConsoleMux {
    fn default() -> Self {
        Self::new()
    }
}
