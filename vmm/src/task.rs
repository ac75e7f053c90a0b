//! VM lifecycle and time-slicing.
//!
//! Every guest is a task: a stage-2 address space, a saved trap frame,
//! a snapshot of the EL1 system registers and a callee-saved switch
//! frame. The [`TaskManager`] owns all of them plus the switch frame
//! of the hypervisor's own boot thread, and rotates the CPU between
//! the guests round-robin, one slice per `priority` scheduler ticks.

use crate::board::Board;
use crate::error::Error;
use crate::mm::PagePool;
use crate::stage2::AddressSpace;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use fifo::ConsoleFifo;
use hal::{CpuContext, CpuSysRegs, Hardware, PAGE_SIZE};

/// Hard cap on simultaneously defined VMs.
pub const MAX_VMS: usize = 64;

/// Saved PSTATE: EL1 using SP_EL1.
pub const PSR_MODE_EL1H: u64 = 0b0101;
/// D, A, I and F masked.
pub const PSR_DAIF_MASK: u64 = 0xF << 6;

/// Trap frame: the guest's general-purpose state at the moment of an
/// exception. Layout is shared with the EL2 entry stubs.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PtRegs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

impl PtRegs {
    pub const fn new() -> Self {
        Self {
            regs: [0; 31],
            sp: 0,
            pc: 0,
            pstate: 0,
        }
    }
}

impl Default for PtRegs {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-VM event counters, reported by the console's list command.
#[derive(Debug, Default, Clone, Copy)]
pub struct VmStats {
    pub data_aborts: u64,
    pub mmio_reads: u64,
    pub mmio_writes: u64,
    pub pages_mapped: u64,
}

/// One guest.
pub struct Vm<D> {
    pub id: usize,
    pub name: String,
    pub context: CpuContext,
    pub pt_regs: PtRegs,
    pub sysregs: CpuSysRegs,
    pub stage2: AddressSpace,
    /// Bytes waiting to be read through the VM's virtual serial line.
    pub console_in: ConsoleFifo,
    /// Bytes the VM wrote, waiting for the operator console.
    pub console_out: ConsoleFifo,
    pub device: D,
    pub priority: u32,
    pub counter: u32,
    pub stats: VmStats,
}

/// A scheduling decision, reported for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// `None` means the hypervisor's boot thread was running.
    pub from: Option<usize>,
    pub to: usize,
}

pub struct TaskManager<B: Board> {
    board: B,
    vms: Vec<Box<Vm<B::Device>>>,
    current: Option<usize>,
    /// Switch frame of the boot thread, live while no VM is on the CPU.
    hv_context: CpuContext,
    /// Reset-time EL1 state, captured once before any guest runs.
    reset_sysregs: Option<CpuSysRegs>,
}

impl<B: Board> TaskManager<B> {
    pub fn new(board: B) -> Self {
        Self {
            board,
            vms: Vec::new(),
            current: None,
            hv_context: CpuContext::new(),
            reset_sysregs: None,
        }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn vm(&self, id: usize) -> Option<&Vm<B::Device>> {
        self.vms.get(id).map(|vm| &**vm)
    }

    pub fn vm_mut(&mut self, id: usize) -> Option<&mut Vm<B::Device>> {
        self.vms.get_mut(id).map(|vm| &mut **vm)
    }

    pub fn vms(&self) -> impl Iterator<Item = &Vm<B::Device>> {
        self.vms.iter().map(|vm| &**vm)
    }

    /// Push one byte of operator input onto a VM's virtual serial line,
    /// through the board model so it can account for lost bytes.
    ///
    /// Returns whether the byte was delivered.
    pub fn queue_input(&mut self, hw: &dyn Hardware, id: usize, byte: u8) -> bool {
        match self.vms.get_mut(id) {
            Some(vm) => self.board.receive_byte(hw, vm, byte),
            None => false,
        }
    }

    /// Define a VM, run `loader` to populate its memory and initial
    /// frame, and leave it ready to be scheduled.
    pub fn create_vm(
        &mut self,
        hw: &dyn Hardware,
        pool: &mut PagePool,
        name: &str,
        priority: u32,
        loader: impl FnOnce(&dyn Hardware, &mut PagePool, &mut Vm<B::Device>) -> Result<(), Error>,
    ) -> Result<usize, Error> {
        if self.vms.len() >= MAX_VMS {
            return Err(Error::TooManyVms);
        }
        let id = self.vms.len();

        // A guest comes out of reset with its stage-1 MMU off and the
        // rest of the EL1 state at the machine's reset values. Captured
        // once, before any guest has run: the live registers belong to
        // whichever guest held the CPU last.
        let sysregs = match self.reset_sysregs {
            Some(regs) => regs,
            None => {
                let mut regs = hw.sysregs_snapshot();
                regs.sctlr_el1 &= !1;
                self.reset_sysregs = Some(regs);
                regs
            }
        };

        let mut pt_regs = PtRegs::new();
        pt_regs.pc = hw.vm_entry_point();
        pt_regs.pstate = PSR_MODE_EL1H | PSR_DAIF_MASK;

        let mut vm = Box::new(Vm {
            id,
            name: String::from(name),
            context: CpuContext::new(),
            pt_regs,
            sysregs,
            stage2: AddressSpace::new(pool)?,
            console_in: ConsoleFifo::new(),
            console_out: ConsoleFifo::new(),
            device: B::Device::default(),
            priority,
            counter: priority,
            stats: VmStats::default(),
        });
        self.board.initialize(hw, pool, &mut vm)?;
        loader(hw, pool, &mut vm)?;

        // EL2 stack for this task plus the launch frame: the stub at
        // `vm_launch_entry` erets from the trap frame `x19` points to.
        let stack = pool.allocate()?;
        vm.context.sp = stack.into_u64() + PAGE_SIZE;
        vm.context.pc = hw.vm_launch_entry();
        vm.context.x19 = &vm.pt_regs as *const PtRegs as u64;

        self.vms.push(vm);
        Ok(id)
    }

    /// One scheduler tick: burn a slice unit, reschedule when the
    /// current VM's slice is spent.
    pub fn tick(&mut self, hw: &dyn Hardware) -> Option<Switch> {
        if let Some(cur) = self.current {
            let vm = &mut self.vms[cur];
            vm.counter = vm.counter.saturating_sub(1);
            if vm.counter > 0 {
                return None;
            }
        }
        self.schedule(hw)
    }

    /// Pick the next VM round-robin and switch to it.
    pub fn schedule(&mut self, hw: &dyn Hardware) -> Option<Switch> {
        if self.vms.is_empty() {
            return None;
        }
        let next = match self.current {
            Some(cur) => (cur + 1) % self.vms.len(),
            None => 0,
        };
        if Some(next) == self.current {
            // Alone in the system: recharge in place.
            self.vms[next].counter = self.vms[next].priority;
            self.refresh_interrupts(hw);
            return None;
        }
        Some(self.switch_to(hw, next))
    }

    /// Deschedule the current VM (if any) and resume `next`.
    pub fn switch_to(&mut self, hw: &dyn Hardware, next: usize) -> Switch {
        let from = self.current;
        if let Some(cur) = from {
            let vm = &mut self.vms[cur];
            self.board.leaving_vm(hw, vm);
            vm.sysregs = hw.sysregs_snapshot();
        }
        let prev_ctx: *mut CpuContext = match from {
            Some(cur) => &mut self.vms[cur].context,
            None => &mut self.hv_context,
        };
        {
            let vm = &mut self.vms[next];
            self.board.entering_vm(hw, vm);
            hw.restore_sysregs(&vm.sysregs);
            hw.set_stage2_root(vm.stage2.vttbr(vm.id as u8 + 1));
            vm.counter = vm.priority;
        }
        self.current = Some(next);
        self.refresh_interrupts(hw);
        let next_ctx: *const CpuContext = &self.vms[next].context;
        // Both frames live in boxed VMs (or in self), so the raw
        // pointers stay put across the borrows above.
        unsafe { hw.switch_context(prev_ctx, next_ctx) };
        Switch { from, to: next }
    }

    /// Re-derive the current VM's virtual IRQ and FIQ lines from its
    /// board state. Called after every switch and whenever device state
    /// changes under the running VM.
    pub fn refresh_interrupts(&self, hw: &dyn Hardware) {
        if let Some(cur) = self.current {
            let vm = &self.vms[cur];
            hw.set_virtual_interrupts(
                self.board.is_irq_asserted(hw, vm),
                self.board.is_fiq_asserted(hw, vm),
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::loader;
    use hal::mock::MockHardware;
    use hal::{Ipa, Pa};
    use std::cell::RefCell;

    pub(crate) struct NullBoard;

    impl Board for NullBoard {
        type Device = ();

        fn initialize(
            &self,
            _hw: &dyn Hardware,
            _pool: &mut PagePool,
            _vm: &mut Vm<()>,
        ) -> Result<(), Error> {
            Ok(())
        }

        fn mmio_read(
            &self,
            _hw: &dyn Hardware,
            _pool: &mut PagePool,
            _vm: &mut Vm<()>,
            _addr: Ipa,
        ) -> u64 {
            0
        }

        fn mmio_write(
            &self,
            _hw: &dyn Hardware,
            _pool: &mut PagePool,
            _vm: &mut Vm<()>,
            _addr: Ipa,
            _value: u64,
        ) {
        }

        fn entering_vm(&self, _hw: &dyn Hardware, _vm: &mut Vm<()>) {}

        fn leaving_vm(&self, _hw: &dyn Hardware, _vm: &mut Vm<()>) {}

        fn is_irq_asserted(&self, _hw: &dyn Hardware, _vm: &Vm<()>) -> bool {
            false
        }

        fn is_fiq_asserted(&self, _hw: &dyn Hardware, _vm: &Vm<()>) -> bool {
            false
        }
    }

    /// Bare VM for tests exercising pieces below the task manager.
    pub(crate) fn null_vm(pool: &mut PagePool) -> Vm<()> {
        Vm {
            id: 0,
            name: String::from("test"),
            context: CpuContext::new(),
            pt_regs: PtRegs::new(),
            sysregs: CpuSysRegs::default(),
            stage2: AddressSpace::new(pool).unwrap(),
            console_in: ConsoleFifo::new(),
            console_out: ConsoleFifo::new(),
            device: (),
            priority: 1,
            counter: 1,
            stats: VmStats::default(),
        }
    }

    fn setup(pages: usize) -> (MockHardware, PagePool, TaskManager<NullBoard>) {
        (
            MockHardware::new(),
            PagePool::with_arena(Pa::new(0x40_0000), pages),
            TaskManager::new(NullBoard),
        )
    }

    #[test]
    fn create_vm_loads_image_and_clears_mmu_bit() {
        let (hw, mut pool, mut tm) = setup(32);
        let image = [0x13u8, 0x37, 0x00, 0x91];
        let id = tm
            .create_vm(&hw, &mut pool, "guest", 2, loader::raw_image(&image))
            .unwrap();
        let vm = tm.vm(id).unwrap();

        assert_eq!(vm.sysregs.sctlr_el1 & 1, 0);
        assert_eq!(vm.pt_regs.pc, hw.vm_entry_point());
        assert_eq!(vm.pt_regs.pstate, PSR_MODE_EL1H | PSR_DAIF_MASK);

        let pa = vm
            .stage2
            .translate(&pool, Ipa::new(hw.vm_entry_point()))
            .unwrap();
        let loaded = unsafe { core::slice::from_raw_parts(pool.virt(pa), 4) };
        assert_eq!(loaded, &image);
    }

    #[test]
    fn round_robin_after_slice_expires() {
        let (hw, mut pool, mut tm) = setup(64);
        tm.create_vm(&hw, &mut pool, "a", 2, loader::raw_image(&[0u8; 8]))
            .unwrap();
        tm.create_vm(&hw, &mut pool, "b", 2, loader::raw_image(&[0u8; 8]))
            .unwrap();

        assert_eq!(
            tm.schedule(&hw),
            Some(Switch {
                from: None,
                to: 0
            })
        );
        assert_eq!(hw.switch_count(), 1);

        // Priority 2: first tick burns the slice, second expires it.
        assert_eq!(tm.tick(&hw), None);
        assert_eq!(
            tm.tick(&hw),
            Some(Switch {
                from: Some(0),
                to: 1
            })
        );
        assert_eq!(tm.current(), Some(1));
        assert_eq!(hw.switch_count(), 2);
    }

    #[test]
    fn lone_vm_recharges_in_place() {
        let (hw, mut pool, mut tm) = setup(32);
        tm.create_vm(&hw, &mut pool, "solo", 3, loader::raw_image(&[0u8; 8]))
            .unwrap();
        tm.schedule(&hw);
        for _ in 0..3 {
            let _ = tm.tick(&hw);
        }
        assert_eq!(tm.current(), Some(0));
        assert_eq!(tm.vm(0).unwrap().counter, 3);
        assert_eq!(hw.switch_count(), 1);
    }

    #[test]
    fn switch_installs_guest_state() {
        let (hw, mut pool, mut tm) = setup(32);
        let id = tm
            .create_vm(&hw, &mut pool, "guest", 1, loader::raw_image(&[0u8; 8]))
            .unwrap();
        tm.schedule(&hw);

        // The mock machine now carries the guest's EL1 state and
        // stage-2 root.
        assert_eq!(hw.sysregs_snapshot().sctlr_el1 & 1, 0);
        let vm = tm.vm(id).unwrap();
        assert_eq!(hw.vttbr(), vm.stage2.vttbr(id as u8 + 1));
    }

    #[test]
    fn vm_table_is_bounded() {
        let (hw, mut pool, mut tm) = setup(512);
        for i in 0..MAX_VMS {
            tm.create_vm(&hw, &mut pool, "vm", 1, loader::raw_image(&[0u8; 8]))
                .unwrap_or_else(|e| panic!("vm {} failed: {:?}", i, e));
        }
        assert_eq!(
            tm.create_vm(&hw, &mut pool, "overflow", 1, loader::raw_image(&[0u8; 8])),
            Err(Error::TooManyVms)
        );
    }

    #[test]
    fn later_vms_get_reset_sysregs_not_live_guest_state() {
        let (hw, mut pool, mut tm) = setup(64);
        tm.create_vm(&hw, &mut pool, "a", 1, loader::raw_image(&[0u8; 8]))
            .unwrap();
        tm.schedule(&hw);

        // The running guest repoints its translation base; the live
        // registers no longer look anything like reset state.
        let mut live = hw.sysregs_snapshot();
        live.ttbr0_el1 = 0xDEAD_0000;
        live.sctlr_el1 |= 1;
        hw.restore_sysregs(&live);

        tm.create_vm(&hw, &mut pool, "b", 1, loader::raw_image(&[0u8; 8]))
            .unwrap();
        let fresh = &tm.vm(1).unwrap().sysregs;
        assert_eq!(fresh.ttbr0_el1, tm.vm(0).unwrap().sysregs.ttbr0_el1);
        assert_ne!(fresh.ttbr0_el1, 0xDEAD_0000);
        assert_eq!(fresh.sctlr_el1 & 1, 0);
    }

    #[test]
    fn loader_callback_shapes_the_initial_frame() {
        let (hw, mut pool, mut tm) = setup(32);
        let image = [0x55u8; 8];
        let id = tm
            .create_vm(
                &hw,
                &mut pool,
                "custom",
                1,
                |_hw: &dyn Hardware, pool: &mut PagePool, vm: &mut Vm<()>| {
                    loader::load_raw(pool, vm, &image, Ipa::new(0x10_0000))?;
                    vm.pt_regs.pc = 0x10_0000;
                    vm.pt_regs.regs[0] = 0x100;
                    Ok(())
                },
            )
            .unwrap();

        let vm = tm.vm(id).unwrap();
        assert_eq!(vm.pt_regs.pc, 0x10_0000);
        assert_eq!(vm.pt_regs.regs[0], 0x100);
        assert!(vm.stage2.translate(&pool, Ipa::new(0x10_0000)).is_some());
    }

    #[test]
    fn failing_loader_aborts_creation() {
        let (hw, mut pool, mut tm) = setup(32);
        let result = tm.create_vm(
            &hw,
            &mut pool,
            "broken",
            1,
            |_hw: &dyn Hardware, _pool: &mut PagePool, _vm: &mut Vm<()>| {
                Err(Error::ImageTooLarge)
            },
        );
        assert_eq!(result, Err(Error::ImageTooLarge));
        assert_eq!(tm.vm_count(), 0);
    }

    struct HookBoard {
        log: RefCell<Vec<(&'static str, usize)>>,
    }

    impl Board for HookBoard {
        type Device = ();

        fn initialize(
            &self,
            _hw: &dyn Hardware,
            _pool: &mut PagePool,
            _vm: &mut Vm<()>,
        ) -> Result<(), Error> {
            Ok(())
        }

        fn mmio_read(
            &self,
            _hw: &dyn Hardware,
            _pool: &mut PagePool,
            _vm: &mut Vm<()>,
            _addr: Ipa,
        ) -> u64 {
            0
        }

        fn mmio_write(
            &self,
            _hw: &dyn Hardware,
            _pool: &mut PagePool,
            _vm: &mut Vm<()>,
            _addr: Ipa,
            _value: u64,
        ) {
        }

        fn entering_vm(&self, _hw: &dyn Hardware, vm: &mut Vm<()>) {
            self.log.borrow_mut().push(("enter", vm.id));
        }

        fn leaving_vm(&self, _hw: &dyn Hardware, vm: &mut Vm<()>) {
            self.log.borrow_mut().push(("leave", vm.id));
        }

        fn is_irq_asserted(&self, _hw: &dyn Hardware, _vm: &Vm<()>) -> bool {
            false
        }

        fn is_fiq_asserted(&self, _hw: &dyn Hardware, _vm: &Vm<()>) -> bool {
            false
        }
    }

    #[test]
    fn hooks_bracket_every_switch_in_rotation_order() {
        let hw = MockHardware::new();
        let mut pool = PagePool::with_arena(Pa::new(0x40_0000), 64);
        let mut tm = TaskManager::new(HookBoard {
            log: RefCell::new(Vec::new()),
        });
        for name in ["a", "b", "c"] {
            tm.create_vm(&hw, &mut pool, name, 1, loader::raw_image(&[0u8; 8]))
                .unwrap();
        }

        tm.schedule(&hw);
        for _ in 0..10 {
            tm.tick(&hw);
        }

        let log = tm.board().log.borrow();
        // First entry has nothing to leave.
        assert_eq!(log[0], ("enter", 0));
        // Priority 1: every tick expires the slice, so the rotation is
        // strict 0 -> 1 -> 2 -> 0 with a leave/enter pair per tick,
        // never skipping or repeating a VM.
        assert_eq!(log.len(), 21);
        for (i, pair) in log[1..].chunks(2).enumerate() {
            assert_eq!(pair, [("leave", i % 3), ("enter", (i + 1) % 3)]);
        }
    }
}
