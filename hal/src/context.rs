//! Saved CPU state.
//!
//! Two pieces of state travel with every task: the callee-saved integer
//! registers the context-switch primitive swaps ([`CpuContext`]) and
//! the guest's EL1 system registers, which the hypervisor saves and
//! restores around every scheduling decision ([`CpuSysRegs`]).

/// Expands `$m!` with the list of trapped-and-restored EL1 system
/// registers. The field names double as the architectural register
/// names, so the AArch64 backend can splice them straight into
/// `mrs`/`msr` instructions.
macro_rules! for_each_sysreg {
    ($m:ident) => {
        $m! {
            sctlr_el1,
            ttbr0_el1,
            ttbr1_el1,
            tcr_el1,
            esr_el1,
            far_el1,
            afsr0_el1,
            afsr1_el1,
            mair_el1,
            amair_el1,
            contextidr_el1,
            cpacr_el1,
            elr_el1,
            spsr_el1,
            vbar_el1,
            sp_el0,
            sp_el1,
            tpidr_el0,
            tpidr_el1,
            tpidrro_el0,
            par_el1,
            mdscr_el1,
            cntkctl_el1,
        }
    };
}
pub(crate) use for_each_sysreg;

macro_rules! define_sysregs {
    ($($field:ident,)*) => {
        /// Snapshot of the EL1 system registers belonging to one guest.
        ///
        /// Swapped in before entering a VM and captured back out when it
        /// is descheduled, so each guest sees its own MMU configuration,
        /// exception vectors and stack pointers.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct CpuSysRegs {
            $(pub $field: u64,)*
        }
    };
}
for_each_sysreg!(define_sysregs);

/// Callee-saved register frame used by the context switch.
///
/// Layout is fixed: the switch routine stores `x19`..`x28`, the frame
/// pointer, the stack pointer and the resume address at byte offsets
/// 0 through 96 in this order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuContext {
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    pub fp: u64,
    pub sp: u64,
    pub pc: u64,
}

impl CpuContext {
    pub const fn new() -> Self {
        Self {
            x19: 0,
            x20: 0,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            fp: 0,
            sp: 0,
            pc: 0,
        }
    }
}
