//! Hardware access layer for the hypervisor.
//!
//! Everything above this crate is emulation: the virtualization engine
//! only ever touches real hardware through the [`Hardware`] trait, which
//! covers raw 32-bit device register access, the free-running system
//! timer, the stage-1 address-translation instruction, saved EL1 system
//! registers and the cooperative context-switch primitive. The AArch64
//! implementation lives in [`aarch64`]; on every other target a
//! [`mock::MockHardware`] stands in so the engine and the device models
//! can be exercised as ordinary host unit tests.
//!
//! Boot code, the exception vector table and the EL2 trap entry stubs
//! are external: this crate declares their symbols and nothing more.
#![cfg_attr(not(test), no_std)]

#[cfg(not(target_arch = "aarch64"))]
extern crate alloc;

pub mod addressing;
pub mod context;
pub mod hardware;
pub mod kprint;
pub mod raspi3;
pub mod sync;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(not(target_arch = "aarch64"))]
pub mod mock;

pub use addressing::{Gva, Ipa, Pa, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};
pub use context::{CpuContext, CpuSysRegs};
pub use hardware::{AtFault, Hardware};
pub use sync::SpinLock;
