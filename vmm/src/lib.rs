//! Virtualization engine.
//!
//! This crate is the board-independent half of the hypervisor: the
//! stage-2 address spaces guests run under, the page pool backing
//! them, the trap dispatcher that turns data aborts into demand paging
//! or device emulation, the task manager that time-slices VMs, and the
//! console multiplexer that shares one physical UART between them.
//!
//! What a "board" looks like to a guest (which registers exist, which
//! interrupt lines they pull) is behind the [`Board`] trait; the
//! `bcm2837` crate provides the Raspberry Pi 3 model.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod board;
pub mod console;
pub mod error;
pub mod loader;
pub mod mm;
pub mod stage2;
pub mod task;
pub mod trap;

pub use board::Board;
pub use console::{ConsoleMux, MuxEvent};
pub use error::Error;
pub use loader::{raw_image, RawImage};
pub use mm::PagePool;
pub use stage2::{AddressSpace, Stage2Flags};
pub use task::{PtRegs, Switch, TaskManager, Vm, VmStats};

/// Result alias used across the engine.
pub type Result<T> = core::result::Result<T, Error>;
