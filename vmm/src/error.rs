//! Engine-wide error type.

use hal::{AtFault, Ipa};

/// Reasons an engine operation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The page pool has no free page left.
    OutOfPages,
    /// The VM table is full.
    TooManyVms,
    /// A guest image does not fit between its load address and the
    /// peripheral window.
    ImageTooLarge,
    /// A guest-physical address fell outside both RAM and the emulated
    /// peripheral window.
    OutOfRange(Ipa),
    /// The guest's own stage-1 walk failed while the hypervisor was
    /// resolving a guest-virtual address on its behalf.
    GuestTranslation(AtFault),
    /// A data abort carried a fault status the dispatcher does not
    /// emulate.
    UnhandledAbort { esr: u64, far: Ipa },
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::OutOfPages => write!(f, "page pool exhausted"),
            Error::TooManyVms => write!(f, "vm table full"),
            Error::ImageTooLarge => write!(f, "guest image too large"),
            Error::OutOfRange(ipa) => write!(f, "address {} outside guest memory", ipa),
            Error::GuestTranslation(fault) => {
                write!(f, "guest stage-1 walk failed (par: {:#x})", fault.0)
            }
            Error::UnhandledAbort { esr, far } => {
                write!(f, "unhandled data abort (esr: {:#x}, far: {})", esr, far)
            }
        }
    }
}

impl From<AtFault> for Error {
    fn from(fault: AtFault) -> Self {
        Error::GuestTranslation(fault)
    }
}
