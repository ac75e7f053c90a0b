//! Hypervisor print utilities.
//!
//! Output goes to whatever sink was installed at boot: the physical
//! mini UART on hardware, a capturing buffer in tests. The sink sits
//! behind a [`SpinLock`] so trap-path logging and mainline logging do
//! not interleave mid-line.

use crate::sync::SpinLock;
use core::fmt::Write;

/// A byte sink the print macros write through.
pub trait ConsoleSink: Send {
    fn putc(&mut self, byte: u8);
}

struct Sink(Option<&'static mut dyn ConsoleSink>);

static SINK: SpinLock<Sink> = SpinLock::new(Sink(None));

/// Install the console sink. Called once during boot, before the first
/// print.
pub fn set_console(sink: &'static mut dyn ConsoleSink) {
    SINK.lock().0 = Some(sink);
}

impl Write for Sink {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        if let Some(sink) = self.0.as_mut() {
            for byte in s.bytes() {
                if byte == b'\n' {
                    sink.putc(b'\r');
                }
                sink.putc(byte);
            }
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    let _ = write!(&mut *SINK.lock(), "{}", fmt);
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the console.
/// This first holds the lock for the console sink.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the console.
/// This first holds the lock for the console sink.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ($crate::kprint::_print(
            format_args!(
                "[INFO] {}\n",
                format_args!($($arg)*)
            )
        )
    );
}

/// Display a warning message.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => ($crate::kprint::_print(
            format_args!(
                "[WARNING] {}\n",
                format_args!($($arg)*)
            )
        )
    );
}

/// Print msg if debug build
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::kprint::_print(
                format_args!(
                    "[DEBUG] {}\n",
                    format_args!($($arg)*)
                )
            )
        }
    }
}
