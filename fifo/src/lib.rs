//! Bounded byte queue.
//!
//! Each virtual machine owns two of these: one carrying bytes from the
//! physical UART toward the guest's virtual serial line, one carrying
//! bytes the guest has written until the operator's console is pointed
//! at that VM. The capacity is fixed at construction; an enqueue onto a
//! full queue fails without disturbing the contents, which is exactly
//! what a hardware receive FIFO does when software is too slow.
#![cfg_attr(not(test), no_std)]

/// Error returned by [`Fifo::enqueue`] when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

/// A fixed-capacity byte ring.
pub struct Fifo<const N: usize> {
    buf: [u8; N],
    head: usize,
    used: usize,
}

/// Queue size used for the per-VM console lines.
pub type ConsoleFifo = Fifo<512>;

impl<const N: usize> Fifo<N> {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            head: 0,
            used: 0,
        }
    }

    /// Number of bytes currently queued.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Total capacity in bytes.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.used == N
    }

    /// Drop everything queued.
    #[inline]
    pub fn clear(&mut self) {
        self.head = 0;
        self.used = 0;
    }

    /// Append a byte at the tail.
    pub fn enqueue(&mut self, byte: u8) -> Result<(), Full> {
        if self.is_full() {
            return Err(Full);
        }
        self.buf[(self.head + self.used) % N] = byte;
        self.used += 1;
        Ok(())
    }

    /// Take the oldest byte, if any.
    pub fn dequeue(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % N;
        self.used -= 1;
        Some(byte)
    }
}

impl<const N: usize> Default for Fifo<N> {
    fn default() -> Self {
        Self::new()
    }
}
