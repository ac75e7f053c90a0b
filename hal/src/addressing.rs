//! Typed physical and guest addresses.
//!
//! Three address spaces are in play: host-physical ([`Pa`]), the
//! guest-physical space a VM believes is physical memory ([`Ipa`],
//! translated again by stage 2), and guest-virtual ([`Gva`], what the
//! guest's own MMU produces). Keeping them as distinct newtypes makes
//! it a type error to hand, say, a guest-physical address to a device
//! register accessor.

/// One translation granule.
pub const PAGE_SIZE: u64 = 4096;
/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u64 = 12;
/// Mask of the in-page offset bits.
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

macro_rules! address_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw address.
            #[inline]
            pub const fn new(addr: u64) -> Self {
                Self(addr)
            }

            /// Unwrap into the raw address.
            #[inline]
            pub const fn into_u64(self) -> u64 {
                self.0
            }

            /// Round down to the containing page boundary.
            #[inline]
            pub const fn page_base(self) -> Self {
                Self(self.0 & !PAGE_MASK)
            }

            /// Offset within the containing page.
            #[inline]
            pub const fn page_offset(self) -> u64 {
                self.0 & PAGE_MASK
            }

            /// Whether this address is page aligned.
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.0 & PAGE_MASK == 0
            }
        }

        impl core::ops::Add<u64> for $name {
            type Output = Self;

            fn add(self, other: u64) -> Self {
                Self(self.0 + other)
            }
        }

        impl core::ops::AddAssign<u64> for $name {
            fn add_assign(&mut self, other: u64) {
                self.0 += other;
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($name), "(0x{:x})"), self.0)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($name), "(0x{:x})"), self.0)
            }
        }
    };
}

address_type! {
    /// Host-physical address.
    Pa
}
address_type! {
    /// Intermediate (guest-)physical address, input to stage-2
    /// translation.
    Ipa
}
address_type! {
    /// Guest-virtual address, input to the guest's own stage-1
    /// translation.
    Gva
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_arithmetic() {
        let pa = Pa::new(0x1234_5678);
        assert_eq!(pa.page_base(), Pa::new(0x1234_5000));
        assert_eq!(pa.page_offset(), 0x678);
        assert!(!pa.is_page_aligned());
        assert!(pa.page_base().is_page_aligned());
    }
}
