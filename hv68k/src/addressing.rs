//! Client and host addresses.
//!
//! The client sees a 24-bit bus: the upper 8 address bits never reach the
//! translation tree. The host sees the full 32-bit space.

/// Size of the client address space in bytes.
pub const CLIENT_SPACE: u32 = 0x0100_0000;

/// Mask applied to every address the client puts on its bus.
pub const CLIENT_ADDR_MASK: u32 = CLIENT_SPACE - 1;

/// Client address.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Ca(u32);

impl Ca {
    /// Create a new client address with a check.
    ///
    /// `CLIENT_SPACE` itself is accepted so that it can close an exclusive
    /// range.
    #[inline]
    pub const fn new(addr: u32) -> Option<Self> {
        if addr <= CLIENT_SPACE {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Create a client address from a raw bus address, dropping the bits
    /// a 24-bit bus does not decode.
    #[inline(always)]
    pub const fn from_bus(addr: u32) -> Self {
        Self(addr & CLIENT_ADDR_MASK)
    }

    /// Cast into u32.
    #[inline]
    pub const fn into_u32(self) -> u32 {
        self.0
    }
}

/// Host physical address.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Ha(u32);

impl Ha {
    /// Create a new host address.
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Cast into u32.
    #[inline]
    pub const fn into_u32(self) -> u32 {
        self.0
    }
}

macro_rules! impl_arith {
    ($t: ty) => {
        impl core::ops::Add<u32> for $t {
            type Output = Self;

            fn add(self, other: u32) -> Self::Output {
                Self(self.0.wrapping_add(other))
            }
        }
        impl core::ops::AddAssign<u32> for $t {
            fn add_assign(&mut self, other: u32) {
                self.0 = self.0.wrapping_add(other)
            }
        }
        impl core::ops::Sub<u32> for $t {
            type Output = Self;

            fn sub(self, other: u32) -> Self::Output {
                Self(self.0.wrapping_sub(other))
            }
        }
        impl core::ops::BitOr<u32> for $t {
            type Output = Self;

            fn bitor(self, other: u32) -> Self {
                Self(self.0 | other)
            }
        }
        impl core::ops::BitAnd<u32> for $t {
            type Output = Self;

            fn bitand(self, other: u32) -> Self {
                Self(self.0 & other)
            }
        }
    };
}

impl_arith!(Ca);
impl_arith!(Ha);

impl core::fmt::Debug for Ca {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Ca(0x{:06x})", self.0)
    }
}
impl core::fmt::Display for Ca {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "${:06x}", self.0)
    }
}

impl core::fmt::Debug for Ha {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Ha(0x{:08x})", self.0)
    }
}
impl core::fmt::Display for Ha {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "${:08x}", self.0)
    }
}

/// Index of a page of client address space.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct PageId(pub(crate) u32);

impl PageId {
    /// Cast into usize.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_address_range() {
        assert_eq!(Ca::new(0), Some(Ca(0)));
        assert_eq!(Ca::new(CLIENT_SPACE), Some(Ca(CLIENT_SPACE)));
        assert_eq!(Ca::new(CLIENT_SPACE + 1), None);
        assert_eq!(Ca::from_bus(0xFFFF_8001), Ca(0x00FF_8001));
    }

    #[test]
    fn formatting() {
        assert_eq!(format!("{:?}", Ca::from_bus(0xfa00)), "Ca(0x00fa00)");
        assert_eq!(format!("{}", Ha::new(0x00ff_8001)), "$00ff8001");
    }
}
