//! Stage-1 access handlers.
//!
//! A page mapped with a handler reference faults on every client access.
//! The fault is routed through the page's [`HandlerTable`], a 16 slot record
//! indexed by [`AccessKind`]:
//!
//! ```text
//!  0 write long   1 write byte   2 write word   3 write three-byte
//!  4 read long    5 read byte    6 read word    7 read three-byte
//!  8..15 read-modify-write
//! ```
use crate::{addressing::Ca, error::Fault, Hypervisor};
use alloc::rc::Rc;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Kind of a client bus cycle. The discriminant is the handler table slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AccessKind {
    /// Long word write.
    WriteLong = 0,
    /// Byte write.
    WriteByte = 1,
    /// Word write.
    WriteWord = 2,
    /// Three-byte write of a misaligned long.
    WriteThree = 3,
    /// Long word read.
    ReadLong = 4,
    /// Byte read.
    ReadByte = 5,
    /// Word read.
    ReadWord = 6,
    /// Three-byte read of a misaligned long.
    ReadThree = 7,
    /// Indivisible read-modify-write cycle (`tas`).
    ReadModifyWrite = 8,
}

impl AccessKind {
    /// Returns true for write cycles.
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            AccessKind::WriteLong
                | AccessKind::WriteByte
                | AccessKind::WriteWord
                | AccessKind::WriteThree
        )
    }

    /// Number of bytes transferred.
    #[inline]
    pub fn width(self) -> u32 {
        match self {
            AccessKind::WriteByte | AccessKind::ReadByte | AccessKind::ReadModifyWrite => 1,
            AccessKind::WriteWord | AccessKind::ReadWord => 2,
            AccessKind::WriteThree | AccessKind::ReadThree => 3,
            AccessKind::WriteLong | AccessKind::ReadLong => 4,
        }
    }

    /// Mask of the data bits the cycle carries.
    #[inline]
    pub fn data_mask(self) -> u32 {
        match self.width() {
            4 => 0xFFFF_FFFF,
            w => (1 << (w * 8)) - 1,
        }
    }

    /// Handler table slot.
    #[inline]
    pub fn slot(self) -> usize {
        u8::from(self) as usize
    }
}

/// A client bus cycle in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Access {
    /// Cycle kind.
    pub kind: AccessKind,
    /// Client address.
    pub addr: Ca,
    /// Value written, or the value to return for a read.
    pub data: u32,
}

/// Signature of a custom stage-1 handler. It receives the page's userdata.
pub type AccessFn = dyn Fn(&mut Hypervisor, u32, &mut Access) -> Result<(), Fault>;

/// A stage-1 handler.
#[derive(Clone)]
pub enum AccessHandler {
    /// End the run with [`FatalCode::ACCESS_HANDLER`].
    ///
    /// [`FatalCode::ACCESS_HANDLER`]: crate::FatalCode::ACCESS_HANDLER
    Fatal,
    /// Report a bus error to the client.
    BusError,
    /// Reads return zero, writes are dropped.
    Ignore,
    /// Reads return all ones, writes are dropped.
    ReadFF,
    /// Access the host bus at the same address. A host bus error is fatal.
    PassThrough,
    /// Access the host bus at the same address. A host bus error is passed
    /// to the client.
    PassThroughSafe,
    /// Dispatch through the page's IO function table.
    Ftable,
    /// Dispatch through the page's prepared IO function table.
    FtablePrepared,
    /// Call a closure.
    Custom(Rc<AccessFn>),
}

impl AccessHandler {
    /// Wrap a closure.
    pub fn custom(
        f: impl Fn(&mut Hypervisor, u32, &mut Access) -> Result<(), Fault> + 'static,
    ) -> Self {
        AccessHandler::Custom(Rc::new(f))
    }
}

impl core::fmt::Debug for AccessHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AccessHandler::Fatal => write!(f, "Fatal"),
            AccessHandler::BusError => write!(f, "BusError"),
            AccessHandler::Ignore => write!(f, "Ignore"),
            AccessHandler::ReadFF => write!(f, "ReadFF"),
            AccessHandler::PassThrough => write!(f, "PassThrough"),
            AccessHandler::PassThroughSafe => write!(f, "PassThroughSafe"),
            AccessHandler::Ftable => write!(f, "Ftable"),
            AccessHandler::FtablePrepared => write!(f, "FtablePrepared"),
            AccessHandler::Custom(c) => write!(f, "Custom({:p})", Rc::as_ptr(c) as *const ()),
        }
    }
}

/// Handlers for every cycle kind, as passed to
/// [`Hypervisor::map_access_handler`].
#[derive(Clone, Debug)]
pub struct AccessHandlers {
    pub read_byte: AccessHandler,
    pub write_byte: AccessHandler,
    pub read_word: AccessHandler,
    pub write_word: AccessHandler,
    pub read_long: AccessHandler,
    pub write_long: AccessHandler,
    pub read_three: AccessHandler,
    pub write_three: AccessHandler,
    pub read_modify_write: AccessHandler,
}

impl AccessHandlers {
    /// Use `h` for every cycle kind.
    pub fn uniform(h: AccessHandler) -> Self {
        Self {
            read_byte: h.clone(),
            write_byte: h.clone(),
            read_word: h.clone(),
            write_word: h.clone(),
            read_long: h.clone(),
            write_long: h.clone(),
            read_three: h.clone(),
            write_three: h.clone(),
            read_modify_write: h,
        }
    }
}

/// Index of a [`HandlerTable`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerTableId(pub(crate) u32);

impl HandlerTableId {
    /// Address word used for this table in a handler reference.
    #[inline]
    pub const fn address_word(self) -> u32 {
        (self.0 + 1) << 6
    }
}

/// The 16 slot stage-1 record.
#[derive(Clone, Debug)]
pub struct HandlerTable {
    slots: [AccessHandler; 16],
}

impl HandlerTable {
    /// Lay out `h` in slot order.
    pub fn new(h: &AccessHandlers) -> Self {
        Self {
            slots: core::array::from_fn(|i| match i {
                0 => h.write_long.clone(),
                1 => h.write_byte.clone(),
                2 => h.write_word.clone(),
                3 => h.write_three.clone(),
                4 => h.read_long.clone(),
                5 => h.read_byte.clone(),
                6 => h.read_word.clone(),
                7 => h.read_three.clone(),
                _ => h.read_modify_write.clone(),
            }),
        }
    }

    /// Handler for a cycle kind.
    #[inline]
    pub fn slot(&self, kind: AccessKind) -> &AccessHandler {
        &self.slots[kind.slot()]
    }

    /// Switch every slot to the prepared IO dispatch.
    pub(crate) fn set_prepared(&mut self) {
        for s in self.slots.iter_mut() {
            *s = AccessHandler::FtablePrepared;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::TryFrom;

    #[test]
    fn slot_order() {
        let mut h = AccessHandlers::uniform(AccessHandler::Ignore);
        h.write_long = AccessHandler::Fatal;
        h.read_three = AccessHandler::ReadFF;
        h.read_modify_write = AccessHandler::BusError;
        let t = HandlerTable::new(&h);
        assert!(matches!(t.slots[0], AccessHandler::Fatal));
        assert!(matches!(t.slots[7], AccessHandler::ReadFF));
        for i in 8..16 {
            assert!(matches!(t.slots[i], AccessHandler::BusError));
        }
        assert!(matches!(t.slot(AccessKind::ReadByte), AccessHandler::Ignore));
    }

    #[test]
    fn kinds() {
        assert_eq!(AccessKind::try_from(6u8).ok(), Some(AccessKind::ReadWord));
        assert!(AccessKind::WriteThree.is_write());
        assert!(!AccessKind::ReadModifyWrite.is_write());
        assert_eq!(AccessKind::ReadThree.data_mask(), 0x00FF_FFFF);
        assert_eq!(AccessKind::WriteLong.data_mask(), 0xFFFF_FFFF);
    }

    #[test]
    fn prepared_slots() {
        let mut t = HandlerTable::new(&AccessHandlers::uniform(AccessHandler::Ftable));
        t.set_prepared();
        assert!(t
            .slots
            .iter()
            .all(|s| matches!(s, AccessHandler::FtablePrepared)));
    }
}
