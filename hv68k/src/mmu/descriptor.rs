//! Table and page descriptors.
//!
//! Descriptors are kept as tagged values. [`ShortDescriptor::to_word`] and
//! [`PageDescriptor::to_long`] produce the 68030 bit layout.
use crate::{
    access::HandlerTableId,
    addressing::Ha,
    ftable::FtableId,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Descriptor type field (bits 1..0).
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum DescriptorType {
    /// Invalid descriptor. The remaining bits are free for software.
    Invalid = 0,
    /// Page descriptor.
    Page = 1,
    /// Pointer to a table of short descriptors.
    ShortTable = 2,
    /// Pointer to a table of long descriptors.
    LongTable = 3,
}

/// Mask of the descriptor type field.
pub const DT_MASK: u32 = 0x3;

bitflags::bitflags! {
    /// Attribute bits of a page descriptor.
    pub struct MapFlags: u32 {
        /// Write protected.
        const WP = 1 << 2;
        /// Cache inhibit.
        const CI = 1 << 6;
        /// Supervisor only.
        const S = 1 << 8;
    }
}

/// Address mask for a descriptor of type `dt`.
pub const fn address_mask(dt: DescriptorType) -> u32 {
    match dt {
        DescriptorType::Page => 0xFFFF_FF00,
        DescriptorType::ShortTable | DescriptorType::LongTable => 0xFFFF_FFF0,
        DescriptorType::Invalid => 0xFFFF_FFFC,
    }
}

/// Index of a pointer-level (TIA/TIB/TIC) table.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableId(pub(crate) u32);

impl TableId {
    /// Address word used for this table in descriptors and root pointers.
    ///
    /// Tables live in an arena, so the word carries the arena index in the
    /// bits the hardware would read as a 16-byte aligned address.
    #[inline]
    pub const fn address_word(self) -> u32 {
        (self.0 + 1) << 4
    }
}

/// Descriptor of the pointer levels. Each entry is one 32-bit word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShortDescriptor {
    /// Nothing mapped below this entry.
    Invalid,
    /// Early termination: the entry maps its whole span at `base`.
    Page {
        /// Physical base of the span.
        base: Ha,
        /// Cache inhibit.
        cache_inhibit: bool,
    },
    /// Next level is a table of short descriptors.
    Table(TableId),
    /// Next level is the bottom table `index` of long page descriptors.
    LongTable(u32),
}

impl ShortDescriptor {
    /// Descriptor word in 68030 layout.
    pub fn to_word(&self) -> u32 {
        match *self {
            ShortDescriptor::Invalid => DescriptorType::Invalid as u32,
            ShortDescriptor::Page {
                base,
                cache_inhibit,
            } => {
                let mut flags = DescriptorType::Page as u32;
                if cache_inhibit {
                    flags |= MapFlags::CI.bits();
                }
                (base.into_u32() & address_mask(DescriptorType::Page)) | flags
            }
            ShortDescriptor::Table(id) => id.address_word() | DescriptorType::ShortTable as u32,
            ShortDescriptor::LongTable(index) => {
                ((index + 1) << 16) | DescriptorType::LongTable as u32
            }
        }
    }

    /// Descriptor type of this entry.
    pub fn kind(&self) -> DescriptorType {
        match self {
            ShortDescriptor::Invalid => DescriptorType::Invalid,
            ShortDescriptor::Page { .. } => DescriptorType::Page,
            ShortDescriptor::Table(_) => DescriptorType::ShortTable,
            ShortDescriptor::LongTable(_) => DescriptorType::LongTable,
        }
    }
}

/// Software data carried by a handler reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Userdata {
    /// Plain value handed to custom access handlers.
    Value(u32),
    /// IO function table of the page.
    Ftable(FtableId),
}

impl Userdata {
    /// First word of the invalid long descriptor.
    ///
    /// IO tables encode with a zero low byte, matching the 256-byte aligned
    /// allocation the fault path tests for.
    pub fn to_word(&self) -> u32 {
        match *self {
            Userdata::Value(v) => v,
            Userdata::Ftable(id) => (id.0 + 1) << 8,
        }
    }
}

/// Disposition of one page of client space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageDescriptor {
    /// Directly mapped to host memory.
    Mapped {
        /// Host physical address of the page.
        base: Ha,
        /// Writes fault.
        read_only: bool,
        /// Cache inhibit.
        cache_inhibit: bool,
    },
    /// Supervisor-only page: every client access is a bus error.
    Invalid {
        /// Host physical address recorded in the descriptor.
        base: Ha,
    },
    /// Every access faults into the handler table.
    Handler {
        /// Stage-1 handler table.
        table: HandlerTableId,
        /// Software data.
        userdata: Userdata,
    },
}

impl PageDescriptor {
    /// Build a valid page descriptor from map flags.
    pub fn page(base: Ha, flags: MapFlags) -> Self {
        if flags.contains(MapFlags::S) {
            PageDescriptor::Invalid { base }
        } else {
            PageDescriptor::Mapped {
                base,
                read_only: flags.contains(MapFlags::WP),
                cache_inhibit: flags.contains(MapFlags::CI),
            }
        }
    }

    /// Descriptor type field.
    pub fn kind(&self) -> DescriptorType {
        match self {
            PageDescriptor::Mapped { .. } | PageDescriptor::Invalid { .. } => DescriptorType::Page,
            PageDescriptor::Handler { .. } => DescriptorType::Invalid,
        }
    }

    /// Attribute bits of a valid descriptor.
    pub fn flags(&self) -> MapFlags {
        match *self {
            PageDescriptor::Mapped {
                read_only,
                cache_inhibit,
                ..
            } => {
                let mut f = MapFlags::empty();
                f.set(MapFlags::WP, read_only);
                f.set(MapFlags::CI, cache_inhibit);
                f
            }
            PageDescriptor::Invalid { .. } => MapFlags::CI | MapFlags::S,
            PageDescriptor::Handler { .. } => MapFlags::empty(),
        }
    }

    /// Both descriptor words in 68030 long format.
    pub fn to_long(&self) -> [u32; 2] {
        match *self {
            PageDescriptor::Mapped { base, .. } | PageDescriptor::Invalid { base } => [
                0x0000_FC00 | self.flags().bits() | DescriptorType::Page as u32,
                base.into_u32() & address_mask(DescriptorType::Page),
            ],
            PageDescriptor::Handler { table, userdata } => {
                [userdata.to_word(), table.address_word()]
            }
        }
    }

    /// Replace the address of a valid page descriptor, keeping its flags.
    ///
    /// Returns false for handler references, which carry no address.
    pub(crate) fn set_base(&mut self, new: Ha) -> bool {
        match self {
            PageDescriptor::Mapped { base, .. } | PageDescriptor::Invalid { base } => {
                *base = new & !0x7;
                true
            }
            PageDescriptor::Handler { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_page_layout() {
        let d = PageDescriptor::page(Ha::new(0x0012_3400), MapFlags::CI);
        assert_eq!(d.to_long(), [0xFC41, 0x0012_3400]);
        let ro = PageDescriptor::page(Ha::new(0x00E0_0000), MapFlags::CI | MapFlags::WP);
        assert_eq!(ro.to_long(), [0xFC45, 0x00E0_0000]);
        let inv = PageDescriptor::page(Ha::new(0x0040_0000), MapFlags::CI | MapFlags::S);
        assert_eq!(inv.to_long(), [0xFD41, 0x0040_0000]);
        assert_eq!(inv.kind(), DescriptorType::Page);
    }

    #[test]
    fn handler_reference_is_invalid() {
        let d = PageDescriptor::Handler {
            table: HandlerTableId(0),
            userdata: Userdata::Ftable(FtableId(2)),
        };
        let [ud, _] = d.to_long();
        assert_eq!(ud & DT_MASK, DescriptorType::Invalid as u32);
        assert_eq!(ud & 0xFF, 0);
        assert_eq!(d.kind(), DescriptorType::Invalid);
    }

    #[test]
    fn short_words() {
        let p = ShortDescriptor::Page {
            base: Ha::new(0x1000_0000),
            cache_inhibit: true,
        };
        assert_eq!(p.to_word(), 0x1000_0041);
        let t = ShortDescriptor::Table(TableId(3));
        assert_eq!(t.to_word() & DT_MASK, 2);
        assert_eq!(t.to_word() & !address_mask(DescriptorType::ShortTable), 2);
        assert_eq!(ShortDescriptor::LongTable(5).to_word() & DT_MASK, 3);
    }

    #[test]
    fn set_base_keeps_flags() {
        let mut d = PageDescriptor::page(Ha::new(0x1000), MapFlags::CI | MapFlags::WP);
        assert!(d.set_base(Ha::new(0x2007)));
        assert_eq!(d.to_long(), [0xFC45, 0x2000]);
        let mut h = PageDescriptor::Handler {
            table: HandlerTableId(0),
            userdata: Userdata::Value(0),
        };
        assert!(!h.set_base(Ha::new(0x2000)));
    }
}
