//! Exception vectors.
//!
//! Two 256 entry tables describe what happens when an exception is raised.
//! The *host* table is what the host vector base points to while the client
//! runs: it decides how the hypervisor reacts. The *client* table holds the
//! dispatch used when an exception is reflected into the client, together
//! with the interrupt level tag of each vector.
pub mod frame;
pub mod privilege;

use crate::{addressing::Ca, config::CpuModel, error::Fault, ClientCpu, Hypervisor};
use alloc::{rc::Rc, vec, vec::Vec};
use frame::FrameSizes;
use privilege::PrivilegeTables;

/// Exception vector number.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vector(pub u8);

impl Vector {
    /// Initial program counter.
    pub const RESET: Vector = Vector(1);
    /// Bus error.
    pub const BUS_ERROR: Vector = Vector(2);
    /// Address error.
    pub const ADDRESS_ERROR: Vector = Vector(3);
    /// Illegal instruction.
    pub const ILLEGAL_INSTRUCTION: Vector = Vector(4);
    /// Privilege violation.
    pub const PRIVILEGE_VIOLATION: Vector = Vector(8);
    /// Trace.
    pub const TRACE: Vector = Vector(9);
    /// Line 1010 emulator.
    pub const LINE_A: Vector = Vector(10);
    /// Line 1111 emulator.
    pub const LINE_F: Vector = Vector(11);
    /// Spurious interrupt.
    pub const SPURIOUS: Vector = Vector(24);

    /// Vector at byte offset `offset` of the vector table.
    #[inline]
    pub const fn from_offset(offset: u32) -> Self {
        Vector((offset >> 2) as u8)
    }

    /// Level `n` interrupt autovector.
    #[inline]
    pub const fn autovector(n: u8) -> Self {
        Vector(24 + (n & 7))
    }

    /// `trap #n`.
    #[inline]
    pub const fn trap(n: u8) -> Self {
        Vector(32 + (n & 15))
    }

    /// Byte offset in the vector table.
    #[inline]
    pub const fn offset(self) -> u32 {
        (self.0 as u32) << 2
    }
}

impl core::fmt::Debug for Vector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Vector({}, ${:03x})", self.0, self.offset())
    }
}

/// Exception processing group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Group {
    /// Bus and address errors: the frame carries the faulting access.
    Group0,
    /// Illegal instruction, privilege violation, trace and interrupts.
    Group1,
    /// Every other exception.
    Group2,
}

/// Frame layout used when reflecting an exception into the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameModel {
    /// 68000 frames.
    M68000,
    /// 68010 frames with a format/vector word.
    M68010,
}

impl FrameModel {
    /// Frames of the given client model.
    pub fn of(cpu: CpuModel) -> Self {
        if cpu == CpuModel::M68010 {
            FrameModel::M68010
        } else {
            FrameModel::M68000
        }
    }
}

/// An exception entering the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Exception {
    /// Vector taken.
    pub vector: Vector,
    /// Processing group.
    pub group: Group,
    /// Frame layout.
    pub model: FrameModel,
    /// Interrupt level tag of the vector.
    pub ipl: u8,
    /// Faulting address of a group 0 exception.
    pub address: Option<Ca>,
}

/// Custom vector handler.
pub type VectorFn = dyn Fn(&mut Hypervisor, &mut dyn ClientCpu, Vector) -> Result<(), Fault>;

/// Entry of a vector table.
#[derive(Clone)]
pub enum VectorHandler {
    /// Cold boot the client.
    Reset,
    /// Reflect a bus error into the client.
    BusError,
    /// Reflect an address error into the client.
    AddressError,
    /// Look the faulting opcode up in the privilege violation tables.
    PrivilegeViolation,
    /// Let the client take the exception.
    Group(Group),
    /// Call a closure.
    Custom(Rc<VectorFn>),
}

impl VectorHandler {
    /// Wrap a closure.
    pub fn custom(
        f: impl Fn(&mut Hypervisor, &mut dyn ClientCpu, Vector) -> Result<(), Fault> + 'static,
    ) -> Self {
        VectorHandler::Custom(Rc::new(f))
    }
}

impl core::fmt::Debug for VectorHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VectorHandler::Reset => write!(f, "Reset"),
            VectorHandler::BusError => write!(f, "BusError"),
            VectorHandler::AddressError => write!(f, "AddressError"),
            VectorHandler::PrivilegeViolation => write!(f, "PrivilegeViolation"),
            VectorHandler::Group(g) => write!(f, "{:?}", g),
            VectorHandler::Custom(c) => write!(f, "Custom({:p})", Rc::as_ptr(c) as *const ()),
        }
    }
}

/// Vector, privilege and frame size tables.
pub struct Vectors {
    model: FrameModel,
    client: Vec<VectorHandler>,
    host: Vec<VectorHandler>,
    ipl: [u8; 256],
    pub(crate) privilege: PrivilegeTables,
    pub(crate) frames: FrameSizes,
}

impl Vectors {
    /// Build the default tables for a client of model `client`.
    pub fn new(client: CpuModel) -> Self {
        use Group::*;

        let group2 = VectorHandler::Group(Group2);
        let mut this = Self {
            model: FrameModel::of(client),
            client: vec![group2.clone(); 256],
            host: vec![group2; 256],
            ipl: [0; 256],
            privilege: PrivilegeTables::new(client),
            frames: FrameSizes::new(),
        };
        for (offset, group) in [(0x08, Group0), (0x0c, Group0), (0x10, Group1), (0x20, Group1), (0x24, Group1)] {
            this.set(Vector::from_offset(offset), 0, VectorHandler::Group(group));
        }
        for (level, ipl) in [1, 2, 3, 4, 5, 6, 7, 7].into_iter().enumerate() {
            this.set(Vector::autovector(level as u8), ipl, VectorHandler::Group(Group1));
        }

        this.set_handler(Vector::RESET, VectorHandler::Reset);
        this.set_handler(Vector::BUS_ERROR, VectorHandler::BusError);
        this.set_handler(Vector::ADDRESS_ERROR, VectorHandler::AddressError);
        this.set_handler(Vector::PRIVILEGE_VIOLATION, VectorHandler::PrivilegeViolation);
        log::debug!("vectors: {:?} frames", this.model);
        this
    }

    /// Frame layout of the client.
    #[inline]
    pub fn model(&self) -> FrameModel {
        self.model
    }

    /// Set the client entry, the level tag and the host entry of `vec`.
    pub fn set(&mut self, vec: Vector, ipl: u8, handler: VectorHandler) {
        self.client[vec.0 as usize] = handler.clone();
        self.ipl[vec.0 as usize] = ipl;
        self.set_handler(vec, handler);
    }

    /// Set only the host entry of `vec`.
    pub fn set_handler(&mut self, vec: Vector, handler: VectorHandler) {
        self.host[vec.0 as usize] = handler;
    }

    /// Set only the level tag of `vec`.
    pub fn set_ipl(&mut self, vec: Vector, ipl: u8) {
        self.ipl[vec.0 as usize] = ipl;
    }

    /// Host entry of `vec`.
    #[inline]
    pub fn host(&self, vec: Vector) -> &VectorHandler {
        &self.host[vec.0 as usize]
    }

    /// Client entry of `vec`.
    #[inline]
    pub fn client(&self, vec: Vector) -> &VectorHandler {
        &self.client[vec.0 as usize]
    }

    /// Level tag of `vec`.
    #[inline]
    pub fn ipl(&self, vec: Vector) -> u8 {
        self.ipl[vec.0 as usize]
    }

    /// Privilege violation tables.
    #[inline]
    pub fn privilege(&self) -> &PrivilegeTables {
        &self.privilege
    }

    /// Size in bytes of the host exception frame described by `format_word`.
    #[inline]
    pub fn frame_size(&self, format_word: u16) -> u32 {
        self.frames.frame_size(format_word)
    }
}
