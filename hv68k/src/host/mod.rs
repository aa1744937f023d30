//! Interface to the host processor.
//!
//! The hypervisor never touches privileged host state directly. Everything
//! it needs from the 68030 it reaches through [`HostCpu`]: control and MMU
//! registers, the interrupt mask, the address translation cache and the
//! physical bus.
use crate::{addressing::Ha, error::BusError};

mod sim;

pub use sim::{SimHost, SimHostState};

/// Value that invalidates both the data and the instruction cache when
/// written to CACR.
pub const CACR_CLEAR_CACHES: u32 = 0x0808;

/// Physical bus of the host. All accesses are big-endian.
pub trait HostBus {
    /// Read a byte.
    fn read_byte(&mut self, addr: Ha) -> Result<u8, BusError>;
    /// Read a word.
    fn read_word(&mut self, addr: Ha) -> Result<u16, BusError>;
    /// Read a long word.
    fn read_long(&mut self, addr: Ha) -> Result<u32, BusError>;
    /// Write a byte.
    fn write_byte(&mut self, addr: Ha, value: u8) -> Result<(), BusError>;
    /// Write a word.
    fn write_word(&mut self, addr: Ha, value: u16) -> Result<(), BusError>;
    /// Write a long word.
    fn write_long(&mut self, addr: Ha, value: u32) -> Result<(), BusError>;
}

/// Host control registers saved and restored around a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlRegisters {
    /// User stack pointer.
    pub usp: u32,
    /// Vector base register.
    pub vbr: u32,
    /// Source function code.
    pub sfc: u32,
    /// Destination function code.
    pub dfc: u32,
    /// Cache address register.
    pub caar: u32,
    /// Cache control register.
    pub cacr: u32,
}

/// 68030 MMU register set, in the layout `pmove` uses.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MmuRegisters {
    /// Supervisor root pointer.
    pub srp: [u32; 2],
    /// CPU root pointer.
    pub crp: [u32; 2],
    /// Transparent translation register 0.
    pub tt0: u32,
    /// Transparent translation register 1.
    pub tt1: u32,
    /// Translation control.
    pub tc: u32,
}

/// Privileged operations of the host processor.
pub trait HostCpu: HostBus {
    /// Mask all interrupts (`move #$2700,sr`).
    fn disable_interrupts(&mut self);
    /// Read the control registers.
    fn control_registers(&self) -> ControlRegisters;
    /// Load the control registers.
    fn load_control_registers(&mut self, regs: &ControlRegisters);
    /// Read the MMU registers.
    fn mmu_registers(&self) -> MmuRegisters;
    /// Load the MMU registers. Translation is disabled while the new set is
    /// loaded and the ATC is flushed before and after.
    fn load_mmu_registers(&mut self, regs: &MmuRegisters);
    /// Flush the whole address translation cache (`pflusha`).
    fn flush_atc(&mut self);
    /// Write the cache control register.
    fn set_cacr(&mut self, cacr: u32);
}
