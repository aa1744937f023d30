//! Interface to the client processor.
//!
//! The instruction set of the client is executed by an external
//! [`ClientCpu`]. The hypervisor owns the client's supervisor state
//! ([`ClientState`]) and everything the client reaches through its bus;
//! the cpu calls back into [`Hypervisor`] for every memory access and
//! reports the exceptions its instructions raise.
use crate::{
    error::Fault,
    fatal::ClientRegisters,
    vectors::{privilege::PrivilegedOp, Exception, Vector},
    Hypervisor,
};

bitflags::bitflags! {
    /// Client status register.
    pub struct StatusRegister: u16 {
        /// Trace.
        const T = 0x8000;
        /// Supervisor.
        const S = 0x2000;
        /// Interrupt priority mask.
        const I = 0x0700;
        /// Extend.
        const X = 0x0010;
        /// Negative.
        const N = 0x0008;
        /// Zero.
        const Z = 0x0004;
        /// Overflow.
        const V = 0x0002;
        /// Carry.
        const C = 0x0001;
    }
}

impl StatusRegister {
    /// Bits a 68000/68010 implements.
    pub const VALID: u16 = 0xA71F;

    /// Build from a raw value, dropping unimplemented bits.
    #[inline]
    pub fn from_raw(raw: u16) -> Self {
        Self::from_bits_truncate(raw)
    }

    /// Interrupt priority mask.
    #[inline]
    pub fn ipl(self) -> u8 {
        ((self.bits() & Self::I.bits()) >> 8) as u8
    }
}

/// Supervisor state of the client that the hypervisor keeps on its behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientState {
    /// Status register.
    pub sr: StatusRegister,
    /// Supervisor stack pointer.
    pub ssp: u32,
    /// User stack pointer.
    pub usp: u32,
    /// Vector base register (68010).
    pub vbr: u32,
    /// Source function code (68010).
    pub sfc: u32,
    /// Destination function code (68010).
    pub dfc: u32,
}

impl ClientState {
    /// State of a client coming out of reset.
    pub const fn cold_boot() -> Self {
        Self {
            sr: StatusRegister::S,
            ssp: 0,
            usp: 0,
            vbr: 0,
            sfc: 1,
            dfc: 1,
        }
    }

    /// Returns true in supervisor mode.
    #[inline]
    pub fn is_supervisor(&self) -> bool {
        self.sr.contains(StatusRegister::S)
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::cold_boot()
    }
}

/// Outcome of one client instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Completed normally.
    Continue,
    /// Raised exception `Vector` on the host: illegal, line-A/F, trap, or a
    /// privilege violation the hypervisor has to emulate.
    Trap(Vector),
}

/// Client cpu emulation.
pub trait ClientCpu {
    /// Reset the cpu: load the initial stack pointer and program counter
    /// from the client's reset vector.
    fn reset(&mut self, hv: &mut Hypervisor) -> Result<(), Fault>;
    /// Execute one instruction.
    fn step(&mut self, hv: &mut Hypervisor) -> Result<Step, Fault>;
    /// Enter the client's handler for `exception`.
    fn take_exception(&mut self, hv: &mut Hypervisor, exception: Exception) -> Result<(), Fault>;
    /// Emulate a privileged instruction on behalf of the client.
    fn emulate(&mut self, hv: &mut Hypervisor, op: PrivilegedOp) -> Result<(), Fault>;
    /// Opcode of the last instruction executed.
    fn opcode(&self) -> u16;
    /// Register snapshot for fatal dumps.
    fn registers(&self) -> ClientRegisters;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_register() {
        let sr = StatusRegister::from_raw(0xFFFF);
        assert_eq!(sr.bits(), StatusRegister::VALID);
        assert_eq!(sr.ipl(), 7);
        assert_eq!(StatusRegister::from_raw(0x2300).ipl(), 3);
        assert!(ClientState::cold_boot().is_supervisor());
        assert_eq!(ClientState::cold_boot().sr.bits(), 0x2000);
    }
}
