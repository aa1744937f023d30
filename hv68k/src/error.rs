//! Faults and control signals.
use crate::addressing::{Ca, Ha};

/// Code recorded in a [`FatalDump`].
///
/// [`FatalDump`]: crate::FatalDump
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FatalCode(pub u32);

impl FatalCode {
    /// A host bus error that no handler claimed.
    pub const UNHANDLED_BUS_ERROR: FatalCode = FatalCode(0xdead_be01);
    /// Read-modify-write cycle on a collapsed IO page.
    pub const READ_MODIFY_WRITE: FatalCode = FatalCode(0xdead_be04);
    /// Read-modify-write cycle on a prepared IO page.
    pub const READ_MODIFY_WRITE_PREPARED: FatalCode = FatalCode(0xdead_be05);
    /// IO dispatch on a page that carries no IO table.
    pub const INVALID_CALLBACK: FatalCode = FatalCode(0xdead_be06);
    /// Access to a page mapped with the fatal handler.
    pub const ACCESS_HANDLER: FatalCode = FatalCode(0xdead_beff);
    /// Fatal error without a more specific code.
    pub const UNKNOWN: FatalCode = FatalCode(0xffff_ffff);
}

impl core::fmt::Debug for FatalCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FatalCode(0x{:08x})", self.0)
    }
}
impl core::fmt::Display for FatalCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "${:08x}", self.0)
    }
}

/// Outcome of a client access or of any handler invoked on its behalf.
///
/// Bus and address errors are recoverable: they are reflected to the client
/// through its exception vectors. `Fatal` and `Terminated` end the current
/// run and unwind to [`Hypervisor::run`].
///
/// [`Hypervisor::run`]: crate::Hypervisor::run
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// Bus error reported to the client.
    #[error("bus error at {0}")]
    BusError(Ca),
    /// Address error reported to the client.
    #[error("address error at {0}")]
    AddressError(Ca),
    /// Unrecoverable condition.
    #[error("fatal error {0}")]
    Fatal(FatalCode),
    /// The run was asked to terminate.
    #[error("terminated")]
    Terminated,
}

impl Fault {
    /// Returns true if the fault ends the run.
    #[inline]
    pub fn is_exit(&self) -> bool {
        matches!(self, Fault::Fatal(_) | Fault::Terminated)
    }
}

/// Host bus cycle that nothing answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("host bus error at {0}")]
pub struct BusError(pub Ha);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            Fault::Fatal(FatalCode::ACCESS_HANDLER).to_string(),
            "fatal error $deadbeff"
        );
        assert_eq!(
            Fault::BusError(Ca::from_bus(0xff8a00)).to_string(),
            "bus error at $ff8a00"
        );
        assert!(Fault::Terminated.is_exit());
        assert!(!Fault::AddressError(Ca::from_bus(1)).is_exit());
    }
}
