//! Privilege violation tables.
//!
//! The client runs in host user mode, so every instruction the client may
//! execute in its supervisor mode but the host treats as privileged ends
//! in the host's privilege violation vector. Two tables, one per client
//! mode, map the faulting opcode to the handler that emulates it or
//! reflects the exception back to the client.
use crate::{config::CpuModel, error::Fault, Hypervisor, ClientCpu};
use alloc::{rc::Rc, vec, vec::Vec};
use core::ops::RangeInclusive;

/// Effective address of a status register move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ea {
    /// `Dn`
    DataReg(u8),
    /// `(An)`
    AddrInd(u8),
    /// `(An)+`
    PostInc(u8),
    /// `-(An)`
    PreDec(u8),
    /// `d16(An)`
    Disp(u8),
    /// `d8(An,Xn)`
    Index(u8),
    /// `abs.w`
    AbsShort,
    /// `abs.l`
    AbsLong,
    /// `#imm`
    Immediate,
}

impl Ea {
    /// Decode the mode and register fields (bits 5..0) of `opcode`.
    pub fn decode(opcode: u16) -> Option<Self> {
        let reg = (opcode & 7) as u8;
        Some(match (opcode >> 3) & 7 {
            0 => Ea::DataReg(reg),
            2 => Ea::AddrInd(reg),
            3 => Ea::PostInc(reg),
            4 => Ea::PreDec(reg),
            5 => Ea::Disp(reg),
            6 => Ea::Index(reg),
            7 => match reg {
                0 => Ea::AbsShort,
                1 => Ea::AbsLong,
                4 => Ea::Immediate,
                _ => return None,
            },
            _ => return None,
        })
    }
}

/// Built-in privilege violation handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivKind {
    /// Reflect an illegal instruction exception to the client.
    IllegalInstruction,
    /// Reflect a line-F exception to the client.
    LineF,
    /// Reflect a privilege violation to the client.
    PrivilegeViolation,
    /// `stop #imm`
    Stop,
    /// `reset`
    Reset,
    /// `rte`, 68000 frame.
    Rte,
    /// `rte`, 68010 frame.
    Rte68010,
    /// `move An,usp`
    MoveToUsp,
    /// `move usp,An`
    MoveFromUsp,
    /// `move <ea>,sr`
    MoveToSr,
    /// `andi #imm,sr`
    AndiToSr,
    /// `eori #imm,sr`
    EoriToSr,
    /// `ori #imm,sr`
    OriToSr,
    /// `move sr,<ea>`
    MoveFromSr,
}

/// A privileged instruction for the client cpu to emulate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivilegedOp {
    Stop,
    Reset,
    Rte,
    Rte68010,
    MoveToUsp(u8),
    MoveFromUsp(u8),
    MoveToSr(Ea),
    AndiToSr,
    EoriToSr,
    OriToSr,
    MoveFromSr(Ea),
}

impl PrivilegedOp {
    /// Decode the operands of `opcode` for a built-in handler. Reflecting
    /// handlers and unknown encodings yield `None`.
    pub fn decode(kind: PrivKind, opcode: u16) -> Option<Self> {
        let reg = (opcode & 7) as u8;
        Some(match kind {
            PrivKind::IllegalInstruction | PrivKind::LineF | PrivKind::PrivilegeViolation => {
                return None
            }
            PrivKind::Stop => PrivilegedOp::Stop,
            PrivKind::Reset => PrivilegedOp::Reset,
            PrivKind::Rte => PrivilegedOp::Rte,
            PrivKind::Rte68010 => PrivilegedOp::Rte68010,
            PrivKind::MoveToUsp => PrivilegedOp::MoveToUsp(reg),
            PrivKind::MoveFromUsp => PrivilegedOp::MoveFromUsp(reg),
            PrivKind::MoveToSr => PrivilegedOp::MoveToSr(Ea::decode(opcode)?),
            PrivKind::AndiToSr => PrivilegedOp::AndiToSr,
            PrivKind::EoriToSr => PrivilegedOp::EoriToSr,
            PrivKind::OriToSr => PrivilegedOp::OriToSr,
            PrivKind::MoveFromSr => PrivilegedOp::MoveFromSr(Ea::decode(opcode)?),
        })
    }
}

/// Custom privilege violation handler. Receives the faulting opcode.
pub type PrivFn = dyn Fn(&mut Hypervisor, &mut dyn ClientCpu, u16) -> Result<(), Fault>;

/// Entry of a privilege violation table.
#[derive(Clone)]
pub enum PrivHandler {
    /// Built-in handler.
    Builtin(PrivKind),
    /// Call a closure.
    Custom(Rc<PrivFn>),
}

impl PrivHandler {
    /// Wrap a closure.
    pub fn custom(
        f: impl Fn(&mut Hypervisor, &mut dyn ClientCpu, u16) -> Result<(), Fault> + 'static,
    ) -> Self {
        PrivHandler::Custom(Rc::new(f))
    }
}

impl From<PrivKind> for PrivHandler {
    fn from(k: PrivKind) -> Self {
        PrivHandler::Builtin(k)
    }
}

impl core::fmt::Debug for PrivHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PrivHandler::Builtin(k) => write!(f, "{:?}", k),
            PrivHandler::Custom(c) => write!(f, "Custom({:p})", Rc::as_ptr(c) as *const ()),
        }
    }
}

/// `move <ea>,sr` encodings.
const MOVE_TO_SR: [RangeInclusive<u16>; 8] = [
    0x46c0..=0x46c7,
    0x46d0..=0x46d7,
    0x46d8..=0x46df,
    0x46e0..=0x46e7,
    0x46e8..=0x46ef,
    0x46f0..=0x46f7,
    0x46f8..=0x46f9,
    0x46fc..=0x46fc,
];

/// `move sr,<ea>` encodings.
const MOVE_FROM_SR: [RangeInclusive<u16>; 7] = [
    0x40c0..=0x40c7,
    0x40d0..=0x40d7,
    0x40d8..=0x40df,
    0x40e0..=0x40e7,
    0x40e8..=0x40ef,
    0x40f0..=0x40f7,
    0x40f8..=0x40f9,
];

/// Supervisor and user mode privilege violation tables.
pub struct PrivilegeTables {
    supervisor: Vec<PrivHandler>,
    user: Vec<PrivHandler>,
}

impl PrivilegeTables {
    /// Build the tables for a client of model `client`.
    pub fn new(client: CpuModel) -> Self {
        let illegal = PrivHandler::Builtin(PrivKind::IllegalInstruction);
        let mut this = Self {
            supervisor: vec![illegal.clone(); 0x10000],
            user: vec![illegal; 0x10000],
        };
        let viol = || -> Option<PrivHandler> { Some(PrivKind::PrivilegeViolation.into()) };
        let both = |k: PrivKind| -> (Option<PrivHandler>, Option<PrivHandler>) {
            (Some(k.into()), Some(k.into()))
        };

        let (s, u) = both(PrivKind::LineF);
        this.set(0xF000..=0xFFFF, s, u);
        this.set(0x4e72..=0x4e72, Some(PrivKind::Stop.into()), viol());
        this.set(0x4e70..=0x4e70, Some(PrivKind::Reset.into()), viol());
        this.set(0x4e73..=0x4e73, Some(PrivKind::Rte.into()), viol());
        this.set(0x4e60..=0x4e67, Some(PrivKind::MoveToUsp.into()), viol());
        this.set(0x4e68..=0x4e6f, Some(PrivKind::MoveFromUsp.into()), viol());
        for r in MOVE_TO_SR {
            this.set(r, Some(PrivKind::MoveToSr.into()), viol());
        }
        this.set(0x027c..=0x027c, Some(PrivKind::AndiToSr.into()), viol());
        this.set(0x0a7c..=0x0a7c, Some(PrivKind::EoriToSr.into()), viol());
        this.set(0x007c..=0x007c, Some(PrivKind::OriToSr.into()), viol());
        for r in MOVE_FROM_SR {
            let (s, u) = both(PrivKind::MoveFromSr);
            this.set(r, s, u);
        }

        // move sr,<ea> is privileged from the 68010 on.
        if client >= CpuModel::M68010 {
            this.set(0x4e73..=0x4e73, Some(PrivKind::Rte68010.into()), viol());
            for r in MOVE_FROM_SR {
                this.set(r, Some(PrivKind::MoveFromSr.into()), viol());
            }
        }
        this
    }

    /// Install handlers for every opcode in `range`. `None` leaves the
    /// entries of that mode untouched.
    pub fn set(
        &mut self,
        range: RangeInclusive<u16>,
        supervisor: Option<PrivHandler>,
        user: Option<PrivHandler>,
    ) {
        if let Some(h) = supervisor {
            for op in range.clone() {
                self.supervisor[op as usize] = h.clone();
            }
        }
        if let Some(h) = user {
            for op in range {
                self.user[op as usize] = h.clone();
            }
        }
    }

    /// Handler for `opcode` faulting in the given client mode.
    #[inline]
    pub fn get(&self, supervisor: bool, opcode: u16) -> &PrivHandler {
        if supervisor {
            &self.supervisor[opcode as usize]
        } else {
            &self.user[opcode as usize]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(t: &PrivilegeTables, s: bool, op: u16) -> PrivKind {
        match t.get(s, op) {
            PrivHandler::Builtin(k) => *k,
            h => panic!("unexpected {:?}", h),
        }
    }

    #[test]
    fn complete() {
        let t = PrivilegeTables::new(CpuModel::M68000);
        assert_eq!(t.supervisor.len(), 0x10000);
        assert_eq!(t.user.len(), 0x10000);
        assert_eq!(kind(&t, true, 0x0000), PrivKind::IllegalInstruction);
        assert_eq!(kind(&t, false, 0x4AFC), PrivKind::IllegalInstruction);
        assert_eq!(kind(&t, true, 0xF000), PrivKind::LineF);
        assert_eq!(kind(&t, false, 0xFFFF), PrivKind::LineF);
    }

    #[test]
    fn m68000_layout() {
        let t = PrivilegeTables::new(CpuModel::M68000);
        let cases = [
            (0x4e72, PrivKind::Stop),
            (0x4e70, PrivKind::Reset),
            (0x4e73, PrivKind::Rte),
            (0x4e60, PrivKind::MoveToUsp),
            (0x4e6f, PrivKind::MoveFromUsp),
            (0x46fc, PrivKind::MoveToSr),
            (0x46c3, PrivKind::MoveToSr),
            (0x46f7, PrivKind::MoveToSr),
            (0x027c, PrivKind::AndiToSr),
            (0x0a7c, PrivKind::EoriToSr),
            (0x007c, PrivKind::OriToSr),
        ];
        for (op, k) in cases {
            assert_eq!(kind(&t, true, op), k, "{:04x}", op);
            assert_eq!(kind(&t, false, op), PrivKind::PrivilegeViolation, "{:04x}", op);
        }
        // holes in the move <ea>,sr space stay illegal
        assert_eq!(kind(&t, true, 0x46c8), PrivKind::IllegalInstruction);
        assert_eq!(kind(&t, true, 0x46fa), PrivKind::IllegalInstruction);
        // move sr,<ea> is unprivileged on a 68000
        for op in [0x40c0, 0x40d5, 0x40f7, 0x40f8, 0x40f9] {
            assert_eq!(kind(&t, true, op), PrivKind::MoveFromSr);
            assert_eq!(kind(&t, false, op), PrivKind::MoveFromSr);
        }
    }

    #[test]
    fn m68010_overrides() {
        let t = PrivilegeTables::new(CpuModel::M68010);
        assert_eq!(kind(&t, true, 0x4e73), PrivKind::Rte68010);
        assert_eq!(kind(&t, false, 0x4e73), PrivKind::PrivilegeViolation);
        for op in [0x40c0, 0x40e4, 0x40f9] {
            assert_eq!(kind(&t, true, op), PrivKind::MoveFromSr);
            assert_eq!(kind(&t, false, op), PrivKind::PrivilegeViolation);
        }
    }

    #[test]
    fn later_installs_win() {
        let mut t = PrivilegeTables::new(CpuModel::M68000);
        let h = PrivHandler::custom(|_, _, _| Ok(()));
        t.set(0x4e70..=0x4e73, None, Some(h));
        assert_eq!(kind(&t, true, 0x4e72), PrivKind::Stop);
        assert!(matches!(t.get(false, 0x4e71), PrivHandler::Custom(_)));
        t.set(0xF000..=0xFFFF, Some(PrivKind::IllegalInstruction.into()), None);
        assert_eq!(kind(&t, true, 0xF123), PrivKind::IllegalInstruction);
        assert_eq!(kind(&t, false, 0xF123), PrivKind::LineF);
    }

    #[test]
    fn operands() {
        assert_eq!(
            PrivilegedOp::decode(PrivKind::MoveToSr, 0x46d3),
            Some(PrivilegedOp::MoveToSr(Ea::AddrInd(3)))
        );
        assert_eq!(
            PrivilegedOp::decode(PrivKind::MoveFromSr, 0x40f9),
            Some(PrivilegedOp::MoveFromSr(Ea::AbsLong))
        );
        assert_eq!(
            PrivilegedOp::decode(PrivKind::MoveFromUsp, 0x4e6d),
            Some(PrivilegedOp::MoveFromUsp(5))
        );
        assert_eq!(PrivilegedOp::decode(PrivKind::MoveToSr, 0x46fa), None);
        assert_eq!(PrivilegedOp::decode(PrivKind::LineF, 0xF000), None);
        assert_eq!(Ea::decode(0x46c8), None);
    }
}
