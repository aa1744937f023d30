//! A scripted client cpu.
#![allow(dead_code)]

use hv68k::{
    AccessKind, Ca, ClientCpu, ClientRegisters, Config, Exception, Fault, Hypervisor,
    PrivilegedOp, SimHost, Step, Vector,
};
use std::collections::VecDeque;

/// One scripted instruction.
pub enum Op {
    /// Bus cycle; reads are recorded.
    Access(AccessKind, u32, u32),
    /// Raise an exception on the host.
    Trap(Vector),
    /// Run arbitrary code with the hypervisor.
    Call(Box<dyn FnMut(&mut Hypervisor) -> Result<(), Fault>>),
}

/// Executes its ops in order, then terminates the run.
#[derive(Default)]
pub struct Script {
    pub ops: VecDeque<Op>,
    pub opcode: u16,
    pub pc: u32,
    pub reads: Vec<u32>,
    pub taken: Vec<Exception>,
    pub emulated: Vec<PrivilegedOp>,
    pub resets: usize,
    /// Pushing an exception frame bus errors.
    pub broken_stack: bool,
}

impl Script {
    pub fn new(ops: impl IntoIterator<Item = Op>) -> Self {
        Self {
            ops: ops.into_iter().collect(),
            ..Default::default()
        }
    }
}

pub fn read(kind: AccessKind, addr: u32) -> Op {
    Op::Access(kind, addr, 0)
}

pub fn write(kind: AccessKind, addr: u32, data: u32) -> Op {
    Op::Access(kind, addr, data)
}

pub fn call(f: impl FnMut(&mut Hypervisor) -> Result<(), Fault> + 'static) -> Op {
    Op::Call(Box::new(f))
}

impl ClientCpu for Script {
    fn reset(&mut self, _hv: &mut Hypervisor) -> Result<(), Fault> {
        self.resets += 1;
        self.pc = 0x00fc_0000;
        Ok(())
    }

    fn step(&mut self, hv: &mut Hypervisor) -> Result<Step, Fault> {
        let Some(op) = self.ops.pop_front() else {
            return Err(hv.terminate());
        };
        self.pc += 2;
        match op {
            Op::Access(kind, addr, data) => {
                let v = hv.access(kind, addr, data)?;
                if !kind.is_write() {
                    self.reads.push(v);
                }
                Ok(Step::Continue)
            }
            Op::Trap(v) => Ok(Step::Trap(v)),
            Op::Call(mut f) => {
                f(hv)?;
                Ok(Step::Continue)
            }
        }
    }

    fn take_exception(&mut self, _hv: &mut Hypervisor, e: Exception) -> Result<(), Fault> {
        if self.broken_stack {
            return Err(Fault::BusError(Ca::from_bus(0x00ff_fffe)));
        }
        self.taken.push(e);
        Ok(())
    }

    fn emulate(&mut self, _hv: &mut Hypervisor, op: PrivilegedOp) -> Result<(), Fault> {
        self.emulated.push(op);
        Ok(())
    }

    fn opcode(&self) -> u16 {
        self.opcode
    }

    fn registers(&self) -> ClientRegisters {
        ClientRegisters {
            pc: self.pc,
            sr: 0x2700,
            usp: 0x0000_8000,
            d: [0xd0, 0xd1, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7],
            a: [0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7],
        }
    }
}

/// A hypervisor over 1MB of simulated host memory.
pub fn setup(config: Config) -> (SimHost, Hypervisor) {
    let _ = env_logger::builder().is_test(true).try_init();
    let host = SimHost::new(0x10_0000);
    let hv = Hypervisor::new(Box::new(host.clone()), config);
    (host, hv)
}
