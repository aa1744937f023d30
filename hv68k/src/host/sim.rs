//! Software host.
use super::{ControlRegisters, HostBus, HostCpu, MmuRegisters};
use crate::{addressing::Ha, error::BusError};
use alloc::{rc::Rc, vec, vec::Vec};
use core::{cell::RefCell, ops::Range};

/// Observable state of a [`SimHost`].
#[derive(Debug, Default)]
pub struct SimHostState {
    /// Physical memory starting at host address 0.
    pub memory: Vec<u8>,
    /// Address ranges that answer with a bus error.
    pub holes: Vec<Range<u32>>,
    /// Control registers.
    pub control: ControlRegisters,
    /// MMU registers.
    pub mmu: MmuRegisters,
    /// Interrupt mask raised to level 7.
    pub interrupts_masked: bool,
    /// Number of `pflusha` executed.
    pub atc_flushes: usize,
    /// Every value written to CACR, in order.
    pub cacr_writes: Vec<u32>,
    /// Every MMU register set loaded, in order.
    pub mmu_loads: Vec<MmuRegisters>,
}

/// A host processor and bus modelled in memory.
///
/// Cloning yields another handle to the same state, so a caller can keep
/// one handle for inspection after giving the other to the hypervisor.
#[derive(Clone, Debug, Default)]
pub struct SimHost {
    inner: Rc<RefCell<SimHostState>>,
}

impl SimHost {
    /// Create a host with `size` bytes of zeroed memory at address 0.
    pub fn new(size: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimHostState {
                memory: vec![0; size],
                ..Default::default()
            })),
        }
    }

    /// Make the host bus fail on `range`.
    pub fn add_hole(&self, range: Range<u32>) {
        self.inner.borrow_mut().holes.push(range);
    }

    /// Run `f` on the host state.
    pub fn with<R>(&self, f: impl FnOnce(&mut SimHostState) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }

    /// Copy `data` into memory at `addr`.
    pub fn load(&self, addr: u32, data: &[u8]) {
        let mut s = self.inner.borrow_mut();
        let start = addr as usize;
        s.memory[start..start + data.len()].copy_from_slice(data);
    }

    /// Fill `len` bytes at `addr` with `value`.
    pub fn fill(&self, addr: u32, len: usize, value: u8) {
        let mut s = self.inner.borrow_mut();
        let start = addr as usize;
        s.memory[start..start + len].fill(value);
    }

    /// Read a byte of memory without going through the bus model.
    pub fn peek(&self, addr: u32) -> u8 {
        self.inner.borrow().memory[addr as usize]
    }

    fn span(&self, addr: Ha, len: usize) -> Result<usize, BusError> {
        let s = self.inner.borrow();
        let start = addr.into_u32();
        let end = start as u64 + len as u64;
        let hit = s
            .holes
            .iter()
            .any(|h| (start as u64) < h.end as u64 && end > h.start as u64);
        if hit || end > s.memory.len() as u64 {
            Err(BusError(addr))
        } else {
            Ok(start as usize)
        }
    }
}

impl SimHostState {
    fn read<const N: usize>(&self, at: usize) -> [u8; N] {
        let mut b = [0; N];
        b.copy_from_slice(&self.memory[at..at + N]);
        b
    }
}

impl HostBus for SimHost {
    fn read_byte(&mut self, addr: Ha) -> Result<u8, BusError> {
        let at = self.span(addr, 1)?;
        Ok(self.inner.borrow().memory[at])
    }

    fn read_word(&mut self, addr: Ha) -> Result<u16, BusError> {
        let at = self.span(addr, 2)?;
        Ok(u16::from_be_bytes(self.inner.borrow().read(at)))
    }

    fn read_long(&mut self, addr: Ha) -> Result<u32, BusError> {
        let at = self.span(addr, 4)?;
        Ok(u32::from_be_bytes(self.inner.borrow().read(at)))
    }

    fn write_byte(&mut self, addr: Ha, value: u8) -> Result<(), BusError> {
        let at = self.span(addr, 1)?;
        self.inner.borrow_mut().memory[at] = value;
        Ok(())
    }

    fn write_word(&mut self, addr: Ha, value: u16) -> Result<(), BusError> {
        let at = self.span(addr, 2)?;
        self.inner.borrow_mut().memory[at..at + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn write_long(&mut self, addr: Ha, value: u32) -> Result<(), BusError> {
        let at = self.span(addr, 4)?;
        self.inner.borrow_mut().memory[at..at + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
}

impl HostCpu for SimHost {
    fn disable_interrupts(&mut self) {
        self.inner.borrow_mut().interrupts_masked = true;
    }

    fn control_registers(&self) -> ControlRegisters {
        self.inner.borrow().control
    }

    fn load_control_registers(&mut self, regs: &ControlRegisters) {
        let mut s = self.inner.borrow_mut();
        s.control = *regs;
        s.cacr_writes.push(regs.cacr);
    }

    fn mmu_registers(&self) -> MmuRegisters {
        self.inner.borrow().mmu
    }

    fn load_mmu_registers(&mut self, regs: &MmuRegisters) {
        let mut s = self.inner.borrow_mut();
        s.atc_flushes += 2;
        s.mmu = *regs;
        s.mmu_loads.push(*regs);
    }

    fn flush_atc(&mut self) {
        self.inner.borrow_mut().atc_flushes += 1;
    }

    fn set_cacr(&mut self, cacr: u32) {
        let mut s = self.inner.borrow_mut();
        s.control.cacr = cacr;
        s.cacr_writes.push(cacr);
    }
}
