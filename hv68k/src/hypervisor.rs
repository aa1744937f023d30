//! The hypervisor context.
//!
//! [`Hypervisor`] owns the host handle, the client address space, the
//! vector tables and the client's supervisor shadow. A run looks like this:
//!
//! ```text
//!   run ─┬─ disable irq, prepare ftables, save control registers
//!        ├─ load the hypervisor MMU image, cold boot the client
//!        ├─ dispatch the reset vector
//!        ├─ loop { step; dispatch traps; reflect bus/address errors }
//!        │       until Fault::Terminated or Fault::Fatal
//!        └─ disable irq, restore control registers and host MMU
//! ```
//!
//! Every handler the run calls may end it: returning `Fault::Terminated` or
//! `Fault::Fatal` unwinds to [`Hypervisor::run`] through `?`, and
//! [`Hypervisor::terminate`] additionally raises a flag that is checked
//! after each step and after each handler invocation.
use crate::{
    access::{AccessHandlers, HandlerTableId},
    addressing::Ca,
    client::{ClientCpu, ClientState, Step},
    config::Config,
    error::{FatalCode, Fault},
    fatal::FatalDump,
    ftable::{ByteHandler, FtableId, IoFunctions, LongHandler, WordHandler},
    host::{HostCpu, MmuRegisters, CACR_CLEAR_CACHES},
    mmu::{descriptor::Userdata, AddressSpace},
    vectors::{
        privilege::{PrivHandler, PrivKind, PrivilegedOp},
        Exception, Group, Vector, VectorHandler, Vectors,
    },
};
use alloc::{boxed::Box, rc::Rc, string::String};
use core::ops::RangeInclusive;

/// Callback run on a client cpu or device reset.
pub type ResetFn = dyn Fn(&mut Hypervisor) -> Result<(), Fault>;

/// Callback run when a run ends fatally.
pub type FatalFn = dyn Fn(&FatalDump);

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunExit {
    /// [`Hypervisor::terminate`] was called.
    Terminated,
    /// A fatal error occurred.
    Fatal(FatalDump),
}

/// The hypervisor.
pub struct Hypervisor {
    host: Box<dyn HostCpu>,
    pub(crate) mem: AddressSpace,
    vectors: Vectors,
    config: Config,
    host_mmu: MmuRegisters,
    client: ClientState,
    running: bool,
    cancel: bool,
    error: Option<FatalDump>,
    cpu_reset: Option<Rc<ResetFn>>,
    device_reset: Option<Rc<ResetFn>>,
    on_fatal: Option<Rc<FatalFn>>,
}

impl Hypervisor {
    /// Initialize the hypervisor on `host`.
    ///
    /// Captures the host MMU registers to restore after every run, maps the
    /// whole client space fatal and installs the default vectors.
    pub fn new(host: Box<dyn HostCpu>, config: Config) -> Self {
        let mut host_mmu = host.mmu_registers();
        if host_mmu.srp[0] == 0 {
            host_mmu.srp[0] = 0x0000_0002;
            host_mmu.srp[1] = host_mmu.crp[1];
        }
        log::info!(
            "init: {:?} client on {:?} host, host tc={:08x}",
            config.client_cpu,
            config.host_cpu,
            host_mmu.tc
        );
        Self {
            host,
            mem: AddressSpace::new(config.page_size),
            vectors: Vectors::new(config.client_cpu),
            config,
            host_mmu,
            client: ClientState::cold_boot(),
            running: false,
            cancel: false,
            error: None,
            cpu_reset: None,
            device_reset: None,
            on_fatal: None,
        }
    }

    /// The configuration in use.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Translation page size in bytes.
    #[inline]
    pub fn mmu_page_size(&self) -> u32 {
        self.mem.page_size()
    }

    /// The client address space.
    #[inline]
    pub fn address_space(&self) -> &AddressSpace {
        &self.mem
    }

    /// The host processor.
    #[inline]
    pub fn host(&mut self) -> &mut dyn HostCpu {
        self.host.as_mut()
    }

    /// The vector tables.
    #[inline]
    pub fn vectors(&self) -> &Vectors {
        &self.vectors
    }

    /// Supervisor shadow of the client.
    #[inline]
    pub fn client_state(&self) -> &ClientState {
        &self.client
    }

    /// Mutable supervisor shadow of the client.
    #[inline]
    pub fn client_state_mut(&mut self) -> &mut ClientState {
        &mut self.client
    }

    /// Returns true while [`Hypervisor::run`] executes the client.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Size in bytes of the host exception frame with format/vector word
    /// `format_word`.
    #[inline]
    pub fn stack_frame_size(&self, format_word: u16) -> u32 {
        self.vectors.frame_size(format_word)
    }

    /// Message of the last fatal error, if one is pending.
    pub fn last_error(&self) -> Option<String> {
        self.error
            .as_ref()
            .filter(|d| d.err != 0)
            .map(FatalDump::message)
            .filter(|m| !m.is_empty())
    }

    /// Call `f` when the client cpu resets.
    pub fn set_cpu_reset_callback(
        &mut self,
        f: impl Fn(&mut Hypervisor) -> Result<(), Fault> + 'static,
    ) {
        self.cpu_reset = Some(Rc::new(f));
    }

    /// Call `f` when the client executes `reset`.
    pub fn set_device_reset_callback(
        &mut self,
        f: impl Fn(&mut Hypervisor) -> Result<(), Fault> + 'static,
    ) {
        self.device_reset = Some(Rc::new(f));
    }

    /// Call `f` with the dump of a fatal error.
    pub fn set_fatal_callback(&mut self, f: impl Fn(&FatalDump) + 'static) {
        self.on_fatal = Some(Rc::new(f));
    }

    /// End the current run.
    ///
    /// The run stops after the running handler returns. The returned fault
    /// may be propagated to stop it immediately.
    pub fn terminate(&mut self) -> Fault {
        if !self.cancel {
            log::info!("terminate requested");
        }
        self.cancel = true;
        Fault::Terminated
    }

    #[inline]
    fn check(&self) -> Result<(), Fault> {
        if self.cancel {
            Err(Fault::Terminated)
        } else {
            Ok(())
        }
    }

    /// Run the client until it is terminated or fails fatally.
    pub fn run(&mut self, cpu: &mut dyn ClientCpu) -> RunExit {
        config_assert!(!self.running, "run: client is already running");
        self.host.disable_interrupts();
        let prepared = self.mem.prepare_ftables();
        let saved = self.host.control_registers();
        let image = self.mem.mmu_registers();
        self.host.load_mmu_registers(&image);
        self.mem.invalidate_atc();
        self.client = ClientState::cold_boot();
        self.error = None;
        self.cancel = false;
        self.running = true;
        log::info!("run: enter client, {} prepared pages", prepared);

        let exit = match self.execute(cpu) {
            Fault::Fatal(code) => RunExit::Fatal(self.fatal(cpu, code)),
            _ => RunExit::Terminated,
        };

        self.host.disable_interrupts();
        let mut restore = saved;
        restore.cacr |= CACR_CLEAR_CACHES;
        self.host.load_control_registers(&restore);
        let host_mmu = self.host_mmu;
        self.host.load_mmu_registers(&host_mmu);
        self.mem.invalidate_atc();
        self.running = false;
        self.cancel = false;
        log::info!("run: leave client, {:?}", exit);
        exit
    }

    fn execute(&mut self, cpu: &mut dyn ClientCpu) -> Fault {
        let mut result = self.dispatch(cpu, Vector::RESET);
        loop {
            let fault = match result.and_then(|()| self.check()) {
                Ok(()) => {
                    result = self.step(cpu);
                    continue;
                }
                Err(fault) => fault,
            };
            result = match fault {
                Fault::BusError(addr) => self.raise(cpu, Vector::BUS_ERROR, addr),
                Fault::AddressError(addr) => self.raise(cpu, Vector::ADDRESS_ERROR, addr),
                exit => return exit,
            };
        }
    }

    fn step(&mut self, cpu: &mut dyn ClientCpu) -> Result<(), Fault> {
        match cpu.step(self)? {
            Step::Continue => Ok(()),
            Step::Trap(vec) => self.dispatch(cpu, vec),
        }
    }

    fn fatal(&mut self, cpu: &dyn ClientCpu, code: FatalCode) -> FatalDump {
        let dump = FatalDump::new(code, &cpu.registers());
        log::error!("{}", dump.message());
        self.error = Some(dump);
        if let Some(f) = self.on_fatal.clone() {
            f(&dump);
        }
        dump
    }

    /// Bus or address error raised by a client access.
    fn raise(&mut self, cpu: &mut dyn ClientCpu, vec: Vector, addr: Ca) -> Result<(), Fault> {
        self.invoke(cpu, vec, Some(addr)).map_err(|fault| match fault {
            Fault::BusError(_) | Fault::AddressError(_) => {
                log::error!("double fault: {:?} at {} while handling {}", fault, addr, vec.0);
                Fault::Fatal(FatalCode::UNKNOWN)
            }
            f => f,
        })
    }

    /// Handle exception `vec` raised on the host.
    pub fn dispatch(&mut self, cpu: &mut dyn ClientCpu, vec: Vector) -> Result<(), Fault> {
        self.invoke(cpu, vec, None)
    }

    fn invoke(
        &mut self,
        cpu: &mut dyn ClientCpu,
        vec: Vector,
        address: Option<Ca>,
    ) -> Result<(), Fault> {
        match self.vectors.host(vec).clone() {
            VectorHandler::Reset => self.reset_client(cpu),
            VectorHandler::BusError | VectorHandler::AddressError => {
                self.reflect(cpu, vec, address)
            }
            VectorHandler::PrivilegeViolation => self.privilege_violation(cpu),
            VectorHandler::Group(group) => self.enter(cpu, vec, group, address),
            VectorHandler::Custom(f) => {
                f(self, cpu, vec)?;
                self.check()
            }
        }
    }

    /// Pass exception `vec` to the client through its dispatch entry.
    pub fn reflect(
        &mut self,
        cpu: &mut dyn ClientCpu,
        vec: Vector,
        address: Option<Ca>,
    ) -> Result<(), Fault> {
        match self.vectors.client(vec).clone() {
            VectorHandler::Group(group) => self.enter(cpu, vec, group, address),
            VectorHandler::BusError | VectorHandler::AddressError => {
                self.enter(cpu, vec, Group::Group0, address)
            }
            VectorHandler::PrivilegeViolation => self.enter(cpu, vec, Group::Group1, address),
            VectorHandler::Reset => self.reset_client(cpu),
            VectorHandler::Custom(f) => {
                f(self, cpu, vec)?;
                self.check()
            }
        }
    }

    fn enter(
        &mut self,
        cpu: &mut dyn ClientCpu,
        vector: Vector,
        group: Group,
        address: Option<Ca>,
    ) -> Result<(), Fault> {
        let exception = Exception {
            vector,
            group,
            model: self.vectors.model(),
            ipl: self.vectors.ipl(vector),
            address: if group == Group::Group0 { address } else { None },
        };
        log::trace!("enter client: {:?}", exception);
        cpu.take_exception(self, exception)
    }

    fn reset_client(&mut self, cpu: &mut dyn ClientCpu) -> Result<(), Fault> {
        log::debug!("client reset");
        self.client = ClientState::cold_boot();
        if let Some(f) = self.cpu_reset.clone() {
            f(self)?;
            self.check()?;
        }
        cpu.reset(self)
    }

    fn privilege_violation(&mut self, cpu: &mut dyn ClientCpu) -> Result<(), Fault> {
        let opcode = cpu.opcode();
        let handler = self
            .vectors
            .privilege
            .get(self.client.is_supervisor(), opcode)
            .clone();
        let kind = match handler {
            PrivHandler::Custom(f) => {
                f(self, cpu, opcode)?;
                return self.check();
            }
            PrivHandler::Builtin(kind) => kind,
        };
        let reflected = match kind {
            PrivKind::IllegalInstruction => Vector::ILLEGAL_INSTRUCTION,
            PrivKind::LineF => Vector::LINE_F,
            PrivKind::PrivilegeViolation => Vector::PRIVILEGE_VIOLATION,
            _ => match PrivilegedOp::decode(kind, opcode) {
                Some(op) => {
                    if op == PrivilegedOp::Reset {
                        if let Some(f) = self.device_reset.clone() {
                            f(self)?;
                            self.check()?;
                        }
                    }
                    return cpu.emulate(self, op);
                }
                None => Vector::ILLEGAL_INSTRUCTION,
            },
        };
        self.reflect(cpu, reflected, None)
    }

    /// Set the client dispatch entry, level tag and host entry of `vec`.
    pub fn set_vector(&mut self, vec: Vector, ipl: u8, handler: VectorHandler) {
        self.vectors.set(vec, ipl, handler);
    }

    /// Set the level tag of `vec`.
    pub fn set_vector_ipl(&mut self, vec: Vector, ipl: u8) {
        self.vectors.set_ipl(vec, ipl);
    }

    /// Set the host entry of `vec`.
    pub fn set_vector_handler(&mut self, vec: Vector, handler: VectorHandler) {
        self.vectors.set_handler(vec, handler);
    }

    /// Install privilege violation handlers for every opcode in `opcodes`.
    /// `None` leaves the entries of that mode untouched.
    pub fn set_privilege_violation_handler(
        &mut self,
        opcodes: RangeInclusive<u16>,
        supervisor: Option<PrivHandler>,
        user: Option<PrivHandler>,
    ) {
        self.vectors.privilege.set(opcodes, supervisor, user);
    }

    #[inline]
    fn stopped(&self, what: &str) {
        config_assert!(!self.running, "{}: client is running", what);
    }

    /// Map `[start, end)` to host RAM at `dest`.
    pub fn map_memory(&mut self, start: u32, end: u32, dest: u32) {
        self.stopped("map_memory");
        self.mem.map_memory(start, end, dest);
    }

    /// Map `[start, end)` to host memory at `dest`; client writes bus error.
    pub fn map_read_only(&mut self, start: u32, end: u32, dest: u32) {
        self.stopped("map_read_only");
        self.mem.map_read_only(start, end, dest);
    }

    /// Make every access to `[start, end)` a bus error.
    pub fn map_invalid(&mut self, start: u32, end: u32) {
        self.stopped("map_invalid");
        self.mem.map_invalid(start, end);
    }

    /// Make every access to `[start, end)` fatal.
    pub fn map_fatal(&mut self, start: u32, end: u32) {
        self.stopped("map_fatal");
        self.mem.map_fatal(start, end);
    }

    /// Reads of `[start, end)` return all ones, writes are dropped.
    pub fn map_disconnected(&mut self, start: u32, end: u32) -> FtableId {
        self.stopped("map_disconnected");
        self.mem.map_disconnected(start, end)
    }

    /// Access the host bus at the same address; host bus errors are fatal.
    pub fn map_pass_through(&mut self, start: u32, end: u32) {
        self.stopped("map_pass_through");
        self.mem.map_pass_through(start, end);
    }

    /// Access the host bus at the same address; host bus errors are passed
    /// to the client.
    pub fn map_pass_through_safe(&mut self, start: u32, end: u32) {
        self.stopped("map_pass_through_safe");
        self.mem.map_pass_through_safe(start, end);
    }

    /// Route every access to `[start, end)` through `handlers`.
    pub fn map_access_handler(
        &mut self,
        start: u32,
        end: u32,
        userdata: u32,
        handlers: &AccessHandlers,
    ) -> HandlerTableId {
        self.stopped("map_access_handler");
        self.mem
            .map_access_handler(start, end, Userdata::Value(userdata), handlers)
    }

    /// Route every access to `[start, end)` through one IO table.
    pub fn map_io_range_ex(&mut self, start: u32, end: u32, functions: IoFunctions) -> FtableId {
        self.stopped("map_io_range_ex");
        self.mem.map_io_range_ex(start, end, functions)
    }

    /// Route `[start, end)` through byte and word IO handlers; long
    /// accesses become two word accesses.
    pub fn map_io_range(
        &mut self,
        start: u32,
        end: u32,
        read_byte: ByteHandler,
        write_byte: ByteHandler,
        read_word: WordHandler,
        write_word: WordHandler,
    ) -> FtableId {
        self.stopped("map_io_range");
        self.mem
            .map_io_range(start, end, read_byte, write_byte, read_word, write_word)
    }

    /// Install byte handlers for exactly `addr`.
    pub fn map_io_byte(&mut self, addr: u32, read: ByteHandler, write: ByteHandler) {
        self.stopped("map_io_byte");
        self.mem.map_io_byte(addr, read, write);
    }

    /// Install word handlers for exactly `addr`.
    pub fn map_io_word(&mut self, addr: u32, read: WordHandler, write: WordHandler) {
        self.stopped("map_io_word");
        self.mem.map_io_word(addr, read, write);
    }

    /// Install long handlers for exactly `addr`.
    pub fn map_io_long(&mut self, addr: u32, read: LongHandler, write: LongHandler) {
        self.stopped("map_io_long");
        self.mem.map_io_long(addr, read, write);
    }

    /// Repoint the page holding `laddr` to host address `paddr`.
    ///
    /// May be called while the client runs: the translation cache is
    /// flushed before returning, so the next access sees the new page.
    /// Returns false if the page is not a memory page.
    pub fn remap_page(&mut self, laddr: u32, paddr: u32) -> bool {
        match self.mem.remap_page(laddr, paddr) {
            Some(flush) => {
                flush.flush(&mut self.mem, self.host.as_mut());
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::CpuModel,
        fatal::ClientRegisters,
        host::{ControlRegisters, SimHost},
    };
    use alloc::{rc::Rc, vec, vec::Vec};
    use core::cell::RefCell;

    /// A cpu that raises a fixed sequence of traps, then terminates.
    #[derive(Default)]
    struct Script {
        traps: Vec<Vector>,
        opcode: u16,
        taken: Vec<Exception>,
        emulated: Vec<PrivilegedOp>,
        resets: usize,
    }

    impl ClientCpu for Script {
        fn reset(&mut self, _hv: &mut Hypervisor) -> Result<(), Fault> {
            self.resets += 1;
            Ok(())
        }
        fn step(&mut self, hv: &mut Hypervisor) -> Result<Step, Fault> {
            if self.traps.is_empty() {
                return Err(hv.terminate());
            }
            Ok(Step::Trap(self.traps.remove(0)))
        }
        fn take_exception(&mut self, _hv: &mut Hypervisor, e: Exception) -> Result<(), Fault> {
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
                pc: 0x00fc_0000,
                ..Default::default()
            }
        }
    }

    fn hv(model: CpuModel) -> (SimHost, Hypervisor) {
        let host = SimHost::new(0x1000);
        let hv = Hypervisor::new(
            Box::new(host.clone()),
            Config::new().client_cpu(model),
        );
        (host, hv)
    }

    #[test]
    fn captured_srp_is_fixed() {
        let host = SimHost::new(0x10);
        host.with(|s| s.mmu.crp = [0x8000_0002, 0x1234_5670]);
        let mut hv = Hypervisor::new(Box::new(host.clone()), Config::new());
        let mut cpu = Script::default();
        assert_eq!(hv.run(&mut cpu), RunExit::Terminated);
        let restored = host.with(|s| s.mmu);
        assert_eq!(restored.srp, [0x0000_0002, 0x1234_5670]);
        assert_eq!(restored.crp, [0x8000_0002, 0x1234_5670]);
    }

    #[test]
    fn run_sequence() {
        let (host, mut hv) = hv(CpuModel::M68000);
        host.with(|s| {
            s.control = ControlRegisters {
                usp: 0x100,
                vbr: 0x800,
                sfc: 5,
                dfc: 5,
                caar: 4,
                cacr: 0x3111,
            }
        });
        let resets = Rc::new(RefCell::new(0));
        let r = resets.clone();
        hv.set_cpu_reset_callback(move |_| {
            *r.borrow_mut() += 1;
            Ok(())
        });
        let mut cpu = Script::default();
        assert_eq!(hv.run(&mut cpu), RunExit::Terminated);
        assert_eq!(cpu.resets, 1);
        assert_eq!(*resets.borrow(), 1);
        assert!(!hv.is_running());
        host.with(|s| {
            assert!(s.interrupts_masked);
            assert_eq!(s.mmu_loads.len(), 2);
            assert_eq!(s.mmu_loads[0], hv.address_space().mmu_registers());
            assert_eq!(s.control.cacr, 0x3111 | 0x0808);
            assert_eq!(s.control.vbr, 0x800);
        });
        assert_eq!(hv.last_error(), None);
    }

    #[test]
    fn privilege_dispatch() {
        let (_, mut hv) = hv(CpuModel::M68000);
        let mut cpu = Script {
            opcode: 0x4e73,
            traps: vec![Vector::PRIVILEGE_VIOLATION],
            ..Default::default()
        };
        hv.run(&mut cpu);
        assert_eq!(cpu.emulated, [PrivilegedOp::Rte]);

        // user mode rte is reflected as a privilege violation
        let mut cpu = Script {
            opcode: 0x4e73,
            traps: vec![Vector::PRIVILEGE_VIOLATION],
            ..Default::default()
        };
        hv.set_cpu_reset_callback(|hv| {
            hv.client_state_mut().sr.remove(crate::client::StatusRegister::S);
            Ok(())
        });
        hv.run(&mut cpu);
        assert!(cpu.emulated.is_empty());
        assert_eq!(cpu.taken.len(), 1);
        assert_eq!(cpu.taken[0].vector, Vector::PRIVILEGE_VIOLATION);
        assert_eq!(cpu.taken[0].group, Group::Group1);
    }

    #[test]
    fn illegal_and_line_f() {
        let (_, mut hv) = hv(CpuModel::M68010);
        for (opcode, vector) in [(0x4afc, Vector::ILLEGAL_INSTRUCTION), (0xf200, Vector::LINE_F)] {
            let mut cpu = Script {
                opcode,
                traps: vec![Vector::PRIVILEGE_VIOLATION],
                ..Default::default()
            };
            hv.run(&mut cpu);
            assert_eq!(cpu.taken.len(), 1);
            assert_eq!(cpu.taken[0].vector, vector);
            assert_eq!(cpu.taken[0].model, crate::vectors::FrameModel::M68010);
        }
    }

    #[test]
    fn device_reset() {
        let (_, mut hv) = hv(CpuModel::M68000);
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        hv.set_device_reset_callback(move |_| {
            *h.borrow_mut() += 1;
            Ok(())
        });
        let mut cpu = Script {
            opcode: 0x4e70,
            traps: vec![Vector::PRIVILEGE_VIOLATION, Vector::PRIVILEGE_VIOLATION],
            ..Default::default()
        };
        hv.run(&mut cpu);
        assert_eq!(*hits.borrow(), 2);
        assert_eq!(cpu.emulated, [PrivilegedOp::Reset, PrivilegedOp::Reset]);
    }

    #[test]
    fn custom_handlers() {
        let (_, mut hv) = hv(CpuModel::M68000);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        hv.set_vector_handler(
            Vector::trap(0),
            VectorHandler::custom(move |_, _, v| {
                s.borrow_mut().push(v);
                Ok(())
            }),
        );
        let s = seen.clone();
        hv.set_privilege_violation_handler(
            0x4e7a..=0x4e7b,
            Some(PrivHandler::custom(move |_, _, op| {
                s.borrow_mut().push(Vector(op as u8));
                Ok(())
            })),
            None,
        );
        let mut cpu = Script {
            opcode: 0x4e7b,
            traps: vec![Vector::trap(0), Vector::PRIVILEGE_VIOLATION, Vector::trap(1)],
            ..Default::default()
        };
        hv.run(&mut cpu);
        assert_eq!(*seen.borrow(), [Vector::trap(0), Vector(0x7b)]);
        // trap #1 keeps its default group 2 entry
        assert_eq!(cpu.taken.len(), 1);
        assert_eq!(cpu.taken[0].group, Group::Group2);
    }

    #[test]
    fn terminate_from_handler_stops_after_return() {
        let (_, mut hv) = hv(CpuModel::M68000);
        hv.set_vector_handler(
            Vector::trap(2),
            VectorHandler::custom(|hv, _, _| {
                hv.terminate();
                Ok(())
            }),
        );
        let mut cpu = Script {
            traps: vec![Vector::trap(2), Vector::trap(3)],
            ..Default::default()
        };
        assert_eq!(hv.run(&mut cpu), RunExit::Terminated);
        // trap #3 never ran
        assert_eq!(cpu.traps, [Vector::trap(3)]);
        assert!(cpu.taken.is_empty());
    }

    #[test]
    fn fatal_dump() {
        let (_, mut hv) = hv(CpuModel::M68000);
        let dumps = Rc::new(RefCell::new(Vec::new()));
        let d = dumps.clone();
        hv.set_fatal_callback(move |dump| d.borrow_mut().push(*dump));
        hv.set_vector_handler(
            Vector::trap(5),
            VectorHandler::custom(|_, _, _| Err(Fault::Fatal(FatalCode(0)))),
        );
        let mut cpu = Script {
            traps: vec![Vector::trap(5)],
            ..Default::default()
        };
        let RunExit::Fatal(dump) = hv.run(&mut cpu) else {
            panic!("run did not fail");
        };
        assert_eq!(dump.err, 0xffff_ffff);
        assert_eq!(*dumps.borrow(), [dump]);
        assert_eq!(
            hv.last_error().as_deref(),
            Some("Fatal error: $ffffffff at $00fc0000")
        );
    }

    #[test]
    fn stack_frames() {
        let (_, hv) = hv(CpuModel::M68000);
        assert_eq!(hv.stack_frame_size(0xB008), 92);
        assert_eq!(hv.stack_frame_size(0x0080), 8);
        assert_eq!(hv.mmu_page_size(), 256);
    }

    #[test]
    #[cfg_attr(not(feature = "unchecked"), should_panic(expected = "client is running"))]
    fn map_while_running() {
        let (_, mut hv) = hv(CpuModel::M68000);
        hv.set_vector_handler(
            Vector::trap(0),
            VectorHandler::custom(|hv, _, _| {
                hv.map_memory(0, 0x100, 0);
                Ok(())
            }),
        );
        let mut cpu = Script {
            traps: vec![Vector::trap(0)],
            ..Default::default()
        };
        hv.run(&mut cpu);
    }
}
