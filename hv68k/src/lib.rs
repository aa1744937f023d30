//! A 68000/68010 hypervisor for 68030 hosts.
//!
//! The client is a 68000 or 68010 machine: a cpu on a 24-bit bus, with RAM,
//! ROM and memory mapped devices. The host is a 68030 whose MMU is turned
//! into the interception mechanism: every page of the client bus is either
//! mapped straight onto host memory, or marked invalid so that each access
//! faults into a handler that emulates the device behind it. Privileged
//! instructions the client may execute but the host refuses in user mode
//! trap into the hypervisor and are emulated on the client's behalf.
//!
//! ## Components
//!
//! - [`mmu`] builds the translation trees. The supervisor tree maps the host
//!   1:1 below its top 16MB. The user tree folds the upper address byte away
//!   and ends in one long descriptor per client page.
//! - [`access`] holds the stage-1 handler tables that invalid pages point to:
//!   one slot per bus cycle kind.
//! - [`ftable`] holds IO function tables, per range or expanded per byte
//!   offset of a page, and [`ftable::prepare`] narrows them before each run.
//! - [`vectors`] holds the exception vector tables, the privilege violation
//!   tables indexed by opcode and the host stack frame size table.
//! - [`Hypervisor`] glues everything together: it runs the client, reflects
//!   exceptions into it, and restores the host on the way out.
//!
//! ## Getting started
//!
//! ```ignore
//! let host = SimHost::new(0x10_0000);
//! let mut hv = Hypervisor::new(Box::new(host.clone()), Config::new().page_size(4096));
//! hv.map_memory(0x00_0000, 0x08_0000, 0x08_0000);
//! hv.map_read_only(0xfc_0000, 0xff_0000, 0x04_0000);
//! hv.map_disconnected(0xff_0000, 0x100_0000);
//! hv.set_fatal_callback(|dump| eprintln!("{}", dump.message()));
//! match hv.run(&mut cpu) {
//!     RunExit::Terminated => {}
//!     RunExit::Fatal(dump) => return Err(dump),
//! }
//! ```
//!
//! The client cpu is supplied by the caller as a [`ClientCpu`]. It issues
//! its bus cycles through [`Hypervisor::access`] and friends, and reports
//! the exceptions its instructions raise as [`Step::Trap`].
//!
//! ## Setup and run phases
//!
//! The map and vector operations build tables and may only be called while
//! the client is stopped. [`Hypervisor::remap_page`] is the exception: device
//! handlers running inside [`Hypervisor::run`] may use it to switch memory
//! banks, and the translation cache is flushed before it returns.
//!
//! ## Checked builds
//!
//! Misuse of the setup API (unaligned ranges, IO refinement of a page
//! without an IO table, mapping while running) panics with a description of
//! the problem. The `unchecked` feature compiles these checks out; the
//! offending request is then rounded or ignored.

#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

extern crate alloc;

/// Assert a setup-time condition unless the `unchecked` feature is set.
macro_rules! config_assert {
    ($cond:expr, $($arg:tt)+) => {
        if cfg!(not(feature = "unchecked")) {
            assert!($cond, $($arg)+);
        }
    };
}

pub mod access;
pub mod addressing;
mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod fatal;
pub mod ftable;
pub mod host;
mod hypervisor;
pub mod mmu;
pub mod vectors;

pub use access::{Access, AccessHandler, AccessHandlers, AccessKind};
pub use addressing::{Ca, Ha};
pub use client::{ClientCpu, ClientState, StatusRegister, Step};
pub use config::{Config, CpuModel, PageSize};
pub use error::{FatalCode, Fault};
pub use fatal::{ClientRegisters, FatalDump};
pub use ftable::{ByteHandler, Dir, IoFunctions, LongHandler, WordHandler};
pub use host::{HostBus, HostCpu, SimHost};
pub use hypervisor::{FatalFn, Hypervisor, ResetFn, RunExit};
pub use mmu::AddressSpace;
pub use vectors::{
    privilege::{PrivHandler, PrivKind, PrivilegedOp},
    Exception, Group, Vector, VectorHandler,
};
