//! Client bus.
//!
//! Every memory access of the client goes through [`Hypervisor::access`].
//! The page descriptor is looked up through the ATC model:
//!
//! - mapped pages touch host memory directly, and writes to a read-only page
//!   are bus errors,
//! - invalid pages are bus errors,
//! - handler pages run the stage-1 slot selected by the cycle kind.
//!
//! Composite IO handlers issue their sub-accesses through the same path, so
//! a word split into two bytes reaches whatever the byte offsets are mapped
//! to.
use crate::{
    access::{Access, AccessHandler, AccessKind},
    addressing::{Ca, Ha},
    error::{BusError, FatalCode, Fault},
    ftable::{ByteHandler, Dir, LongHandler, WordHandler},
    host::HostBus,
    mmu::descriptor::{PageDescriptor, Userdata},
    Hypervisor,
};

impl AccessKind {
    fn of(dir: Dir, width: u32) -> Self {
        match (dir, width) {
            (Dir::Read, 1) => AccessKind::ReadByte,
            (Dir::Read, 2) => AccessKind::ReadWord,
            (Dir::Read, 3) => AccessKind::ReadThree,
            (Dir::Read, _) => AccessKind::ReadLong,
            (Dir::Write, 1) => AccessKind::WriteByte,
            (Dir::Write, 2) => AccessKind::WriteWord,
            (Dir::Write, 3) => AccessKind::WriteThree,
            (Dir::Write, _) => AccessKind::WriteLong,
        }
    }

    fn dir(self) -> Dir {
        if self.is_write() {
            Dir::Write
        } else {
            Dir::Read
        }
    }
}

impl Hypervisor {
    /// Read a byte of client memory.
    #[inline]
    pub fn read_byte(&mut self, addr: u32) -> Result<u8, Fault> {
        self.access(AccessKind::ReadByte, addr, 0).map(|v| v as u8)
    }

    /// Read a word of client memory.
    #[inline]
    pub fn read_word(&mut self, addr: u32) -> Result<u16, Fault> {
        self.access(AccessKind::ReadWord, addr, 0).map(|v| v as u16)
    }

    /// Read a long word of client memory.
    #[inline]
    pub fn read_long(&mut self, addr: u32) -> Result<u32, Fault> {
        self.access(AccessKind::ReadLong, addr, 0)
    }

    /// Write a byte of client memory.
    #[inline]
    pub fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), Fault> {
        self.access(AccessKind::WriteByte, addr, value as u32)
            .map(|_| ())
    }

    /// Write a word of client memory.
    #[inline]
    pub fn write_word(&mut self, addr: u32, value: u16) -> Result<(), Fault> {
        self.access(AccessKind::WriteWord, addr, value as u32)
            .map(|_| ())
    }

    /// Write a long word of client memory.
    #[inline]
    pub fn write_long(&mut self, addr: u32, value: u32) -> Result<(), Fault> {
        self.access(AccessKind::WriteLong, addr, value).map(|_| ())
    }

    /// Test and set the byte at `addr`. Returns its old value.
    #[inline]
    pub fn test_and_set(&mut self, addr: u32) -> Result<u8, Fault> {
        self.access(AccessKind::ReadModifyWrite, addr, 0)
            .map(|v| v as u8)
    }

    /// Run one client bus cycle.
    ///
    /// Returns the value read, or `data` for writes. A read-modify-write
    /// cycle returns the old byte and stores it with bit 7 set.
    pub fn access(&mut self, kind: AccessKind, addr: u32, data: u32) -> Result<u32, Fault> {
        let addr = Ca::from_bus(addr);
        let data = data & kind.data_mask();
        match self.mem.lookup(addr) {
            PageDescriptor::Mapped {
                base, read_only, ..
            } => {
                if read_only && modifies(kind) {
                    return Err(Fault::BusError(addr));
                }
                let offset = self.mem.page_offset(addr);
                if offset + kind.width() > self.mem.page_size() {
                    return self.split(kind.dir(), addr, &[1; 4][..kind.width() as usize], data);
                }
                self.host_access(kind, base + offset, data)
                    .map_err(|_| Fault::BusError(addr))
            }
            PageDescriptor::Invalid { .. } => Err(Fault::BusError(addr)),
            PageDescriptor::Handler { table, userdata } => {
                let handler = self.mem.handler_table(table).slot(kind).clone();
                let mut access = Access { kind, addr, data };
                self.stage1(handler, userdata, &mut access)?;
                Ok(access.data & kind.data_mask())
            }
        }
    }

    /// Issue the sub-accesses of `widths` bytes that make up one access.
    fn split(&mut self, dir: Dir, addr: Ca, widths: &[u32], data: u32) -> Result<u32, Fault> {
        let total: u32 = widths.iter().sum();
        let mut offset = 0;
        let mut out = 0;
        for &w in widths {
            let kind = AccessKind::of(dir, w);
            let shift = 8 * (total - offset - w);
            let mask = kind.data_mask();
            let part = self.access(kind, (addr + offset).into_u32(), (data >> shift) & mask)?;
            out |= (part & mask) << shift;
            offset += w;
        }
        Ok(out)
    }

    fn host_access(&mut self, kind: AccessKind, at: Ha, data: u32) -> Result<u32, BusError> {
        let host = self.host();
        Ok(match kind {
            AccessKind::ReadByte => host.read_byte(at)? as u32,
            AccessKind::ReadWord => host.read_word(at)? as u32,
            AccessKind::ReadLong => host.read_long(at)?,
            AccessKind::ReadThree => {
                let hi = host.read_byte(at)? as u32;
                let mid = host.read_byte(at + 1)? as u32;
                let lo = host.read_byte(at + 2)? as u32;
                (hi << 16) | (mid << 8) | lo
            }
            AccessKind::WriteByte => {
                host.write_byte(at, data as u8)?;
                data
            }
            AccessKind::WriteWord => {
                host.write_word(at, data as u16)?;
                data
            }
            AccessKind::WriteLong => {
                host.write_long(at, data)?;
                data
            }
            AccessKind::WriteThree => {
                host.write_byte(at, (data >> 16) as u8)?;
                host.write_byte(at + 1, (data >> 8) as u8)?;
                host.write_byte(at + 2, data as u8)?;
                data
            }
            AccessKind::ReadModifyWrite => {
                let old = host.read_byte(at)?;
                host.write_byte(at, old | 0x80)?;
                old as u32
            }
        })
    }

    fn stage1(
        &mut self,
        handler: AccessHandler,
        userdata: Userdata,
        access: &mut Access,
    ) -> Result<(), Fault> {
        let addr = access.addr;
        match handler {
            AccessHandler::Fatal => {
                log::error!("fatal access handler: {:?} at {}", access.kind, addr);
                Err(Fault::Fatal(FatalCode::ACCESS_HANDLER))
            }
            AccessHandler::BusError => Err(Fault::BusError(addr)),
            AccessHandler::Ignore => {
                if !access.kind.is_write() {
                    access.data = 0;
                }
                Ok(())
            }
            AccessHandler::ReadFF => {
                if !access.kind.is_write() {
                    access.data = access.kind.data_mask();
                }
                Ok(())
            }
            AccessHandler::PassThrough => {
                access.data = self
                    .host_access(access.kind, Ha::new(addr.into_u32()), access.data)
                    .map_err(|e| {
                        log::error!("pass-through: {}", e);
                        Fault::Fatal(FatalCode::UNHANDLED_BUS_ERROR)
                    })?;
                Ok(())
            }
            AccessHandler::PassThroughSafe => {
                access.data = self
                    .host_access(access.kind, Ha::new(addr.into_u32()), access.data)
                    .map_err(|_| Fault::BusError(addr))?;
                Ok(())
            }
            AccessHandler::Ftable => self.ftable_access(userdata, access, false),
            AccessHandler::FtablePrepared => self.ftable_access(userdata, access, true),
            AccessHandler::Custom(f) => f(self, userdata.to_word(), access),
        }
    }

    fn ftable_access(
        &mut self,
        userdata: Userdata,
        access: &mut Access,
        prepared: bool,
    ) -> Result<(), Fault> {
        let Userdata::Ftable(id) = userdata else {
            log::error!("IO dispatch without a table at {}", access.addr);
            return Err(Fault::Fatal(FatalCode::INVALID_CALLBACK));
        };
        let addr = access.addr;
        let idx = self.mem.page_offset(addr) as usize;
        let dir = access.kind.dir();
        match access.kind {
            AccessKind::ReadModifyWrite => {
                log::error!("read-modify-write on IO page at {}", addr);
                Err(Fault::Fatal(if prepared {
                    FatalCode::READ_MODIFY_WRITE_PREPARED
                } else {
                    FatalCode::READ_MODIFY_WRITE
                }))
            }
            AccessKind::ReadThree | AccessKind::WriteThree => {
                access.data = self.split(dir, addr, &[1, 1, 1], access.data)?;
                Ok(())
            }
            AccessKind::ReadByte | AccessKind::WriteByte => {
                let h = self.mem.ftable(id).byte(dir, idx);
                let mut v = access.data as u8;
                self.io_byte(h, dir, addr, &mut v)?;
                access.data = v as u32;
                Ok(())
            }
            AccessKind::ReadWord | AccessKind::WriteWord => {
                let h = self.mem.ftable(id).word(dir, idx);
                let mut v = access.data as u16;
                self.io_word(h, dir, addr, &mut v)?;
                access.data = v as u32;
                Ok(())
            }
            AccessKind::ReadLong | AccessKind::WriteLong => {
                let h = self.mem.ftable(id).long(dir, idx);
                self.io_long(h, dir, addr, &mut access.data)
            }
        }
    }

    fn io_pass_through(&mut self, dir: Dir, width: u32, addr: Ca, value: u32) -> Result<u32, Fault> {
        self.host_access(AccessKind::of(dir, width), Ha::new(addr.into_u32()), value)
            .map_err(|e| {
                log::error!("IO pass-through: {}", e);
                Fault::Fatal(FatalCode::UNHANDLED_BUS_ERROR)
            })
    }

    /// Execute a byte IO handler.
    pub fn io_byte(
        &mut self,
        h: ByteHandler,
        dir: Dir,
        addr: Ca,
        v: &mut u8,
    ) -> Result<(), Fault> {
        match h {
            ByteHandler::Ignore | ByteHandler::Read00 => {
                if dir == Dir::Read {
                    *v = 0;
                }
            }
            ByteHandler::ReadFF => {
                if dir == Dir::Read {
                    *v = 0xFF;
                }
            }
            ByteHandler::BusError => return Err(Fault::BusError(addr)),
            ByteHandler::Fatal => return Err(Fault::Fatal(FatalCode::ACCESS_HANDLER)),
            ByteHandler::PassThrough => *v = self.io_pass_through(dir, 1, addr, *v as u32)? as u8,
            ByteHandler::Custom(f) => return f(self, addr, v),
        }
        Ok(())
    }

    /// Execute a word IO handler.
    pub fn io_word(
        &mut self,
        h: WordHandler,
        dir: Dir,
        addr: Ca,
        v: &mut u16,
    ) -> Result<(), Fault> {
        match h {
            WordHandler::Ignore | WordHandler::Read00 => {
                if dir == Dir::Read {
                    *v = 0;
                }
            }
            WordHandler::ReadFF => {
                if dir == Dir::Read {
                    *v = 0xFFFF;
                }
            }
            WordHandler::BusError => return Err(Fault::BusError(addr)),
            WordHandler::Fatal => return Err(Fault::Fatal(FatalCode::ACCESS_HANDLER)),
            WordHandler::PassThrough => *v = self.io_pass_through(dir, 2, addr, *v as u32)? as u16,
            WordHandler::Bytes => *v = self.split(dir, addr, &[1, 1], *v as u32)? as u16,
            WordHandler::Custom(f) => return f(self, addr, v),
        }
        Ok(())
    }

    /// Execute a long IO handler.
    pub fn io_long(
        &mut self,
        h: LongHandler,
        dir: Dir,
        addr: Ca,
        v: &mut u32,
    ) -> Result<(), Fault> {
        let widths: &[u32] = match h {
            LongHandler::Ignore | LongHandler::Read00 => {
                if dir == Dir::Read {
                    *v = 0;
                }
                return Ok(());
            }
            LongHandler::ReadFF => {
                if dir == Dir::Read {
                    *v = 0xFFFF_FFFF;
                }
                return Ok(());
            }
            LongHandler::BusError => return Err(Fault::BusError(addr)),
            LongHandler::Fatal => return Err(Fault::Fatal(FatalCode::ACCESS_HANDLER)),
            LongHandler::PassThrough => {
                *v = self.io_pass_through(dir, 4, addr, *v)?;
                return Ok(());
            }
            LongHandler::Custom(f) => return f(self, addr, v),
            LongHandler::Words => &[2, 2],
            LongHandler::BytesBytes => &[1, 1, 1, 1],
            LongHandler::BytesWord => &[1, 1, 2],
            LongHandler::WordBytes => &[2, 1, 1],
        };
        *v = self.split(dir, addr, widths, *v)?;
        Ok(())
    }
}

/// Returns true if the cycle stores to memory.
#[inline]
fn modifies(kind: AccessKind) -> bool {
    kind.is_write() || kind == AccessKind::ReadModifyWrite
}
