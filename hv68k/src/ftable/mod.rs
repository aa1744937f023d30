//! IO function tables.
//!
//! A page mapped with [`AddressSpace::map_io_range_ex`] dispatches every
//! access to per-width IO handlers. All pages of one range share a single
//! *collapsed* table. Refining one address with `map_io_byte`, `map_io_word`
//! or `map_io_long` *expands* the table of that page into one record per
//! byte offset. Each slot of an expanded record remembers whether it still
//! inherits the collapsed handler or was specialized, so that word and long
//! accesses can be narrowed into byte or word composites when the handlers
//! of neighbouring offsets differ (see [`prepare`]).
//!
//! [`AddressSpace::map_io_range_ex`]: crate::AddressSpace::map_io_range_ex
pub mod prepare;

use crate::{
    access::{AccessHandler, AccessHandlers},
    addressing::{Ca, PageId},
    error::Fault,
    mmu::{
        descriptor::{PageDescriptor, Userdata},
        AddressSpace,
    },
    Hypervisor,
};
use alloc::{rc::Rc, vec, vec::Vec};

/// Custom byte IO handler.
pub type ByteFn = dyn Fn(&mut Hypervisor, Ca, &mut u8) -> Result<(), Fault>;
/// Custom word IO handler.
pub type WordFn = dyn Fn(&mut Hypervisor, Ca, &mut u16) -> Result<(), Fault>;
/// Custom long IO handler.
pub type LongFn = dyn Fn(&mut Hypervisor, Ca, &mut u32) -> Result<(), Fault>;

#[inline]
fn same_fn<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

/// Direction of an IO access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dir {
    /// Client reads.
    Read,
    /// Client writes.
    Write,
}

/// Byte IO handler.
#[derive(Clone)]
pub enum ByteHandler {
    /// Reads return zero, writes are dropped.
    Ignore,
    /// Report a bus error to the client.
    BusError,
    /// End the run.
    Fatal,
    /// Reads return 0x00.
    Read00,
    /// Reads return 0xFF.
    ReadFF,
    /// Access the host bus at the same address.
    PassThrough,
    /// Call a closure.
    Custom(Rc<ByteFn>),
}

/// Word IO handler.
#[derive(Clone)]
pub enum WordHandler {
    /// Reads return zero, writes are dropped.
    Ignore,
    /// Report a bus error to the client.
    BusError,
    /// End the run.
    Fatal,
    /// Reads return 0x0000.
    Read00,
    /// Reads return 0xFFFF.
    ReadFF,
    /// Access the host bus at the same address.
    PassThrough,
    /// Two byte accesses, high byte first.
    Bytes,
    /// Call a closure.
    Custom(Rc<WordFn>),
}

/// Long IO handler.
#[derive(Clone)]
pub enum LongHandler {
    /// Reads return zero, writes are dropped.
    Ignore,
    /// Report a bus error to the client.
    BusError,
    /// End the run.
    Fatal,
    /// Reads return 0x00000000.
    Read00,
    /// Reads return 0xFFFFFFFF.
    ReadFF,
    /// Access the host bus at the same address.
    PassThrough,
    /// Two word accesses.
    Words,
    /// Four byte accesses.
    BytesBytes,
    /// Two byte accesses, then a word access.
    BytesWord,
    /// A word access, then two byte accesses.
    WordBytes,
    /// Call a closure.
    Custom(Rc<LongFn>),
}

impl ByteHandler {
    /// Wrap a closure.
    pub fn custom(f: impl Fn(&mut Hypervisor, Ca, &mut u8) -> Result<(), Fault> + 'static) -> Self {
        ByteHandler::Custom(Rc::new(f))
    }
}

impl WordHandler {
    /// Wrap a closure.
    pub fn custom(
        f: impl Fn(&mut Hypervisor, Ca, &mut u16) -> Result<(), Fault> + 'static,
    ) -> Self {
        WordHandler::Custom(Rc::new(f))
    }
}

impl LongHandler {
    /// Wrap a closure.
    pub fn custom(
        f: impl Fn(&mut Hypervisor, Ca, &mut u32) -> Result<(), Fault> + 'static,
    ) -> Self {
        LongHandler::Custom(Rc::new(f))
    }
}

macro_rules! handler_traits {
    ($t:ident { $($v:ident),* }) => {
        impl PartialEq for $t {
            fn eq(&self, other: &Self) -> bool {
                match (self, other) {
                    $(($t::$v, $t::$v) => true,)*
                    ($t::Custom(a), $t::Custom(b)) => same_fn(a, b),
                    _ => false,
                }
            }
        }

        impl core::fmt::Debug for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self {
                    $($t::$v => write!(f, stringify!($v)),)*
                    $t::Custom(c) => write!(f, "Custom({:p})", Rc::as_ptr(c) as *const ()),
                }
            }
        }
    };
}

handler_traits!(ByteHandler { Ignore, BusError, Fatal, Read00, ReadFF, PassThrough });
handler_traits!(WordHandler { Ignore, BusError, Fatal, Read00, ReadFF, PassThrough, Bytes });
handler_traits!(LongHandler {
    Ignore, BusError, Fatal, Read00, ReadFF, PassThrough, Words, BytesBytes, BytesWord, WordBytes
});

/// A slot of an expanded record.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot<H> {
    /// Still the handler copied from the collapsed table.
    Inherited {
        /// Handler of the collapsed table.
        base: H,
        /// Narrowed handler, once computed.
        resolved: Option<H>,
    },
    /// Installed for this offset.
    Specialized(H),
}

impl<H: Clone + PartialEq> Slot<H> {
    fn inherit(base: &H) -> Self {
        Slot::Inherited {
            base: base.clone(),
            resolved: None,
        }
    }

    /// Handler inherited from the collapsed table, unless specialized.
    pub fn inherited(&self) -> Option<&H> {
        match self {
            Slot::Inherited { base, .. } => Some(base),
            Slot::Specialized(_) => None,
        }
    }

    /// Narrowed or specialized handler, if known.
    pub fn cached(&self) -> Option<&H> {
        match self {
            Slot::Inherited { resolved, .. } => resolved.as_ref(),
            Slot::Specialized(h) => Some(h),
        }
    }

    fn forget(&mut self) {
        if let Slot::Inherited { resolved, .. } = self {
            *resolved = None;
        }
    }
}

/// Handlers of a collapsed table.
#[derive(Clone, Debug, PartialEq)]
pub struct IoFunctions {
    pub read_byte: ByteHandler,
    pub write_byte: ByteHandler,
    pub read_word: WordHandler,
    pub write_word: WordHandler,
    pub read_long: LongHandler,
    pub write_long: LongHandler,
}

impl IoFunctions {
    fn byte(&self, dir: Dir) -> &ByteHandler {
        match dir {
            Dir::Read => &self.read_byte,
            Dir::Write => &self.write_byte,
        }
    }

    fn word(&self, dir: Dir) -> &WordHandler {
        match dir {
            Dir::Read => &self.read_word,
            Dir::Write => &self.write_word,
        }
    }

    fn long(&self, dir: Dir) -> &LongHandler {
        match dir {
            Dir::Read => &self.read_long,
            Dir::Write => &self.write_long,
        }
    }
}

/// Handlers of one byte offset of an expanded table.
#[derive(Clone, Debug, PartialEq)]
pub struct IoRecord {
    pub read_byte: Slot<ByteHandler>,
    pub write_byte: Slot<ByteHandler>,
    pub read_word: Slot<WordHandler>,
    pub write_word: Slot<WordHandler>,
    pub read_long: Slot<LongHandler>,
    pub write_long: Slot<LongHandler>,
}

impl IoRecord {
    fn inherit(f: &IoFunctions) -> Self {
        Self {
            read_byte: Slot::inherit(&f.read_byte),
            write_byte: Slot::inherit(&f.write_byte),
            read_word: Slot::inherit(&f.read_word),
            write_word: Slot::inherit(&f.write_word),
            read_long: Slot::inherit(&f.read_long),
            write_long: Slot::inherit(&f.write_long),
        }
    }

    /// Byte slot for `dir`.
    pub fn byte(&self, dir: Dir) -> &Slot<ByteHandler> {
        match dir {
            Dir::Read => &self.read_byte,
            Dir::Write => &self.write_byte,
        }
    }

    /// Word slot for `dir`.
    pub fn word(&self, dir: Dir) -> &Slot<WordHandler> {
        match dir {
            Dir::Read => &self.read_word,
            Dir::Write => &self.write_word,
        }
    }

    /// Long slot for `dir`.
    pub fn long(&self, dir: Dir) -> &Slot<LongHandler> {
        match dir {
            Dir::Read => &self.read_long,
            Dir::Write => &self.write_long,
        }
    }

    fn forget(&mut self) {
        self.read_byte.forget();
        self.write_byte.forget();
        self.read_word.forget();
        self.write_word.forget();
        self.read_long.forget();
        self.write_long.forget();
    }
}

/// Byte handler at `idx` of an expanded table.
pub fn resolve_byte(records: &[IoRecord], idx: usize, dir: Dir) -> ByteHandler {
    match records[idx].byte(dir) {
        Slot::Inherited { base, .. } | Slot::Specialized(base) => base.clone(),
    }
}

/// Word handler at `idx` of an expanded table.
///
/// An inherited word keeps the table's word handler only while both of its
/// bytes still inherit the same byte handler. Once either byte is
/// specialized the word becomes two byte accesses.
pub fn resolve_word(records: &[IoRecord], idx: usize, dir: Dir) -> WordHandler {
    if idx & 1 != 0 || idx + 1 >= records.len() {
        return WordHandler::BusError;
    }
    match records[idx].word(dir) {
        Slot::Specialized(h) => h.clone(),
        Slot::Inherited { base, .. } => {
            let b0 = records[idx].byte(dir).inherited();
            let b1 = records[idx + 1].byte(dir).inherited();
            match (b0, b1) {
                (Some(b0), Some(b1)) if b0 == b1 => base.clone(),
                _ => WordHandler::Bytes,
            }
        }
    }
}

/// Returns true if the word at `idx` dispatches through the table's word
/// handler.
fn word_inherited(records: &[IoRecord], idx: usize, dir: Dir) -> bool {
    records[idx].word(dir).inherited().is_some()
        && resolve_word(records, idx, dir) != WordHandler::Bytes
}

/// Long handler at `idx` of an expanded table.
///
/// An inherited long keeps the table's long handler only while both of its
/// words do the same. Otherwise it is composed from the narrowed words at
/// `idx` and `idx + 2`. The last word of a page has no successor in the
/// table and is treated as differing from it.
pub fn resolve_long(records: &[IoRecord], idx: usize, dir: Dir) -> LongHandler {
    if idx & 1 != 0 || idx + 1 >= records.len() {
        return LongHandler::BusError;
    }
    match records[idx].long(dir) {
        Slot::Specialized(h) => h.clone(),
        Slot::Inherited { base, .. } => {
            let next = idx + 2 < records.len();
            if next && word_inherited(records, idx, dir) && word_inherited(records, idx + 2, dir) {
                return base.clone();
            }
            let w0 = resolve_word(records, idx, dir);
            let w1 = next.then(|| resolve_word(records, idx + 2, dir));
            match (&w0, &w1) {
                (WordHandler::Bytes, Some(WordHandler::Bytes)) => LongHandler::BytesBytes,
                (WordHandler::Bytes, _) => LongHandler::BytesWord,
                (_, Some(WordHandler::Bytes)) => LongHandler::WordBytes,
                _ => LongHandler::Words,
            }
        }
    }
}

/// Index of an [`Ftable`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FtableId(pub(crate) u32);

/// IO function table of a page.
#[derive(Clone, Debug, PartialEq)]
pub enum Ftable {
    /// One record for every offset of every page in the range.
    Collapsed(IoFunctions),
    /// One record per byte offset of a single page.
    Expanded(Vec<IoRecord>),
}

impl Ftable {
    /// Returns true for an expanded table.
    #[inline]
    pub fn is_expanded(&self) -> bool {
        matches!(self, Ftable::Expanded(_))
    }

    /// Byte handler at page offset `idx`.
    pub fn byte(&self, dir: Dir, idx: usize) -> ByteHandler {
        match self {
            Ftable::Collapsed(f) => f.byte(dir).clone(),
            Ftable::Expanded(r) => match r[idx].byte(dir).cached() {
                Some(h) => h.clone(),
                None => resolve_byte(r, idx, dir),
            },
        }
    }

    /// Word handler at page offset `idx`. Odd offsets bus error.
    pub fn word(&self, dir: Dir, idx: usize) -> WordHandler {
        if idx & 1 != 0 {
            return WordHandler::BusError;
        }
        match self {
            Ftable::Collapsed(f) => f.word(dir).clone(),
            Ftable::Expanded(r) => match r[idx].word(dir).cached() {
                Some(h) => h.clone(),
                None => resolve_word(r, idx, dir),
            },
        }
    }

    /// Long handler at page offset `idx`. Odd offsets bus error.
    pub fn long(&self, dir: Dir, idx: usize) -> LongHandler {
        if idx & 1 != 0 {
            return LongHandler::BusError;
        }
        match self {
            Ftable::Collapsed(f) => f.long(dir).clone(),
            Ftable::Expanded(r) => match r[idx].long(dir).cached() {
                Some(h) => h.clone(),
                None => resolve_long(r, idx, dir),
            },
        }
    }
}

impl AddressSpace {
    /// IO table `id`.
    #[inline]
    pub fn ftable(&self, id: FtableId) -> &Ftable {
        &self.ftables[id.0 as usize]
    }

    /// IO table of the page holding `addr`, read from the tables.
    pub fn ftable_of(&self, addr: Ca) -> Option<FtableId> {
        match self.descriptor(addr) {
            PageDescriptor::Handler {
                userdata: Userdata::Ftable(id),
                ..
            } => Some(id),
            _ => None,
        }
    }

    /// Route every access to `[start, end)` through one collapsed IO table.
    pub fn map_io_range_ex(&mut self, start: u32, end: u32, functions: IoFunctions) -> FtableId {
        let id = FtableId(self.ftables.len() as u32);
        self.ftables.push(Ftable::Collapsed(functions));
        self.map_access_handler(
            start,
            end,
            Userdata::Ftable(id),
            &AccessHandlers::uniform(AccessHandler::Ftable),
        );
        id
    }

    /// [`AddressSpace::map_io_range_ex`] with long accesses split into two
    /// word accesses.
    pub fn map_io_range(
        &mut self,
        start: u32,
        end: u32,
        read_byte: ByteHandler,
        write_byte: ByteHandler,
        read_word: WordHandler,
        write_word: WordHandler,
    ) -> FtableId {
        self.map_io_range_ex(
            start,
            end,
            IoFunctions {
                read_byte,
                write_byte,
                read_word,
                write_word,
                read_long: LongHandler::Words,
                write_long: LongHandler::Words,
            },
        )
    }

    /// Reads of `[start, end)` return all ones, writes are dropped.
    pub fn map_disconnected(&mut self, start: u32, end: u32) -> FtableId {
        self.map_io_range_ex(
            start,
            end,
            IoFunctions {
                read_byte: ByteHandler::ReadFF,
                write_byte: ByteHandler::Ignore,
                read_word: WordHandler::ReadFF,
                write_word: WordHandler::Ignore,
                read_long: LongHandler::ReadFF,
                write_long: LongHandler::Ignore,
            },
        )
    }

    /// Expanded IO table of the page holding `addr`, and the offset of
    /// `addr` in it.
    ///
    /// A collapsed table is copied into a new expanded table owned by this
    /// page alone. Returns `None` if the page has no IO table.
    pub fn expanded_ftable(&mut self, addr: Ca) -> Option<(FtableId, usize)> {
        log::debug!("expand: {}", addr);
        let page = self.page_of(addr);
        let offset = self.page_offset(addr) as usize;
        let (table, old) = match *self.page_mut(page) {
            PageDescriptor::Handler {
                table,
                userdata: Userdata::Ftable(id),
            } => (table, id),
            _ => return None,
        };
        let records = match self.ftable(old) {
            Ftable::Expanded(_) => return Some((old, offset)),
            Ftable::Collapsed(f) => vec![IoRecord::inherit(f); self.page_size() as usize],
        };
        let id = FtableId(self.ftables.len() as u32);
        self.ftables.push(Ftable::Expanded(records));
        *self.page_mut(page) = PageDescriptor::Handler {
            table,
            userdata: Userdata::Ftable(id),
        };
        self.invalidate_atc();
        Some((id, offset))
    }

    fn specialize(&mut self, what: &str, addr: u32, f: impl FnOnce(&mut IoRecord)) {
        let Some((id, offset)) = self.expanded_ftable(Ca::from_bus(addr)) else {
            config_assert!(false, "{}: no IO table at 0x{:08x}", what, addr);
            log::warn!("{}: no IO table at 0x{:08x}", what, addr);
            return;
        };
        if let Ftable::Expanded(records) = &mut self.ftables[id.0 as usize] {
            f(&mut records[offset]);
            records.iter_mut().for_each(IoRecord::forget);
        }
    }

    /// Install byte handlers for exactly `addr`.
    pub fn map_io_byte(&mut self, addr: u32, read: ByteHandler, write: ByteHandler) {
        self.specialize("map_io_byte", addr, |r| {
            r.read_byte = Slot::Specialized(read);
            r.write_byte = Slot::Specialized(write);
        });
    }

    /// Install word handlers for exactly `addr`.
    pub fn map_io_word(&mut self, addr: u32, read: WordHandler, write: WordHandler) {
        self.specialize("map_io_word", addr, |r| {
            r.read_word = Slot::Specialized(read);
            r.write_word = Slot::Specialized(write);
        });
    }

    /// Install long handlers for exactly `addr`.
    pub fn map_io_long(&mut self, addr: u32, read: LongHandler, write: LongHandler) {
        self.specialize("map_io_long", addr, |r| {
            r.read_long = Slot::Specialized(read);
            r.write_long = Slot::Specialized(write);
        });
    }

    /// Page ids mapped to an expanded IO table.
    pub(crate) fn expanded_pages(&self) -> impl Iterator<Item = (PageId, FtableId)> + '_ {
        (0..(crate::addressing::CLIENT_SPACE >> self.page_size().trailing_zeros()))
            .map(PageId)
            .filter_map(move |p| match self.page(p) {
                PageDescriptor::Handler {
                    userdata: Userdata::Ftable(id),
                    ..
                } if self.ftable(id).is_expanded() => Some((p, id)),
                _ => None,
            })
    }
}
