//! Client address space.
//!
//! [`AddressSpace`] owns the translation trees, the stage-1 handler tables
//! and the IO function tables. Every page of the 16MB client bus carries
//! exactly one [`PageDescriptor`]. The map operations rewrite ranges of
//! descriptors; [`AddressSpace::remap_page`] repoints a single page and
//! hands back an [`AtcFlush`] that must be consumed.
//!
//! ## Address translation cache
//! Lookups done on behalf of the client go through a small model of the
//! 68030 ATC. Like the real one it is not kept coherent with the tables: a
//! remapped page keeps translating to its old target until the cache is
//! flushed, which is why [`AtcFlush`] exists.
pub mod descriptor;
pub mod tree;

use crate::{
    access::{AccessHandler, AccessHandlers, HandlerTable, HandlerTableId},
    addressing::{Ca, Ha, PageId, CLIENT_SPACE},
    config::PageSize,
    ftable::Ftable,
    host::{HostCpu, MmuRegisters, CACR_CLEAR_CACHES},
};
use alloc::{collections::VecDeque, vec::Vec};
use core::mem::ManuallyDrop;
use descriptor::{MapFlags, PageDescriptor, Userdata};
use tree::{Tree, Walk};

/// Number of entries in the 68030 address translation cache.
pub const ATC_ENTRIES: usize = 22;

/// Model of the address translation cache.
#[derive(Debug, Default)]
pub struct Atc {
    entries: VecDeque<(u32, PageDescriptor)>,
}

impl Atc {
    fn get(&self, page: u32) -> Option<PageDescriptor> {
        self.entries
            .iter()
            .find(|(p, _)| *p == page)
            .map(|(_, d)| *d)
    }

    fn insert(&mut self, page: u32, desc: PageDescriptor) {
        if self.entries.len() == ATC_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back((page, desc));
    }

    /// Drop every cached translation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached translations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A page whose descriptor changed under a possibly stale ATC.
///
/// Dropping this without calling [`AtcFlush::flush`] panics.
#[must_use]
pub struct AtcFlush(Ca);

impl AtcFlush {
    /// Flush the ATC and clear the caches (`pflusha; movec #$0808,cacr`).
    pub fn flush(self, space: &mut AddressSpace, host: &mut dyn HostCpu) {
        let _addr = ManuallyDrop::new(self).0;
        space.atc.clear();
        host.flush_atc();
        host.set_cacr(CACR_CLEAR_CACHES);
    }

    /// Forget this modification.
    ///
    /// # Safety
    /// The ATC must be flushed by another way before the client runs again.
    pub unsafe fn forget(self) {
        core::mem::forget(self);
    }
}

impl Drop for AtcFlush {
    fn drop(&mut self) {
        panic!("ATC entry for {:?} is not flushed.", self.0);
    }
}

/// The client address space.
pub struct AddressSpace {
    page_size: PageSize,
    tree: Tree,
    atc: Atc,
    pub(crate) handlers: Vec<HandlerTable>,
    pub(crate) ftables: Vec<Ftable>,
}

impl AddressSpace {
    /// Build the translation trees and map the whole client space fatal.
    pub fn new(page_size: PageSize) -> Self {
        let fill = PageDescriptor::page(Ha::new(0), MapFlags::CI | MapFlags::S);
        let mut this = Self {
            page_size,
            tree: Tree::new(page_size, fill),
            atc: Atc::default(),
            handlers: Vec::new(),
            ftables: Vec::new(),
        };
        let regs = this.tree.registers();
        log::info!(
            "mmu: {} byte pages, {} descriptors, tc={:08x} srp={:08x}:{:08x} crp={:08x}:{:08x}",
            page_size.bytes(),
            this.tree.pages.len(),
            regs.tc,
            regs.srp[0],
            regs.srp[1],
            regs.crp[0],
            regs.crp[1]
        );
        this.map_fatal(0, CLIENT_SPACE);
        this
    }

    /// Page size in bytes.
    #[inline]
    pub fn page_size(&self) -> u32 {
        self.page_size.bytes()
    }

    /// MMU register image that selects the hypervisor's trees.
    pub fn mmu_registers(&self) -> MmuRegisters {
        self.tree.registers()
    }

    /// The translation trees.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// The address translation cache model.
    pub fn atc(&self) -> &Atc {
        &self.atc
    }

    /// Page that holds `addr`.
    #[inline]
    pub fn page_of(&self, addr: Ca) -> PageId {
        PageId(addr.into_u32() >> self.page_size.shift())
    }

    /// Offset of `addr` inside its page.
    #[inline]
    pub fn page_offset(&self, addr: Ca) -> u32 {
        addr.into_u32() & self.page_size.offset_mask()
    }

    fn walk(&self, addr: Ca) -> PageDescriptor {
        match self.tree.walk(self.tree.user_root(), addr.into_u32()) {
            Walk::Page(id) => self.tree.pages[id.into_usize()],
            Walk::Direct(ha) => PageDescriptor::Mapped {
                base: ha & !self.page_size.offset_mask(),
                read_only: false,
                cache_inhibit: true,
            },
            Walk::Invalid => PageDescriptor::Invalid {
                base: Ha::new(addr.into_u32()),
            },
        }
    }

    /// Descriptor of the page holding `addr`, read from the tables.
    pub fn descriptor(&self, addr: Ca) -> PageDescriptor {
        self.walk(addr)
    }

    /// Host address `addr` translates to, if the page is mapped.
    pub fn translate(&self, addr: Ca) -> Option<Ha> {
        match self.walk(addr) {
            PageDescriptor::Mapped { base, .. } => Some(base + self.page_offset(addr)),
            _ => None,
        }
    }

    /// Descriptor of the page holding `addr` as the client sees it, through
    /// the ATC.
    pub(crate) fn lookup(&mut self, addr: Ca) -> PageDescriptor {
        let page = self.page_of(addr).0;
        if let Some(d) = self.atc.get(page) {
            return d;
        }
        let d = self.walk(addr);
        self.atc.insert(page, d);
        d
    }

    /// Descriptor of page `id`.
    #[inline]
    pub(crate) fn page(&self, id: PageId) -> PageDescriptor {
        self.tree.pages[id.into_usize()]
    }

    /// Drop the cached translations after a table change made while the
    /// client is stopped.
    #[inline]
    pub(crate) fn invalidate_atc(&mut self) {
        self.atc.clear();
    }

    /// Mutable descriptor of page `id`.
    #[inline]
    pub(crate) fn page_mut(&mut self, id: PageId) -> &mut PageDescriptor {
        &mut self.tree.pages[id.into_usize()]
    }

    /// Page indices covered by `[start, end)`.
    fn page_range(&self, what: &str, start: u32, end: u32) -> core::ops::Range<u32> {
        let align = self.page_size.offset_mask();
        config_assert!(start & align == 0, "{}: unaligned 0x{:08x}", what, start);
        config_assert!(end & align == 0, "{}: unaligned 0x{:08x}", what, end);
        config_assert!(
            start <= end && end <= CLIENT_SPACE,
            "{}: bad range 0x{:08x}-0x{:08x}",
            what,
            start,
            end
        );
        let shift = self.page_size.shift();
        let end = (end.min(CLIENT_SPACE) as u64 + align as u64) as u32 & !align;
        (start >> shift)..(end >> shift)
    }

    /// Map `[start, end)` to host memory at `dest` with `flags`.
    pub fn map_address_range(&mut self, start: u32, end: u32, dest: u32, flags: MapFlags) {
        let align = self.page_size.offset_mask();
        config_assert!(
            dest & align == 0,
            "map_address_range: unaligned 0x{:08x}",
            dest
        );
        log::debug!(
            "map: [{:02x}] 0x{:08x}-0x{:08x} -> 0x{:08x}",
            flags.bits(),
            start,
            end,
            dest
        );
        let mut dest = Ha::new(dest & !align);
        for i in self.page_range("map_address_range", start, end) {
            *self.page_mut(PageId(i)) = PageDescriptor::page(dest, flags);
            dest += self.page_size.bytes();
        }
        self.atc.clear();
    }

    /// Map `[start, end)` to host RAM at `dest`.
    pub fn map_memory(&mut self, start: u32, end: u32, dest: u32) {
        self.map_address_range(start, end, dest, MapFlags::CI);
    }

    /// Map `[start, end)` to host memory at `dest`; client writes bus error.
    pub fn map_read_only(&mut self, start: u32, end: u32, dest: u32) {
        self.map_address_range(start, end, dest, MapFlags::CI | MapFlags::WP);
    }

    /// Make every client access to `[start, end)` a bus error.
    pub fn map_invalid(&mut self, start: u32, end: u32) {
        self.map_address_range(start, end, start, MapFlags::CI | MapFlags::S);
    }

    /// Route every access to `[start, end)` through `handlers`.
    ///
    /// One handler table is allocated per call and shared by all pages of
    /// the range.
    pub fn map_access_handler(
        &mut self,
        start: u32,
        end: u32,
        userdata: Userdata,
        handlers: &AccessHandlers,
    ) -> HandlerTableId {
        if let Userdata::Value(v) = userdata {
            config_assert!(
                v & 0xFF == 0,
                "map_access_handler: unaligned userdata 0x{:08x}",
                v
            );
        }
        let table = HandlerTableId(self.handlers.len() as u32);
        self.handlers.push(HandlerTable::new(handlers));
        log::debug!(
            "map: [{:08x}] 0x{:08x}-0x{:08x}",
            userdata.to_word(),
            start,
            end
        );
        for i in self.page_range("map_access_handler", start, end) {
            *self.page_mut(PageId(i)) = PageDescriptor::Handler { table, userdata };
        }
        self.atc.clear();
        table
    }

    /// Every access to `[start, end)` ends the run.
    pub fn map_fatal(&mut self, start: u32, end: u32) {
        self.map_access_handler(
            start,
            end,
            Userdata::Value(0),
            &AccessHandlers::uniform(AccessHandler::Fatal),
        );
    }

    /// Access the host bus at the same address. Host bus errors are fatal.
    pub fn map_pass_through(&mut self, start: u32, end: u32) {
        self.map_access_handler(
            start,
            end,
            Userdata::Value(0),
            &AccessHandlers::uniform(AccessHandler::PassThrough),
        );
    }

    /// Access the host bus at the same address. Host bus errors are passed
    /// to the client.
    pub fn map_pass_through_safe(&mut self, start: u32, end: u32) {
        self.map_access_handler(
            start,
            end,
            Userdata::Value(0),
            &AccessHandlers::uniform(AccessHandler::PassThroughSafe),
        );
    }

    /// Repoint the page holding `laddr` to host address `paddr`.
    ///
    /// Only mapped and invalid pages carry an address; for handler pages
    /// nothing changes and `None` is returned.
    pub fn remap_page(&mut self, laddr: u32, paddr: u32) -> Option<AtcFlush> {
        let addr = Ca::from_bus(laddr);
        let id = self.page_of(addr);
        if self.page_mut(id).set_base(Ha::new(paddr)) {
            Some(AtcFlush(addr))
        } else {
            log::warn!("remap: 0x{:08x} is not a memory page", laddr);
            None
        }
    }

    /// Handler table `id`.
    #[inline]
    pub fn handler_table(&self, id: HandlerTableId) -> &HandlerTable {
        &self.handlers[id.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{host::SimHost, mmu::descriptor::DescriptorType};
    use quickcheck::{quickcheck, TestResult};

    fn space() -> AddressSpace {
        AddressSpace::new(PageSize::nearest(256))
    }

    #[test]
    fn starts_fatal() {
        let s = space();
        for addr in [0, 0x1234, 0x00FF_FF00] {
            match s.descriptor(Ca::from_bus(addr)) {
                PageDescriptor::Handler { table, userdata } => {
                    assert_eq!(userdata, Userdata::Value(0));
                    assert!(matches!(
                        s.handler_table(table).slot(crate::AccessKind::ReadByte),
                        AccessHandler::Fatal
                    ));
                }
                d => panic!("unexpected {:?}", d),
            }
        }
    }

    #[test]
    fn map_flags() {
        let mut s = space();
        s.map_memory(0, 0x1000, 0x10_0000);
        s.map_read_only(0x1000, 0x2000, 0x20_0000);
        s.map_invalid(0x2000, 0x2100);
        assert_eq!(
            s.descriptor(Ca::from_bus(0x0FFF)).to_long(),
            [0xFC41, 0x0010_0F00]
        );
        assert_eq!(
            s.descriptor(Ca::from_bus(0x1000)).to_long(),
            [0xFC45, 0x0020_0000]
        );
        assert_eq!(s.descriptor(Ca::from_bus(0x2080)).to_long(), [0xFD41, 0x2000]);
        assert_eq!(s.translate(Ca::from_bus(0x0ABC)), Some(Ha::new(0x10_0ABC)));
        assert_eq!(s.translate(Ca::from_bus(0x2000)), None);
        // upper address bits are not decoded
        assert_eq!(s.translate(Ca::from_bus(0xFF00_0ABC)), Some(Ha::new(0x10_0ABC)));
    }

    #[test]
    #[cfg_attr(not(feature = "unchecked"), should_panic(expected = "unaligned"))]
    fn unaligned_map() {
        let mut s = space();
        s.map_memory(0x10, 0x100, 0);
    }

    #[test]
    fn remap_needs_flush() {
        let mut host = SimHost::new(0x100);
        let mut s = space();
        s.map_memory(0, 0x100, 0x1000);
        assert_eq!(s.lookup(Ca::from_bus(0x10)).to_long()[1], 0x1000);

        let flush = s.remap_page(0x10, 0x2000).unwrap();
        // the ATC still holds the old translation
        assert_eq!(s.lookup(Ca::from_bus(0x10)).to_long()[1], 0x1000);
        flush.flush(&mut s, &mut host);
        assert_eq!(s.lookup(Ca::from_bus(0x10)).to_long()[1], 0x2000);
        host.with(|h| {
            assert_eq!(h.atc_flushes, 1);
            assert_eq!(h.cacr_writes, vec![0x0808]);
        });
    }

    #[test]
    fn remap_keeps_flags_and_skips_handlers() {
        let mut host = SimHost::new(0x100);
        let mut s = space();
        s.map_read_only(0x100, 0x200, 0x1000);
        s.remap_page(0x100, 0x3007).unwrap().flush(&mut s, &mut host);
        assert_eq!(
            s.descriptor(Ca::from_bus(0x100)).to_long(),
            [0xFC45, 0x3000]
        );
        assert!(s.remap_page(0x200, 0x3000).is_none());
    }

    #[test]
    #[should_panic(expected = "is not flushed")]
    fn dropped_flush_panics() {
        let mut s = space();
        s.map_memory(0, 0x100, 0);
        let _ = s.remap_page(0, 0x100);
    }

    #[test]
    fn atc_is_bounded() {
        let mut s = space();
        for i in 0..40 {
            s.lookup(Ca::from_bus(i << 8));
        }
        assert_eq!(s.atc().len(), ATC_ENTRIES);
    }

    quickcheck! {
        fn coverage(start: u16, len: u16, dest: u16, ps: u8) -> TestResult {
            let mut s = AddressSpace::new(PageSize::nearest(256 << (ps % 8)));
            let bytes = s.page_size();
            let start = (start as u32 * 256) & !(bytes - 1);
            let end = (start + (len as u32 & 0xFF) * bytes).min(CLIENT_SPACE);
            let dest = (dest as u32 * 256) & !(bytes - 1);
            if start == end {
                return TestResult::discard();
            }
            s.map_memory(start, end, dest);
            let probes = [start, start + 1, end - 1, (start + end) / 2];
            let inside = probes.iter().all(|&a| {
                let d = s.descriptor(Ca::from_bus(a));
                d.kind() == DescriptorType::Page
                    && s.translate(Ca::from_bus(a)) == Some(Ha::new(dest + (a - start)))
            });
            let outside = end == CLIENT_SPACE
                || matches!(s.descriptor(Ca::from_bus(end)), PageDescriptor::Handler { .. });
            TestResult::from_bool(inside && outside)
        }
    }
}
