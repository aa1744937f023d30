//! Translation trees.
//!
//! Two trees share one table arena. The supervisor tree maps the host's
//! 32-bit space onto itself with early-termination descriptors, except for
//! the top 16MB, which shares the bottom table and mirrors the first 16MB.
//! The user
//! tree folds the upper 8 address bits away and ends in sixteen bottom
//! tables of long page descriptors, one per megabyte of client space.
use super::descriptor::{PageDescriptor, ShortDescriptor, TableId};
use crate::{
    addressing::{Ha, PageId},
    config::PageSize,
    host::MmuRegisters,
};
use alloc::{vec, vec::Vec};

/// Index bits of the three pointer levels.
const TIA_BITS: u32 = 4;
const TIB_BITS: u32 = 4;
const TIC_BITS: u32 = 4;
/// Initial shift.
const IS_BITS: u32 = 0;

/// Transparent translation, 0x01000000-0x7FFFFFFF, cache inhibited.
pub const TT0: u32 = 0x017E_8573;
/// Transparent translation, 0x80000000-0xFEFFFFFF, cache inhibited.
pub const TT1: u32 = 0x807E_8573;
/// Root pointer limit word: lower limit 0, short table below.
pub const ROOT_POINTER: u32 = 0x8000_0002;

/// Result of walking a tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Walk {
    /// Terminated early at a page descriptor of a pointer level.
    Direct(Ha),
    /// Reached a long page descriptor.
    Page(PageId),
    /// Hit an invalid pointer-level descriptor.
    Invalid,
}

/// Table arena holding both translation trees.
pub struct Tree {
    page_size: PageSize,
    tables: Vec<[ShortDescriptor; 16]>,
    pub(super) pages: Vec<PageDescriptor>,
    supervisor_root: TableId,
    user_root: TableId,
}

impl Tree {
    /// Build both trees. Every user page starts as `fill`.
    pub fn new(page_size: PageSize, fill: PageDescriptor) -> Self {
        let mut this = Self {
            page_size,
            tables: Vec::new(),
            pages: vec![fill; 16 * page_size.tid_entries()],
            supervisor_root: TableId(0),
            user_root: TableId(0),
        };
        this.supervisor_root = this.build_supervisor();
        this.user_root = this.build_user();
        this
    }

    fn alloc(&mut self) -> TableId {
        self.tables.push([ShortDescriptor::Invalid; 16]);
        TableId(self.tables.len() as u32 - 1)
    }

    fn build_supervisor(&mut self) -> TableId {
        let page = |base: u32| ShortDescriptor::Page {
            base: Ha::new(base),
            cache_inhibit: true,
        };
        let tia = self.alloc();
        let tib0 = self.alloc();
        let tib1 = self.alloc();
        let tic = self.alloc();

        let t = &mut self.tables[tia.0 as usize];
        t[0] = ShortDescriptor::Table(tib0);
        for (i, e) in t.iter_mut().enumerate().take(15).skip(1) {
            *e = page((i as u32) << 28);
        }
        t[15] = ShortDescriptor::Table(tib1);

        let t = &mut self.tables[tib0.0 as usize];
        t[0] = ShortDescriptor::Table(tic);
        for (i, e) in t.iter_mut().enumerate().skip(1) {
            *e = page((i as u32) << 24);
        }

        let t = &mut self.tables[tib1.0 as usize];
        for (i, e) in t.iter_mut().enumerate().take(15) {
            *e = page(0xF000_0000 | ((i as u32) << 24));
        }
        t[15] = ShortDescriptor::Table(tic);

        let t = &mut self.tables[tic.0 as usize];
        for (i, e) in t.iter_mut().enumerate() {
            *e = page((i as u32) << 20);
        }
        tia
    }

    fn build_user(&mut self) -> TableId {
        let tia = self.alloc();
        let tib = self.alloc();
        let tic = self.alloc();
        self.tables[tia.0 as usize] = [ShortDescriptor::Table(tib); 16];
        self.tables[tib.0 as usize] = [ShortDescriptor::Table(tic); 16];
        for (i, e) in self.tables[tic.0 as usize].iter_mut().enumerate() {
            *e = ShortDescriptor::LongTable(i as u32);
        }
        tia
    }

    /// Walk the tree rooted at `root` for `addr`.
    pub fn walk(&self, root: TableId, addr: u32) -> Walk {
        let mut table = root;
        let mut shift = 32 - IS_BITS - TIA_BITS;
        loop {
            let idx = ((addr >> shift) & 0xF) as usize;
            match self.tables[table.0 as usize][idx] {
                ShortDescriptor::Invalid => break Walk::Invalid,
                ShortDescriptor::Page { base, .. } => {
                    break Walk::Direct(base + (addr & ((1 << shift) - 1)))
                }
                ShortDescriptor::Table(next) if shift > 32 - TIA_BITS - TIB_BITS - TIC_BITS => {
                    table = next;
                    shift -= 4;
                }
                ShortDescriptor::Table(_) => break Walk::Invalid,
                ShortDescriptor::LongTable(i) => {
                    let entries = self.page_size.tid_entries() as u32;
                    let d = (addr >> self.page_size.shift()) & (entries - 1);
                    break Walk::Page(PageId(i * entries + d));
                }
            }
        }
    }

    /// Root of the supervisor tree.
    #[inline]
    pub fn supervisor_root(&self) -> TableId {
        self.supervisor_root
    }

    /// Root of the user tree.
    #[inline]
    pub fn user_root(&self) -> TableId {
        self.user_root
    }

    /// Pointer-level table `id`.
    #[inline]
    pub fn table(&self, id: TableId) -> &[ShortDescriptor; 16] {
        &self.tables[id.0 as usize]
    }

    /// MMU register image selecting these trees.
    pub fn registers(&self) -> MmuRegisters {
        let ps = self.page_size.shift();
        MmuRegisters {
            srp: [ROOT_POINTER, self.supervisor_root.address_word()],
            crp: [ROOT_POINTER, self.user_root.address_word()],
            tt0: TT0,
            tt1: TT1,
            tc: (ps << 20)
                | (IS_BITS << 16)
                | (TIA_BITS << 12)
                | (TIB_BITS << 8)
                | (TIC_BITS << 4)
                | self.page_size.tid_bits()
                | 0x0200_0000
                | 0x8000_0000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::descriptor::MapFlags;
    use quickcheck::quickcheck;

    fn tree(bytes: u32) -> Tree {
        Tree::new(
            PageSize::nearest(bytes),
            PageDescriptor::page(Ha::new(0), MapFlags::CI | MapFlags::S),
        )
    }

    #[test]
    fn tc_values() {
        assert_eq!(tree(256).registers().tc, 0x8280_444C);
        assert_eq!(tree(4096).registers().tc, 0x82C0_4448);
        assert_eq!(tree(32768).registers().tc, 0x82F0_4445);
        let r = tree(256).registers();
        assert_eq!(r.tt0, 0x017E_8573);
        assert_eq!(r.tt1, 0x807E_8573);
        assert_eq!(r.srp[0], 0x8000_0002);
        assert_ne!(r.srp[1], r.crp[1]);
    }

    #[test]
    fn user_tree_folds_upper_byte() {
        let t = tree(256);
        let root = t.user_root();
        assert_eq!(t.walk(root, 0), Walk::Page(PageId(0)));
        assert_eq!(t.walk(root, 0x0000_01FF), Walk::Page(PageId(1)));
        assert_eq!(t.walk(root, 0x00FF_FFFF), Walk::Page(PageId(0xFFFF)));
        assert_eq!(t.walk(root, 0xFF10_0000), t.walk(root, 0x0010_0000));
    }

    #[test]
    fn supervisor_top_mirrors_bottom() {
        let t = tree(256);
        let root = t.supervisor_root();
        assert_eq!(t.walk(root, 0xFF00_0000), Walk::Direct(Ha::new(0)));
        assert_eq!(t.walk(root, 0xFF12_3456), Walk::Direct(Ha::new(0x0012_3456)));
        assert_eq!(t.walk(root, 0xFEFF_FFFF), Walk::Direct(Ha::new(0xFEFF_FFFF)));
    }

    quickcheck! {
        fn supervisor_tree_is_identity_below_top(addr: u32) -> bool {
            let t = tree(1024);
            let want = if addr >= 0xFF00_0000 { addr & 0x00FF_FFFF } else { addr };
            t.walk(t.supervisor_root(), addr) == Walk::Direct(Ha::new(want))
        }

        fn user_pages_are_linear(addr: u32, ps: u8) -> bool {
            let bytes = 256u32 << (ps % 8);
            let t = tree(bytes);
            let addr = addr & 0x00FF_FFFF;
            t.walk(t.user_root(), addr) == Walk::Page(PageId(addr / bytes))
        }
    }
}
