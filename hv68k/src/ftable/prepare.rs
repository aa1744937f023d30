//! Fault-path preparation.
//!
//! Runs before every entry into the client. Each page with an expanded IO
//! table gets its stage-1 slots switched to the prepared dispatch, and the
//! narrowed handler of every inherited slot is computed once and stored, so
//! that the fault path reads it instead of comparing neighbours.
//!
//! Narrowing only changes how a handler is found. [`Ftable::byte`],
//! [`Ftable::word`] and [`Ftable::long`] compute the same values lazily for
//! records that were never prepared.
use super::{resolve_byte, resolve_long, resolve_word, Dir, Ftable, IoRecord, Slot};
use crate::mmu::{
    descriptor::PageDescriptor,
    AddressSpace,
};
use alloc::vec::Vec;

fn store<H>(slot: &mut Slot<H>, h: H) {
    if let Slot::Inherited { resolved, .. } = slot {
        *resolved = Some(h);
    }
}

/// Narrow every inherited slot of an expanded table.
pub fn narrow(records: &mut [IoRecord]) {
    for dir in [Dir::Read, Dir::Write] {
        // Resolution reads only the inherited/specialized state, so all
        // three passes can be computed before anything is stored.
        let words: Vec<_> = (0..records.len())
            .map(|i| resolve_word(records, i, dir))
            .collect();
        let longs: Vec<_> = (0..records.len())
            .map(|i| resolve_long(records, i, dir))
            .collect();
        let bytes: Vec<_> = (0..records.len())
            .map(|i| resolve_byte(records, i, dir))
            .collect();
        for (((r, w), l), b) in records.iter_mut().zip(words).zip(longs).zip(bytes) {
            match dir {
                Dir::Read => {
                    store(&mut r.read_word, w);
                    store(&mut r.read_long, l);
                    store(&mut r.read_byte, b);
                }
                Dir::Write => {
                    store(&mut r.write_word, w);
                    store(&mut r.write_long, l);
                    store(&mut r.write_byte, b);
                }
            }
        }
    }
}

impl AddressSpace {
    /// Prepare every page that carries an expanded IO table. Returns the
    /// number of pages prepared.
    pub fn prepare_ftables(&mut self) -> usize {
        let pages: Vec<_> = self.expanded_pages().collect();
        for &(page, id) in pages.iter() {
            if let PageDescriptor::Handler { table, .. } = self.page(page) {
                self.handlers[table.0 as usize].set_prepared();
            }
            if let Ftable::Expanded(records) = &mut self.ftables[id.0 as usize] {
                narrow(records);
            }
        }
        log::debug!("prepare: {} expanded pages", pages.len());
        pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        access::{AccessHandler, AccessKind},
        addressing::Ca,
        config::PageSize,
        ftable::{ByteHandler, IoFunctions, LongHandler, WordHandler},
    };
    use quickcheck::{quickcheck, Gen};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn io() -> IoFunctions {
        IoFunctions {
            read_byte: ByteHandler::Read00,
            write_byte: ByteHandler::Ignore,
            read_word: WordHandler::Read00,
            write_word: WordHandler::Ignore,
            read_long: LongHandler::Words,
            write_long: LongHandler::Words,
        }
    }

    #[test]
    fn skips_collapsed_pages() {
        let mut s = AddressSpace::new(PageSize::nearest(256));
        s.map_io_range_ex(0, 0x400, io());
        assert_eq!(s.prepare_ftables(), 0);
        s.map_io_byte(0x205, ByteHandler::ReadFF, ByteHandler::Ignore);
        assert_eq!(s.prepare_ftables(), 1);

        match s.descriptor(Ca::from_bus(0x200)) {
            PageDescriptor::Handler { table, .. } => assert!(matches!(
                s.handler_table(table).slot(AccessKind::ReadWord),
                AccessHandler::FtablePrepared
            )),
            d => panic!("unexpected {:?}", d),
        }
    }

    #[test]
    fn stored_values_match_rules() {
        let mut s = AddressSpace::new(PageSize::nearest(256));
        s.map_io_range_ex(0, 0x100, io());
        s.map_io_byte(0x05, ByteHandler::ReadFF, ByteHandler::Ignore);
        s.prepare_ftables();
        let id = s.ftable_of(Ca::from_bus(0)).unwrap();
        let Ftable::Expanded(r) = s.ftable(id) else {
            panic!("not expanded");
        };
        assert_eq!(r[4].read_word.cached(), Some(&WordHandler::Bytes));
        assert_eq!(r[2].read_long.cached(), Some(&LongHandler::WordBytes));
        assert_eq!(r[4].read_long.cached(), Some(&LongHandler::BytesWord));
        assert_eq!(r[5].read_word.cached(), Some(&WordHandler::BusError));
        assert_eq!(r[6].read_word.cached(), Some(&WordHandler::Read00));
        assert_eq!(r[6].read_byte.cached(), Some(&ByteHandler::Read00));
    }

    fn random_layout(seed: u64) -> Vec<IoRecord> {
        let mut rng = StdRng::seed_from_u64(seed);
        let bytes = [ByteHandler::Read00, ByteHandler::ReadFF, ByteHandler::Ignore];
        let words = [WordHandler::Read00, WordHandler::ReadFF];
        let mut s = AddressSpace::new(PageSize::nearest(256));
        s.map_io_range_ex(0, 0x100, io());
        for _ in 0..rng.gen_range(1..24) {
            let a = rng.gen_range(0..0x100u32);
            if rng.gen_bool(0.7) {
                let h = bytes[rng.gen_range(0..bytes.len())].clone();
                s.map_io_byte(a, h.clone(), h);
            } else {
                let h = words[rng.gen_range(0..words.len())].clone();
                s.map_io_word(a & !1, h.clone(), h);
            }
        }
        let id = s.ftable_of(Ca::from_bus(0)).unwrap();
        match s.ftable(id) {
            Ftable::Expanded(r) => r.clone(),
            Ftable::Collapsed(_) => unreachable!(),
        }
    }

    quickcheck! {
        fn prepared_equals_lazy(seed: u64) -> bool {
            let lazy = Ftable::Expanded(random_layout(seed));
            let mut records = random_layout(seed);
            narrow(&mut records);
            let prepared = Ftable::Expanded(records);
            (0..0x100).all(|i| {
                [Dir::Read, Dir::Write].iter().all(|&d| {
                    lazy.byte(d, i) == prepared.byte(d, i)
                        && lazy.word(d, i) == prepared.word(d, i)
                        && lazy.long(d, i) == prepared.long(d, i)
                })
            })
        }
    }

    #[test]
    fn odd_offsets_always_fault() {
        let mut g = Gen::new(64);
        let seed: u64 = quickcheck::Arbitrary::arbitrary(&mut g);
        let mut r = random_layout(seed);
        narrow(&mut r);
        let t = Ftable::Expanded(r);
        for i in (1..0x100).step_by(2) {
            assert_eq!(t.word(Dir::Read, i), WordHandler::BusError);
            assert_eq!(t.long(Dir::Write, i), LongHandler::BusError);
        }
    }
}
