//! Host exception stack frame sizes.
//!
//! The 68030 pushes one of several frame formats. The format nibble of the
//! frame's format/vector word selects the length:
//!
//! | format | frame                           | words |
//! |--------|---------------------------------|-------|
//! | $0     | four word                       | 4     |
//! | $1     | throwaway four word             | 4     |
//! | $2     | six word                        | 6     |
//! | $9     | coprocessor mid-instruction     | 10    |
//! | $A     | short bus cycle fault           | 16    |
//! | $B     | long bus cycle fault            | 46    |
//!
//! The table is indexed by the format/vector word shifted right by two, so
//! that one lookup covers every format and vector offset. The top index
//! bit is inverted: format $8-$F land in the lower half of the table.
use alloc::{vec, vec::Vec};

/// Frame length in words per format nibble.
pub const FRAME_WORDS: [u16; 16] = [4, 4, 6, 0, 0, 0, 0, 0, 0, 10, 16, 46, 0, 0, 0, 0];

const ENTRIES: usize = 0x4000;
const BANK: usize = 0x2000;

/// Frame size lookup.
pub struct FrameSizes {
    table: Vec<u16>,
}

impl FrameSizes {
    /// Build the lookup.
    pub fn new() -> Self {
        let mut table = vec![0; ENTRIES];
        for (format, words) in FRAME_WORDS.iter().enumerate() {
            for offset in 0..512 {
                table[((format << 10) | offset) ^ BANK] = *words << 1;
            }
        }
        Self { table }
    }

    /// Table index of a format/vector word.
    #[inline]
    pub const fn index_of(format_word: u16) -> usize {
        ((format_word >> 2) as usize & (ENTRIES - 1)) ^ BANK
    }

    /// Size in bytes of the frame described by `format_word`.
    #[inline]
    pub fn frame_size(&self, format_word: u16) -> u32 {
        self.table[Self::index_of(format_word)] as u32
    }
}

impl Default for FrameSizes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Frame lengths in bytes from the MC68030 user's manual, section 8.4.
    const DOCUMENTED: [(u16, u32); 6] = [
        (0x0, 8),
        (0x1, 8),
        (0x2, 12),
        (0x9, 20),
        (0xA, 32),
        (0xB, 92),
    ];

    #[test]
    fn documented_formats() {
        let t = FrameSizes::new();
        for &(format, bytes) in DOCUMENTED.iter() {
            for vector in 0..256u16 {
                let fw = (format << 12) | (vector << 2);
                assert_eq!(t.frame_size(fw), bytes, "format word {:04x}", fw);
            }
        }
    }

    #[test]
    fn undefined_formats_are_empty() {
        let t = FrameSizes::new();
        for format in [3u16, 4, 5, 6, 7, 8, 0xC, 0xD, 0xE, 0xF] {
            assert_eq!(t.frame_size((format << 12) | 0x008), 0);
        }
    }

    #[test]
    fn banks() {
        assert_eq!(FrameSizes::index_of(0x0000), 0x2000);
        assert_eq!(FrameSizes::index_of(0xB008), 0x0C02);
        assert_eq!(FrameSizes::index_of(0x7FFC), 0x3FFF);
    }
}
