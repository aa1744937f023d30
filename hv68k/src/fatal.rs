//! Fatal error records.
use crate::error::FatalCode;

/// Client register state captured when a run ends fatally.
///
/// The field order and layout are fixed: consumers read the record as a
/// sequence of big-endian 32-bit words (see [`FatalDump::to_be_bytes`]).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FatalDump {
    /// Error code.
    pub err: u32,
    /// Program counter.
    pub pc: u32,
    /// Status register.
    pub sr: u32,
    /// User stack pointer.
    pub usp: u32,
    /// Data registers.
    pub d: [u32; 8],
    /// Address registers.
    pub a: [u32; 8],
}

/// Number of 32-bit words in a [`FatalDump`].
pub const FATAL_DUMP_WORDS: usize = 20;

impl FatalDump {
    /// Build a dump for `code` from the client registers.
    pub fn new(code: FatalCode, regs: &ClientRegisters) -> Self {
        Self {
            err: if code.0 == 0 {
                FatalCode::UNKNOWN.0
            } else {
                code.0
            },
            pc: regs.pc,
            sr: regs.sr as u32,
            usp: regs.usp,
            d: regs.d,
            a: regs.a,
        }
    }

    /// Dump words in record order.
    pub fn words(&self) -> [u32; FATAL_DUMP_WORDS] {
        let mut out = [0; FATAL_DUMP_WORDS];
        out[0] = self.err;
        out[1] = self.pc;
        out[2] = self.sr;
        out[3] = self.usp;
        out[4..12].copy_from_slice(&self.d);
        out[12..20].copy_from_slice(&self.a);
        out
    }

    /// Serialize the dump as big-endian words.
    pub fn to_be_bytes(&self) -> [u8; FATAL_DUMP_WORDS * 4] {
        let mut out = [0; FATAL_DUMP_WORDS * 4];
        for (chunk, w) in out.chunks_exact_mut(4).zip(self.words()) {
            chunk.copy_from_slice(&w.to_be_bytes());
        }
        out
    }

    /// Human readable summary.
    pub fn message(&self) -> alloc::string::String {
        alloc::format!("Fatal error: ${:08x} at ${:08x}", self.err, self.pc)
    }
}

/// Client general purpose and status registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientRegisters {
    /// Program counter.
    pub pc: u32,
    /// Status register.
    pub sr: u16,
    /// User stack pointer.
    pub usp: u32,
    /// Data registers.
    pub d: [u32; 8],
    /// Address registers.
    pub a: [u32; 8],
}
