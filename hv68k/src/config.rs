//! Hypervisor configuration.
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Valid page sizes paired with the number of index bits of the bottom
/// table level they imply.
const PAGE_SIZES: [(u32, u32); 8] = [
    (256, 12),
    (512, 11),
    (1024, 10),
    (2048, 9),
    (4096, 8),
    (8192, 7),
    (16384, 6),
    (32768, 5),
];

/// Translation page size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageSize {
    bytes: u32,
    tid_bits: u32,
}

impl PageSize {
    /// Smallest page size the table layout supports.
    pub const MIN: PageSize = PageSize {
        bytes: 256,
        tid_bits: 12,
    };
    /// Largest page size the table layout supports.
    pub const MAX: PageSize = PageSize {
        bytes: 32768,
        tid_bits: 5,
    };

    /// Pick the smallest valid page size that is not smaller than `requested`.
    ///
    /// Requests above [`PageSize::MAX`] are clamped.
    pub fn nearest(requested: u32) -> Self {
        PAGE_SIZES
            .iter()
            .find(|(bytes, _)| requested <= *bytes)
            .map(|&(bytes, tid_bits)| PageSize { bytes, tid_bits })
            .unwrap_or(Self::MAX)
    }

    /// Size of a page in bytes.
    #[inline]
    pub const fn bytes(self) -> u32 {
        self.bytes
    }

    /// Mask of the in-page offset bits.
    #[inline]
    pub const fn offset_mask(self) -> u32 {
        self.bytes - 1
    }

    /// log2 of the page size.
    #[inline]
    pub const fn shift(self) -> u32 {
        self.bytes.trailing_zeros()
    }

    /// Index bits of the bottom (long descriptor) table level.
    #[inline]
    pub const fn tid_bits(self) -> u32 {
        self.tid_bits
    }

    /// Number of descriptors in one bottom level table.
    #[inline]
    pub const fn tid_entries(self) -> usize {
        1 << self.tid_bits
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::MIN
    }
}

/// CPU model identifiers.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u16)]
pub enum CpuModel {
    /// MC68000.
    M68000 = 0x0000,
    /// MC68010.
    M68010 = 0x0010,
    /// MC68020.
    M68020 = 0x0020,
    /// MC68030.
    M68030 = 0x0030,
    /// MC68040.
    M68040 = 0x0040,
    /// MC68060.
    M68060 = 0x0060,
    /// Apollo 68080.
    M68080 = 0x0080,
}

/// Configuration consumed by [`Hypervisor::new`].
///
/// [`Hypervisor::new`]: crate::Hypervisor::new
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub(crate) page_size: PageSize,
    pub(crate) client_cpu: CpuModel,
    pub(crate) host_cpu: CpuModel,
}

impl Config {
    /// Get a default configuration: 256 byte pages, a 68000 client on a
    /// 68030 host.
    pub fn new() -> Self {
        Self {
            page_size: PageSize::MIN,
            client_cpu: CpuModel::M68000,
            host_cpu: CpuModel::M68030,
        }
    }

    /// Request a page size. The nearest valid size is used.
    #[inline]
    pub fn page_size(mut self, bytes: u32) -> Self {
        self.page_size = PageSize::nearest(bytes);
        self
    }

    /// Set the client cpu model.
    #[inline]
    pub fn client_cpu(mut self, cpu: CpuModel) -> Self {
        self.client_cpu = cpu;
        self
    }

    /// Set the host cpu model.
    #[inline]
    pub fn host_cpu(mut self, cpu: CpuModel) -> Self {
        self.host_cpu = cpu;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
