pub const UOP_MAGIC: [u8; 4] = *b"MYP\0"; // "MYP\x00"

/// magic + version + signature + first block + block size + entry count
pub const HEADER_SIZE: u64 = 28;
/// entry count + next block offset
pub const BLOCK_HEADER_SIZE: u64 = 12;
pub const DESCRIPTOR_SIZE: u64 = 34;

/// Descriptor bytes left after the payload offset of an empty slot.
pub const EMPTY_SLOT_REMAINDER: i64 = (DESCRIPTOR_SIZE - 8) as i64;

pub const DEFAULT_MAX_BLOCKS: usize = 100_000;
pub const DEFAULT_VERSION: u32 = 5;
pub const DEFAULT_BLOCK_CAPACITY: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
    Unknown(u16),
}

impl From<u16> for Compression {
    fn from(v: u16) -> Self {
        match v {
            0 => Compression::None,
            1 => Compression::Zlib,
            other => Compression::Unknown(other),
        }
    }
}

impl From<Compression> for u16 {
    fn from(val: Compression) -> Self {
        match val {
            Compression::None => 0,
            Compression::Zlib => 1,
            Compression::Unknown(flag) => flag,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => f.write_str("none"),
            Compression::Zlib => f.write_str("zlib"),
            Compression::Unknown(flag) => write!(f, "unknown({})", flag),
        }
    }
}
