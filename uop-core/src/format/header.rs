use std::io::{self, Read, Write};

use crate::error::{FormatError, Result};
use crate::format::constants::UOP_MAGIC;
use crate::format::utils::{read_le, FixedSize};

/// Fixed 28-byte header at the start of every UOP file.
///
/// Some client revisions label the third field a timestamp rather than a
/// signature; the layout is identical, so both are read into `signature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub signature: u32,
    pub first_block_offset: u64,
    pub block_size: u32,
    /// Informational only; the chain walk decides the real count.
    pub declared_entry_count: u32,
}

impl ArchiveHeader {
    pub fn new(version: u32, signature: u32, block_size: u32) -> Self {
        Self {
            magic: UOP_MAGIC,
            version,
            signature,
            first_block_offset: 0,
            block_size,
            declared_entry_count: 0,
        }
    }

    /// Reads and validates the header. The magic is checked before any other
    /// field is touched, so a foreign file fails with `InvalidMagic` no matter
    /// how short it is past the first four bytes.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| truncated(e, "header magic"))?;
        if magic != UOP_MAGIC {
            return Err(FormatError::InvalidMagic { found: magic }.into());
        }

        let version: u32 = read_le(reader).map_err(|e| truncated(e, "header"))?;
        let signature: u32 = read_le(reader).map_err(|e| truncated(e, "header"))?;
        let first_block_offset: u64 = read_le(reader).map_err(|e| truncated(e, "header"))?;
        let block_size: u32 = read_le(reader).map_err(|e| truncated(e, "header"))?;
        let declared_entry_count: u32 = read_le(reader).map_err(|e| truncated(e, "header"))?;

        Ok(Self {
            magic,
            version,
            signature,
            first_block_offset,
            block_size,
            declared_entry_count,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        self.version.write(writer)?;
        self.signature.write(writer)?;
        self.first_block_offset.write(writer)?;
        self.block_size.write(writer)?;
        self.declared_entry_count.write(writer)
    }
}

/// Maps an unexpected EOF to a format error naming the structure being read;
/// any other I/O failure passes through untouched.
pub(crate) fn truncated(err: io::Error, what: &'static str) -> crate::error::Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        FormatError::Truncated { what }.into()
    } else {
        err.into()
    }
}
