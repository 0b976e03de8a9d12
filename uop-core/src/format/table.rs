use std::io::{self, Read, Write};

use crate::format::constants::Compression;
use crate::format::utils::{read_le, FixedSize};

/// Fixed prefix of every directory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub entry_count: u32,
    /// Offset of the next block, 0 at the end of the chain.
    pub next_block_offset: u64,
}

impl BlockHeader {
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            entry_count: read_le(reader)?,
            next_block_offset: read_le(reader)?,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.entry_count.write(writer)?;
        self.next_block_offset.write(writer)
    }
}

/// One 34-byte record of a directory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub payload_offset: u64,
    pub header_size: u32,
    pub compressed_size: u32,
    pub decompressed_size: u32,
    pub content_hash: u64,
    pub checksum: u32,
    pub compression: Compression,
}

impl EntryDescriptor {
    pub fn empty() -> Self {
        Self {
            payload_offset: 0,
            header_size: 0,
            compressed_size: 0,
            decompressed_size: 0,
            content_hash: 0,
            checksum: 0,
            compression: Compression::None,
        }
    }

    pub fn is_empty_slot(&self) -> bool {
        self.payload_offset == 0
    }

    /// Absolute offset of the stored bytes, past the private sub-header.
    /// `None` if the descriptor's fields overflow a file offset.
    pub fn data_offset(&self) -> Option<u64> {
        self.payload_offset.checked_add(u64::from(self.header_size))
    }

    pub fn data_end(&self) -> Option<u64> {
        self.data_offset()?.checked_add(u64::from(self.compressed_size))
    }

    /// Reads the fields that follow a non-zero payload offset.
    pub fn read_after_offset<R: Read>(reader: &mut R, payload_offset: u64) -> io::Result<Self> {
        Ok(Self {
            payload_offset,
            header_size: read_le(reader)?,
            compressed_size: read_le(reader)?,
            decompressed_size: read_le(reader)?,
            content_hash: read_le(reader)?,
            checksum: read_le(reader)?,
            compression: Compression::from(read_le::<_, u16>(reader)?),
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.payload_offset.write(writer)?;
        self.header_size.write(writer)?;
        self.compressed_size.write(writer)?;
        self.decompressed_size.write(writer)?;
        self.content_hash.write(writer)?;
        self.checksum.write(writer)?;
        u16::from(self.compression).write(writer)
    }
}
