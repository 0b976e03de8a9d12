//! Builds well-formed UOP files.
//!
//! Layout: header, then every directory block back to back, then the
//! payloads. Payloads can be laid out in reverse slot order so that directory
//! order and file-offset order disagree, as they do in some client archives.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::write::ZlibEncoder;

use crate::format::constants::{
    Compression, BLOCK_HEADER_SIZE, DEFAULT_BLOCK_CAPACITY, DEFAULT_VERSION, DESCRIPTOR_SIZE,
    HEADER_SIZE,
};
use crate::format::{ArchiveHeader, BlockHeader, EntryDescriptor};
use crate::hash::name_hash;

#[derive(Clone, Debug)]
pub struct BuilderOptions {
    pub version: u32,
    pub signature: u32,
    /// Descriptor slots per directory block (at least 1).
    pub entries_per_block: u32,
    /// Zero bytes written before each payload and recorded as its header size.
    pub sub_header_size: u32,
    /// Place payloads in reverse slot order.
    pub reverse_payloads: bool,
    pub zlib_level: u32,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION,
            signature: 0xFD23_EC43,
            entries_per_block: DEFAULT_BLOCK_CAPACITY,
            sub_header_size: 0,
            reverse_payloads: false,
            zlib_level: 6,
        }
    }
}

#[derive(Clone, Debug)]
enum Slot {
    Empty,
    Entry {
        body: Body,
        hash: u64,
    },
}

#[derive(Clone, Debug)]
enum Body {
    Stored(Vec<u8>),
    Zlib(Vec<u8>),
    Raw {
        flag: u16,
        bytes: Vec<u8>,
        decompressed_size: u32,
    },
}

#[derive(Clone, Debug, Default)]
pub struct ArchiveBuilder {
    opts: BuilderOptions,
    slots: Vec<Slot>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::with_options(BuilderOptions::default())
    }

    pub fn with_options(opts: BuilderOptions) -> Self {
        Self {
            opts,
            slots: Vec::new(),
        }
    }

    /// Number of descriptor slots, empty ones included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn add_stored(&mut self, data: Vec<u8>) -> &mut Self {
        let hash = self.default_hash();
        self.push(Body::Stored(data), hash)
    }

    pub fn add_zlib(&mut self, data: Vec<u8>) -> &mut Self {
        let hash = self.default_hash();
        self.push(Body::Zlib(data), hash)
    }

    pub fn add_named_stored(&mut self, name: &str, data: Vec<u8>) -> &mut Self {
        self.push(Body::Stored(data), name_hash(name))
    }

    pub fn add_named_zlib(&mut self, name: &str, data: Vec<u8>) -> &mut Self {
        self.push(Body::Zlib(data), name_hash(name))
    }

    /// Stores `bytes` verbatim under an arbitrary compression flag and
    /// declared size. Useful for corrupt or unsupported fixtures.
    pub fn add_raw(&mut self, flag: u16, bytes: Vec<u8>, decompressed_size: u32) -> &mut Self {
        let hash = self.default_hash();
        self.push(
            Body::Raw {
                flag,
                bytes,
                decompressed_size,
            },
            hash,
        )
    }

    pub fn add_empty_slot(&mut self) -> &mut Self {
        self.slots.push(Slot::Empty);
        self
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()
    }

    pub fn write_to<W: Write + Seek>(&self, writer: &mut W) -> io::Result<()> {
        let per_block = u64::from(self.opts.entries_per_block.max(1));
        let slot_count = self.slots.len() as u64;
        let block_count = slot_count.div_ceil(per_block);

        // Encode payloads up front so their sizes are known.
        let mut encoded = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            encoded.push(match slot {
                Slot::Empty => None,
                Slot::Entry { body, hash } => Some((self.encode(body)?, *hash)),
            });
        }

        let table_len = block_count * BLOCK_HEADER_SIZE + slot_count * DESCRIPTOR_SIZE;
        let mut cursor = HEADER_SIZE + table_len;
        let mut offsets = vec![0u64; self.slots.len()];
        let placement: Vec<usize> = if self.opts.reverse_payloads {
            (0..self.slots.len()).rev().collect()
        } else {
            (0..self.slots.len()).collect()
        };
        for &i in &placement {
            if let Some((enc, _)) = &encoded[i] {
                offsets[i] = cursor;
                cursor += u64::from(self.opts.sub_header_size) + enc.bytes.len() as u64;
            }
        }

        let mut header = ArchiveHeader::new(
            self.opts.version,
            self.opts.signature,
            self.opts.entries_per_block,
        );
        header.first_block_offset = if block_count == 0 { 0 } else { HEADER_SIZE };
        header.declared_entry_count = slot_count as u32;

        writer.seek(SeekFrom::Start(0))?;
        header.write(writer)?;

        let mut block_start = HEADER_SIZE;
        for (block_idx, chunk) in encoded.chunks(per_block as usize).enumerate() {
            let block_len = BLOCK_HEADER_SIZE + chunk.len() as u64 * DESCRIPTOR_SIZE;
            let last = block_idx as u64 + 1 == block_count;
            BlockHeader {
                entry_count: chunk.len() as u32,
                next_block_offset: if last { 0 } else { block_start + block_len },
            }
            .write(writer)?;

            for (j, slot) in chunk.iter().enumerate() {
                let index = block_idx * per_block as usize + j;
                let desc = match slot {
                    None => EntryDescriptor::empty(),
                    Some((enc, hash)) => EntryDescriptor {
                        payload_offset: offsets[index],
                        header_size: self.opts.sub_header_size,
                        compressed_size: enc.bytes.len() as u32,
                        decompressed_size: enc.decompressed_size,
                        content_hash: *hash,
                        checksum: 0,
                        compression: enc.compression,
                    },
                };
                desc.write(writer)?;
            }
            block_start += block_len;
        }

        let sub_header = vec![0u8; self.opts.sub_header_size as usize];
        for &i in &placement {
            if let Some((enc, _)) = &encoded[i] {
                writer.seek(SeekFrom::Start(offsets[i]))?;
                writer.write_all(&sub_header)?;
                writer.write_all(&enc.bytes)?;
            }
        }

        writer.flush()
    }

    fn push(&mut self, body: Body, hash: u64) -> &mut Self {
        self.slots.push(Slot::Entry { body, hash });
        self
    }

    fn default_hash(&self) -> u64 {
        name_hash(&format!("build/archive/{:08}.dat", self.slots.len()))
    }

    fn encode(&self, body: &Body) -> io::Result<Encoded> {
        Ok(match body {
            Body::Stored(data) => Encoded {
                bytes: data.clone(),
                decompressed_size: data.len() as u32,
                compression: Compression::None,
            },
            Body::Zlib(data) => {
                let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::new(self.opts.zlib_level));
                enc.write_all(data)?;
                Encoded {
                    bytes: enc.finish()?,
                    decompressed_size: data.len() as u32,
                    compression: Compression::Zlib,
                }
            }
            Body::Raw {
                flag,
                bytes,
                decompressed_size,
            } => Encoded {
                bytes: bytes.clone(),
                decompressed_size: *decompressed_size,
                compression: Compression::from(*flag),
            },
        })
    }
}

struct Encoded {
    bytes: Vec<u8>,
    decompressed_size: u32,
    compression: Compression,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Archive;

    #[test]
    fn stored_and_zlib_roundtrip() {
        let text = b"Hello, UOP! ".repeat(200);
        let mut builder = ArchiveBuilder::new();
        builder.add_stored(b"plain bytes".to_vec()).add_zlib(text.clone());

        let file = tempfile::NamedTempFile::new().unwrap();
        builder.write_file(file.path()).unwrap();

        let archive = Archive::open(file.path()).unwrap();
        assert_eq!(archive.entry_count(), 2);
        assert_eq!(archive.header().declared_entry_count, 2);

        let first = archive.read_entry(0).unwrap();
        assert_eq!(first.data, b"plain bytes");
        assert!(!first.size_mismatch());

        let second = archive.entries()[1];
        assert_eq!(second.compression, Compression::Zlib);
        assert!((second.compressed_size as usize) < text.len());
        assert_eq!(archive.read_entry(1).unwrap().data, text);
    }

    #[test]
    fn sub_header_is_skipped() {
        let opts = BuilderOptions {
            sub_header_size: 16,
            ..BuilderOptions::default()
        };
        let mut builder = ArchiveBuilder::with_options(opts);
        builder.add_stored(vec![7u8; 5]);

        let file = tempfile::NamedTempFile::new().unwrap();
        builder.write_file(file.path()).unwrap();

        let archive = Archive::open(file.path()).unwrap();
        assert_eq!(archive.entries()[0].header_size, 16);
        assert_eq!(archive.read_entry(0).unwrap().data, vec![7u8; 5]);
    }

    #[test]
    fn reversed_payloads_disagree_with_directory_order() {
        let opts = BuilderOptions {
            entries_per_block: 2,
            reverse_payloads: true,
            ..BuilderOptions::default()
        };
        let mut builder = ArchiveBuilder::with_options(opts);
        for i in 0..5u8 {
            builder.add_stored(vec![i; 3]);
        }

        let file = tempfile::NamedTempFile::new().unwrap();
        builder.write_file(file.path()).unwrap();

        let archive = Archive::open(file.path()).unwrap();
        assert_eq!(archive.block_count(), 3);
        assert_eq!(archive.offset_order(), vec![4, 3, 2, 1, 0]);
    }
}
