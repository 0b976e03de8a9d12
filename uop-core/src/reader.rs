//! UOP archive reader.
//!
//! Opening an archive parses the header and walks the chained directory
//! blocks into an immutable entry table. Payloads are read on demand; the
//! archive keeps no file handle between calls, so one `Archive` can serve
//! several threads or extraction passes at once.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::{Decompress, FlushDecompress, Status};
use log::{debug, warn};

use crate::error::{Error, FormatError, Result};
use crate::format::constants::{
    Compression, BLOCK_HEADER_SIZE, DEFAULT_MAX_BLOCKS, DESCRIPTOR_SIZE, EMPTY_SLOT_REMAINDER,
};
use crate::format::header::truncated;
use crate::format::utils::read_le;
use crate::format::{ArchiveHeader, BlockHeader, EntryDescriptor};
use crate::hash::name_hash;

/// Limits applied while parsing the directory chain.
#[derive(Clone, Debug)]
pub struct ReaderOptions {
    /// Blocks visited before the chain is declared unterminated.
    pub max_blocks: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_blocks: DEFAULT_MAX_BLOCKS,
        }
    }
}

/// Decoded bytes of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub data: Vec<u8>,
    /// Size the descriptor promised after decompression.
    pub declared_size: u32,
}

impl Payload {
    /// Warning-level signal: the data does not match the declared size.
    /// The read itself still succeeded.
    pub fn size_mismatch(&self) -> bool {
        self.data.len() as u64 != u64::from(self.declared_size)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Debug, Clone)]
pub struct Archive {
    path: PathBuf,
    header: ArchiveHeader,
    file_len: u64,
    modified: Option<SystemTime>,
    entries: Vec<EntryDescriptor>,
    empty_slots: usize,
    blocks: usize,
}

impl Archive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &ReaderOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: &ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        let file_len = metadata.len();
        let modified = metadata.modified().ok();
        let mut reader = BufReader::new(file);

        let header = ArchiveHeader::read(&mut reader)?;
        debug!(
            "{}: version {}, signature {:#x}, first block {}, {} entries declared",
            path.display(),
            header.version,
            header.signature,
            header.first_block_offset,
            header.declared_entry_count
        );

        let table = read_directory(&mut reader, &header, file_len, options)?;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            file_len,
            modified,
            entries: table.entries,
            empty_slots: table.empty_slots,
            blocks: table.blocks,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Modification time of the source when it was opened, if the platform reports one.
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Non-empty descriptors in directory traversal order.
    pub fn entries(&self) -> &[EntryDescriptor] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Result<&EntryDescriptor> {
        self.entries.get(index).ok_or(Error::Index {
            index,
            count: self.entries.len(),
        })
    }

    /// Slots with a zero payload offset skipped during the chain walk.
    pub fn empty_slots(&self) -> usize {
        self.empty_slots
    }

    pub fn block_count(&self) -> usize {
        self.blocks
    }

    /// Entry indices sorted by payload offset. Ties keep directory order.
    pub fn offset_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&i| self.entries[i].payload_offset);
        order
    }

    pub fn find_by_hash(&self, hash: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.content_hash == hash)
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.find_by_hash(name_hash(name))
    }

    /// Reads and decodes one entry through a freshly opened handle.
    pub fn read_entry(&self, index: usize) -> Result<Payload> {
        // Validate before touching the filesystem.
        self.entry(index)?;
        let mut file = File::open(&self.path)?;
        self.read_entry_from(&mut file, index)
    }

    /// Reads one entry through a caller-owned handle on the same file.
    ///
    /// The seek and read are not atomic; a handle shared between threads must
    /// be locked around the whole call.
    pub fn read_entry_from<R: Read + Seek>(&self, reader: &mut R, index: usize) -> Result<Payload> {
        let desc = *self.entry(index)?;

        let truncated = || Error::TruncatedEntry {
            index,
            offset: desc.data_offset().unwrap_or(desc.payload_offset),
            len: u64::from(desc.compressed_size),
            file_len: self.file_len,
        };
        // Overflowing fields count as running past the end of the file.
        let offset = match (desc.data_offset(), desc.data_end()) {
            (Some(offset), Some(end)) if end <= self.file_len => offset,
            _ => return Err(truncated()),
        };

        // Reject before reading so unsupported entries cost nothing.
        if let Compression::Unknown(flag) = desc.compression {
            return Err(Error::UnsupportedCompression { index, flag });
        }

        reader.seek(SeekFrom::Start(offset))?;
        let mut raw = vec![0u8; desc.compressed_size as usize];
        reader.read_exact(&mut raw).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                truncated()
            } else {
                e.into()
            }
        })?;

        let data = match desc.compression {
            Compression::None => raw,
            Compression::Zlib => inflate(&raw, desc.decompressed_size as usize)
                .map_err(|source| Error::Decompression { index, source })?,
            Compression::Unknown(flag) => return Err(Error::UnsupportedCompression { index, flag }),
        };

        let payload = Payload {
            data,
            declared_size: desc.decompressed_size,
        };
        if payload.size_mismatch() {
            warn!(
                "entry {} size mismatch: expected {}, got {}",
                index,
                desc.decompressed_size,
                payload.data.len()
            );
        }
        Ok(payload)
    }
}

struct DirectoryTable {
    entries: Vec<EntryDescriptor>,
    empty_slots: usize,
    blocks: usize,
}

fn read_directory<R: Read + Seek>(
    reader: &mut R,
    header: &ArchiveHeader,
    file_len: u64,
    options: &ReaderOptions,
) -> Result<DirectoryTable> {
    let mut table = DirectoryTable {
        entries: Vec::new(),
        empty_slots: 0,
        blocks: 0,
    };
    let mut visited = HashSet::new();
    let mut next = header.first_block_offset;

    while next != 0 {
        if table.blocks >= options.max_blocks || !visited.insert(next) {
            return Err(FormatError::UnterminatedChain {
                blocks: table.blocks,
            }
            .into());
        }
        if next.saturating_add(BLOCK_HEADER_SIZE) > file_len {
            return Err(FormatError::BlockOutOfBounds { offset: next, file_len }.into());
        }

        reader.seek(SeekFrom::Start(next))?;
        let block = BlockHeader::read(reader).map_err(|e| truncated(e, "directory block"))?;

        let records_end = u64::from(block.entry_count)
            .checked_mul(DESCRIPTOR_SIZE)
            .and_then(|len| len.checked_add(next + BLOCK_HEADER_SIZE));
        match records_end {
            Some(end) if end <= file_len => {}
            _ => return Err(FormatError::BlockOutOfBounds { offset: next, file_len }.into()),
        }

        debug!(
            "block {} at {}: {} entries, next {}",
            table.blocks, next, block.entry_count, block.next_block_offset
        );

        for _ in 0..block.entry_count {
            let payload_offset: u64 =
                read_le(reader).map_err(|e| truncated(e, "entry descriptor"))?;
            if payload_offset == 0 {
                reader.seek(SeekFrom::Current(EMPTY_SLOT_REMAINDER))?;
                table.empty_slots += 1;
                continue;
            }
            let desc = EntryDescriptor::read_after_offset(reader, payload_offset)
                .map_err(|e| truncated(e, "entry descriptor"))?;
            table.entries.push(desc);
        }

        table.blocks += 1;
        next = block.next_block_offset;
    }

    if table.entries.len() + table.empty_slots != header.declared_entry_count as usize {
        debug!(
            "header declares {} entries, directory holds {} ({} empty)",
            header.declared_entry_count,
            table.entries.len() + table.empty_slots,
            table.empty_slots
        );
    }

    Ok(table)
}

/// Inflates a complete zlib stream. A stream that stops before its end
/// marker is an error, never a short result.
fn inflate(raw: &[u8], expected: usize) -> io::Result<Vec<u8>> {
    let mut decoder = Decompress::new(true);
    // The declared size is untrusted; bound the first allocation by the input.
    let mut out = Vec::with_capacity(expected.min(raw.len().saturating_mul(16)).max(64));

    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity());
        }
        let consumed = decoder.total_in() as usize;
        let produced = decoder.total_out();
        let status = decoder
            .decompress_vec(&raw[consumed..], &mut out, FlushDecompress::Finish)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                let stalled = decoder.total_in() as usize == consumed && decoder.total_out() == produced;
                if stalled && out.len() < out.capacity() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "zlib stream ends before its end marker",
                    ));
                }
            }
        }
    }
}
