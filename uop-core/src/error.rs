use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Structural problems with the container itself. Never recoverable.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("invalid UOP magic {found:02x?}")]
    InvalidMagic { found: [u8; 4] },

    #[error("file ends inside the {what}")]
    Truncated { what: &'static str },

    #[error("directory chain not terminated after {blocks} blocks")]
    UnterminatedChain { blocks: usize },

    #[error("directory block at offset {offset} runs past end of file ({file_len} bytes)")]
    BlockOutOfBounds { offset: u64, file_len: u64 },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Caller asked for an entry that does not exist.
    #[error("entry index {index} out of range ({count} entries)")]
    Index { index: usize, count: usize },

    #[error("entry {index}: zlib stream is malformed: {source}")]
    Decompression {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("entry {index}: unsupported compression flag {flag}")]
    UnsupportedCompression { index: usize, flag: u16 },

    #[error("entry {index}: payload at {offset}+{len} runs past end of file ({file_len} bytes)")]
    TruncatedEntry {
        index: usize,
        offset: u64,
        len: u64,
        file_len: u64,
    },

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures confined to one entry, which a lenient flatten may skip.
    pub fn is_entry_error(&self) -> bool {
        matches!(
            self,
            Error::Decompression { .. }
                | Error::UnsupportedCompression { .. }
                | Error::TruncatedEntry { .. }
        )
    }

    pub fn is_format_error(&self) -> bool {
        matches!(self, Error::Format(_))
    }
}
