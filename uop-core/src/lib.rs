//! UOP container reader and MUL flattener.
//!
//! UOP files (`MYP\0` magic) hold many payloads behind a chained table of
//! directory blocks. [`Archive`] parses that table and reads single entries;
//! [`FlattenSession`] concatenates every entry into the flat legacy layout.

pub mod checkpoint;
pub mod error;
pub mod extract;
pub mod flatten;
pub mod format;
pub mod hash;
pub mod reader;
pub mod writer;

pub use error::{Error, FormatError, Result};
pub use extract::{extract_all, extract_entry, ExtractReport};
pub use flatten::{
    flatten, EntryOrder, ErrorPolicy, FlattenOutcome, FlattenReport, FlattenSession, ProgressFn,
    SkippedEntry,
};
pub use format::{ArchiveHeader, Compression, EntryDescriptor};
pub use hash::{legacy_path, name_hash};
pub use reader::{Archive, Payload, ReaderOptions};
pub use writer::{ArchiveBuilder, BuilderOptions};
