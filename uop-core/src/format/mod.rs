pub mod constants;
pub mod header;
pub mod table;
pub mod utils;

pub use constants::Compression;
pub use header::ArchiveHeader;
pub use table::{BlockHeader, EntryDescriptor};
