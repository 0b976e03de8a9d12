//! Resume bookkeeping for file-backed flattening.
//!
//! A checkpoint records how far a flatten got. It is only ever replaced
//! atomically (temp file in the same directory, synced, then renamed over the
//! old one), so a crash leaves either the previous checkpoint or the new one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::warn;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::flatten::{EntryOrder, SkippedEntry};
use crate::reader::Archive;

/// Identifies the source archive and pass configuration a checkpoint belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub file_len: u64,
    /// Source modification time in nanoseconds since the Unix epoch.
    pub modified_ns: Option<u64>,
    pub entry_count: usize,
    pub first_block_offset: u64,
    pub order: EntryOrder,
}

impl SourceFingerprint {
    pub fn of(archive: &Archive, order: EntryOrder) -> Self {
        Self {
            file_len: archive.file_len(),
            modified_ns: archive
                .modified()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .and_then(|d| u64::try_from(d.as_nanos()).ok()),
            entry_count: archive.entry_count(),
            first_block_offset: archive.header().first_block_offset,
            order,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source: SourceFingerprint,
    /// Entries handled so far, skipped ones included.
    pub processed: usize,
    /// Length of the partial output at the time of the checkpoint.
    pub bytes_written: u64,
    pub skipped: Vec<SkippedEntry>,
    pub size_mismatches: usize,
}

impl Checkpoint {
    /// Loads a checkpoint. A missing file is `None`; so is an unreadable one,
    /// since a damaged checkpoint must never be trusted.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&text) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!("ignoring unreadable checkpoint {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        atomic_write(path, &json)
    }

    pub fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// True if this checkpoint was written for the same archive and order and
    /// the partial output still has exactly the recorded length.
    pub fn is_resumable(&self, source: &SourceFingerprint, partial_len: Option<u64>) -> bool {
        self.source == *source
            && self.processed <= source.entry_count
            && partial_len == Some(self.bytes_written)
    }
}

pub fn checkpoint_path_for(dst: &Path) -> PathBuf {
    with_suffix(dst, ".checkpoint.json")
}

pub fn partial_path_for(dst: &Path) -> PathBuf {
    with_suffix(dst, ".partial")
}

fn with_suffix(dst: &Path, suffix: &str) -> PathBuf {
    let mut name = dst.file_name().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(suffix);
    dst.with_file_name(name)
}

fn atomic_write(dst: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst).map_err(|e| e.error)?;

    // Make the rename itself durable where the platform allows it.
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint() -> SourceFingerprint {
        SourceFingerprint {
            file_len: 1024,
            modified_ns: Some(1_700_000_000_000_000_000),
            entry_count: 10,
            first_block_offset: 28,
            order: EntryOrder::PayloadOffset,
        }
    }

    fn sample() -> Checkpoint {
        Checkpoint {
            source: fingerprint(),
            processed: 4,
            bytes_written: 400,
            skipped: vec![SkippedEntry {
                index: 2,
                reason: "entry 2: unsupported compression flag 99".to_string(),
            }],
            size_mismatches: 1,
        }
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path_for(&dir.path().join("map0.mul"));
        assert_eq!(path.file_name().unwrap(), "map0.mul.checkpoint.json");

        assert_eq!(Checkpoint::load(&path).unwrap(), None);
        sample().save(&path).unwrap();
        assert_eq!(Checkpoint::load(&path).unwrap(), Some(sample()));

        // Replacing an existing checkpoint works too.
        let mut next = sample();
        next.processed = 8;
        next.save(&path).unwrap();
        assert_eq!(Checkpoint::load(&path).unwrap().unwrap().processed, 8);

        Checkpoint::remove(&path).unwrap();
        Checkpoint::remove(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_checkpoint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.checkpoint.json");
        fs::write(&path, b"{\"processed\": 4, \"bytes_wri").unwrap();
        assert_eq!(Checkpoint::load(&path).unwrap(), None);
    }

    #[test]
    fn resumable_only_when_everything_matches() {
        let checkpoint = sample();
        assert!(checkpoint.is_resumable(&fingerprint(), Some(400)));
        assert!(!checkpoint.is_resumable(&fingerprint(), Some(399)));
        assert!(!checkpoint.is_resumable(&fingerprint(), Some(401)));
        assert!(!checkpoint.is_resumable(&fingerprint(), None));

        let other_order = SourceFingerprint {
            order: EntryOrder::Directory,
            ..fingerprint()
        };
        assert!(!checkpoint.is_resumable(&other_order, Some(400)));

        let rewritten = SourceFingerprint {
            modified_ns: Some(1_700_000_000_000_000_001),
            ..fingerprint()
        };
        assert!(!checkpoint.is_resumable(&rewritten, Some(400)));
    }

    #[test]
    fn partial_path_keeps_extension() {
        let partial = partial_path_for(Path::new("out/map2x.mul"));
        assert_eq!(partial, Path::new("out/map2x.mul.partial"));
    }
}
