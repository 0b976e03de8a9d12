//! Dumping entries to individual files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::warn;
use rayon::prelude::*;

use crate::error::Result;
use crate::flatten::{ProgressFn, SkippedEntry};
use crate::reader::Archive;

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub written: usize,
    pub bytes_written: u64,
    pub failed: Vec<SkippedEntry>,
}

pub fn entry_file_name(index: usize) -> String {
    format!("{:08}.bin", index)
}

/// Writes one entry's decoded bytes to `dst`.
pub fn extract_entry(archive: &Archive, index: usize, dst: &Path) -> Result<u64> {
    let data = archive.read_entry(index)?.into_inner();
    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(dst, &data)?;
    Ok(data.len() as u64)
}

/// Writes every entry to `output_dir/<index>.bin`, reading entries in
/// parallel. Each worker opens its own handle through `Archive::read_entry`.
/// Entries that fail to decode are reported, not fatal.
pub fn extract_all(
    archive: &Archive,
    output_dir: &Path,
    progress: Option<Arc<ProgressFn>>,
) -> Result<ExtractReport> {
    fs::create_dir_all(output_dir)?;
    let total = archive.entry_count();
    let done = AtomicUsize::new(0);

    let results = (0..total)
        .into_par_iter()
        .map(|index| -> Result<std::result::Result<u64, SkippedEntry>> {
            let path: PathBuf = output_dir.join(entry_file_name(index));
            let outcome = match extract_entry(archive, index, &path) {
                Ok(len) => Ok(len),
                Err(e) if e.is_entry_error() => {
                    warn!("failed to extract entry {}: {}", index, e);
                    Err(SkippedEntry {
                        index,
                        reason: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            };
            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(ref cb) = progress {
                cb(n, total, &entry_file_name(index));
            }
            Ok(outcome)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut report = ExtractReport::default();
    for outcome in results {
        match outcome {
            Ok(len) => {
                report.written += 1;
                report.bytes_written += len;
            }
            Err(skipped) => report.failed.push(skipped),
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ArchiveBuilder;

    #[test]
    fn extracts_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("art.uop");
        let mut builder = ArchiveBuilder::new();
        builder
            .add_stored(b"first".to_vec())
            .add_empty_slot()
            .add_zlib(b"second second second".to_vec())
            .add_raw(7, b"???".to_vec(), 3);
        builder.write_file(&src).unwrap();

        let archive = Archive::open(&src).unwrap();
        let out = dir.path().join("out");
        let report = extract_all(&archive, &out, None).unwrap();

        assert_eq!(report.written, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 2);
        assert_eq!(fs::read(out.join("00000000.bin")).unwrap(), b"first");
        assert_eq!(fs::read(out.join("00000001.bin")).unwrap(), b"second second second");
        assert!(!out.join("00000002.bin").exists());
    }
}
