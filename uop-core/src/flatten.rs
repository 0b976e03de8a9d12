//! Flattening: concatenate every entry of an archive into one legacy file.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{checkpoint_path_for, partial_path_for, Checkpoint, SourceFingerprint};
use crate::error::Result;
use crate::reader::Archive;

pub const DEFAULT_CHECKPOINT_EVERY: usize = 50;
const OUTPUT_BUFFER_SIZE: usize = 1024 * 1024;

/// Order in which entries are concatenated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOrder {
    /// Order the entries were found while walking the directory chain.
    Directory,
    /// Ascending payload offset. Directory blocks do not always list entries
    /// in file order, so this is the default.
    #[default]
    PayloadOffset,
}

/// What to do when a single entry cannot be decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Skip the entry, log a warning and count it in the report.
    #[default]
    Lenient,
    /// Stop the whole flatten at the first bad entry.
    Strict,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlattenOutcome {
    Completed,
    Aborted { reason: String },
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct FlattenReport {
    pub total: usize,
    /// Entries handled, written or skipped.
    pub processed: usize,
    pub skipped: Vec<SkippedEntry>,
    pub size_mismatches: usize,
    pub bytes_written: u64,
    /// Entry position the pass resumed from, if a checkpoint was used.
    pub resumed_from: Option<usize>,
    pub outcome: FlattenOutcome,
}

impl FlattenReport {
    pub fn flattened(&self) -> usize {
        self.processed - self.skipped.len()
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == FlattenOutcome::Completed
    }

    /// Completed, but some entries were left out.
    pub fn is_partial(&self) -> bool {
        self.is_completed() && !self.skipped.is_empty()
    }
}

impl fmt::Display for FlattenReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            FlattenOutcome::Completed => write!(
                f,
                "flattened {} of {} entries, {} skipped ({} bytes)",
                self.flattened(),
                self.total,
                self.skipped.len(),
                self.bytes_written
            ),
            FlattenOutcome::Aborted { reason } => write!(
                f,
                "aborted after processing {} of {} entries: {}",
                self.processed, self.total, reason
            ),
            FlattenOutcome::Cancelled => write!(
                f,
                "cancelled after processing {} of {} entries",
                self.processed, self.total
            ),
        }
    }
}

pub type ProgressFn = dyn Fn(usize, usize, &str) + Send + Sync;

/// Configuration and control for one flattening pass.
#[derive(Clone)]
pub struct FlattenSession {
    pub order: EntryOrder,
    pub policy: ErrorPolicy,
    /// Entries per checkpoint chunk. 0 only checkpoints on cancel or abort.
    pub checkpoint_every: usize,
    /// Honour an existing checkpoint when flattening to a file.
    pub resume: bool,
    /// Checked between entries; set it to stop the pass early.
    pub cancel: Arc<AtomicBool>,
    pub progress: Option<Arc<ProgressFn>>,
}

impl Default for FlattenSession {
    fn default() -> Self {
        Self {
            order: EntryOrder::default(),
            policy: ErrorPolicy::default(),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            resume: true,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }
}

#[derive(Default)]
struct PassState {
    processed: usize,
    bytes_written: u64,
    skipped: Vec<SkippedEntry>,
    size_mismatches: usize,
}

impl FlattenSession {
    pub fn new(order: EntryOrder, policy: ErrorPolicy) -> Self {
        Self {
            order,
            policy,
            ..Self::default()
        }
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Entry indices in the configured order.
    pub fn entry_order(&self, archive: &Archive) -> Vec<usize> {
        match self.order {
            EntryOrder::Directory => (0..archive.entry_count()).collect(),
            EntryOrder::PayloadOffset => archive.offset_order(),
        }
    }

    /// Streams every entry into `out`. No checkpoints are kept.
    pub fn flatten_to_writer<W: Write>(&self, archive: &Archive, out: W) -> Result<FlattenReport> {
        let mut source = BufReader::new(File::open(archive.path())?);
        let mut out = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, out);
        let order = self.entry_order(archive);
        let mut state = PassState::default();

        let outcome = self.run(archive, &mut source, &mut out, &order, &mut state, |_, _| Ok(()))?;
        out.flush()?;

        Ok(self.report(archive, state, None, outcome))
    }

    /// Flattens into `dst`, writing through `<dst>.partial` and keeping a
    /// checkpoint in `<dst>.checkpoint.json` so an interrupted run can resume.
    /// `dst` only appears once every entry has been processed.
    pub fn flatten_to_file(&self, archive: &Archive, dst: &Path) -> Result<FlattenReport> {
        let partial_path = partial_path_for(dst);
        let checkpoint_path = checkpoint_path_for(dst);
        let fingerprint = SourceFingerprint::of(archive, self.order);

        if let Some(parent) = dst.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut state = PassState::default();
        let mut resumed_from = None;
        let mut partial = None;

        if self.resume {
            if let Some(checkpoint) = Checkpoint::load(&checkpoint_path)? {
                let partial_len = fs::metadata(&partial_path).ok().map(|m| m.len());
                if checkpoint.is_resumable(&fingerprint, partial_len) {
                    info!(
                        "resuming {} at entry {} ({} bytes already written)",
                        dst.display(),
                        checkpoint.processed,
                        checkpoint.bytes_written
                    );
                    let mut file = OpenOptions::new().write(true).open(&partial_path)?;
                    file.seek(SeekFrom::End(0))?;
                    partial = Some(file);
                    resumed_from = Some(checkpoint.processed);
                    state = PassState {
                        processed: checkpoint.processed,
                        bytes_written: checkpoint.bytes_written,
                        skipped: checkpoint.skipped,
                        size_mismatches: checkpoint.size_mismatches,
                    };
                } else {
                    warn!(
                        "checkpoint for {} does not match the archive or partial output, restarting",
                        dst.display()
                    );
                }
            }
        }

        let partial = match partial {
            Some(file) => file,
            None => {
                Checkpoint::remove(&checkpoint_path)?;
                File::create(&partial_path)?
            }
        };

        let mut source = BufReader::new(File::open(archive.path())?);
        let mut out = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, partial);
        let order = self.entry_order(archive);

        let save = |state: &PassState, out: &mut BufWriter<File>| -> Result<()> {
            out.flush()?;
            out.get_ref().sync_data()?;
            Checkpoint {
                source: fingerprint.clone(),
                processed: state.processed,
                bytes_written: state.bytes_written,
                skipped: state.skipped.clone(),
                size_mismatches: state.size_mismatches,
            }
            .save(&checkpoint_path)
        };

        let outcome = self.run(archive, &mut source, &mut out, &order, &mut state, &save)?;

        if outcome == FlattenOutcome::Completed {
            out.flush()?;
            out.get_ref().sync_all()?;
            drop(out);
            if dst.exists() {
                fs::remove_file(dst)?;
            }
            fs::rename(&partial_path, dst)?;
            Checkpoint::remove(&checkpoint_path)?;
        } else {
            save(&state, &mut out)?;
            info!(
                "progress saved to {}, rerun to resume at entry {}",
                checkpoint_path.display(),
                state.processed
            );
        }

        Ok(self.report(archive, state, resumed_from, outcome))
    }

    fn run<R, W, F>(
        &self,
        archive: &Archive,
        source: &mut R,
        out: &mut W,
        order: &[usize],
        state: &mut PassState,
        mut on_chunk: F,
    ) -> Result<FlattenOutcome>
    where
        R: Read + Seek,
        W: Write,
        F: FnMut(&PassState, &mut W) -> Result<()>,
    {
        let total = order.len();

        while state.processed < total {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(FlattenOutcome::Cancelled);
            }

            let index = order[state.processed];
            match archive.read_entry_from(source, index) {
                Ok(payload) => {
                    if payload.size_mismatch() {
                        state.size_mismatches += 1;
                    }
                    let data = payload.into_inner();
                    out.write_all(&data)?;
                    state.bytes_written += data.len() as u64;
                }
                Err(e) if e.is_entry_error() => match self.policy {
                    ErrorPolicy::Lenient => {
                        warn!("skipping entry {}: {}", index, e);
                        state.skipped.push(SkippedEntry {
                            index,
                            reason: e.to_string(),
                        });
                    }
                    ErrorPolicy::Strict => {
                        return Ok(FlattenOutcome::Aborted {
                            reason: e.to_string(),
                        });
                    }
                },
                Err(e) => return Err(e),
            }

            state.processed += 1;
            if let Some(ref cb) = self.progress {
                cb(state.processed, total, &format!("entry {}", index));
            }
            if self.checkpoint_every > 0
                && state.processed % self.checkpoint_every == 0
                && state.processed < total
            {
                on_chunk(state, out)?;
            }
        }

        Ok(FlattenOutcome::Completed)
    }

    fn report(
        &self,
        archive: &Archive,
        state: PassState,
        resumed_from: Option<usize>,
        outcome: FlattenOutcome,
    ) -> FlattenReport {
        FlattenReport {
            total: archive.entry_count(),
            processed: state.processed,
            skipped: state.skipped,
            size_mismatches: state.size_mismatches,
            bytes_written: state.bytes_written,
            resumed_from,
            outcome,
        }
    }
}

/// Flattens into memory with the default (lenient) policy.
pub fn flatten(archive: &Archive, order: EntryOrder) -> Result<(Vec<u8>, FlattenReport)> {
    let session = FlattenSession::new(order, ErrorPolicy::Lenient);
    let mut out = Vec::new();
    let report = session.flatten_to_writer(archive, &mut out)?;
    Ok((out, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ArchiveBuilder;

    fn build(builder: &ArchiveBuilder) -> (tempfile::TempDir, Archive) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.uop");
        builder.write_file(&path).unwrap();
        let archive = Archive::open(&path).unwrap();
        (dir, archive)
    }

    #[test]
    fn strict_policy_aborts_at_bad_entry() {
        let mut builder = ArchiveBuilder::new();
        builder
            .add_stored(b"aa".to_vec())
            .add_stored(b"bb".to_vec())
            .add_raw(99, b"??".to_vec(), 2)
            .add_stored(b"cc".to_vec());
        let (_dir, archive) = build(&builder);

        let session = FlattenSession::new(EntryOrder::Directory, ErrorPolicy::Strict);
        let mut out = Vec::new();
        let report = session.flatten_to_writer(&archive, &mut out).unwrap();

        assert_eq!(out, b"aabb");
        assert_eq!(report.processed, 2);
        assert!(matches!(report.outcome, FlattenOutcome::Aborted { .. }));
        assert!(report
            .to_string()
            .starts_with("aborted after processing 2 of 4 entries"));
    }

    #[test]
    fn lenient_report_counts_skips() {
        let mut builder = ArchiveBuilder::new();
        builder
            .add_stored(b"aa".to_vec())
            .add_raw(1, b"not zlib at all".to_vec(), 10)
            .add_stored(b"bb".to_vec());
        let (_dir, archive) = build(&builder);

        let (out, report) = flatten(&archive, EntryOrder::Directory).unwrap();
        assert_eq!(out, b"aabb");
        assert!(report.is_partial());
        assert_eq!(report.flattened(), 2);
        assert_eq!(report.skipped[0].index, 1);
        assert_eq!(report.to_string(), "flattened 2 of 3 entries, 1 skipped (4 bytes)");
    }

    #[test]
    fn size_mismatches_are_counted() {
        let mut builder = ArchiveBuilder::new();
        builder.add_raw(0, b"abc".to_vec(), 4).add_stored(b"de".to_vec());
        let (_dir, archive) = build(&builder);

        let (out, report) = flatten(&archive, EntryOrder::Directory).unwrap();
        assert_eq!(out, b"abcde");
        assert_eq!(report.size_mismatches, 1);
        assert!(report.is_completed());
        assert!(!report.is_partial());
    }

    #[test]
    fn cancel_before_start_processes_nothing() {
        let mut builder = ArchiveBuilder::new();
        builder.add_stored(b"aa".to_vec());
        let (_dir, archive) = build(&builder);

        let session = FlattenSession::default();
        session.cancel_handle().store(true, Ordering::SeqCst);
        let mut out = Vec::new();
        let report = session.flatten_to_writer(&archive, &mut out).unwrap();
        assert_eq!(report.outcome, FlattenOutcome::Cancelled);
        assert_eq!(report.processed, 0);
        assert!(out.is_empty());
    }
}
