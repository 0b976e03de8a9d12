//! uopconv - UOP container reader and MUL flattener

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use uop_core::{extract_all, extract_entry, Archive, EntryOrder, FlattenOutcome, FlattenSession};

mod cli;
use cli::{Cli, Commands, FlattenArgs};

/// Process exit status: 0 full success, 1 failure, 2 finished with skipped entries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Status {
    Success = 0,
    Partial = 2,
    Failed = 1,
}

impl Status {
    /// Combines two outcomes; a failure outranks skips.
    fn worst(self, other: Status) -> Status {
        match (self, other) {
            (Status::Failed, _) | (_, Status::Failed) => Status::Failed,
            (Status::Partial, _) | (_, Status::Partial) => Status::Partial,
            _ => Status::Success,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let status = match run(cli) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            Status::Failed
        }
    };
    process::exit(status as i32);
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_target(false)
        .init();
}

fn run(cli: Cli) -> Result<Status> {
    match cli.command {
        Commands::Flatten { src, dst, flatten } => flatten_one(&src, &dst, &flatten),

        Commands::Maps {
            uo_dir,
            out_dir,
            flatten,
        } => convert_maps(&uo_dir, &out_dir, &flatten),

        Commands::Info { src } => {
            let archive = open(&src)?;
            let header = archive.header();
            println!("File: {}", src.display());
            println!("  Size: {} bytes", archive.file_len());
            println!("  Version: {}", header.version);
            println!("  Signature: {:#010x}", header.signature);
            println!("  First block offset: {}", header.first_block_offset);
            println!("  Block size: {}", header.block_size);
            println!("  Declared entries: {}", header.declared_entry_count);
            println!("  Blocks walked: {}", archive.block_count());
            println!("  Entries: {}", archive.entry_count());
            println!("  Empty slots: {}", archive.empty_slots());
            Ok(Status::Success)
        }

        Commands::List { src, ordering } => {
            let archive = open(&src)?;
            let indices: Vec<usize> = match EntryOrder::from(ordering) {
                EntryOrder::Directory => (0..archive.entry_count()).collect(),
                EntryOrder::PayloadOffset => archive.offset_order(),
            };
            println!(
                "{:>8}  {:>12}  {:>10}  {:>10}  {:<5}  {:>18}",
                "index", "offset", "stored", "size", "comp", "hash"
            );
            for index in indices {
                let e = archive.entry(index)?;
                println!(
                    "{:>8}  {:>12}  {:>10}  {:>10}  {:<5}  {:#018x}",
                    index,
                    e.payload_offset,
                    e.compressed_size,
                    e.decompressed_size,
                    e.compression.to_string(),
                    e.content_hash
                );
            }
            Ok(Status::Success)
        }

        Commands::Extract {
            src,
            index,
            name,
            all,
            output,
        } => {
            let archive = open(&src)?;
            if all {
                let pb = progress_bar()?;
                let pb_clone = pb.clone();
                let progress_fn = Arc::new(move |current: usize, total: usize, msg: &str| {
                    pb_clone.set_length(total as u64);
                    pb_clone.set_position(current as u64);
                    pb_clone.set_message(msg.to_string());
                });
                let report = extract_all(&archive, &output, Some(progress_fn))
                    .with_context(|| format!("Failed to extract into '{}'", output.display()))?;
                pb.finish_and_clear();

                println!(
                    "Extracted {} entries ({} bytes) to {}",
                    report.written,
                    report.bytes_written,
                    output.display()
                );
                for failed in &report.failed {
                    println!("  Failed: {}", failed.reason);
                }
                return Ok(if report.failed.is_empty() {
                    Status::Success
                } else {
                    Status::Partial
                });
            }

            let index = match (index, name) {
                (Some(index), _) => index,
                (None, Some(name)) => match archive.find_by_name(&name) {
                    Some(index) => index,
                    None => bail!("No entry named '{}' in {}", name, src.display()),
                },
                (None, None) => bail!("One of --index, --name or --all is required"),
            };
            let len = extract_entry(&archive, index, &output)
                .with_context(|| format!("Failed to extract entry {}", index))?;
            println!("Wrote entry {} ({} bytes) to {}", index, len, output.display());
            Ok(Status::Success)
        }
    }
}

fn open(src: &Path) -> Result<Archive> {
    Archive::open(src).with_context(|| format!("Failed to open UOP container '{}'", src.display()))
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn build_session(args: &FlattenArgs) -> FlattenSession {
    FlattenSession {
        checkpoint_every: args.checkpoint_every.max(1),
        resume: !args.no_resume,
        ..FlattenSession::new(args.ordering.into(), args.on_error.into())
    }
}

fn flatten_one(src: &Path, dst: &Path, args: &FlattenArgs) -> Result<Status> {
    let archive = open(src)?;
    println!(
        "Flattening {} ({} entries) to {}",
        src.display(),
        archive.entry_count(),
        dst.display()
    );

    let pb = progress_bar()?;
    let pb_clone = pb.clone();
    let mut session = build_session(args);
    session.progress = Some(Arc::new(move |current: usize, total: usize, msg: &str| {
        pb_clone.set_length(total as u64);
        pb_clone.set_position(current as u64);
        pb_clone.set_message(msg.to_string());
    }));

    let report = session
        .flatten_to_file(&archive, dst)
        .with_context(|| format!("Failed to flatten '{}'", src.display()))?;
    pb.finish_and_clear();

    if let Some(from) = report.resumed_from {
        info!("resumed {} from entry {}", src.display(), from);
    }
    println!("  {}", report);
    for skipped in &report.skipped {
        println!("  Skipped: {}", skipped.reason);
    }
    if report.size_mismatches > 0 {
        println!("  Size mismatches: {}", report.size_mismatches);
    }

    Ok(match report.outcome {
        FlattenOutcome::Completed if report.skipped.is_empty() => Status::Success,
        FlattenOutcome::Completed => Status::Partial,
        FlattenOutcome::Aborted { .. } | FlattenOutcome::Cancelled => Status::Failed,
    })
}

/// Map containers a client ships, paired with the legacy file name they flatten to.
fn map_files(uo_dir: &Path, out_dir: &Path) -> Vec<(PathBuf, PathBuf)> {
    let plain = (0..6).map(|n| format!("map{}", n));
    let zoomed = (0..6).map(|n| format!("map{}x", n));
    plain
        .chain(zoomed)
        .map(|stem| {
            (
                uo_dir.join(format!("{}LegacyMUL.uop", stem)),
                out_dir.join(format!("{}.mul", stem)),
            )
        })
        .collect()
}

fn convert_maps(uo_dir: &Path, out_dir: &Path, args: &FlattenArgs) -> Result<Status> {
    if !uo_dir.is_dir() {
        bail!("'{}' is not a directory", uo_dir.display());
    }

    let mut status = Status::Success;
    let mut converted = 0usize;
    for (src, dst) in map_files(uo_dir, out_dir) {
        if !src.exists() {
            warn!("{} not found, skipping", src.display());
            continue;
        }
        // One bad map does not stop the others.
        let outcome = flatten_one(&src, &dst, args).unwrap_or_else(|e| {
            eprintln!("Error: {:#}", e);
            Status::Failed
        });
        if outcome != Status::Failed {
            converted += 1;
        }
        status = status.worst(outcome);
    }

    if converted == 0 && status == Status::Success {
        bail!("No map*LegacyMUL.uop files found in '{}'", uo_dir.display());
    }
    println!("Converted {} map file(s) into {}", converted, out_dir.display());
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_outranks_skips() {
        assert_eq!(Status::Success.worst(Status::Partial), Status::Partial);
        assert_eq!(Status::Partial.worst(Status::Failed), Status::Failed);
        assert_eq!(Status::Failed.worst(Status::Success), Status::Failed);
        assert_eq!(Status::Success.worst(Status::Success), Status::Success);
    }

    #[test]
    fn map_files_cover_plain_and_zoomed_maps() {
        let files = map_files(Path::new("uo"), Path::new("out"));
        assert_eq!(files.len(), 12);
        assert_eq!(files[0].0, Path::new("uo/map0LegacyMUL.uop"));
        assert_eq!(files[0].1, Path::new("out/map0.mul"));
        assert_eq!(files[11].0, Path::new("uo/map5xLegacyMUL.uop"));
        assert_eq!(files[11].1, Path::new("out/map5x.mul"));
    }
}
