use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use uop_core::{legacy_path, ArchiveBuilder, BuilderOptions};

fn uopconv(args: &[&Path]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_uopconv"))
        .args(args)
        .output()
        .expect("failed to run uopconv")
}

fn map_payload(i: usize) -> Vec<u8> {
    // One 196-byte map block per entry, like map0LegacyMUL.uop.
    vec![i as u8; 196]
}

fn write_map(path: &Path, count: usize, bad_entry: Option<usize>) {
    let mut builder = ArchiveBuilder::with_options(BuilderOptions {
        entries_per_block: 4,
        reverse_payloads: true,
        ..BuilderOptions::default()
    });
    for i in 0..count {
        let name = legacy_path("map0legacymul", i, "dat");
        if Some(i) == bad_entry {
            builder.add_raw(1, b"not a zlib stream".to_vec(), 196);
        } else {
            builder.add_named_zlib(&name, map_payload(i));
        }
    }
    builder.write_file(path).unwrap();
}

/// Offset order of a reversed-payload archive is the reverse of directory order.
fn expected_mul(count: usize, skip: Option<usize>) -> Vec<u8> {
    (0..count)
        .rev()
        .filter(|&i| Some(i) != skip)
        .flat_map(map_payload)
        .collect()
}

#[test]
fn flatten_exits_zero_on_full_success() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("map0LegacyMUL.uop");
    let dst = dir.path().join("map0.mul");
    write_map(&src, 9, None);

    let out = uopconv(&[Path::new("flatten"), &src, &dst]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(fs::read(&dst).unwrap(), expected_mul(9, None));
}

#[test]
fn flatten_exits_two_when_entries_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("map1LegacyMUL.uop");
    let dst = dir.path().join("map1.mul");
    write_map(&src, 10, Some(6));

    let out = uopconv(&[Path::new("flatten"), &src, &dst]);
    assert_eq!(out.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("flattened 9 of 10 entries, 1 skipped"), "{stdout}");
    assert_eq!(fs::read(&dst).unwrap(), expected_mul(10, Some(6)));
}

#[test]
fn flatten_abort_policy_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("map2LegacyMUL.uop");
    let dst = dir.path().join("map2.mul");
    write_map(&src, 5, Some(2));

    let out = uopconv(&[
        Path::new("flatten"),
        &src,
        &dst,
        Path::new("--on-error"),
        Path::new("abort"),
    ]);
    assert_eq!(out.status.code(), Some(1));
    assert!(!dst.exists());
}

#[test]
fn bad_magic_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("bad.uop");
    fs::write(&src, b"BAD\0 and then some junk bytes").unwrap();

    let out = uopconv(&[Path::new("flatten"), &src, &dir.path().join("bad.mul")]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("magic"), "{stderr}");

    let out = uopconv(&[Path::new("info"), &src]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn maps_converts_present_files_only() {
    let dir = tempfile::tempdir().unwrap();
    let uo_dir = dir.path().join("uo");
    let out_dir = dir.path().join("out");
    fs::create_dir_all(&uo_dir).unwrap();
    write_map(&uo_dir.join("map0LegacyMUL.uop"), 6, None);
    write_map(&uo_dir.join("map3xLegacyMUL.uop"), 3, None);

    let out = uopconv(&[Path::new("maps"), &uo_dir, &out_dir]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));

    let mut produced: Vec<PathBuf> = fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    produced.sort();
    assert_eq!(produced, vec![out_dir.join("map0.mul"), out_dir.join("map3x.mul")]);
    assert_eq!(fs::read(out_dir.join("map3x.mul")).unwrap(), expected_mul(3, None));
}

#[test]
fn maps_with_no_inputs_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = uopconv(&[Path::new("maps"), dir.path(), &dir.path().join("out")]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn info_and_list_describe_the_container() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("map4LegacyMUL.uop");
    write_map(&src, 7, None);

    let out = uopconv(&[Path::new("info"), &src]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Entries: 7"), "{stdout}");
    assert!(stdout.contains("Blocks walked: 2"), "{stdout}");

    let out = uopconv(&[Path::new("list"), &src, Path::new("--ordering"), Path::new("directory")]);
    assert_eq!(out.status.code(), Some(0));
    // Header line plus one line per entry.
    assert_eq!(String::from_utf8_lossy(&out.stdout).lines().count(), 8);
}

#[test]
fn extract_by_name_and_all() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("map5LegacyMUL.uop");
    write_map(&src, 4, None);

    let single = dir.path().join("entry.bin");
    let out = uopconv(&[
        Path::new("extract"),
        &src,
        Path::new("--name"),
        Path::new("build/map0legacymul/00000003.dat"),
        Path::new("-o"),
        &single,
    ]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(fs::read(&single).unwrap(), map_payload(3));

    let all = dir.path().join("all");
    let out = uopconv(&[Path::new("extract"), &src, Path::new("--all"), Path::new("-o"), &all]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(fs::read_dir(&all).unwrap().count(), 4);
    assert_eq!(fs::read(all.join("00000001.bin")).unwrap(), map_payload(1));
}
