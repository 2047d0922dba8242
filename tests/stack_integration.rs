//! Stack deduplication, pruning, and lookup tests

use blockstack::core::OpenMode;
use blockstack::stack::config::CONFIG_FILE;
use blockstack::stack::BULK_DIR;
use blockstack::{Stack, StackConfig, StackError};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

struct Fixture {
    temp: TempDir,
    stack: Stack,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let stack = Stack::create(temp.path().join("stack")).unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        Fixture { temp, stack }
    }

    fn file(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.temp.path().join("src").join(name);
        fs::write(&path, data).unwrap();
        path
    }

    fn blob_count(&self) -> usize {
        fs::read_dir(self.stack.bulk_dir()).unwrap().count()
    }
}

#[test]
fn test_identical_files_in_one_call_share_a_blob() {
    let fx = Fixture::new();
    let a = fx.file("a.txt", b"identical content");
    let b = fx.file("b.txt", b"identical content");

    let level = fx.stack.create_level(&[&a, &b], None).unwrap();
    assert_eq!(level.files.len(), 2);
    assert_eq!(level.files[0].bulk_id, level.files[1].bulk_id);
    assert_eq!(fx.stack.stats().unwrap().bulk_records, 1);
    assert_eq!(fx.blob_count(), 1);
}

#[test]
fn test_identical_files_across_levels_share_a_blob() {
    let fx = Fixture::new();
    let a = fx.file("a.txt", b"v1");
    let first = fx.stack.create_level(&[&a], None).unwrap();
    let second = fx.stack.create_level(&[&a], None).unwrap();

    assert_ne!(first.level_id, second.level_id);
    assert_eq!(first.files[0].bulk_id, second.files[0].bulk_id);
    assert_eq!(fx.blob_count(), 1);

    // a changed file gets a new blob
    fs::write(&a, b"v2").unwrap();
    let third = fx.stack.create_level(&[&a], None).unwrap();
    assert_ne!(third.files[0].bulk_id, first.files[0].bulk_id);
    assert_eq!(fx.blob_count(), 2);
}

#[test]
fn test_prune_keeps_everything_referenced() {
    let fx = Fixture::new();
    let files: Vec<PathBuf> = (0..8)
        .map(|i| fx.file(&format!("f{}.bin", i), format!("content {}", i).as_bytes()))
        .collect();

    fx.stack.create_level(&files, None).unwrap();
    let stats = fx.stack.prune_bulk().unwrap();

    assert_eq!(stats.scanned, 8);
    assert_eq!(stats.removed, 0);
    assert_eq!(fx.stack.stats().unwrap().bulk_records, 8);
    assert_eq!(fx.blob_count(), 8);
}

#[test]
fn test_deleting_only_reference_then_prune_reclaims_blob() {
    let fx = Fixture::new();
    let shared = fx.file("shared.txt", b"in both levels");
    let unique = fx.file("unique.txt", b"only in the first level");

    let first = fx.stack.create_level(&[&shared, &unique], None).unwrap();
    fx.stack.create_level(&[&shared], None).unwrap();
    let unique_bulk = first.files[1].bulk_id.clone();

    fx.stack.delete_level(&first.level_id).unwrap();
    // deleting alone reclaims nothing
    assert!(fx.stack.get_bulk(&unique_bulk).is_ok());

    let stats = fx.stack.prune_bulk().unwrap();
    assert_eq!(stats.removed, 1);
    assert!(matches!(
        fx.stack.get_bulk(&unique_bulk),
        Err(StackError::BulkNotFound(_))
    ));
    assert!(!fx.stack.bulk_dir().join(&unique_bulk).exists());

    let mut sink = Vec::new();
    fx.stack
        .retrieve_file(&first.files[0].bulk_id, &mut sink)
        .unwrap();
    assert_eq!(sink, b"in both levels");
}

#[test]
fn test_delete_unknown_level() {
    let fx = Fixture::new();
    assert!(matches!(
        fx.stack.delete_level("missing"),
        Err(StackError::LevelNotFound(_))
    ));
    assert!(fx.stack.get_level("missing").unwrap_err().is_not_found());
}

#[test]
fn test_failed_level_leaves_orphans_for_prune() {
    let fx = Fixture::new();
    let good = fx.file("good.txt", b"copied before the failure");
    let missing = fx.temp.path().join("src").join("missing.txt");

    let err = fx.stack.create_level(&[&good, &missing], None).unwrap_err();
    assert!(err.to_string().contains("may already be open"));
    assert!(fx.stack.get_all_levels().unwrap().is_empty());
    assert_eq!(fx.blob_count(), 1);

    fx.stack.prune_bulk().unwrap();
    assert_eq!(fx.blob_count(), 0);
    assert_eq!(fx.stack.stats().unwrap().bulk_records, 0);
}

#[test]
fn test_find_file_by_name_and_path() {
    let fx = Fixture::new();
    let notes = fx.file("notes.md", b"n");
    let todo = fx.file("todo.md", b"t");
    let image = fx.file("photo.jpg", b"p");

    let first = fx.stack.create_level(&[&notes, &image], None).unwrap();
    let second = fx.stack.create_level(&[&todo], None).unwrap();

    let names: HashSet<String> = fx
        .stack
        .find_file("*.md", true, None)
        .unwrap()
        .into_iter()
        .map(|hit| hit.file_name)
        .collect();
    assert_eq!(names, HashSet::from(["notes.md".to_string(), "todo.md".to_string()]));

    let hits = fx.stack.find_file("*.md", true, Some(&second.level_id)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].level_id, second.level_id);

    let hits = fx.stack.find_file("*/src/photo.???", false, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].bulk_id, first.files[1].bulk_id);
    assert_eq!(hits[0].time_saved, first.time_saved);
}

#[test]
fn test_state_survives_reopen() {
    let fx = Fixture::new();
    let a = fx.file("a.txt", b"persistent");
    let level = fx.stack.create_level(&[&a], Some(vec![9, 9])).unwrap();
    let root = fx.stack.root().to_path_buf();
    fx.stack.dispose().unwrap();

    let stack = Stack::open(&root).unwrap();
    let levels = stack.get_all_levels().unwrap();
    assert_eq!(levels, vec![level.clone()]);
    assert_eq!(
        stack.last_stacked_path().unwrap(),
        Some(fs::canonicalize(fx.temp.path().join("src")).unwrap())
    );

    let restored = stack
        .restore_level(&level.level_id, fx.temp.path().join("out"))
        .unwrap();
    assert_eq!(fs::read(&restored[0]).unwrap(), b"persistent");
}

#[test]
fn test_open_missing_stack_fails() {
    let temp = TempDir::new().unwrap();
    let err = Stack::open(temp.path().join("nowhere")).err().unwrap();
    assert!(err.is_not_found());
}

#[test]
fn test_config_file_is_honoured() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("stack");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join(CONFIG_FILE), "id_length = 24\n").unwrap();

    let stack = Stack::open_or_create(&root).unwrap();
    assert_eq!(stack.config().id_length, 24);

    let src = temp.path().join("x.txt");
    fs::write(&src, b"x").unwrap();
    let level = stack.create_level(&[&src], None).unwrap();
    assert_eq!(level.level_id.len(), 24);
    assert_eq!(level.files[0].bulk_id.len(), 24);
}

#[test]
fn test_disposed_stack_rejects_everything() {
    let fx = Fixture::new();
    let a = fx.file("a.txt", b"a");
    let level = fx.stack.create_level(&[&a], None).unwrap();
    fx.stack.dispose().unwrap();

    let mut sink = Vec::new();
    assert!(matches!(fx.stack.get_level(&level.level_id), Err(StackError::Disposed)));
    assert!(matches!(fx.stack.delete_level(&level.level_id), Err(StackError::Disposed)));
    assert!(matches!(
        fx.stack.retrieve_file(&level.files[0].bulk_id, &mut sink),
        Err(StackError::Disposed)
    ));
    assert!(matches!(fx.stack.find_file("*", true, None), Err(StackError::Disposed)));
    assert!(matches!(fx.stack.metadata(), Err(StackError::Disposed)));
}

#[test]
fn test_explicit_config_with_small_pages() {
    let temp = TempDir::new().unwrap();
    let mut config = StackConfig::default();
    config.block_list.page_capacity = 2;
    config.block_list.min_block_size = 32;

    let stack = Stack::open_with(temp.path().join("s"), OpenMode::Create, config).unwrap();
    let src = temp.path().join("src");
    fs::create_dir_all(&src).unwrap();

    let mut ids = Vec::new();
    for i in 0..20 {
        let path = src.join(format!("{}.dat", i));
        fs::write(&path, vec![i as u8; 100 + i]).unwrap();
        ids.push(stack.create_level(&[&path], None).unwrap().level_id);
    }
    assert_eq!(stack.stats().unwrap().levels, 20);
    assert!(Path::new(&temp.path().join("s").join(BULK_DIR)).is_dir());

    for id in ids.iter().step_by(2) {
        stack.delete_level(id).unwrap();
    }
    assert_eq!(stack.prune_bulk().unwrap().removed, 10);
    assert_eq!(stack.stats().unwrap().bulk_records, 10);
}

#[test]
fn test_reads_do_not_block_level_writers() {
    let temp = TempDir::new().unwrap();
    let stack = Arc::new(Stack::create(temp.path().join("stack")).unwrap());
    let src = temp.path().join("src");
    fs::create_dir_all(&src).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let stack = Arc::clone(&stack);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reads = 0usize;
            loop {
                stack.get_all_levels().unwrap();
                stack.find_file("*.dat", true, None).unwrap();
                stack.stats().unwrap();
                reads += 1;
                if done.load(Ordering::SeqCst) {
                    return reads;
                }
            }
        })
    };

    let mut ids = Vec::new();
    for i in 0..150 {
        let path = src.join(format!("{}.dat", i));
        fs::write(&path, format!("payload {}", i)).unwrap();
        ids.push(stack.create_level(&[&path], None).unwrap().level_id);
    }
    for id in ids.iter().step_by(3) {
        stack.delete_level(id).unwrap();
    }
    stack.prune_bulk().unwrap();

    done.store(true, Ordering::SeqCst);
    assert!(reader.join().unwrap() > 0);

    let stats = stack.stats().unwrap();
    assert_eq!(stats.levels, 100);
    assert_eq!(stats.bulk_records, 100);
    assert_eq!(stack.bulk_dir().read_dir().unwrap().count(), 100);
}
