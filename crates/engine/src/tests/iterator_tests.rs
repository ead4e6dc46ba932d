use super::helpers::*;
use crate::ReadOptions;

use tempfile::tempdir;

fn collect_forward(db: &crate::Db) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = db.iter(&ReadOptions::default());
    iter.seek_to_first();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    iter.status().unwrap();
    out
}

fn collect_reverse(db: &crate::Db) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = db.iter(&ReadOptions::default());
    iter.seek_to_last();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.prev();
    }
    iter.status().unwrap();
    out
}

#[test]
fn yields_keys_in_insertion_independent_order() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"key1", b"v1");
    put(&db, b"key3", b"v3");
    put(&db, b"key2", b"v2");

    assert_eq!(
        collect_forward(&db),
        vec![
            (b"key1".to_vec(), b"v1".to_vec()),
            (b"key2".to_vec(), b"v2".to_vec()),
            (b"key3".to_vec(), b"v3".to_vec()),
        ]
    );
}

#[test]
fn merges_memtable_and_tables_without_duplicates() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"a", b"table");
    put(&db, b"b", b"stale");
    db.flush().unwrap();
    put(&db, b"b", b"fresh"); // overwrites the flushed value
    put(&db, b"c", b"memtable");

    assert_eq!(
        collect_forward(&db),
        vec![
            (b"a".to_vec(), b"table".to_vec()),
            (b"b".to_vec(), b"fresh".to_vec()),
            (b"c".to_vec(), b"memtable".to_vec()),
        ]
    );
}

#[test]
fn deleted_keys_are_invisible() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"a", b"1");
    put(&db, b"b", b"2");
    put(&db, b"c", b"3");
    db.flush().unwrap();
    delete(&db, b"b");

    assert_eq!(
        collect_forward(&db),
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );
    assert_eq!(
        collect_reverse(&db),
        vec![
            (b"c".to_vec(), b"3".to_vec()),
            (b"a".to_vec(), b"1".to_vec()),
        ]
    );
}

#[test]
fn reverse_iteration_sees_newest_versions() {
    // Reverse iteration must pick the newest visible version of each
    // key even when versions are spread across overlapping level-0
    // tables.
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"k1", b"old1");
    put(&db, b"k2", b"old2");
    db.flush().unwrap();
    put(&db, b"k2", b"new2");
    put(&db, b"k3", b"v3");
    db.flush().unwrap();
    delete(&db, b"k3");
    put(&db, b"k4", b"v4");

    assert_eq!(
        collect_reverse(&db),
        vec![
            (b"k4".to_vec(), b"v4".to_vec()),
            (b"k2".to_vec(), b"new2".to_vec()),
            (b"k1".to_vec(), b"old1".to_vec()),
        ]
    );
}

#[test]
fn seek_positions_at_first_key_at_or_after() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"b", b"1");
    put(&db, b"d", b"2");
    put(&db, b"f", b"3");

    let mut iter = db.iter(&ReadOptions::default());
    iter.seek(b"c");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"d");

    iter.seek(b"d");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"d");

    iter.seek(b"g");
    assert!(!iter.valid());
}

#[test]
fn direction_changes_mid_stream() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    for (k, v) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")] {
        put(&db, k, v);
    }
    db.flush().unwrap();

    let mut iter = db.iter(&ReadOptions::default());
    iter.seek(b"b");
    assert_eq!(iter.key(), b"b");

    iter.next();
    assert_eq!(iter.key(), b"c");

    iter.prev();
    assert_eq!(iter.key(), b"b");
    assert_eq!(iter.value(), b"2");

    iter.prev();
    assert_eq!(iter.key(), b"a");

    iter.next();
    assert_eq!(iter.key(), b"b");
}

#[test]
fn iterator_is_a_stable_snapshot() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"k1", b"v1");
    put(&db, b"k2", b"v2");

    let mut iter = db.iter(&ReadOptions::default());

    // Mutations after iterator creation are invisible to it, even once
    // a flush moves the data into tables.
    put(&db, b"k3", b"v3");
    delete(&db, b"k1");
    put(&db, b"k2", b"changed");
    db.flush().unwrap();

    iter.seek_to_first();
    let mut seen = Vec::new();
    while iter.valid() {
        seen.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    assert_eq!(
        seen,
        vec![
            (b"k1".to_vec(), b"v1".to_vec()),
            (b"k2".to_vec(), b"v2".to_vec()),
        ]
    );

    // The live view moved on.
    assert_eq!(get(&db, b"k1"), None);
    assert_eq!(get(&db, b"k2"), Some(b"changed".to_vec()));
    assert_eq!(get(&db, b"k3"), Some(b"v3".to_vec()));
}

#[test]
fn iterator_spanning_compacted_levels() {
    let dir = tempdir().unwrap();
    let db = open_with(dir.path(), small_buffer_options());

    let mut expected = Vec::new();
    for i in 0..1000u32 {
        let key = format!("key{i:04}").into_bytes();
        let value = format!("value{i}").into_bytes();
        put(&db, &key, &value);
        expected.push((key, value));
    }
    db.flush().unwrap();
    // Give compaction a chance to rearrange the levels underneath us.
    wait_for(|| db.num_files_at_level(0) <= 4);

    assert_eq!(collect_forward(&db), expected);

    let mut reversed = expected.clone();
    reversed.reverse();
    assert_eq!(collect_reverse(&db), reversed);
}
