use super::helpers::*;
use crate::{Db, Error, Options, WriteOptions};

use std::sync::Arc;
use tempfile::tempdir;

// --------------------- basic put / get / delete ---------------------

#[test]
fn put_then_get() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"language", b"C++17");
    assert_eq!(get(&db, b"language"), Some(b"C++17".to_vec()));
}

#[test]
fn get_missing_key() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    assert_eq!(get(&db, b"nothing-here"), None);
}

#[test]
fn delete_then_get_reports_absent() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"language", b"C++17");
    delete(&db, b"language");
    assert_eq!(get(&db, b"language"), None);
}

#[test]
fn delete_of_absent_key_succeeds() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    db.delete(&WriteOptions::default(), b"never-existed").unwrap();
}

#[test]
fn overwrite_returns_newest() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"k", b"v1");
    put(&db, b"k", b"v2");
    assert_eq!(get(&db, b"k"), Some(b"v2".to_vec()));
}

#[test]
fn put_after_delete_resurrects() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"k", b"v1");
    delete(&db, b"k");
    put(&db, b"k", b"v2");
    assert_eq!(get(&db, b"k"), Some(b"v2".to_vec()));
}

#[test]
fn empty_key_and_empty_value() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"", b"value-for-empty-key");
    put(&db, b"empty-value", b"");
    assert_eq!(get(&db, b""), Some(b"value-for-empty-key".to_vec()));
    assert_eq!(get(&db, b"empty-value"), Some(Vec::new()));
}

#[test]
fn synchronous_writes_are_readable() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    let sync = WriteOptions { sync: true };
    db.put(&sync, b"durable", b"yes").unwrap();
    assert_eq!(get(&db, b"durable"), Some(b"yes".to_vec()));
}

// --------------------- flushing and rotation ---------------------

#[test]
fn small_write_buffer_spills_to_tables() {
    // 2,000 records of 200-byte values with a 10 KiB buffer forces many
    // rotations; everything must remain readable afterwards.
    let dir = tempdir().unwrap();
    let db = open_with(dir.path(), small_buffer_options());

    let value = vec![b'x'; 200];
    for i in 0..2000u32 {
        put(&db, format!("key{i}").as_bytes(), &value);
    }

    for i in 0..2000u32 {
        let got = get(&db, format!("key{i}").as_bytes());
        assert_eq!(
            got.as_deref().map(|v| v.len()),
            Some(200),
            "key{i} lost or resized"
        );
        assert_eq!(got, Some(value.clone()));
    }

    // The spill actually happened.
    let total_tables: usize = (0..7).map(|l| db.num_files_at_level(l)).sum();
    assert!(total_tables > 0, "expected tables on disk");
}

#[test]
fn explicit_flush_creates_level0_table() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"a", b"1");
    db.flush().unwrap();
    assert!(wait_for(|| db.num_files_at_level(0) >= 1));
    assert_eq!(get(&db, b"a"), Some(b"1".to_vec()));
}

#[test]
fn flush_of_empty_memtable_is_noop() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    db.flush().unwrap();
    assert_eq!(db.num_files_at_level(0), 0);
}

// --------------------- group commit ---------------------

#[test]
fn concurrent_writers_all_commit() {
    let dir = tempdir().unwrap();
    let db = Arc::new(open(dir.path()));

    let mut handles = Vec::new();
    for t in 0..4u32 {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            for i in 0..500u32 {
                let key = format!("writer{t}/key{i}");
                let value = format!("value-{t}-{i}");
                db.put(&WriteOptions::default(), key.as_bytes(), value.as_bytes())
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for t in 0..4u32 {
        for i in 0..500u32 {
            let key = format!("writer{t}/key{i}");
            assert_eq!(
                get(&db, key.as_bytes()),
                Some(format!("value-{t}-{i}").into_bytes()),
                "missing {key}"
            );
        }
    }
}

#[test]
fn concurrent_writers_on_same_keys_settle_on_one_value() {
    let dir = tempdir().unwrap();
    let db = Arc::new(open(dir.path()));

    let mut handles = Vec::new();
    for t in 0..4u32 {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            for i in 0..200u32 {
                let key = format!("contended{}", i % 16);
                db.put(
                    &WriteOptions::default(),
                    key.as_bytes(),
                    format!("value-{t}-{i}").as_bytes(),
                )
                .unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // Every contended key holds exactly one of the written values; a
    // torn or interleaved write would produce something else.
    for i in 0..16u32 {
        let got = get(&db, format!("contended{i}").as_bytes()).unwrap();
        let s = String::from_utf8(got).unwrap();
        assert!(s.starts_with("value-"), "unexpected value {s}");
    }
}

// --------------------- open-time validation ---------------------

#[test]
fn open_missing_without_create_fails() {
    let dir = tempdir().unwrap();
    let options = Options {
        create_if_missing: false,
        ..Options::default()
    };
    let err = Db::open(options, dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn open_existing_with_error_if_exists_fails() {
    let dir = tempdir().unwrap();
    {
        let _db = open(dir.path());
    }
    let options = Options {
        error_if_exists: true,
        ..Options::default()
    };
    let err = Db::open(options, dir.path().join("db")).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn second_concurrent_open_is_refused() {
    let dir = tempdir().unwrap();
    let _db = open(dir.path());
    let err = Db::open(Options::default(), dir.path().join("db")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}
