use super::helpers::*;
use tempfile::tempdir;

#[test]
fn reads_hit_memtable_then_tables() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    // "cold" lives in a table, "hot" in the memtable.
    put(&db, b"cold", b"from-table");
    db.flush().unwrap();
    put(&db, b"hot", b"from-memtable");

    assert_eq!(get(&db, b"cold"), Some(b"from-table".to_vec()));
    assert_eq!(get(&db, b"hot"), Some(b"from-memtable".to_vec()));
}

#[test]
fn memtable_shadows_older_table_value() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"k", b"old");
    db.flush().unwrap();
    put(&db, b"k", b"new");
    assert_eq!(get(&db, b"k"), Some(b"new".to_vec()));
}

#[test]
fn tombstone_in_memtable_shadows_table_value() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"k", b"soon-gone");
    db.flush().unwrap();
    delete(&db, b"k");
    assert_eq!(get(&db, b"k"), None);
}

#[test]
fn newer_level0_file_wins_over_older() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"k", b"first");
    db.flush().unwrap();
    put(&db, b"k", b"second");
    db.flush().unwrap();

    assert_eq!(get(&db, b"k"), Some(b"second".to_vec()));
}

#[test]
fn reads_across_many_tables_with_bloom_filters() {
    let dir = tempdir().unwrap();
    let db = open_with(dir.path(), small_buffer_options());

    for i in 0..500u32 {
        put(&db, format!("key{i:04}").as_bytes(), format!("v{i}").as_bytes());
    }
    db.flush().unwrap();

    // Present keys are found; absent keys between them are not.
    for i in (0..500u32).step_by(17) {
        assert_eq!(
            get(&db, format!("key{i:04}").as_bytes()),
            Some(format!("v{i}").into_bytes())
        );
    }
    for i in 0..100u32 {
        assert_eq!(get(&db, format!("nope{i:04}").as_bytes()), None);
    }
}

#[test]
fn verify_checksums_read_succeeds_on_clean_data() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    put(&db, b"checked", b"value");
    db.flush().unwrap();

    let strict = crate::ReadOptions {
        verify_checksums: true,
        fill_cache: true,
    };
    assert_eq!(
        db.get(&strict, b"checked").unwrap(),
        Some(b"value".to_vec())
    );
}
