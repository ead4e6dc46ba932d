use super::*;

use std::sync::Arc;
use types::BytewiseComparator;

fn new_memtable() -> Arc<MemTable> {
    Arc::new(MemTable::new(InternalKeyComparator::new(Arc::new(
        BytewiseComparator,
    ))))
}

#[test]
fn add_then_get() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"language", b"rust");

    let lk = LookupKey::new(b"language", 1);
    assert_eq!(mem.get(&lk), Some(LookupResult::Found(b"rust".to_vec())));

    let missing = LookupKey::new(b"unknown", 1);
    assert_eq!(mem.get(&missing), None);
}

#[test]
fn newest_visible_version_wins() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"k", b"v1");
    mem.add(2, ValueType::Value, b"k", b"v2");

    // A reader at sequence 2 sees the overwrite...
    assert_eq!(
        mem.get(&LookupKey::new(b"k", 2)),
        Some(LookupResult::Found(b"v2".to_vec()))
    );
    // ...while a reader pinned at sequence 1 still sees the old value.
    assert_eq!(
        mem.get(&LookupKey::new(b"k", 1)),
        Some(LookupResult::Found(b"v1".to_vec()))
    );
}

#[test]
fn tombstone_reports_deleted() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"k", b"v");
    mem.add(2, ValueType::Deletion, b"k", b"");

    assert_eq!(mem.get(&LookupKey::new(b"k", 2)), Some(LookupResult::Deleted));
    assert_eq!(
        mem.get(&LookupKey::new(b"k", 1)),
        Some(LookupResult::Found(b"v".to_vec()))
    );
}

#[test]
fn get_does_not_answer_for_neighbouring_keys() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"aaa", b"1");
    mem.add(2, ValueType::Value, b"ccc", b"2");

    // Seek for "bbb" lands on "ccc"; the user-key check must reject it.
    assert_eq!(mem.get(&LookupKey::new(b"bbb", 10)), None);
}

#[test]
fn empty_values_and_keys_round_trip() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"", b"empty-key");
    mem.add(2, ValueType::Value, b"empty-value", b"");

    assert_eq!(
        mem.get(&LookupKey::new(b"", 5)),
        Some(LookupResult::Found(b"empty-key".to_vec()))
    );
    assert_eq!(
        mem.get(&LookupKey::new(b"empty-value", 5)),
        Some(LookupResult::Found(Vec::new()))
    );
}

#[test]
fn memory_usage_tracks_inserts() {
    let mem = new_memtable();
    assert_eq!(mem.approximate_memory_usage(), 0);
    mem.add(1, ValueType::Value, b"key", &vec![0u8; 1000]);
    let after_one = mem.approximate_memory_usage();
    assert!(after_one >= 1000);
    mem.add(2, ValueType::Value, b"key2", &vec![0u8; 1000]);
    assert!(mem.approximate_memory_usage() > after_one);
}

#[test]
fn iterator_yields_sorted_internal_keys() {
    let mem = new_memtable();
    mem.add(3, ValueType::Value, b"b", b"2");
    mem.add(1, ValueType::Value, b"c", b"3");
    mem.add(2, ValueType::Value, b"a", b"1");

    let mut iter = MemTableIterator::new(Arc::clone(&mem));
    iter.seek_to_first();
    let mut got = Vec::new();
    while iter.valid() {
        let parsed = types::parse_internal_key(iter.key()).unwrap();
        got.push((parsed.user_key.to_vec(), iter.value().to_vec()));
        iter.next();
    }
    assert_eq!(
        got,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );
}

#[test]
fn iterator_seek_and_prev() {
    let mem = new_memtable();
    mem.add(1, ValueType::Value, b"a", b"1");
    mem.add(2, ValueType::Value, b"c", b"3");
    mem.add(3, ValueType::Value, b"e", b"5");

    let mut iter = MemTableIterator::new(Arc::clone(&mem));
    let target = LookupKey::new(b"d", types::MAX_SEQUENCE_NUMBER);
    iter.seek(target.internal_key());
    assert!(iter.valid());
    assert_eq!(types::extract_user_key(iter.key()), b"e");

    iter.prev();
    assert!(iter.valid());
    assert_eq!(types::extract_user_key(iter.key()), b"c");

    iter.seek_to_last();
    assert_eq!(types::extract_user_key(iter.key()), b"e");
    iter.next();
    assert!(!iter.valid());
}

#[test]
fn concurrent_readers_during_writes() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let mem = new_memtable();
    let stop = Arc::new(AtomicBool::new(false));

    // Readers hammer lookups and scans while a single writer inserts;
    // exercises the release/acquire publication protocol.
    let mut readers = Vec::new();
    for t in 0..4 {
        let mem = Arc::clone(&mem);
        let stop = Arc::clone(&stop);
        readers.push(std::thread::spawn(move || {
            let mut checked = 0u64;
            while !stop.load(Ordering::Acquire) {
                let i = (checked * 7 + t) % 512;
                let key = format!("key{i:04}");
                if let Some(LookupResult::Found(v)) =
                    mem.get(&LookupKey::new(key.as_bytes(), types::MAX_SEQUENCE_NUMBER))
                {
                    assert_eq!(v, format!("value{i:04}").into_bytes());
                }

                let mut iter = MemTableIterator::new(Arc::clone(&mem));
                iter.seek_to_first();
                let mut prev: Option<Vec<u8>> = None;
                while iter.valid() {
                    let user = types::extract_user_key(iter.key()).to_vec();
                    if let Some(p) = &prev {
                        assert!(p <= &user, "scan went backwards");
                    }
                    prev = Some(user);
                    iter.next();
                }
                checked += 1;
            }
        }));
    }

    for i in 0..512u64 {
        mem.add(
            i + 1,
            ValueType::Value,
            format!("key{i:04}").as_bytes(),
            format!("value{i:04}").as_bytes(),
        );
    }
    stop.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    // Everything is present afterwards.
    for i in 0..512u64 {
        let key = format!("key{i:04}");
        assert_eq!(
            mem.get(&LookupKey::new(key.as_bytes(), types::MAX_SEQUENCE_NUMBER)),
            Some(LookupResult::Found(format!("value{i:04}").into_bytes()))
        );
    }
}
