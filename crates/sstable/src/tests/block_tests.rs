use std::sync::Arc;

use types::{BytewiseComparator, Comparator, InternalIterator};

use crate::block::{Block, BlockBuilder, BlockIter};

fn cmp() -> Arc<dyn Comparator> {
    Arc::new(BytewiseComparator)
}

fn build_block(entries: &[(&[u8], &[u8])], restart_interval: usize) -> Arc<Block> {
    let mut builder = BlockBuilder::new(restart_interval, cmp());
    for (k, v) in entries {
        builder.add(k, v);
    }
    let contents = builder.finish().to_vec();
    Arc::new(Block::new(contents).unwrap())
}

fn collect(block: &Arc<Block>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = BlockIter::new(Arc::clone(&block), cmp());
    iter.seek_to_first();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    iter.status().unwrap();
    out
}

#[test]
fn empty_block_round_trips() {
    let block = build_block(&[], 16);
    assert!(collect(&block).is_empty());

    let mut iter = BlockIter::new(Arc::clone(&block), cmp());
    iter.seek(b"anything");
    assert!(!iter.valid());
    iter.seek_to_last();
    assert!(!iter.valid());
}

#[test]
fn entries_round_trip_in_order() {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..100u32)
        .map(|i| {
            (
                format!("key{i:04}").into_bytes(),
                format!("value{i}").into_bytes(),
            )
        })
        .collect();
    let refs: Vec<(&[u8], &[u8])> = entries
        .iter()
        .map(|(k, v)| (k.as_slice(), v.as_slice()))
        .collect();

    for &interval in &[1usize, 2, 16, 128] {
        let block = build_block(&refs, interval);
        let got = collect(&block);
        assert_eq!(got.len(), entries.len());
        for ((gk, gv), (ek, ev)) in got.iter().zip(entries.iter()) {
            assert_eq!(gk, ek);
            assert_eq!(gv, ev);
        }
    }
}

#[test]
fn prefix_compression_shrinks_shared_keys() {
    let long: Vec<(Vec<u8>, Vec<u8>)> = (0..64u32)
        .map(|i| (format!("commonprefix/{i:04}").into_bytes(), b"v".to_vec()))
        .collect();
    let refs: Vec<(&[u8], &[u8])> = long
        .iter()
        .map(|(k, v)| (k.as_slice(), v.as_slice()))
        .collect();

    let compressed = build_block(&refs, 16);
    let uncompressed = build_block(&refs, 1);
    assert!(compressed.size() < uncompressed.size());
    assert_eq!(collect(&compressed), collect(&uncompressed));
}

#[test]
fn seek_lands_on_first_key_at_or_after_target() {
    let block = build_block(&[(b"b", b"1"), (b"d", b"2"), (b"f", b"3")], 2);
    let mut iter = BlockIter::new(Arc::clone(&block), cmp());

    iter.seek(b"a");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"b");

    iter.seek(b"d");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"d");

    iter.seek(b"e");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"f");

    iter.seek(b"g");
    assert!(!iter.valid());
    iter.status().unwrap();
}

#[test]
fn seek_is_exact_across_restart_boundaries() {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..50u32)
        .map(|i| (format!("k{:03}", i * 2).into_bytes(), b"v".to_vec()))
        .collect();
    let refs: Vec<(&[u8], &[u8])> = entries
        .iter()
        .map(|(k, v)| (k.as_slice(), v.as_slice()))
        .collect();
    let block = build_block(&refs, 4);

    let mut iter = BlockIter::new(Arc::clone(&block), cmp());
    for i in 0..50u32 {
        // Present key.
        let present = format!("k{:03}", i * 2);
        iter.seek(present.as_bytes());
        assert!(iter.valid());
        assert_eq!(iter.key(), present.as_bytes());

        // Absent key between entries resolves to the next one.
        let absent = format!("k{:03}", i * 2 + 1);
        iter.seek(absent.as_bytes());
        if i == 49 {
            assert!(!iter.valid());
        } else {
            assert!(iter.valid());
            assert_eq!(iter.key(), format!("k{:03}", (i + 1) * 2).as_bytes());
        }
    }
}

#[test]
fn prev_steps_backwards_within_and_across_restarts() {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..20u32)
        .map(|i| (format!("key{i:02}").into_bytes(), b"v".to_vec()))
        .collect();
    let refs: Vec<(&[u8], &[u8])> = entries
        .iter()
        .map(|(k, v)| (k.as_slice(), v.as_slice()))
        .collect();
    let block = build_block(&refs, 4);

    let mut iter = BlockIter::new(Arc::clone(&block), cmp());
    iter.seek_to_last();
    let mut got = Vec::new();
    while iter.valid() {
        got.push(iter.key().to_vec());
        iter.prev();
    }
    let mut expected: Vec<Vec<u8>> = entries.iter().map(|(k, _)| k.clone()).collect();
    expected.reverse();
    assert_eq!(got, expected);
}

#[test]
fn truncated_block_is_rejected() {
    assert!(Block::new(vec![1, 2]).is_err());

    // A restart count pointing past the data.
    let mut bogus = Vec::new();
    codec::put_fixed32(&mut bogus, 1000);
    assert!(Block::new(bogus).is_err());
}

#[test]
fn corrupt_entry_sets_status() {
    let block = build_block(&[(b"aaa", b"1"), (b"bbb", b"2")], 16);
    // Rebuild the raw bytes and break the first entry's value length.
    let mut builder = BlockBuilder::new(16, cmp());
    builder.add(b"aaa", b"1");
    builder.add(b"bbb", b"2");
    let mut raw = builder.finish().to_vec();
    raw[2] = 0xff; // value_len varint became huge
    let broken = Arc::new(Block::new(raw).unwrap());

    let mut iter = BlockIter::new(Arc::clone(&broken), cmp());
    iter.seek_to_first();
    assert!(!iter.valid());
    assert!(iter.status().is_err());

    // The intact copy still reads fine.
    assert_eq!(collect(&block).len(), 2);
}
