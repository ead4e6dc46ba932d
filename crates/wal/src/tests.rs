use super::*;

use std::io::Cursor;

use tempfile::tempdir;

fn write_records(path: &std::path::Path, records: &[&[u8]]) {
    let mut w = Writer::create(path).unwrap();
    for r in records {
        w.add_record(r).unwrap();
    }
    w.sync().unwrap();
}

fn read_all(path: &std::path::Path) -> Result<Vec<Vec<u8>>> {
    let mut r = Reader::open(path)?;
    let mut out = Vec::new();
    let mut scratch = Vec::new();
    while r.read_record(&mut scratch)? {
        out.push(scratch.clone());
    }
    Ok(out)
}

#[test]
fn round_trip_multiple_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");

    write_records(&path, &[b"first", b"", b"third record with more bytes"]);

    let got = read_all(&path).unwrap();
    assert_eq!(got.len(), 3);
    assert_eq!(got[0], b"first");
    assert_eq!(got[1], b"");
    assert_eq!(got[2], b"third record with more bytes");
}

#[test]
fn survives_reopen_for_append() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");

    write_records(&path, &[b"one"]);
    write_records(&path, &[b"two"]);

    let got = read_all(&path).unwrap();
    assert_eq!(got, vec![b"one".to_vec(), b"two".to_vec()]);
}

#[test]
fn max_size_record_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");

    let big = vec![0xa5u8; MAX_RECORD_SIZE];
    write_records(&path, &[&big]);
    assert_eq!(read_all(&path).unwrap(), vec![big]);
}

#[test]
fn oversized_record_rejected() {
    let dir = tempdir().unwrap();
    let mut w = Writer::create(dir.path().join("000003.log")).unwrap();
    let too_big = vec![0u8; MAX_RECORD_SIZE + 1];
    assert!(matches!(
        w.add_record(&too_big),
        Err(WalError::RecordTooLarge(_))
    ));
}

#[test]
fn flipped_payload_byte_is_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");
    write_records(&path, &[b"precious bytes"]);

    let mut raw = std::fs::read(&path).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0xff;
    std::fs::write(&path, &raw).unwrap();

    assert!(matches!(
        read_all(&path),
        Err(WalError::Corrupt("checksum mismatch"))
    ));
}

#[test]
fn truncated_tail_is_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");
    write_records(&path, &[b"complete", b"this one gets cut"]);

    let raw = std::fs::read(&path).unwrap();
    std::fs::write(&path, &raw[..raw.len() - 5]).unwrap();

    // The first record still replays; the second reports corruption.
    let mut r = Reader::open(&path).unwrap();
    let mut scratch = Vec::new();
    assert!(r.read_record(&mut scratch).unwrap());
    assert_eq!(scratch, b"complete");
    assert!(matches!(r.read_record(&mut scratch), Err(WalError::Corrupt(_))));
}

#[test]
fn unknown_record_type_is_corruption() {
    // Hand-build a frame with type byte 2 and a CRC that matches it, so
    // only the type check can fail.
    let payload = b"payload";
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0u8; 4]);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.push(2);
    frame.extend_from_slice(payload);
    let mut hasher = codec::crc32c::Hasher::new();
    hasher.update(&frame[4..]);
    let crc = codec::crc32c::mask(hasher.finalize());
    frame[0..4].copy_from_slice(&crc.to_le_bytes());

    let mut r = Reader::from_reader(Cursor::new(frame));
    let mut scratch = Vec::new();
    assert!(matches!(
        r.read_record(&mut scratch),
        Err(WalError::Corrupt("unknown record type"))
    ));
}

#[test]
fn empty_log_reads_cleanly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000003.log");
    std::fs::write(&path, b"").unwrap();
    assert!(read_all(&path).unwrap().is_empty());
}
