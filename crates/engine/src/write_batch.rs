//! Wire form of one group-committed batch: the payload of a single WAL
//! record:
//!
//! ```text
//! u32_le(count) || { u64_le(seq) || u8(type) || lp(key) || lp(value) }*
//! ```
//!
//! The leader builds this incrementally while walking the writer queue;
//! recovery walks it back entry by entry.

use codec::{
    get_fixed64, get_length_prefixed_slice, put_fixed64, put_length_prefixed_slice,
};
use types::{Error, Result, SequenceNumber, ValueType};

pub(crate) const BATCH_HEADER_SIZE: usize = 4;

/// Starts a batch record with space reserved for the entry count.
pub(crate) fn new_batch_record() -> Vec<u8> {
    vec![0u8; BATCH_HEADER_SIZE]
}

/// Appends one entry. Deletions carry an empty value.
pub(crate) fn append_entry(
    record: &mut Vec<u8>,
    seq: SequenceNumber,
    t: ValueType,
    key: &[u8],
    value: &[u8],
) {
    put_fixed64(record, seq);
    record.push(t as u8);
    put_length_prefixed_slice(record, key);
    put_length_prefixed_slice(record, value);
}

/// Back-fills the entry count.
pub(crate) fn finish_record(record: &mut [u8], count: u32) {
    record[..BATCH_HEADER_SIZE].copy_from_slice(&count.to_le_bytes());
}

/// One decoded batch entry, borrowing the record.
pub(crate) struct BatchEntry<'a> {
    pub seq: SequenceNumber,
    pub value_type: ValueType,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

/// Streaming decoder over a batch record.
pub(crate) struct BatchReader<'a> {
    input: &'a [u8],
    remaining: u32,
}

impl<'a> BatchReader<'a> {
    pub(crate) fn new(record: &'a [u8]) -> Result<BatchReader<'a>> {
        if record.len() < BATCH_HEADER_SIZE {
            return Err(Error::Corruption("batch record too small".into()));
        }
        let count = u32::from_le_bytes(record[..4].try_into().unwrap());
        Ok(BatchReader {
            input: &record[BATCH_HEADER_SIZE..],
            remaining: count,
        })
    }

    /// Next entry, or `None` once `count` entries have been produced.
    /// Trailing garbage and short records surface as corruption.
    pub(crate) fn next_entry(&mut self) -> Result<Option<BatchEntry<'a>>> {
        if self.remaining == 0 {
            if !self.input.is_empty() {
                return Err(Error::Corruption(
                    "trailing bytes after final batch entry".into(),
                ));
            }
            return Ok(None);
        }
        self.remaining -= 1;

        let seq = get_fixed64(&mut self.input)?;
        if self.input.is_empty() {
            return Err(Error::Corruption("batch entry missing type".into()));
        }
        let tag = self.input[0];
        self.input = &self.input[1..];
        let value_type = ValueType::from_u8(tag)
            .ok_or_else(|| Error::Corruption(format!("unknown batch entry type {tag}")))?;
        let key = get_length_prefixed_slice(&mut self.input)?;
        let value = get_length_prefixed_slice(&mut self.input)?;
        Ok(Some(BatchEntry {
            seq,
            value_type,
            key,
            value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut record = new_batch_record();
        append_entry(&mut record, 10, ValueType::Value, b"alpha", b"one");
        append_entry(&mut record, 11, ValueType::Deletion, b"beta", b"");
        append_entry(&mut record, 12, ValueType::Value, b"", b"empty key");
        finish_record(&mut record, 3);

        let mut reader = BatchReader::new(&record).unwrap();

        let e = reader.next_entry().unwrap().unwrap();
        assert_eq!((e.seq, e.value_type), (10, ValueType::Value));
        assert_eq!((e.key, e.value), (&b"alpha"[..], &b"one"[..]));

        let e = reader.next_entry().unwrap().unwrap();
        assert_eq!((e.seq, e.value_type), (11, ValueType::Deletion));
        assert_eq!(e.key, b"beta");

        let e = reader.next_entry().unwrap().unwrap();
        assert_eq!((e.seq, e.value_type), (12, ValueType::Value));
        assert_eq!(e.value, b"empty key");

        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn truncated_entry_is_corruption() {
        let mut record = new_batch_record();
        append_entry(&mut record, 1, ValueType::Value, b"key", b"value");
        finish_record(&mut record, 2); // claims one more entry than present

        let mut reader = BatchReader::new(&record).unwrap();
        assert!(reader.next_entry().unwrap().is_some());
        assert!(reader.next_entry().is_err());
    }

    #[test]
    fn unknown_type_is_corruption() {
        let mut record = new_batch_record();
        put_fixed64(&mut record, 1);
        record.push(0x77);
        put_length_prefixed_slice(&mut record, b"k");
        put_length_prefixed_slice(&mut record, b"v");
        finish_record(&mut record, 1);

        let mut reader = BatchReader::new(&record).unwrap();
        assert!(reader.next_entry().is_err());
    }

    #[test]
    fn trailing_garbage_is_corruption() {
        let mut record = new_batch_record();
        append_entry(&mut record, 1, ValueType::Value, b"k", b"v");
        finish_record(&mut record, 1);
        record.push(0xab);

        let mut reader = BatchReader::new(&record).unwrap();
        assert!(reader.next_entry().unwrap().is_some());
        assert!(reader.next_entry().is_err());
    }
}
