//! A delta between two versions, encoded as one MANIFEST record.
//!
//! Tag-prefixed fields, every integer a varint:
//!
//! | tag | field            | payload                                            |
//! |-----|------------------|----------------------------------------------------|
//! | 1   | comparator       | lp(name)                                           |
//! | 2   | log number       | varint64                                           |
//! | 3   | next file number | varint64                                           |
//! | 4   | last sequence    | varint64                                           |
//! | 5   | compact pointer  | varint32(level) lp(internal_key)                   |
//! | 6   | deleted file     | varint32(level) varint64(number)                   |
//! | 7   | new file         | varint32(level) varint64(number) varint64(size) lp(smallest) lp(largest) |
//! | 9   | prev log number  | varint64                                           |

use codec::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice,
    put_varint32, put_varint64,
};
use types::{Error, InternalKey, Result, SequenceNumber};

const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
const TAG_PREV_LOG_NUMBER: u32 = 9;

/// A file added by an edit, before it is resolved into a shared
/// `FileMetaData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NewFile {
    pub level: usize,
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct VersionEdit {
    pub comparator_name: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub compact_pointers: Vec<(usize, InternalKey)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<NewFile>,
}

impl VersionEdit {
    pub(crate) fn new() -> VersionEdit {
        VersionEdit::default()
    }

    pub(crate) fn add_file(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.new_files.push(NewFile {
            level,
            number,
            file_size,
            smallest,
            largest,
        });
    }

    pub(crate) fn delete_file(&mut self, level: usize, number: u64) {
        if !self.deleted_files.contains(&(level, number)) {
            self.deleted_files.push((level, number));
        }
    }

    pub(crate) fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    pub(crate) fn encode_to(&self, dst: &mut Vec<u8>) {
        if let Some(name) = &self.comparator_name {
            put_varint32(dst, TAG_COMPARATOR);
            put_length_prefixed_slice(dst, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(dst, TAG_LOG_NUMBER);
            put_varint64(dst, n);
        }
        if let Some(n) = self.prev_log_number {
            put_varint32(dst, TAG_PREV_LOG_NUMBER);
            put_varint64(dst, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(dst, TAG_NEXT_FILE_NUMBER);
            put_varint64(dst, n);
        }
        if let Some(n) = self.last_sequence {
            put_varint32(dst, TAG_LAST_SEQUENCE);
            put_varint64(dst, n);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(dst, TAG_COMPACT_POINTER);
            put_varint32(dst, *level as u32);
            put_length_prefixed_slice(dst, key.encoded());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(dst, TAG_DELETED_FILE);
            put_varint32(dst, *level as u32);
            put_varint64(dst, *number);
        }
        for f in &self.new_files {
            put_varint32(dst, TAG_NEW_FILE);
            put_varint32(dst, f.level as u32);
            put_varint64(dst, f.number);
            put_varint64(dst, f.file_size);
            put_length_prefixed_slice(dst, f.smallest.encoded());
            put_length_prefixed_slice(dst, f.largest.encoded());
        }
    }

    pub(crate) fn decode_from(src: &[u8]) -> Result<VersionEdit> {
        let corrupt = |what: &str| Error::Corruption(format!("version edit: {what}"));
        let mut edit = VersionEdit::new();
        let mut input = src;
        while !input.is_empty() {
            let tag = get_varint32(&mut input).map_err(|_| corrupt("tag"))?;
            match tag {
                TAG_COMPARATOR => {
                    let name = get_length_prefixed_slice(&mut input)
                        .map_err(|_| corrupt("comparator name"))?;
                    let name = std::str::from_utf8(name)
                        .map_err(|_| corrupt("comparator name"))?;
                    edit.comparator_name = Some(name.to_string());
                }
                TAG_LOG_NUMBER => {
                    edit.log_number =
                        Some(get_varint64(&mut input).map_err(|_| corrupt("log number"))?);
                }
                TAG_PREV_LOG_NUMBER => {
                    edit.prev_log_number = Some(
                        get_varint64(&mut input).map_err(|_| corrupt("prev log number"))?,
                    );
                }
                TAG_NEXT_FILE_NUMBER => {
                    edit.next_file_number = Some(
                        get_varint64(&mut input).map_err(|_| corrupt("next file number"))?,
                    );
                }
                TAG_LAST_SEQUENCE => {
                    edit.last_sequence =
                        Some(get_varint64(&mut input).map_err(|_| corrupt("last sequence"))?);
                }
                TAG_COMPACT_POINTER => {
                    let level = get_varint32(&mut input)
                        .map_err(|_| corrupt("compact pointer level"))? as usize;
                    let key = get_length_prefixed_slice(&mut input)
                        .map_err(|_| corrupt("compact pointer key"))?;
                    if key.len() < 8 {
                        return Err(corrupt("compact pointer key too short"));
                    }
                    edit.compact_pointers.push((level, InternalKey::decode(key)));
                }
                TAG_DELETED_FILE => {
                    let level = get_varint32(&mut input)
                        .map_err(|_| corrupt("deleted file level"))? as usize;
                    let number =
                        get_varint64(&mut input).map_err(|_| corrupt("deleted file number"))?;
                    edit.deleted_files.push((level, number));
                }
                TAG_NEW_FILE => {
                    let level =
                        get_varint32(&mut input).map_err(|_| corrupt("new file level"))? as usize;
                    let number =
                        get_varint64(&mut input).map_err(|_| corrupt("new file number"))?;
                    let file_size =
                        get_varint64(&mut input).map_err(|_| corrupt("new file size"))?;
                    let smallest = get_length_prefixed_slice(&mut input)
                        .map_err(|_| corrupt("new file smallest key"))?;
                    let largest = get_length_prefixed_slice(&mut input)
                        .map_err(|_| corrupt("new file largest key"))?;
                    if smallest.len() < 8 || largest.len() < 8 {
                        return Err(corrupt("new file key too short"));
                    }
                    edit.new_files.push(NewFile {
                        level,
                        number,
                        file_size,
                        smallest: InternalKey::decode(smallest),
                        largest: InternalKey::decode(largest),
                    });
                }
                other => {
                    return Err(corrupt(&format!("unknown tag {other}")));
                }
            }
        }
        Ok(edit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ValueType;

    fn ikey(user: &[u8], seq: u64) -> InternalKey {
        InternalKey::new(user, seq, ValueType::Value)
    }

    #[test]
    fn empty_edit_round_trips() {
        let edit = VersionEdit::new();
        let mut enc = Vec::new();
        edit.encode_to(&mut enc);
        assert_eq!(VersionEdit::decode_from(&enc).unwrap(), edit);
    }

    #[test]
    fn full_edit_round_trips() {
        let mut edit = VersionEdit::new();
        edit.comparator_name = Some("lsm.BytewiseComparator".to_string());
        edit.log_number = Some(9);
        edit.prev_log_number = Some(0);
        edit.next_file_number = Some(21);
        edit.last_sequence = Some(1234);
        edit.set_compact_pointer(2, ikey(b"pivot", 700));
        edit.delete_file(1, 4);
        edit.delete_file(2, 15);
        edit.add_file(1, 20, 4096, ikey(b"aardvark", 10), ikey(b"zebra", 90));

        let mut enc = Vec::new();
        edit.encode_to(&mut enc);
        assert_eq!(VersionEdit::decode_from(&enc).unwrap(), edit);
    }

    #[test]
    fn duplicate_deletes_collapse() {
        let mut edit = VersionEdit::new();
        edit.delete_file(3, 77);
        edit.delete_file(3, 77);
        assert_eq!(edit.deleted_files.len(), 1);
    }

    #[test]
    fn truncated_payload_is_corruption() {
        let mut edit = VersionEdit::new();
        edit.add_file(0, 1, 100, ikey(b"a", 1), ikey(b"b", 2));
        let mut enc = Vec::new();
        edit.encode_to(&mut enc);
        enc.truncate(enc.len() - 3);
        assert!(VersionEdit::decode_from(&enc).is_err());
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let mut enc = Vec::new();
        put_varint32(&mut enc, 8); // tag 8 was never assigned
        assert!(VersionEdit::decode_from(&enc).is_err());
    }
}
