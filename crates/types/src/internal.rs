use codec::{decode_fixed64, put_fixed64, put_varint32, varint_length};

/// Sequence numbers are 56-bit so they pack into a u64 alongside the
/// one-byte value type.
pub type SequenceNumber = u64;

pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// The kind of a logical write. The numeric values are part of the wire
/// format (WAL batches, internal-key trailers) and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Deletion = 0,
    Value = 1,
}

impl ValueType {
    pub fn from_u8(v: u8) -> Option<ValueType> {
        match v {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            _ => None,
        }
    }
}

/// Packs a sequence number and value type into the internal-key trailer.
pub fn pack_sequence_and_type(seq: SequenceNumber, t: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | t as u64
}

/// Appends `user_key || u64_le(seq << 8 | type)` to `dst`.
pub fn append_internal_key(dst: &mut Vec<u8>, user_key: &[u8], seq: SequenceNumber, t: ValueType) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_sequence_and_type(seq, t));
}

/// Strips the 8-byte trailer off an internal key.
///
/// # Panics
///
/// Debug-asserts the invariant that internal keys are at least 8 bytes.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= 8);
    &internal_key[..internal_key.len() - 8]
}

/// An internal key split into its parts. Borrows the user key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

/// Splits an internal key; `None` if it is too short or carries an
/// unknown type tag.
pub fn parse_internal_key(internal_key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if internal_key.len() < 8 {
        return None;
    }
    let tag = decode_fixed64(&internal_key[internal_key.len() - 8..]);
    let value_type = ValueType::from_u8((tag & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: &internal_key[..internal_key.len() - 8],
        sequence: tag >> 8,
        value_type,
    })
}

/// An owned internal key, used in file metadata and version edits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber, t: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut rep, user_key, seq, t);
        Self { rep }
    }

    /// Wraps an already-encoded internal key.
    pub fn decode(encoded: &[u8]) -> Self {
        debug_assert!(encoded.len() >= 8);
        Self {
            rep: encoded.to_vec(),
        }
    }

    pub fn encoded(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }
}

/// The seek key for a point lookup, built once and reused across the
/// memtable and table layers.
///
/// Layout of the buffer:
///
/// ```text
/// varint32(user_key_len + 8) || user_key || u64_le(seq << 8 | Value)
/// ^ memtable_key               ^ internal_key          user_key ^
/// ```
///
/// Seeking with `type = Value` (the largest tag for a sequence) positions
/// at the newest entry for the user key visible at `seq`.
pub struct LookupKey {
    data: Vec<u8>,
    kstart: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber) -> Self {
        let ikey_len = user_key.len() + 8;
        let mut data = Vec::with_capacity(varint_length(ikey_len as u64) + ikey_len);
        put_varint32(&mut data, ikey_len as u32);
        let kstart = data.len();
        append_internal_key(&mut data, user_key, seq, ValueType::Value);
        Self { data, kstart }
    }

    /// Length-prefixed internal key, the memtable's native entry prefix.
    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    /// Raw internal key.
    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.kstart..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.data[self.kstart..self.data.len() - 8]
    }
}
