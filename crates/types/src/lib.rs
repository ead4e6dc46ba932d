//! # Types — shared vocabulary of the storage engine
//!
//! The pieces every other crate speaks in:
//!
//! * [`Comparator`]: user key ordering with a stable name and the
//!   key-shortening hooks used to shrink index keys.
//! * Internal keys: `user_key || u64_le(seq << 8 | type)`, ordered by
//!   user key ascending then `(seq, type)` descending so the newest
//!   version of a key sorts first.
//! * [`LookupKey`]: the seek form a point read carries through the
//!   memtable and table layers.
//! * [`InternalIterator`]: the single iterator capability implemented by
//!   memtable, block, table and composite iterators alike.
//! * [`Options`] / [`ReadOptions`] / [`WriteOptions`]: tuning knobs and
//!   the level-policy constants.

mod comparator;
mod error;
mod internal;
mod iter;
mod options;

pub use comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
pub use error::{Error, Result};
pub use internal::{
    append_internal_key, extract_user_key, pack_sequence_and_type, parse_internal_key,
    InternalKey, LookupKey, ParsedInternalKey, SequenceNumber, ValueType, MAX_SEQUENCE_NUMBER,
};
pub use iter::{ErrorIterator, InternalIterator};
pub use options::{
    CompressionType, Options, ReadOptions, WriteOptions, L0_COMPACTION_TRIGGER,
    L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER, NUM_LEVELS,
};
