use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator};

/// Number of levels in the tree. Level 0 holds freshly flushed,
/// possibly-overlapping tables; deeper levels are disjoint.
pub const NUM_LEVELS: usize = 7;

/// Level-0 file count that triggers a size compaction.
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Level-0 file count at which each write is delayed by 1 ms to let
/// compaction catch up.
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Level-0 file count at which writes block entirely.
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Block compression codec tag. The numeric values are written into every
/// block trailer and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    #[default]
    None = 0,
    Zstd = 1,
}

impl CompressionType {
    pub fn from_u8(v: u8) -> Option<CompressionType> {
        match v {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

/// Tuning knobs passed to `Db::open`.
#[derive(Clone)]
pub struct Options {
    /// Defines the key order. Must have the same name and semantics as
    /// the comparator used by every previous open of the same database.
    pub comparator: Arc<dyn Comparator>,

    /// Create the database directory if it is missing.
    pub create_if_missing: bool,

    /// Fail the open if the database already exists.
    pub error_if_exists: bool,

    /// Verify checksums aggressively and treat any corruption found
    /// during recovery as fatal.
    pub paranoid_checks: bool,

    /// Memtable size that triggers rotation to an immutable memtable and
    /// a flush. Up to two write buffers may be resident at once.
    pub write_buffer_size: usize,

    /// Bound on tables held open by the table cache.
    pub max_open_files: usize,

    /// Target size for tables produced by flushes and compactions.
    pub max_file_size: u64,

    /// Approximate uncompressed size of a data block.
    pub block_size: usize,

    /// Keys between restart points inside a data block.
    pub block_restart_interval: usize,

    /// Codec applied to blocks on disk.
    pub compression: CompressionType,

    /// Bloom filter bits per key in each table; 0 disables filters.
    pub bloom_bits_per_key: usize,

    /// Capacity in bytes of the shared uncompressed-block cache;
    /// 0 disables it.
    pub block_cache_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            max_file_size: 2 * 1024 * 1024,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::None,
            bloom_bits_per_key: 10,
            block_cache_capacity: 8 * 1024 * 1024,
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("comparator", &self.comparator.name())
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_open_files", &self.max_open_files)
            .field("max_file_size", &self.max_file_size)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("compression", &self.compression)
            .field("bloom_bits_per_key", &self.bloom_bits_per_key)
            .field("block_cache_capacity", &self.block_cache_capacity)
            .finish()
    }
}

/// Per-read controls.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Verify the checksum of every block read on behalf of this call.
    pub verify_checksums: bool,

    /// Whether blocks read for this call should populate the block cache.
    /// Bulk scans typically turn this off.
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}

/// Per-write controls.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Force the WAL to stable storage before acknowledging the write.
    /// With `sync = false` a machine crash may lose recent writes, though
    /// a mere process crash will not.
    pub sync: bool,
}
