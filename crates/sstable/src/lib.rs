//! # SSTable — immutable sorted table files
//!
//! The on-disk unit of the tree. A table is a sequence of
//! prefix-compressed data blocks followed by a Bloom filter block, a
//! metaindex block locating the filter, an index block with one
//! separator entry per data block, and a fixed 48-byte footer:
//!
//! ```text
//! +---------------------+
//! | data block 0        |
//! | data block 1        |
//! | ...                 |
//! +---------------------+
//! | filter block        |   bloom over user keys (optional)
//! +---------------------+
//! | metaindex block     |   "filter.<policy>" -> filter handle
//! +---------------------+
//! | index block         |   separator key -> data block handle
//! +---------------------+
//! | footer (48 bytes)   |   metaindex + index handles, magic
//! +---------------------+
//! ```
//!
//! Every block is followed on disk by a one-byte compression tag and a
//! masked CRC32C over the block contents plus the tag.
//!
//! Tables are written once by [`TableBuilder`] and never modified;
//! [`Table`] reads them with a persistent file handle, keeping the index
//! and filter in memory and fetching data blocks on demand (through the
//! shared block cache when one is configured).

mod block;
mod builder;
pub mod cache;
mod compress;
mod format;
mod reader;
mod two_level;

pub use block::{Block, BlockBuilder, BlockIter};
pub use builder::TableBuilder;
pub use compress::{compress_block, decompress_block};
pub use format::{BlockHandle, Footer, BLOCK_TRAILER_SIZE, FOOTER_SIZE, TABLE_MAGIC};
pub use reader::{BlockCache, Table};
pub use two_level::TwoLevelIterator;

#[cfg(test)]
mod tests;
