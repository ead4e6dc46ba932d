use std::time::{Duration, Instant};

use crate::{Db, Options, ReadOptions, WriteOptions};

pub(crate) fn open(dir: &std::path::Path) -> Db {
    Db::open(Options::default(), dir.join("db")).unwrap()
}

pub(crate) fn open_with(dir: &std::path::Path, options: Options) -> Db {
    Db::open(options, dir.join("db")).unwrap()
}

/// Options sized so a few hundred small writes already exercise
/// rotation, flush and compaction.
pub(crate) fn small_buffer_options() -> Options {
    Options {
        write_buffer_size: 10 * 1024,
        max_file_size: 32 * 1024,
        block_size: 1024,
        ..Options::default()
    }
}

pub(crate) fn put(db: &Db, key: &[u8], value: &[u8]) {
    db.put(&WriteOptions::default(), key, value).unwrap();
}

pub(crate) fn get(db: &Db, key: &[u8]) -> Option<Vec<u8>> {
    db.get(&ReadOptions::default(), key).unwrap()
}

pub(crate) fn delete(db: &Db, key: &[u8]) {
    db.delete(&WriteOptions::default(), key).unwrap();
}

/// Polls `cond` for up to five seconds; background work is asynchronous
/// so tests assert on eventual state.
pub(crate) fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
