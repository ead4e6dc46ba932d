//! # Engine — the StrataKV database facade
//!
//! Ties the workspace together into a persistent ordered key–value
//! store: group-committed writes flow through the WAL into the skip-list
//! memtable, frozen memtables are flushed to level-0 tables by a
//! dedicated background thread, and the same thread merges tables down
//! the levels guided by size and seek statistics. All file-set changes
//! are journalled as version edits in the MANIFEST, giving readers
//! immutable snapshots and crash recovery a replayable history.
//!
//! ```text
//! writers ──▶ writer queue ──▶ WAL ──▶ memtable ──┐ rotation
//!                                                 ▼
//!                                        immutable memtable
//!                                                 │ flush (background)
//!                                                 ▼
//!                        L0 ──▶ L1 ──▶ ... ──▶ L6   compaction (background)
//!
//! readers ──▶ memtable ──▶ immutable ──▶ L0..L6 (bloom-filtered)
//! ```
//!
//! ## Module responsibilities
//!
//! | Module         | Purpose                                         |
//! |----------------|-------------------------------------------------|
//! | `lib.rs`       | `Db` handle, open/close, shared state           |
//! | `write`        | group commit, write throttling, rotation        |
//! | `read`         | point lookups, iterator assembly                |
//! | `background`   | flush + compaction worker                       |
//! | `recovery`     | WAL replay on open                              |
//! | `version*`     | file-set snapshots, MANIFEST, planning          |
//! | `compaction`   | per-compaction state                            |
//! | `iterator`     | merging / level / user-facing iterators         |
//! | `table_cache`  | bounded pool of open tables                     |
//! | `write_batch`  | group-commit wire format                        |
//! | `filename`     | directory layout                                |
//! | `lock`         | single-opener advisory lock                     |

mod background;
mod compaction;
mod filename;
mod iterator;
mod lock;
mod read;
mod recovery;
mod table_cache;
mod version;
mod version_edit;
mod version_set;
mod write;
mod write_batch;

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use memtable::MemTable;
use parking_lot::{Condvar, Mutex, MutexGuard};
use types::InternalKeyComparator;

pub use iterator::DbIterator;
pub use types::{
    BytewiseComparator, Comparator, CompressionType, Error, Options, ReadOptions, Result,
    WriteOptions,
};

use filename::{lock_file_name, log_file_name, parse_file_name, FileType};
use lock::FileLock;
use table_cache::TableCache;
use version_edit::VersionEdit;
use version_set::VersionSet;
use write::Writer;

/// A handle to an open database. Cheap to share across threads behind an
/// `Arc`; all operations take `&self`.
pub struct Db {
    shared: Arc<DbShared>,
    bg_thread: Option<JoinHandle<()>>,
    _lock: FileLock,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

/// Everything the foreground and background threads share.
pub(crate) struct DbShared {
    pub(crate) dbname: PathBuf,
    pub(crate) options: Options,
    /// `options` with the comparator swapped for the internal-key
    /// comparator; tables and their iterators order by internal keys.
    pub(crate) internal_options: Options,
    pub(crate) icmp: InternalKeyComparator,
    pub(crate) table_cache: Arc<TableCache>,
    /// The DB mutex: guards memtables, the writer queue, version-set
    /// state and background flags.
    pub(crate) state: Mutex<DbState>,
    /// The active write-ahead log. Separate from `state` so the leader
    /// can append while the DB mutex is released; acquired only while
    /// `state` is unlocked (or nested inside it during rotation).
    pub(crate) wal: Mutex<Option<wal::Writer>>,
    /// The MANIFEST writer, same locking discipline as `wal`.
    pub(crate) manifest: Mutex<Option<wal::Writer>>,
    /// Wakes the background thread when work is scheduled.
    pub(crate) bg_work: Condvar,
    /// Signalled after each unit of background work; throttled writers
    /// and `Drop` wait on it.
    pub(crate) bg_done: Condvar,
    pub(crate) shutting_down: AtomicBool,
}

/// State guarded by the DB mutex.
pub(crate) struct DbState {
    pub(crate) mem: Arc<MemTable>,
    /// Frozen memtable awaiting flush; at most one exists.
    pub(crate) imm: Option<Arc<MemTable>>,
    /// Number of the live WAL file (the one `DbShared::wal` appends to).
    pub(crate) log_number: u64,
    pub(crate) versions: VersionSet,
    pub(crate) writers: VecDeque<Arc<Writer>>,
    pub(crate) bg_compaction_scheduled: bool,
    /// Latched on the first background or WAL failure; all subsequent
    /// writes fail fast with it until the database is reopened.
    pub(crate) bg_error: Option<Error>,
}

impl Db {
    /// Opens (and if necessary creates or recovers) the database at
    /// `path`.
    pub fn open<P: AsRef<Path>>(options: Options, path: P) -> Result<Db> {
        let dbname = path.as_ref().to_path_buf();

        if !dbname.is_dir() {
            if options.create_if_missing {
                fs::create_dir_all(&dbname)?;
            } else {
                return Err(Error::InvalidArgument(format!(
                    "{} does not exist (create_if_missing is false)",
                    dbname.display()
                )));
            }
        } else if options.error_if_exists {
            return Err(Error::InvalidArgument(format!(
                "{} exists (error_if_exists is true)",
                dbname.display()
            )));
        }

        let lock = FileLock::acquire(&lock_file_name(&dbname))?;

        let icmp = InternalKeyComparator::new(options.comparator.clone());
        let internal_options = Options {
            comparator: Arc::new(icmp.clone()),
            ..options.clone()
        };
        let table_cache = Arc::new(TableCache::new(dbname.clone(), internal_options.clone()));

        let mut versions = VersionSet::new(dbname.clone(), options.clone(), icmp.clone());
        versions.recover()?;

        // Replay whatever the previous incarnation left in its logs;
        // recovered entries land in level-0 tables recorded in `edit`.
        let mut edit = VersionEdit::new();
        recovery::replay_wal_files(&dbname, &options, &internal_options, &mut versions, &mut edit)?;

        let new_log_number = versions.new_file_number();
        let wal_writer = wal::Writer::create(log_file_name(&dbname, new_log_number))
            .map_err(from_wal_error)?;
        edit.log_number = Some(new_log_number);
        edit.prev_log_number = Some(0);

        let mem = Arc::new(MemTable::new(icmp.clone()));
        let shared = Arc::new(DbShared {
            dbname,
            options,
            internal_options,
            icmp,
            table_cache,
            state: Mutex::new(DbState {
                mem,
                imm: None,
                log_number: new_log_number,
                versions,
                writers: VecDeque::new(),
                bg_compaction_scheduled: false,
                bg_error: None,
            }),
            wal: Mutex::new(Some(wal_writer)),
            manifest: Mutex::new(None),
            bg_work: Condvar::new(),
            bg_done: Condvar::new(),
            shutting_down: AtomicBool::new(false),
        });

        {
            let mut state = shared.state.lock();
            shared.log_and_apply(&mut state, &mut edit)?;
            shared.remove_obsolete_files_at_open(&mut state);
            shared.maybe_schedule_compaction(&mut state);
        }

        let worker_shared = Arc::clone(&shared);
        let bg_thread = std::thread::Builder::new()
            .name("strata-bg".into())
            .spawn(move || background::thread_main(worker_shared))?;

        tracing::info!(db = %shared.dbname.display(), "database opened");
        Ok(Db {
            shared,
            bg_thread: Some(bg_thread),
            _lock: lock,
        })
    }

    /// Number of table files at a level; levels run 0..7.
    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.shared.state.lock().versions.num_level_files(level)
    }

    /// One line per non-empty level, for logs and the shell's STATS.
    pub fn level_summary(&self) -> String {
        let state = self.shared.state.lock();
        let mut out = format!(
            "sequence={} memtable={}B",
            state.versions.last_sequence,
            state.mem.approximate_memory_usage()
        );
        for level in 0..types::NUM_LEVELS {
            let n = state.versions.num_level_files(level);
            if n > 0 {
                out.push_str(&format!(
                    " L{level}:{n}files/{}B",
                    state.versions.num_level_bytes(level)
                ));
            }
        }
        out
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        {
            // Notify with the mutex held so the wakeup cannot slip in
            // between the worker's flag check and its wait.
            let _state = self.shared.state.lock();
            self.shared.bg_work.notify_one();
        }
        if let Some(handle) = self.bg_thread.take() {
            let _ = handle.join();
        }
        tracing::info!(db = %self.shared.dbname.display(), "database closed");
    }
}

impl DbShared {
    /// Applies `edit` to the current version and makes it durable:
    /// normalise and build under the mutex, write the MANIFEST with the
    /// mutex released, install on success. The first call of a database
    /// incarnation creates a fresh MANIFEST seeded with a full snapshot
    /// and repoints `CURRENT` at it.
    pub(crate) fn log_and_apply(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        edit: &mut VersionEdit,
    ) -> Result<()> {
        state.versions.normalize_edit(edit);
        let version = state.versions.build_version(edit);
        let manifest_number = state.versions.manifest_file_number;

        let creating_manifest = self.manifest.lock().is_none();
        let snapshot_record = if creating_manifest {
            let snapshot = state.versions.snapshot_edit();
            let mut record = Vec::new();
            snapshot.encode_to(&mut record);
            Some(record)
        } else {
            None
        };
        let mut record = Vec::new();
        edit.encode_to(&mut record);

        let dbname = self.dbname.clone();
        let io_result: Result<()> = MutexGuard::unlocked(state, || {
            let mut manifest = self.manifest.lock();
            if manifest.is_none() {
                let path = filename::descriptor_file_name(&dbname, manifest_number);
                let mut writer = wal::Writer::create(&path).map_err(from_wal_error)?;
                if let Some(snapshot) = &snapshot_record {
                    writer.add_record(snapshot).map_err(from_wal_error)?;
                }
                *manifest = Some(writer);
            }
            let writer = manifest.as_mut().expect("manifest writer installed above");
            writer.add_record(&record).map_err(from_wal_error)?;
            writer.sync().map_err(from_wal_error)?;
            if creating_manifest {
                filename::set_current_file(&dbname, manifest_number)?;
            }
            Ok(())
        });

        match io_result {
            Ok(()) => {
                state.versions.install_version(version, edit);
                Ok(())
            }
            Err(e) => {
                if creating_manifest {
                    // The half-written MANIFEST is unusable; a retry
                    // starts over from scratch.
                    *self.manifest.lock() = None;
                    let _ = fs::remove_file(filename::descriptor_file_name(
                        &self.dbname,
                        manifest_number,
                    ));
                }
                Err(e)
            }
        }
    }

    /// Wakes the background thread when there is work: a frozen memtable
    /// to flush, a level over its size budget, or a file that has run
    /// out of seeks.
    pub(crate) fn maybe_schedule_compaction(&self, state: &mut MutexGuard<'_, DbState>) {
        if state.bg_compaction_scheduled {
            return;
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let current = state.versions.current();
        if state.imm.is_none()
            && current.compaction_score < 1.0
            && current.file_to_compact.lock().is_none()
        {
            return;
        }
        state.bg_compaction_scheduled = true;
        self.bg_work.notify_one();
    }

    /// Open-time sweep of the directory: anything not referenced by the
    /// recovered state is a leftover from a previous incarnation (orphan
    /// tables from a crashed compaction, the superseded MANIFEST, spent
    /// logs) and is removed.
    fn remove_obsolete_files_at_open(&self, state: &mut MutexGuard<'_, DbState>) {
        let live = state.versions.live_files();
        let log_number = state.versions.log_number;
        let prev_log_number = state.versions.prev_log_number;
        let manifest_number = state.versions.manifest_file_number;

        let entries = match fs::read_dir(&self.dbname) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let keep = match parse_file_name(name) {
                Some(FileType::Log(n)) => n >= log_number || n == prev_log_number,
                Some(FileType::Table(n)) => live.contains(&n),
                Some(FileType::Descriptor(n)) => n >= manifest_number,
                Some(FileType::Current) | Some(FileType::Lock) => true,
                Some(FileType::Temp) => false,
                None => true, // not ours; leave it alone
            };
            if !keep {
                tracing::debug!(file = name, "removing obsolete file");
                let _ = fs::remove_file(self.dbname.join(name));
            }
        }
    }

    /// Deletes spent log files once the memtable they covered has been
    /// flushed and the new version installed.
    pub(crate) fn remove_obsolete_logs(&self, state: &mut MutexGuard<'_, DbState>) {
        let log_number = state.versions.log_number;
        let prev_log_number = state.versions.prev_log_number;
        let entries = match fs::read_dir(&self.dbname) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(FileType::Log(n)) = parse_file_name(name) {
                if n < log_number && n != prev_log_number {
                    tracing::debug!(file = name, "removing obsolete log");
                    let _ = fs::remove_file(self.dbname.join(name));
                }
            }
        }
    }
}

/// Removes a database and everything it owns. The directory itself is
/// removed only if nothing foreign remains inside.
pub fn destroy_db<P: AsRef<Path>>(path: P) -> Result<()> {
    let dbname = path.as_ref();
    if !dbname.is_dir() {
        return Ok(());
    }

    // Hold the lock while deleting so a live instance cannot race us.
    let lock = FileLock::acquire(&lock_file_name(dbname))?;
    for entry in fs::read_dir(dbname)?.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        match parse_file_name(name) {
            Some(FileType::Lock) | None => {}
            Some(_) => {
                fs::remove_file(dbname.join(name))?;
            }
        }
    }
    drop(lock); // removes LOCK
    let _ = fs::remove_dir(dbname);
    Ok(())
}

/// Maps log-layer failures onto the public taxonomy.
pub(crate) fn from_wal_error(e: wal::WalError) -> Error {
    match e {
        wal::WalError::Io(err) => Error::Io(err.to_string()),
        wal::WalError::Corrupt(what) => Error::Corruption(format!("log record: {what}")),
        wal::WalError::RecordTooLarge(n) => {
            Error::NotSupported(format!("log record of {n} bytes exceeds the frame limit"))
        }
    }
}

#[cfg(test)]
mod tests;
