//! The write path: group commit through the WAL into the memtable.
//!
//! Every `put`/`delete` enqueues a [`Writer`] and waits. The writer at
//! the front of the queue becomes the *leader*: it makes room (possibly
//! rotating the memtable or stalling on compaction debt), folds as many
//! queued writers as fit into one batch, appends the batch as a single
//! WAL record with the DB mutex released, applies it to the memtable,
//! and completes every follower it carried. Followers never touch the
//! log; they just observe `done` flip and read their shared status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use memtable::MemTable;
use parking_lot::{Condvar, Mutex, MutexGuard};
use types::{
    Error, Result, ValueType, WriteOptions, L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER,
};

use crate::filename::log_file_name;
use crate::write_batch;
use crate::{from_wal_error, Db, DbShared, DbState};

/// Largest batch one leader will assemble.
const MAX_BATCH_SIZE: usize = 1 << 20;

/// One queued write and its completion plumbing.
pub(crate) struct Writer {
    sync: bool,
    value_type: ValueType,
    key: Vec<u8>,
    value: Vec<u8>,
    /// A memtable-rotation request rather than a write: carries no
    /// payload, joins no batch, and acts only once it leads the queue.
    /// Rotation must flow through the queue; a rotation taken outside
    /// it could slide into a leader's unlocked WAL window and split a
    /// batch between the old log and the new memtable.
    rotate_only: bool,
    /// Set (with release ordering) by the leader that completed this
    /// writer; checked before and after every wait.
    done: AtomicBool,
    result: Mutex<Option<Result<()>>>,
    /// Paired with the DB mutex; each writer sleeps on its own condvar
    /// so completion wakes exactly the threads involved.
    cv: Condvar,
}

impl Writer {
    fn new(sync: bool, value_type: ValueType, key: Vec<u8>, value: Vec<u8>) -> Writer {
        Writer {
            sync,
            value_type,
            key,
            value,
            rotate_only: false,
            done: AtomicBool::new(false),
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn rotation() -> Writer {
        Writer {
            sync: false,
            value_type: ValueType::Value,
            key: Vec::new(),
            value: Vec::new(),
            rotate_only: true,
            done: AtomicBool::new(false),
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn take_result(&self) -> Result<()> {
        self.result
            .lock()
            .take()
            .expect("completed writer carries a result")
    }
}

impl Db {
    /// Inserts or overwrites a key.
    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(options, ValueType::Value, key, value)
    }

    /// Removes a key by writing a tombstone. Deleting an absent key
    /// succeeds.
    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        self.write(options, ValueType::Deletion, key, b"")
    }

    fn write(&self, options: &WriteOptions, t: ValueType, key: &[u8], value: &[u8]) -> Result<()> {
        self.enqueue(Writer::new(options.sync, t, key.to_vec(), value.to_vec()))
    }

    fn enqueue(&self, writer: Writer) -> Result<()> {
        let shared = &self.shared;
        if shared.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        let w = Arc::new(writer);
        let mut state = shared.state.lock();
        state.writers.push_back(Arc::clone(&w));

        // Wait until completed by another leader, or promoted to leader
        // by reaching the front of the queue.
        while !w.done.load(Ordering::Acquire)
            && !Arc::ptr_eq(state.writers.front().expect("queue holds w"), &w)
        {
            w.cv.wait(&mut state);
        }
        if w.done.load(Ordering::Acquire) {
            return w.take_result();
        }

        // This thread leads. A rotation request acts alone and carries
        // no batch.
        if w.rotate_only {
            let status = shared.make_room_for_write(&mut state, true);
            state.writers.pop_front();
            if let Some(next_leader) = state.writers.front() {
                next_leader.cv.notify_one();
            }
            return status;
        }

        // Batch everything that fits and commit it.
        let mut status = shared.make_room_for_write(&mut state, false);
        let mut batch_len = 1usize;

        if status.is_ok() {
            let base_sequence = state.versions.last_sequence;
            let mut record = write_batch::new_batch_record();
            let mut need_sync = false;
            let mut batch_bytes = 0usize;
            let mut count: u32 = 0;

            for (i, writer) in state.writers.iter().enumerate() {
                if writer.rotate_only {
                    // Rotation requests never join a batch; this one
                    // takes its turn as a leader later.
                    break;
                }
                let writer_bytes = writer.key.len() + writer.value.len();
                if i > 0 && batch_bytes + writer_bytes > MAX_BATCH_SIZE {
                    break;
                }
                batch_bytes += writer_bytes;
                count += 1;
                write_batch::append_entry(
                    &mut record,
                    base_sequence + count as u64,
                    writer.value_type,
                    &writer.key,
                    &writer.value,
                );
                need_sync |= writer.sync;
            }
            batch_len = count as usize;
            write_batch::finish_record(&mut record, count);

            // The expensive part happens with the DB mutex released;
            // leadership (not the mutex) keeps the log ordered.
            let io: Result<()> = MutexGuard::unlocked(&mut state, || {
                let mut wal = shared.wal.lock();
                let writer = wal.as_mut().expect("wal open while db is open");
                writer.add_record(&record).map_err(from_wal_error)?;
                if need_sync {
                    writer.sync().map_err(from_wal_error)?;
                }
                Ok(())
            });

            match io {
                Ok(()) => {
                    let mut seq = base_sequence;
                    for writer in state.writers.iter().take(batch_len) {
                        seq += 1;
                        state
                            .mem
                            .add(seq, writer.value_type, &writer.key, &writer.value);
                    }
                    state.versions.last_sequence = base_sequence + batch_len as u64;
                    status = Ok(());
                }
                Err(e) => {
                    // The tail of the log is now suspect; refuse further
                    // writes until a reopen re-establishes a clean log.
                    tracing::error!(error = %e, "write-ahead log append failed");
                    if state.bg_error.is_none() {
                        state.bg_error = Some(e.clone());
                    }
                    status = Err(e);
                }
            }
        }

        // Complete the batch: every member gets the shared status.
        for _ in 0..batch_len {
            let ready = state.writers.pop_front().expect("batch members queued");
            if !Arc::ptr_eq(&ready, &w) {
                *ready.result.lock() = Some(status.clone());
                ready.done.store(true, Ordering::Release);
                ready.cv.notify_one();
            }
        }
        if let Some(next_leader) = state.writers.front() {
            next_leader.cv.notify_one();
        }

        status
    }

    /// Rotates the memtable and blocks until the frozen one has been
    /// flushed to a level-0 table. Mostly useful for tests and tooling;
    /// normal operation flushes in the background.
    pub fn flush(&self) -> Result<()> {
        let shared = &self.shared;
        {
            let state = shared.state.lock();
            if state.mem.approximate_memory_usage() == 0 && state.imm.is_none() {
                return Ok(());
            }
        }

        // The rotation itself runs through the writer queue so it cannot
        // interleave with a leader's in-flight commit.
        self.enqueue(Writer::rotation())?;

        let mut state = shared.state.lock();
        while state.imm.is_some() && state.bg_error.is_none() {
            shared.bg_done.wait(&mut state);
        }
        match &state.bg_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl DbShared {
    /// Ensures the active memtable can take the next write, enforcing
    /// the write-throttling policy on the way:
    ///
    /// * slowdown trigger: one 1 ms pause per write, ceding CPU to the
    ///   compaction thread;
    /// * full memtable with the previous one still flushing, or L0 at
    ///   the stop trigger: block until the background thread catches
    ///   up;
    /// * full memtable otherwise: freeze it, open a fresh WAL, install
    ///   an empty memtable, and wake the background thread.
    ///
    /// With `force`, rotates even when the memtable has room.
    pub(crate) fn make_room_for_write(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        force: bool,
    ) -> Result<()> {
        let mut force = force;
        let mut allow_delay = !force;
        loop {
            if let Some(e) = &state.bg_error {
                return Err(e.clone());
            }
            if allow_delay
                && state.versions.num_level_files(0) >= L0_SLOWDOWN_WRITES_TRIGGER
            {
                // Shed load gently: one short sleep per write, with the
                // mutex released so readers and the compactor proceed.
                MutexGuard::unlocked(state, || {
                    std::thread::sleep(Duration::from_millis(1));
                });
                allow_delay = false;
            } else if !force
                && state.mem.approximate_memory_usage() <= self.options.write_buffer_size
            {
                return Ok(());
            } else if state.imm.is_some() {
                tracing::debug!("write stalled: previous memtable still flushing");
                self.bg_done.wait(state);
            } else if state.versions.num_level_files(0) >= L0_STOP_WRITES_TRIGGER {
                tracing::debug!("write stalled: too many level-0 files");
                self.bg_done.wait(state);
            } else {
                // Freeze the current memtable and switch to a fresh WAL;
                // the frozen one is flushed by the background thread.
                let new_log_number = state.versions.new_file_number();
                let writer = wal::Writer::create(log_file_name(&self.dbname, new_log_number))
                    .map_err(from_wal_error)?;
                *self.wal.lock() = Some(writer);
                state.log_number = new_log_number;

                let full = std::mem::replace(
                    &mut state.mem,
                    Arc::new(MemTable::new(self.icmp.clone())),
                );
                tracing::debug!(
                    bytes = full.approximate_memory_usage(),
                    log = new_log_number,
                    "memtable frozen for flush"
                );
                state.imm = Some(full);
                force = false;
                self.maybe_schedule_compaction(state);
            }
        }
    }
}
