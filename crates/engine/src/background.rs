//! The background worker: one persistent thread per database that
//! flushes frozen memtables and runs compactions.
//!
//! The thread sleeps on `bg_work` until scheduled, performs one unit of
//! work (a flush takes priority over a compaction), reschedules itself
//! if more work remains, and signals `bg_done` so stalled writers and a
//! closing `Db` can make progress. The shutdown flag is observed at the
//! top of the loop and between compaction keys.

use std::fs::File;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use memtable::{MemTable, MemTableIterator};
use parking_lot::MutexGuard;
use sstable::TableBuilder;
use types::{
    parse_internal_key, Comparator, Error, InternalIterator, InternalKey, Options, ReadOptions,
    Result, SequenceNumber, ValueType, MAX_SEQUENCE_NUMBER,
};

use crate::compaction::Compaction;
use crate::filename::table_file_name;
use crate::iterator::MergingIterator;
use crate::version_edit::VersionEdit;
use crate::{DbShared, DbState};

pub(crate) fn thread_main(shared: Arc<DbShared>) {
    let mut state = shared.state.lock();
    while !shared.shutting_down.load(Ordering::Acquire) {
        if !state.bg_compaction_scheduled {
            shared.bg_work.wait(&mut state);
            continue;
        }
        shared.background_call(&mut state);
    }
    // Unstick anyone waiting for background progress before exiting.
    state.bg_compaction_scheduled = false;
    shared.bg_done.notify_all();
}

impl DbShared {
    fn background_call(&self, state: &mut MutexGuard<'_, DbState>) {
        debug_assert!(state.bg_compaction_scheduled);

        if self.shutting_down.load(Ordering::Acquire) {
            // No point starting work that will be abandoned.
        } else if state.bg_error.is_some() {
            // The database is wedged; reads keep working, writes fail.
        } else if let Err(e) = self.background_compaction(state) {
            if self.shutting_down.load(Ordering::Acquire) {
                tracing::debug!("background work aborted by shutdown");
            } else {
                tracing::error!(error = %e, "background work failed; latching error");
                state.bg_error = Some(e);
            }
        }

        state.bg_compaction_scheduled = false;

        // The work may have created enough files to warrant more.
        self.maybe_schedule_compaction(state);
        self.bg_done.notify_all();
    }

    fn background_compaction(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        if state.imm.is_some() {
            return self.compact_memtable(state);
        }

        let Some(mut c) = state.versions.pick_compaction() else {
            return Ok(());
        };

        if c.is_trivial_move() {
            // No parent overlap: relabel the file one level down instead
            // of rewriting it.
            let f = Arc::clone(&c.inputs(0)[0]);
            c.edit.delete_file(c.level(), f.number);
            c.edit
                .add_file(c.level() + 1, f.number, f.file_size, f.smallest.clone(), f.largest.clone());
            let level = c.level();
            let mut edit = std::mem::take(&mut c.edit);
            self.log_and_apply(state, &mut edit)?;
            tracing::info!(
                file = f.number,
                from_level = level,
                "trivial move to next level"
            );
            return Ok(());
        }

        let result = self.do_compaction_work(state, &mut c);
        if result.is_ok() {
            // Drop cached handles for the inputs; the files themselves
            // vanish when their last snapshot reference drops.
            for which in 0..2 {
                for f in c.inputs(which) {
                    f.mark_deleted();
                    self.table_cache.evict(f.number);
                }
            }
        }
        result
    }

    /// Flushes the frozen memtable into a level-0 table and installs the
    /// resulting version.
    fn compact_memtable(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let imm = state.imm.clone().expect("flush scheduled with imm present");
        let mut edit = VersionEdit::new();

        let number = state.versions.new_file_number();
        let dbname = self.dbname.clone();
        let internal_options = self.internal_options.clone();

        // Table construction happens with the mutex released; the frozen
        // memtable is immutable and pinned by the Arc.
        let built = MutexGuard::unlocked(state, || {
            build_level0_table(&dbname, &internal_options, number, &imm)
        })?;

        if let Some((file_size, smallest, largest)) = built {
            edit.add_file(0, number, file_size, smallest, largest);
        }

        // The flushed log is no longer needed for recovery.
        edit.prev_log_number = Some(0);
        edit.log_number = Some(state.log_number);
        self.log_and_apply(state, &mut edit)?;

        state.imm = None;
        self.remove_obsolete_logs(state);
        tracing::info!(file = number, "memtable flushed to level 0");
        Ok(())
    }

    /// Merges the compaction inputs into fresh tables at `level + 1` and
    /// installs the resulting version.
    fn do_compaction_work(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        c: &mut Compaction,
    ) -> Result<()> {
        tracing::info!(
            level = c.level(),
            inputs = c.inputs(0).len(),
            parents = c.inputs(1).len(),
            "compaction started"
        );

        // Nothing newer than this can still be observed by any reader
        // that starts after the compaction installs; older shadowed
        // versions and provably-final tombstones may be dropped.
        let smallest_snapshot = state.versions.last_sequence;

        c.add_input_deletions();

        let result = MutexGuard::unlocked(state, || self.run_compaction(c, smallest_snapshot));
        result?;

        let mut edit = std::mem::take(&mut c.edit);
        self.log_and_apply(state, &mut edit)?;
        tracing::info!(level = c.level(), "compaction finished");
        Ok(())
    }

    /// The merge loop; runs without the DB mutex, taking it only to
    /// allocate output file numbers.
    fn run_compaction(&self, c: &mut Compaction, smallest_snapshot: SequenceNumber) -> Result<()> {
        let read_options = ReadOptions {
            verify_checksums: self.options.paranoid_checks,
            // Compaction reads every input once; caching them would only
            // evict blocks readers still want.
            fill_cache: false,
        };

        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        for which in 0..2 {
            for f in c.inputs(which) {
                children.push(self.table_cache.iter(read_options, f.number, f.file_size));
            }
        }
        let mut input = MergingIterator::new(self.icmp.clone(), children);
        input.seek_to_first();

        let ucmp = self.options.comparator.clone();
        let mut builder: Option<(u64, TableBuilder)> = None;
        let mut outputs: Vec<u64> = Vec::new();
        let mut smallest_key = InternalKey::default();
        let mut largest_key = InternalKey::default();
        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = MAX_SEQUENCE_NUMBER;

        let mut result: Result<()> = Ok(());

        while input.valid() {
            if self.shutting_down.load(Ordering::Acquire) {
                result = Err(Error::ShuttingDown);
                break;
            }

            let key = input.key().to_vec();

            // Cut the current output early if carrying this key would
            // drag too much grandparent data into its range. The overlap
            // tracker advances on every key, open output or not.
            if c.should_stop_before(&key) && builder.is_some() {
                if let Err(e) =
                    finish_output(c, &mut builder, &smallest_key, &largest_key)
                {
                    result = Err(e);
                    break;
                }
            }

            let mut drop_entry = false;
            match parse_internal_key(&key) {
                None => {
                    // Pass corrupted keys through so the mess stays
                    // observable rather than silently vanishing.
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                }
                Some(parsed) => {
                    let first_occurrence = !matches!(
                        &current_user_key,
                        Some(k) if ucmp.compare(k, parsed.user_key) == std::cmp::Ordering::Equal
                    );
                    if first_occurrence {
                        current_user_key = Some(parsed.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                    }

                    if last_sequence_for_key <= smallest_snapshot {
                        // A newer entry for this user key was already
                        // emitted (or itself dropped); this one is
                        // invisible to every possible reader.
                        drop_entry = true;
                    } else if parsed.value_type == ValueType::Deletion
                        && parsed.sequence <= smallest_snapshot
                        && c.is_base_level_for_key(parsed.user_key)
                    {
                        // The tombstone's job is done if no deeper level
                        // can hold the key. Key ranges say no; double
                        // check with the parents' bloom filters, keeping
                        // the tombstone on any "maybe".
                        let mut maybe_deeper = false;
                        for f in c.inputs(1) {
                            if self
                                .table_cache
                                .may_contain(f.number, f.file_size, parsed.user_key)
                            {
                                maybe_deeper = true;
                                break;
                            }
                        }
                        if !maybe_deeper {
                            drop_entry = true;
                        }
                    }
                    last_sequence_for_key = parsed.sequence;
                }
            }

            if !drop_entry {
                if builder.is_none() {
                    let number = self.state.lock().versions.new_file_number();
                    outputs.push(number);
                    let path = table_file_name(&self.dbname, number);
                    match File::create(&path) {
                        Ok(file) => {
                            builder = Some((
                                number,
                                TableBuilder::new(self.internal_options.clone(), file),
                            ));
                            smallest_key = InternalKey::decode(&key);
                        }
                        Err(e) => {
                            result = Err(e.into());
                            break;
                        }
                    }
                }
                largest_key = InternalKey::decode(&key);
                let (_, b) = builder.as_mut().expect("output open");
                if let Err(e) = b.add(&key, input.value()) {
                    result = Err(e);
                    break;
                }
                if b.file_size() >= c.max_output_file_size() {
                    if let Err(e) =
                        finish_output(c, &mut builder, &smallest_key, &largest_key)
                    {
                        result = Err(e);
                        break;
                    }
                }
            }

            input.next();
        }

        if result.is_ok() {
            result = input.status();
        }
        if result.is_ok() && builder.is_some() {
            result = finish_output(c, &mut builder, &smallest_key, &largest_key);
        }

        if result.is_err() {
            // Close the output under construction, then remove every
            // partial file rather than waiting for the next open's
            // directory sweep.
            drop(builder.take());
            for number in outputs {
                let _ = std::fs::remove_file(table_file_name(&self.dbname, number));
            }
        }
        result
    }
}

/// Closes the output file under construction and records it in the
/// compaction's edit.
fn finish_output(
    c: &mut Compaction,
    builder: &mut Option<(u64, TableBuilder)>,
    smallest: &InternalKey,
    largest: &InternalKey,
) -> Result<()> {
    let (number, b) = builder.take().expect("output open");
    let entries = b.num_entries();
    let file_size = b.finish()?;
    c.edit
        .add_file(c.level() + 1, number, file_size, smallest.clone(), largest.clone());
    tracing::debug!(
        file = number,
        entries,
        bytes = file_size,
        level = c.level() + 1,
        "compaction output finished"
    );
    Ok(())
}

/// Builds a level-0 table from a memtable. Returns `None` (and leaves no
/// file behind) when the memtable is empty; on error the partial file is
/// removed.
pub(crate) fn build_level0_table(
    dbname: &std::path::Path,
    internal_options: &Options,
    number: u64,
    mem: &Arc<MemTable>,
) -> Result<Option<(u64, InternalKey, InternalKey)>> {
    let mut iter = MemTableIterator::new(Arc::clone(mem));
    iter.seek_to_first();
    if !iter.valid() {
        return Ok(None);
    }

    let path = table_file_name(dbname, number);
    let build = (|| -> Result<(u64, InternalKey, InternalKey)> {
        let file = File::create(&path)?;
        let mut builder = TableBuilder::new(internal_options.clone(), file);

        let smallest = InternalKey::decode(iter.key());
        let mut largest = InternalKey::default();
        while iter.valid() {
            largest = InternalKey::decode(iter.key());
            builder.add(iter.key(), iter.value())?;
            iter.next();
        }
        let file_size = builder.finish()?;
        Ok((file_size, smallest, largest))
    })();

    match build {
        Ok((file_size, smallest, largest)) => {
            tracing::debug!(file = number, bytes = file_size, "level-0 table built");
            Ok(Some((file_size, smallest, largest)))
        }
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            Err(e)
        }
    }
}
