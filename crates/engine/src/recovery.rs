//! Open-time replay of write-ahead logs.
//!
//! After the MANIFEST has been replayed, every log file at or beyond the
//! recovered log number may contain acknowledged writes that never made
//! it into a table. They are re-applied batch by batch into a scratch
//! memtable and flushed straight to level-0 tables recorded in the
//! open's version edit, so the recovered data is durable before the new
//! log number is installed.
//!
//! A corrupt record ends replay of that log: everything before it is
//! kept, everything after is unreachable anyway (the log was written
//! sequentially). With `paranoid_checks` the corruption is an error
//! instead.

use std::path::Path;
use std::sync::Arc;

use memtable::MemTable;
use types::{Error, InternalKeyComparator, Options, Result};

use crate::background::build_level0_table;
use crate::filename::{log_file_name, parse_file_name, FileType};
use crate::version_edit::VersionEdit;
use crate::version_set::VersionSet;
use crate::write_batch::BatchReader;

/// Replays every relevant log into level-0 tables. Advances the version
/// set's sequence number and file counter past everything recovered.
pub(crate) fn replay_wal_files(
    dbname: &Path,
    options: &Options,
    internal_options: &Options,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
) -> Result<()> {
    let min_log = versions.log_number;
    let prev_log = versions.prev_log_number;

    let mut log_numbers: Vec<u64> = Vec::new();
    for entry in std::fs::read_dir(dbname)?.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(FileType::Log(n)) = parse_file_name(name) {
            if n >= min_log || n == prev_log {
                log_numbers.push(n);
            }
        }
    }
    // Replay in the order the logs were written.
    log_numbers.sort_unstable();

    for number in log_numbers {
        versions.mark_file_number_used(number);
        replay_one_log(dbname, options, internal_options, versions, edit, number)?;
    }
    Ok(())
}

fn replay_one_log(
    dbname: &Path,
    options: &Options,
    internal_options: &Options,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
    log_number: u64,
) -> Result<()> {
    let path = log_file_name(dbname, log_number);
    let mut reader = wal::Reader::open(&path).map_err(crate::from_wal_error)?;
    let icmp = InternalKeyComparator::new(options.comparator.clone());

    let mut mem: Option<Arc<MemTable>> = None;
    let mut scratch = Vec::new();
    let mut records = 0u64;

    loop {
        match reader.read_record(&mut scratch) {
            Ok(true) => {}
            Ok(false) => break,
            Err(wal::WalError::Corrupt(what)) => {
                // The tail of a log cut off mid-write is expected after a
                // crash; acknowledged-but-synced data cannot live past a
                // corrupt record, so stopping here is safe.
                if options.paranoid_checks {
                    return Err(Error::Corruption(format!(
                        "log {log_number}: {what}"
                    )));
                }
                tracing::warn!(log = log_number, reason = what, "log replay stopped early");
                break;
            }
            Err(e) => return Err(crate::from_wal_error(e)),
        }
        records += 1;

        let mut batch = BatchReader::new(&scratch)?;
        while let Some(entry) = batch.next_entry()? {
            let target =
                mem.get_or_insert_with(|| Arc::new(MemTable::new(icmp.clone())));
            target.add(entry.seq, entry.value_type, entry.key, entry.value);
            if entry.seq > versions.last_sequence {
                versions.last_sequence = entry.seq;
            }

            // Keep the replay memtable bounded like the live one; spill
            // to level 0 whenever it fills.
            if target.approximate_memory_usage() > options.write_buffer_size {
                flush_replay_memtable(dbname, internal_options, versions, edit, &mut mem)?;
            }
        }
    }

    flush_replay_memtable(dbname, internal_options, versions, edit, &mut mem)?;
    if records > 0 {
        tracing::info!(log = log_number, records, "write-ahead log replayed");
    }
    Ok(())
}

fn flush_replay_memtable(
    dbname: &Path,
    internal_options: &Options,
    versions: &mut VersionSet,
    edit: &mut VersionEdit,
    mem: &mut Option<Arc<MemTable>>,
) -> Result<()> {
    let Some(full) = mem.take() else {
        return Ok(());
    };
    let number = versions.new_file_number();
    if let Some((file_size, smallest, largest)) =
        build_level0_table(dbname, internal_options, number, &full)?
    {
        edit.add_file(0, number, file_size, smallest, largest);
    }
    Ok(())
}
