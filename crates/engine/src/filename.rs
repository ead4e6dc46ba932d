//! File naming inside a database directory.
//!
//! ```text
//! CURRENT            text pointer to the active MANIFEST
//! LOCK               advisory single-opener lock
//! MANIFEST-NNNNNN    log of version edits
//! NNNNNN.log         write-ahead log of user writes
//! NNNNNN.sst         immutable sorted table
//! ```
//!
//! `NNNNNN` is a zero-padded six-digit decimal drawn from the version
//! set's monotonic file-number counter.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use types::Result;

pub(crate) const CURRENT_FILE: &str = "CURRENT";
pub(crate) const LOCK_FILE: &str = "LOCK";

pub(crate) fn log_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.log"))
}

pub(crate) fn table_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.sst"))
}

pub(crate) fn descriptor_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("MANIFEST-{number:06}"))
}

pub(crate) fn current_file_name(dbname: &Path) -> PathBuf {
    dbname.join(CURRENT_FILE)
}

pub(crate) fn lock_file_name(dbname: &Path) -> PathBuf {
    dbname.join(LOCK_FILE)
}

/// What a directory entry is, per the naming scheme above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileType {
    Log(u64),
    Table(u64),
    Descriptor(u64),
    Current,
    Lock,
    Temp,
}

/// Classifies a file name; `None` for anything the engine does not own.
pub(crate) fn parse_file_name(name: &str) -> Option<FileType> {
    if name == CURRENT_FILE {
        return Some(FileType::Current);
    }
    if name == LOCK_FILE {
        return Some(FileType::Lock);
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return rest.parse::<u64>().ok().map(FileType::Descriptor);
    }
    if let Some(stem) = name.strip_suffix(".log") {
        return stem.parse::<u64>().ok().map(FileType::Log);
    }
    if let Some(stem) = name.strip_suffix(".sst") {
        return stem.parse::<u64>().ok().map(FileType::Table);
    }
    if name.ends_with(".tmp") {
        return Some(FileType::Temp);
    }
    None
}

/// Points `CURRENT` at `MANIFEST-<number>` atomically (write a temp file,
/// fsync, rename over the old pointer).
pub(crate) fn set_current_file(dbname: &Path, manifest_number: u64) -> Result<()> {
    let contents = format!("MANIFEST-{manifest_number:06}\n");
    let tmp = dbname.join(format!("{manifest_number:06}.tmp"));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, current_file_name(dbname)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Reads the manifest name out of `CURRENT`; `None` when absent (a fresh
/// database directory).
pub(crate) fn read_current_file(dbname: &Path) -> Result<Option<String>> {
    let path = current_file_name(dbname);
    match fs::read_to_string(&path) {
        Ok(contents) => {
            let name = contents.trim_end_matches('\n');
            if name.is_empty() || contents == name {
                return Err(types::Error::Corruption(
                    "CURRENT file is malformed".into(),
                ));
            }
            Ok(Some(name.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
