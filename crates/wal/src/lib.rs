//! # WAL — framed append log
//!
//! The durability backbone of the engine, used twice over: once for user
//! writes (`NNNNNN.log`, replayed into the memtable on recovery) and once
//! for file-set metadata (`MANIFEST-NNNNNN`, a log of version edits).
//!
//! ## Record format
//!
//! ```text
//! [masked_crc32c: u32 LE][length: u16 LE][type: u8 = 1][data ...]
//! ```
//!
//! The CRC covers `length || type || data` and is stored masked so that a
//! log record embedded inside other checksummed data cannot weaken either
//! checksum. Payloads above 65,535 bytes do not fit the length field and
//! are rejected. Only whole single-fragment records (type `1`) exist;
//! any other type byte is treated as corruption.
//!
//! ## Failure behaviour on read
//!
//! A clean end of file ends iteration. A header or payload cut short, a
//! checksum mismatch, or an unknown type byte all surface as
//! [`WalError::Corrupt`]; the caller decides whether a corrupt tail is
//! tolerable (user WAL replay stops there) or fatal (MANIFEST replay).

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

/// crc(4) + length(2) + type(1).
const HEADER_SIZE: usize = 7;

/// The only record type in this format: a complete record in one frame.
const RECORD_TYPE_FULL: u8 = 1;

/// Largest payload the u16 length field can carry.
pub const MAX_RECORD_SIZE: usize = u16::MAX as usize;

/// Errors from log append or replay.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation, was truncated mid-frame, or
    /// carried an unknown type byte.
    #[error("corrupt log record: {0}")]
    Corrupt(&'static str),

    /// The payload exceeds [`MAX_RECORD_SIZE`].
    #[error("record of {0} bytes exceeds the 65535-byte frame limit")]
    RecordTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, WalError>;

/// Append-only log writer.
///
/// Each record is assembled in a reusable scratch buffer and written with
/// a single `write_all`, then flushed. [`Writer::sync`] additionally
/// forces the OS to stable storage; callers decide per batch whether to
/// pay for it.
pub struct Writer {
    file: File,
    /// Reusable frame buffer so appends do not allocate.
    buf: Vec<u8>,
}

impl Writer {
    /// Opens (or creates) a log file in append mode.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            buf: Vec::with_capacity(256),
        })
    }

    /// Frames `data` and appends it to the log.
    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_RECORD_SIZE {
            return Err(WalError::RecordTooLarge(data.len()));
        }
        let length = data.len() as u16;

        self.buf.clear();
        // Header is back-filled once the CRC is known.
        self.buf.extend_from_slice(&[0u8; 4]);
        self.buf.extend_from_slice(&length.to_le_bytes());
        self.buf.push(RECORD_TYPE_FULL);
        self.buf.extend_from_slice(data);

        let mut hasher = codec::crc32c::Hasher::new();
        hasher.update(&self.buf[4..]);
        let crc = codec::crc32c::mask(hasher.finalize());
        self.buf[0..4].copy_from_slice(&crc.to_le_bytes());

        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        Ok(())
    }

    /// Forces everything written so far to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Sequential log reader.
///
/// Generic over any `Read` source so tests can replay from in-memory
/// buffers.
pub struct Reader<R: Read> {
    rdr: BufReader<R>,
}

impl Reader<File> {
    /// Opens an existing log file for replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Reader<File>> {
        let file = File::open(path)?;
        Ok(Reader {
            rdr: BufReader::new(file),
        })
    }
}

impl<R: Read> Reader<R> {
    pub fn from_reader(reader: R) -> Self {
        Reader {
            rdr: BufReader::new(reader),
        }
    }

    /// Reads the next record into `scratch` and returns whether one was
    /// produced.
    ///
    /// * `Ok(true)`: `scratch` holds the next record's payload.
    /// * `Ok(false)`: clean end of log.
    /// * `Err(WalError::Corrupt)`: bad frame; nothing further will be
    ///   read.
    pub fn read_record(&mut self, scratch: &mut Vec<u8>) -> Result<bool> {
        let mut header = [0u8; HEADER_SIZE];
        match self.rdr.read_exact(&mut header[..1]) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(WalError::Io(e)),
        }
        // The first byte arrived, so a frame was started: from here on, a
        // short read is a truncated record rather than a clean EOF.
        if let Err(e) = self.rdr.read_exact(&mut header[1..]) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(WalError::Corrupt("truncated record header"));
            }
            return Err(WalError::Io(e));
        }

        let expected_crc = codec::decode_fixed32(&header[0..4]);
        let length = u16::from_le_bytes([header[4], header[5]]) as usize;
        let record_type = header[6];

        scratch.clear();
        scratch.resize(length, 0);
        if let Err(e) = self.rdr.read_exact(scratch) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(WalError::Corrupt("truncated record payload"));
            }
            return Err(WalError::Io(e));
        }

        let mut hasher = codec::crc32c::Hasher::new();
        hasher.update(&header[4..]);
        hasher.update(scratch);
        if codec::crc32c::mask(hasher.finalize()) != expected_crc {
            return Err(WalError::Corrupt("checksum mismatch"));
        }

        if record_type != RECORD_TYPE_FULL {
            return Err(WalError::Corrupt("unknown record type"));
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests;
