use crate::error::{Error, Result};

/// The iterator capability shared by every layer of the engine: memtable,
/// block, table, level and composite iterators all present this shape.
///
/// An iterator starts out unpositioned; callers must seek before reading.
/// `key`/`value` may only be called while `valid()` is true, and the
/// returned slices are invalidated by the next movement. Errors do not
/// make movement panic; the iterator becomes invalid and `status()`
/// reports the cause.
pub trait InternalIterator {
    fn valid(&self) -> bool;

    fn seek_to_first(&mut self);

    fn seek_to_last(&mut self);

    /// Positions at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);

    fn next(&mut self);

    fn prev(&mut self);

    /// # Panics
    ///
    /// May panic if `!self.valid()`.
    fn key(&self) -> &[u8];

    /// # Panics
    ///
    /// May panic if `!self.valid()`.
    fn value(&self) -> &[u8];

    /// First error encountered, if any. Independent of validity: an
    /// iterator can be exhausted with an `Ok` status or invalid with an
    /// error.
    fn status(&self) -> Result<()>;
}

/// A permanently-invalid iterator carrying the error that prevented a
/// real one from being built (an unopenable table, a corrupt handle).
#[derive(Debug)]
pub struct ErrorIterator {
    error: Error,
}

impl ErrorIterator {
    pub fn new(error: Error) -> Self {
        Self { error }
    }
}

impl InternalIterator for ErrorIterator {
    fn valid(&self) -> bool {
        false
    }
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn seek(&mut self, _target: &[u8]) {}
    fn next(&mut self) {}
    fn prev(&mut self) {}
    fn key(&self) -> &[u8] {
        panic!("key() on error iterator")
    }
    fn value(&self) -> &[u8] {
        panic!("value() on error iterator")
    }
    fn status(&self) -> Result<()> {
        Err(self.error.clone())
    }
}
