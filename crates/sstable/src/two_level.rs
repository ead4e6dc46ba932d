//! Composition of an index-level iterator with lazily-opened data-level
//! iterators.
//!
//! The index iterator yields opaque handles (block handles inside one
//! table, or file metadata across a level); `open_data` turns a handle
//! into the iterator over that unit. The data iterator is only reopened
//! when the handle changes, and empty units are skipped in both
//! directions so `valid()` honestly reflects whether a entry is under
//! the cursor.

use types::{InternalIterator, Result};

pub struct TwoLevelIterator<I, F>
where
    I: InternalIterator,
    F: FnMut(&[u8]) -> Box<dyn InternalIterator>,
{
    index_iter: I,
    open_data: F,
    data_iter: Option<Box<dyn InternalIterator>>,
    /// Handle the current data iterator was opened from.
    data_handle: Vec<u8>,
    status: Option<types::Error>,
}

impl<I, F> TwoLevelIterator<I, F>
where
    I: InternalIterator,
    F: FnMut(&[u8]) -> Box<dyn InternalIterator>,
{
    pub fn new(index_iter: I, open_data: F) -> Self {
        Self {
            index_iter,
            open_data,
            data_iter: None,
            data_handle: Vec::new(),
            status: None,
        }
    }

    fn data_valid(&self) -> bool {
        matches!(&self.data_iter, Some(it) if it.valid())
    }

    fn save_data_status(&mut self) {
        if let Some(it) = &self.data_iter {
            if self.status.is_none() {
                if let Err(e) = it.status() {
                    self.status = Some(e);
                }
            }
        }
    }

    fn init_data_iter(&mut self) {
        if !self.index_iter.valid() {
            self.save_data_status();
            self.data_iter = None;
            return;
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && handle == self.data_handle.as_slice() {
            return;
        }
        self.data_handle.clear();
        self.data_handle.extend_from_slice(handle);
        self.save_data_status();
        self.data_iter = Some((self.open_data)(&self.data_handle));
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while !self.data_valid() {
            if !self.index_iter.valid() {
                self.save_data_status();
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_iter();
            if let Some(it) = &mut self.data_iter {
                it.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while !self.data_valid() {
            if !self.index_iter.valid() {
                self.save_data_status();
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_iter();
            if let Some(it) = &mut self.data_iter {
                it.seek_to_last();
            }
        }
    }
}

impl<I, F> InternalIterator for TwoLevelIterator<I, F>
where
    I: InternalIterator,
    F: FnMut(&[u8]) -> Box<dyn InternalIterator>,
{
    fn valid(&self) -> bool {
        self.data_valid()
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_iter();
        if let Some(it) = &mut self.data_iter {
            it.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_iter();
        if let Some(it) = &mut self.data_iter {
            it.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_iter();
        if let Some(it) = &mut self.data_iter {
            it.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(it) = &mut self.data_iter {
            it.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(it) = &mut self.data_iter {
            it.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().unwrap().value()
    }

    fn status(&self) -> Result<()> {
        self.index_iter.status()?;
        if let Some(it) = &self.data_iter {
            it.status()?;
        }
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
