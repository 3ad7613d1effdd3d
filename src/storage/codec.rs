//! Run Codec: fixed-width record files
//!
//! ## File Format
//! ```text
//! [record 0][record 1] ... [record N-1]
//! ```
//! Every record is its raw byte image (`size_of::<T>()` bytes). There is no header, length
//! prefix or checksum; the record count is `file_len / size_of::<T>()`.
//!
//! Readers and writers batch `capacity` records per syscall.

use crate::{Result, SortError};
use bytemuck::Pod;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};

/// A fixed-width, trivially copyable record
pub trait Record: Pod + Send {}

impl<T: Pod + Send> Record for T {}

/// Buffered writer producing one run file
pub struct RunWriter<T: Record> {
    file: File,
    buffer: Vec<T>,
    capacity: usize,
    records_written: u64,
    sync: bool,
}

impl<T: Record> RunWriter<T> {
    /// Create (or truncate) the run file at `path`
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize, sync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        let capacity = capacity.max(1);

        Ok(Self {
            file,
            buffer: Vec::with_capacity(capacity),
            capacity,
            records_written: 0,
            sync,
        })
    }

    /// Append one record (records must arrive in sorted order)
    pub fn push(&mut self, record: T) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.capacity {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Append a contiguous run of records with a single write
    pub fn write_slice(&mut self, records: &[T]) -> Result<()> {
        self.flush_buffer()?;
        self.file.write_all(bytemuck::cast_slice(records))?;
        self.records_written += records.len() as u64;
        Ok(())
    }

    /// Flush remaining records and close the file, returning the record count
    pub fn finish(mut self) -> Result<u64> {
        self.flush_buffer()?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(self.records_written)
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.write_all(bytemuck::cast_slice(&self.buffer))?;
        self.records_written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }
}

/// Buffered sequential reader over one run file
///
/// A single forward pass; reopen the path to iterate again.
pub struct RunReader<T: Record> {
    file: File,
    path: PathBuf,
    buffer: Vec<T>,
    pos: usize,
    len: usize,
    exhausted: bool,
    records_read: u64,
}

impl<T: Record> RunReader<T> {
    /// Open the run file at `path` for reading
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        if size_of::<T>() == 0 {
            return Err(SortError::InvalidArgument(
                "zero-sized records cannot be read back".into(),
            ));
        }
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        Ok(Self {
            file,
            path,
            buffer: vec![T::zeroed(); capacity.max(1)],
            pos: 0,
            len: 0,
            exhausted: false,
            records_read: 0,
        })
    }

    /// Next record in file order, `None` at end of file
    pub fn next_record(&mut self) -> Result<Option<T>> {
        if self.pos >= self.len {
            if self.exhausted {
                return Ok(None);
            }
            if let Err(e) = self.refill() {
                self.exhausted = true;
                return Err(e);
            }
            if self.len == 0 {
                return Ok(None);
            }
        }
        let record = self.buffer[self.pos];
        self.pos += 1;
        self.records_read += 1;
        Ok(Some(record))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    fn refill(&mut self) -> Result<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.buffer[..]);
        let mut filled = 0;
        while filled < bytes.len() {
            match self.file.read(&mut bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let record_size = size_of::<T>();
        let trailing = filled % record_size;
        if trailing != 0 {
            return Err(SortError::Corruption {
                path: self.path.clone(),
                trailing,
            });
        }

        self.len = filled / record_size;
        self.pos = 0;
        if self.len == 0 {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl<T: Record> Iterator for RunReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Number of records stored in the run file at `path`
pub fn record_count<T: Record>(path: &Path) -> Result<u64> {
    let len = std::fs::metadata(path)?.len();
    Ok(len / size_of::<T>() as u64)
}

/// Byte size of `records` records of `T`
pub(crate) fn byte_len<T: Record>(records: u64) -> u64 {
    records * size_of::<T>() as u64
}
