//! Streaming two-way merge
//!
//! Used for every merge the engine performs: two in-memory batches into a level 0 run, two
//! run files into a higher level run, and the forced merges of finalization.
//!
//! ## Tie-break
//! The left head is written only when `less(left, right)` holds. On ties the right input goes
//! first, so equal records are not kept in input order.

use super::codec::{Record, RunReader, RunWriter};
use crate::order::Order;
use crate::Result;

/// A sorted stream of records that can be pulled one at a time
pub trait SortedSource<T: Record> {
    fn next_record(&mut self) -> Result<Option<T>>;
}

/// Sorted in-memory slice
pub struct SliceSource<'a, T> {
    records: &'a [T],
    pos: usize,
}

impl<'a, T> SliceSource<'a, T> {
    pub fn new(records: &'a [T]) -> Self {
        Self { records, pos: 0 }
    }
}

impl<T: Record> SortedSource<T> for SliceSource<'_, T> {
    fn next_record(&mut self) -> Result<Option<T>> {
        let record = self.records.get(self.pos).copied();
        if record.is_some() {
            self.pos += 1;
        }
        Ok(record)
    }
}

impl<T: Record> SortedSource<T> for RunReader<T> {
    fn next_record(&mut self) -> Result<Option<T>> {
        RunReader::next_record(self)
    }
}

/// Merge `left` and `right` into `out`, returning the number of records written
pub fn merge_into<T, O, L, R>(
    left: &mut L,
    right: &mut R,
    out: &mut RunWriter<T>,
    order: &O,
) -> Result<u64>
where
    T: Record,
    O: Order<T> + ?Sized,
    L: SortedSource<T>,
    R: SortedSource<T>,
{
    let mut written = 0u64;
    let mut l = left.next_record()?;
    let mut r = right.next_record()?;

    loop {
        match (l, r) {
            (Some(a), Some(b)) => {
                if order.less(&a, &b) {
                    out.push(a)?;
                    l = left.next_record()?;
                } else {
                    out.push(b)?;
                    r = right.next_record()?;
                }
            }
            (Some(a), None) => {
                out.push(a)?;
                l = left.next_record()?;
            }
            (None, Some(b)) => {
                out.push(b)?;
                r = right.next_record()?;
            }
            (None, None) => break,
        }
        written += 1;
    }

    Ok(written)
}
