use crate::row::Row;
use thiserror::Error;

/// Rows per flush unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Returned by [`BatchAccumulator::append`] when the batch must be drained
/// first. Carries the rejected row back to the caller.
#[derive(Error, Debug)]
#[error("batch is full ({capacity} rows)")]
pub struct BatchFull {
    pub capacity: usize,
    pub row: Row,
}

/// Bounded buffer of rows owned by a single sub-worker.
#[derive(Debug)]
pub struct BatchAccumulator {
    rows: Vec<Row>,
    capacity: usize,
}

impl BatchAccumulator {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rows: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, row: Row) -> Result<(), BatchFull> {
        if self.is_full() {
            return Err(BatchFull {
                capacity: self.capacity,
                row,
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hands the buffered rows to the caller and leaves an empty buffer.
    pub fn drain(&mut self) -> Vec<Row> {
        std::mem::replace(&mut self.rows, Vec::with_capacity(self.capacity))
    }
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
