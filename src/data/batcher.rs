// ============================================================
// Layer 4 — Record Batcher
// ============================================================
// Groups a row stream into fixed-size batches for the engine.
//
//   rows:    r1 r2 r3 r4 r5 r6 r7
//   size=3:  [r1 r2 r3] [r4 r5 r6] [r7]
//
// The last batch may be short. Pulling a batch reads at most
// `batch_size` rows from upstream, so batching stays lazy.
// A row error is returned as soon as it is seen; rows already
// gathered for that batch are dropped because the run aborts.
//
// Reference: Rust Book §13 (Implementing the Iterator Trait)

use anyhow::{ensure, Result};

use crate::data::dataset::RowIter;
use crate::domain::record::Record;

#[derive(Debug, Clone, Copy)]
pub struct RecordBatcher {
    batch_size: usize,
}

impl RecordBatcher {
    pub fn new(batch_size: usize) -> Result<Self> {
        ensure!(batch_size > 0, "batch_size must be greater than 0");
        Ok(Self { batch_size })
    }

    /// Lazily split `rows` into batches
    pub fn batches(&self, rows: RowIter) -> Batches {
        Batches { rows, size: self.batch_size, done: false }
    }
}

pub struct Batches {
    rows: RowIter,
    size: usize,
    done: bool,
}

impl Iterator for Batches {
    type Item = Result<Vec<Record>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = Vec::with_capacity(self.size);
        while batch.len() < self.size {
            match self.rows.next() {
                Some(Ok(r)) => batch.push(r),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn rows(n: usize) -> RowIter {
        Box::new((0..n).map(|i| Ok::<_, anyhow::Error>(Record::from_text(i.to_string()))))
    }

    #[test]
    fn test_last_batch_is_short() {
        let sizes: Vec<usize> = RecordBatcher::new(3)
            .unwrap()
            .batches(rows(7))
            .map(|b| b.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let n = RecordBatcher::new(2).unwrap().batches(rows(4)).count();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(RecordBatcher::new(4).unwrap().batches(rows(0)).count(), 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(RecordBatcher::new(0).is_err());
    }

    #[test]
    fn test_error_ends_stream() {
        let upstream: RowIter = Box::new(
            vec![Ok(Record::new()), Err(anyhow!("boom")), Ok(Record::new())].into_iter(),
        );
        let mut b = RecordBatcher::new(2).unwrap().batches(upstream);
        assert!(b.next().unwrap().is_err());
        assert!(b.next().is_none());
    }
}
