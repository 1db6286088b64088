//! Batching Transform - Bounded Record Regrouping
//!
//! Record arrays arrive in whatever sizes clients chose to send and whatever
//! sizes chunks happened to store. Both transfer directions want bounded
//! arrays on the wire, so this transform regroups records into arrays of at
//! most `MAX_GROUP_RECORDS` without reordering, dropping, or padding.
//!
//! The transform is plain synchronous state. The upload path runs one per
//! inbound message; the download path keeps one alive across chunk
//! boundaries so a group can span two chunks.

/// Maximum records per transfer group.
pub const MAX_GROUP_RECORDS: usize = 250;

/// Regroups records into bounded arrays.
#[derive(Debug)]
pub struct BatchingTransform<T> {
    max_records: usize,
    pending: Vec<T>,
}

impl<T> BatchingTransform<T> {
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            pending: Vec::new(),
        }
    }

    /// Feed records in; get every completed group back out.
    ///
    /// Records beyond the last full group stay buffered for the next `push`
    /// or the final `flush`.
    pub fn push(&mut self, records: impl IntoIterator<Item = T>) -> Vec<Vec<T>> {
        self.pending.extend(records);

        let mut groups = Vec::new();
        while self.pending.len() >= self.max_records {
            let rest = self.pending.split_off(self.max_records);
            groups.push(std::mem::replace(&mut self.pending, rest));
        }
        groups
    }

    /// Emit whatever partial group remains, if any.
    pub fn flush(&mut self) -> Option<Vec<T>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Records currently buffered below the group threshold.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<T> Default for BatchingTransform<T> {
    fn default() -> Self {
        Self::new(MAX_GROUP_RECORDS)
    }
}
