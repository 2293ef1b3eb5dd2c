//! Grouping of change ranges into content requests.

use crate::remote::ChangeDescriptor;

/// Ranges fetched together in one request, in change-list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub ranges: Vec<ChangeDescriptor>,
}

impl Batch {
    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.length).sum()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Split `changes` into batches of at most `max_bytes` each.
///
/// A batch is closed as soon as its total reaches `max_bytes`, and before a
/// range that would push it over. A single range larger than the budget ends
/// up alone in its batch; ranges are never split. `max_bytes == 0` disables
/// aggregation and yields one batch per range.
pub fn batch_ranges(changes: &[ChangeDescriptor], max_bytes: u64) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch::default();
    let mut current_bytes = 0u64;

    for change in changes {
        let fits = current_bytes
            .checked_add(change.length)
            .is_some_and(|total| total <= max_bytes);
        if !current.is_empty() && !fits {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current.ranges.push(*change);
        current_bytes += change.length;

        if max_bytes == 0 || current_bytes >= max_bytes {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}
