//! Per-sender counting, range filtering and ranking
//!
//! Counts are computed once over the whole input. The inclusive
//! `[min_count, max_count]` range only decides which senders are shown; it
//! never changes a sender's count.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{AnnotatedRecord, CanonicalRecord, SenderRanking};

/// Inclusive bound on per-sender message counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRange {
    pub min_count: usize,
    pub max_count: Option<usize>,
}

impl CountRange {
    pub fn new(min_count: usize, max_count: Option<usize>) -> Self {
        Self {
            min_count,
            max_count,
        }
    }

    pub fn contains(&self, count: usize) -> bool {
        count >= self.min_count && self.max_count.map_or(true, |max| count <= max)
    }

    /// True when no count can satisfy the range
    pub fn is_empty(&self) -> bool {
        self.max_count.map_or(false, |max| max < self.min_count)
    }
}

impl Default for CountRange {
    fn default() -> Self {
        Self::new(1, None)
    }
}

/// Output of [`aggregate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    /// Senders in range, highest count first
    pub ranking: Vec<SenderRanking>,
    /// Messages from senders in range, in input order
    pub messages: Vec<AnnotatedRecord>,
}

/// Frequency table that remembers first-seen order of each sender
#[derive(Debug, Default)]
pub struct SenderCounts {
    index: HashMap<String, usize>,
    entries: Vec<(String, usize)>,
}

impl SenderCounts {
    /// Count every record with a non-empty canonical email
    pub fn from_records<R: CanonicalRecord>(records: &[R]) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.add(record.canonical_email());
        }
        counts
    }

    fn add(&mut self, email: &str) {
        let key = canonical_key(email);
        if key.is_empty() {
            return;
        }
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot].1 += 1,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, 1));
            }
        }
    }

    pub fn get(&self, email: &str) -> Option<usize> {
        self.index
            .get(&canonical_key(email))
            .map(|&slot| self.entries[slot].1)
    }

    /// Number of distinct senders
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Senders with their counts, in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(email, count)| (email.as_str(), *count))
    }
}

/// Emails read back from exports may carry stray case or padding
fn canonical_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Build the sender ranking and the annotated message view.
///
/// Records whose canonical email is empty contribute to neither output.
/// Equal counts keep the order in which senders were first seen.
pub fn aggregate<R: CanonicalRecord>(records: &[R], range: CountRange) -> Aggregation {
    let counts = SenderCounts::from_records(records);

    let mut ranking: Vec<SenderRanking> = counts
        .iter()
        .filter(|(_, count)| range.contains(*count))
        .map(|(email, count)| SenderRanking {
            count,
            canonical_email: email.to_string(),
        })
        .collect();
    // stable: ties stay in first-seen order
    ranking.sort_by(|a, b| b.count.cmp(&a.count));

    let messages: Vec<AnnotatedRecord> = records
        .iter()
        .filter_map(|record| {
            let email = canonical_key(record.canonical_email());
            let count = counts.get(&email)?;
            range.contains(count).then(|| AnnotatedRecord {
                count,
                canonical_email: email,
                from_raw: record.from_raw().to_string(),
                subject: record.subject().to_string(),
            })
        })
        .collect();

    debug!(
        "Aggregated {} records into {} senders ({} in range, {} messages in range)",
        records.len(),
        counts.len(),
        ranking.len(),
        messages.len()
    );

    Aggregation { ranking, messages }
}
