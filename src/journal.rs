// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Append-only log of committed units of work.
//!
//! Rolled-back units never reach the journal. Sequence numbers are assigned
//! at append time and are gap-free.

use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub sequence: u64,
    pub label: &'static str,
    pub committed_at: DateTime<Utc>,
}

/// Lock-free commit log.
///
/// A [`DashMap`] gives lookup by sequence and a [`SegQueue`] keeps append
/// order for draining.
#[derive(Debug, Default)]
pub struct CommitJournal {
    records: DashMap<u64, CommitRecord>,
    order: SegQueue<u64>,
    next: AtomicU64,
}

impl CommitJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and returns its sequence number, starting at 1.
    pub fn append(&self, label: &'static str, committed_at: DateTime<Utc>) -> u64 {
        let sequence = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.records.insert(
            sequence,
            CommitRecord {
                sequence,
                label,
                committed_at,
            },
        );
        self.order.push(sequence);
        sequence
    }

    pub fn get(&self, sequence: u64) -> Option<CommitRecord> {
        self.records.get(&sequence).map(|r| r.value().clone())
    }

    /// Records appended and not yet drained.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest sequence handed out so far; 0 before the first commit.
    pub fn last_sequence(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Removes and returns pending records in append order.
    pub fn drain(&self) -> Vec<CommitRecord> {
        let mut drained = Vec::with_capacity(self.order.len());
        while let Some(sequence) = self.order.pop() {
            if let Some((_, record)) = self.records.remove(&sequence) {
                drained.push(record);
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sequences_start_at_one_and_drain_in_order() {
        let journal = CommitJournal::new();
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(journal.append("book_order", at), 1);
        assert_eq!(journal.append("update_status", at), 2);
        assert_eq!(journal.get(2).unwrap().label, "update_status");
        assert_eq!(journal.len(), 2);

        let drained = journal.drain();
        assert_eq!(
            drained.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(journal.is_empty());
        assert_eq!(journal.last_sequence(), 2);
    }

    #[test]
    fn concurrent_appends_are_gap_free() {
        let journal = std::sync::Arc::new(CommitJournal::new());
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let journal = journal.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        journal.append("charge_subscription", at);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut sequences: Vec<u64> = journal.drain().into_iter().map(|r| r.sequence).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=100).collect::<Vec<_>>());
    }
}
