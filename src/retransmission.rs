//! Retransmission queue: tracks every sent-but-unacknowledged segment and
//! hands back the ones whose RTO deadline has elapsed so the caller can
//! resend them, applying exponential backoff per retry.
//!
//! Entries are keyed by [`SeqNumber`] rather than a raw `u32` so ordering —
//! and therefore `trim_up_to`'s range-split — follows the same
//! wraparound-aware signed-difference comparison the rest of the sequence
//! space uses. A connection transferring more than 4GB will wrap its
//! sequence numbers past `u32::MAX`, and a plain integer ordering would
//! split the map at the wrong point once that happens.

use crate::seq::SeqNumber;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Entry {
    pub sequence: SeqNumber,
    pub payload: Bytes,
    pub first_sent: Instant,
    pub last_sent: Instant,
    pub retry_count: u32,
    pub rto: Duration,
}

impl Entry {
    fn deadline(&self) -> Instant {
        self.last_sent + self.rto
    }
}

/// A retransmission entry whose deadline has elapsed and must be re-sent.
#[derive(Debug, Clone)]
pub struct Expired {
    pub sequence: SeqNumber,
    pub payload: Bytes,
    pub retry_count: u32,
}

/// Result of polling for expired entries: the ones to resend, and the ones
/// that exceeded `max_retransmissions` and must be reported as a fatal
/// connection failure instead.
#[derive(Debug, Default)]
pub struct ExpiryReport {
    pub to_retransmit: Vec<Expired>,
    pub exhausted: Vec<SeqNumber>,
}

pub struct RetransmissionQueue {
    entries: BTreeMap<SeqNumber, Entry>,
    max_retransmissions: u32,
    max_rto: Duration,
}

impl RetransmissionQueue {
    pub fn new(max_retransmissions: u32, max_rto: Duration) -> Self {
        RetransmissionQueue {
            entries: BTreeMap::new(),
            max_retransmissions,
            max_rto,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes currently outstanding across all tracked entries.
    pub fn bytes_outstanding(&self) -> usize {
        self.entries.values().map(|e| e.payload.len()).sum()
    }

    pub fn add(&mut self, sequence: SeqNumber, payload: Bytes, sent_time: Instant, rto: Duration) {
        self.entries.insert(
            sequence,
            Entry {
                sequence,
                payload,
                first_sent: sent_time,
                last_sent: sent_time,
                retry_count: 0,
                rto,
            },
        );
    }

    pub fn remove(&mut self, sequence: SeqNumber) -> Option<Entry> {
        self.entries.remove(&sequence)
    }

    /// Removes all entries with `sequence <= up_to`, returning them in
    /// sequence order so the caller can report the acknowledged span to the
    /// congestion controller. `split_off` relies on `SeqNumber`'s `Ord`,
    /// which compares by signed difference rather than raw integer value,
    /// so this keeps working once sequence numbers wrap.
    pub fn trim_up_to(&mut self, up_to: SeqNumber) -> Vec<Entry> {
        let remaining = self.entries.split_off(&(up_to + 1));
        std::mem::replace(&mut self.entries, remaining)
            .into_values()
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries whose RTO deadline has elapsed by `now`. Each report advances
    /// that entry's retry-count and reschedules its deadline with exponential
    /// backoff (`new_rto = prior_rto * 2`, clamped to `max_rto`). Entries
    /// that would exceed `max_retransmissions` are removed and reported as
    /// exhausted instead of rescheduled.
    pub fn get_expired(&mut self, now: Instant) -> ExpiryReport {
        let mut report = ExpiryReport::default();
        let expired_seqs: Vec<SeqNumber> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline() <= now)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in expired_seqs {
            let entry = self.entries.get_mut(&seq).expect("seq collected above");
            if entry.retry_count + 1 > self.max_retransmissions {
                report.exhausted.push(seq);
                self.entries.remove(&seq);
                continue;
            }
            entry.retry_count += 1;
            entry.last_sent = now;
            entry.rto = (entry.rto * 2).min(self.max_rto);
            report.to_retransmit.push(Expired {
                sequence: entry.sequence,
                payload: entry.payload.clone(),
                retry_count: entry.retry_count,
            });
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_reported_once_deadline_elapses() {
        let mut queue = RetransmissionQueue::new(5, Duration::from_secs(10));
        let t0 = Instant::now();
        queue.add(
            SeqNumber::new(1),
            Bytes::from_static(b"payload"),
            t0,
            Duration::from_millis(200),
        );

        assert!(queue.get_expired(t0).to_retransmit.is_empty());

        let later = t0 + Duration::from_millis(250);
        let report = queue.get_expired(later);
        assert_eq!(report.to_retransmit.len(), 1);
        assert_eq!(report.to_retransmit[0].retry_count, 1);
    }

    #[test]
    fn trim_up_to_removes_inclusive_prefix() {
        let mut queue = RetransmissionQueue::new(5, Duration::from_secs(10));
        let now = Instant::now();
        for seq in [10u32, 20, 30, 40] {
            queue.add(
                SeqNumber::new(seq),
                Bytes::from_static(b"x"),
                now,
                Duration::from_millis(200),
            );
        }
        let trimmed = queue.trim_up_to(SeqNumber::new(20));
        assert_eq!(
            trimmed.iter().map(|e| e.sequence.raw()).collect::<Vec<_>>(),
            vec![10, 20]
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn exhaustion_surfaces_once_retry_budget_is_spent() {
        let mut queue = RetransmissionQueue::new(2, Duration::from_millis(50));
        let mut now = Instant::now();
        queue.add(
            SeqNumber::new(1),
            Bytes::from_static(b"x"),
            now,
            Duration::from_millis(10),
        );

        for _ in 0..2 {
            now += Duration::from_millis(20);
            let report = queue.get_expired(now);
            assert!(report.exhausted.is_empty());
        }
        now += Duration::from_millis(50);
        let report = queue.get_expired(now);
        assert_eq!(
            report.exhausted.iter().map(|s| s.raw()).collect::<Vec<_>>(),
            vec![1]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn sequences_stay_strictly_increasing() {
        let mut queue = RetransmissionQueue::new(5, Duration::from_secs(1));
        let now = Instant::now();
        queue.add(SeqNumber::new(5), Bytes::from_static(b"a"), now, Duration::from_millis(10));
        queue.add(SeqNumber::new(1), Bytes::from_static(b"b"), now, Duration::from_millis(10));
        queue.add(SeqNumber::new(3), Bytes::from_static(b"c"), now, Duration::from_millis(10));
        let seqs: Vec<u32> = queue.entries.keys().map(|s| s.raw()).collect();
        assert_eq!(seqs, vec![1, 3, 5]);
    }

    #[test]
    fn trim_up_to_is_correct_across_sequence_wraparound() {
        let mut queue = RetransmissionQueue::new(5, Duration::from_secs(10));
        let now = Instant::now();
        // Entries straddling the u32 wraparound point: logically, the one at
        // raw value 2 comes *after* the one at u32::MAX - 1, not before it.
        queue.add(
            SeqNumber::new(u32::MAX - 1),
            Bytes::from_static(b"a"),
            now,
            Duration::from_millis(200),
        );
        queue.add(SeqNumber::new(2), Bytes::from_static(b"b"), now, Duration::from_millis(200));

        let trimmed = queue.trim_up_to(SeqNumber::new(2));
        assert_eq!(
            trimmed.iter().map(|e| e.sequence.raw()).collect::<Vec<_>>(),
            vec![u32::MAX - 1, 2],
            "trim_up_to must order by signed difference, not raw integer value"
        );
        assert!(queue.is_empty());
    }
}
