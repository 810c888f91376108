use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
    time::Duration,
};

use alloy::primitives::TxHash;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReservationStatus {
    Reserved,
    Pending,
    Confirmed,
    Failed,
}

impl ReservationStatus {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ReservationStatus::Reserved | ReservationStatus::Pending)
    }
}

/// A claim on one nonce value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub nonce: u64,
    pub requester_id: String,
    pub created_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub tx_hash: Option<TxHash>,
    /// Failures reported for this logical request so far. A reissued reservation starts from
    /// the count of the one it replaces.
    pub retry_count: u32,
}

impl Reservation {
    pub fn new(nonce: u64, requester_id: String, retry_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            nonce,
            requester_id,
            created_at: now,
            status: ReservationStatus::Reserved,
            tx_hash: None,
            retry_count,
        }
    }

    fn is_older_than(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (now - self.created_at).to_std() {
            Ok(age) => age > window,
            // created in the future relative to `now`
            Err(_) => false,
        }
    }
}

/// Every reservation issued by this process, keyed by nonce, plus the in-flight index.
#[derive(Debug, Default)]
pub struct ReservationLedger {
    reservations: BTreeMap<u64, Reservation>,
    in_flight: BTreeSet<u64>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reservation: Reservation) {
        if reservation.status.is_in_flight() {
            self.in_flight.insert(reservation.nonce);
        } else {
            self.in_flight.remove(&reservation.nonce);
        }
        self.reservations.insert(reservation.nonce, reservation);
    }

    pub fn get(&self, nonce: u64) -> Option<&Reservation> {
        self.reservations.get(&nonce)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn smallest_in_flight(&self) -> Option<u64> {
        self.in_flight.first().copied()
    }

    pub fn in_flight_in(&self, range: Range<u64>) -> Vec<u64> {
        self.in_flight.range(range).copied().collect()
    }

    pub fn is_confirmed(&self, nonce: u64) -> bool {
        self.get(nonce)
            .is_some_and(|r| r.status == ReservationStatus::Confirmed)
    }

    /// `reserved -> pending`. Returns false if the nonce is unknown or not reserved.
    pub fn mark_pending(&mut self, nonce: u64, tx_hash: TxHash) -> bool {
        match self.reservations.get_mut(&nonce) {
            Some(reservation) if reservation.status == ReservationStatus::Reserved => {
                reservation.status = ReservationStatus::Pending;
                reservation.tx_hash = Some(tx_hash);
                true
            }
            _ => false,
        }
    }

    /// `reserved | pending -> confirmed`.
    pub fn mark_confirmed(&mut self, nonce: u64) -> bool {
        match self.reservations.get_mut(&nonce) {
            Some(reservation) if reservation.status.is_in_flight() => {
                reservation.status = ReservationStatus::Confirmed;
                self.in_flight.remove(&nonce);
                true
            }
            _ => false,
        }
    }

    /// `reserved | pending -> failed`, bumping the retry count. Terminal reservations are left
    /// untouched and yield `None`.
    pub fn mark_failed(&mut self, nonce: u64) -> Option<&Reservation> {
        let reservation = self
            .reservations
            .get_mut(&nonce)
            .filter(|r| r.status.is_in_flight())?;
        reservation.status = ReservationStatus::Failed;
        reservation.retry_count += 1;
        self.in_flight.remove(&nonce);
        Some(reservation)
    }

    /// Nonces in `range` with no reservation or a failed one.
    pub fn gaps(&self, range: Range<u64>) -> Vec<u64> {
        range
            .filter(|nonce| {
                self.get(*nonce)
                    .map_or(true, |r| r.status == ReservationStatus::Failed)
            })
            .collect()
    }

    /// Drop reservations older than `retention` that are not confirmed, and confirmed ones at or
    /// below `confirmed_through`. Returns the evicted nonces.
    pub fn sweep(
        &mut self,
        now: DateTime<Utc>,
        retention: Duration,
        confirmed_through: Option<u64>,
    ) -> Vec<u64> {
        let evicted: Vec<u64> = self
            .reservations
            .values()
            .filter(|r| r.is_older_than(now, retention))
            .filter(|r| {
                r.status != ReservationStatus::Confirmed
                    || confirmed_through.is_some_and(|through| r.nonce <= through)
            })
            .map(|r| r.nonce)
            .collect();
        for nonce in &evicted {
            self.reservations.remove(nonce);
            self.in_flight.remove(nonce);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserve(ledger: &mut ReservationLedger, nonce: u64, now: DateTime<Utc>) {
        ledger.insert(Reservation::new(nonce, format!("req-{nonce}"), 0, now));
    }

    #[test]
    fn test_status_transitions() {
        let now = Utc::now();
        let mut ledger = ReservationLedger::new();
        reserve(&mut ledger, 1, now);
        reserve(&mut ledger, 2, now);
        assert_eq!(ledger.in_flight_count(), 2);

        let hash = TxHash::repeat_byte(0xab);
        assert!(ledger.mark_pending(1, hash));
        // pending is only reachable from reserved
        assert!(!ledger.mark_pending(1, hash));
        assert!(!ledger.mark_pending(42, hash));
        assert_eq!(ledger.get(1).unwrap().tx_hash, Some(hash));

        assert!(ledger.mark_confirmed(1));
        assert!(!ledger.mark_confirmed(1));
        assert!(ledger.is_confirmed(1));
        assert_eq!(ledger.smallest_in_flight(), Some(2));

        let failed = ledger.mark_failed(2).unwrap();
        assert_eq!(failed.status, ReservationStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        // failed is terminal
        assert!(ledger.mark_failed(2).is_none());
        assert!(!ledger.mark_confirmed(2));
        assert_eq!(ledger.get(2).unwrap().retry_count, 1);
        assert_eq!(ledger.in_flight_count(), 0);
    }

    #[test]
    fn test_gaps_include_missing_and_failed() {
        let now = Utc::now();
        let mut ledger = ReservationLedger::new();
        for nonce in [3, 4, 6] {
            reserve(&mut ledger, nonce, now);
        }
        ledger.mark_failed(4);
        assert_eq!(ledger.gaps(3..8), vec![4, 5, 7]);
    }

    #[test]
    fn test_sweep_evicts_stale_unconfirmed() {
        let start = Utc::now();
        let mut ledger = ReservationLedger::new();
        reserve(&mut ledger, 10, start);
        reserve(&mut ledger, 11, start);
        reserve(&mut ledger, 12, start);
        reserve(&mut ledger, 13, start + chrono::Duration::seconds(50));
        ledger.mark_confirmed(11);
        ledger.mark_confirmed(12);

        let later = start + chrono::Duration::seconds(70);
        let evicted = ledger.sweep(later, Duration::from_secs(60), Some(11));

        // 12 is confirmed above the contiguous frontier, 13 is still young
        assert_eq!(evicted, vec![10, 11]);
        assert!(ledger.get(10).is_none());
        assert!(ledger.get(12).is_some());
        assert!(ledger.get(13).is_some());
        assert_eq!(ledger.in_flight_in(0..100), vec![13]);
    }
}
