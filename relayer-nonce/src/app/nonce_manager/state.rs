use std::time::Duration;

use alloy::primitives::TxHash;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    recovery::{decide, FailureDecision, FailureKind},
    reservation::{Reservation, ReservationLedger},
};

/// Point-in-time view of the manager for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub initialized: bool,
    pub observed_chain_nonce: u64,
    pub next_to_issue: u64,
    pub in_flight_count: usize,
    pub queue_length: usize,
    pub last_confirmed_contiguous: Option<u64>,
    /// Nonces below `next_to_issue` that block confirmation progress.
    pub gaps: Vec<u64>,
}

impl StatusSnapshot {
    pub fn uninitialized(queue_length: usize) -> Self {
        Self {
            initialized: false,
            observed_chain_nonce: 0,
            next_to_issue: 0,
            in_flight_count: 0,
            queue_length,
            last_confirmed_contiguous: None,
            gaps: Vec::new(),
        }
    }
}

/// Counters and reservations for one signing account.
///
/// `next_to_issue >= observed_chain_nonce` holds at all times, and neither counter, nor
/// `last_confirmed_contiguous`, ever moves backwards.
#[derive(Debug)]
pub struct ManagerState {
    observed_chain_nonce: u64,
    next_to_issue: u64,
    last_confirmed_contiguous: Option<u64>,
    ledger: ReservationLedger,
}

impl ManagerState {
    /// Everything below `chain_nonce` is already accounted for by the ledger.
    pub fn new(chain_nonce: u64) -> Self {
        Self {
            observed_chain_nonce: chain_nonce,
            next_to_issue: chain_nonce,
            last_confirmed_contiguous: chain_nonce.checked_sub(1),
            ledger: ReservationLedger::new(),
        }
    }

    pub fn observed_chain_nonce(&self) -> u64 {
        self.observed_chain_nonce
    }

    pub fn next_to_issue(&self) -> u64 {
        self.next_to_issue
    }

    pub fn last_confirmed_contiguous(&self) -> Option<u64> {
        self.last_confirmed_contiguous
    }

    pub fn reservation(&self, nonce: u64) -> Option<&Reservation> {
        self.ledger.get(nonce)
    }

    pub fn smallest_in_flight(&self) -> Option<u64> {
        self.ledger.smallest_in_flight()
    }

    pub fn issue(&mut self, requester_id: String, retry_count: u32, now: DateTime<Utc>) -> u64 {
        let nonce = self.next_to_issue;
        self.next_to_issue += 1;
        self.ledger
            .insert(Reservation::new(nonce, requester_id, retry_count, now));
        nonce
    }

    pub fn mark_pending(&mut self, nonce: u64, tx_hash: TxHash) -> bool {
        self.ledger.mark_pending(nonce, tx_hash)
    }

    pub fn mark_confirmed(&mut self, nonce: u64) -> bool {
        let confirmed = self.ledger.mark_confirmed(nonce);
        if confirmed {
            self.extend_contiguous();
        }
        confirmed
    }

    pub fn mark_failed(
        &mut self,
        nonce: u64,
        kind: FailureKind,
        max_retries: u32,
    ) -> FailureDecision {
        match self.ledger.mark_failed(nonce) {
            Some(failed) => decide(kind, failed, max_retries),
            None => FailureDecision::Ignored,
        }
    }

    /// Align with the ledger's pending-inclusive nonce. In-flight nonces the ledger has moved
    /// past are assumed settled by our transaction; a replacement at the same nonce is not
    /// distinguished. Returns the nonces settled this way.
    pub fn apply_chain_nonce(&mut self, chain_nonce: u64) -> Vec<u64> {
        if chain_nonce <= self.observed_chain_nonce {
            return Vec::new();
        }
        let settled = self
            .ledger
            .in_flight_in(self.observed_chain_nonce..chain_nonce);
        for nonce in &settled {
            self.ledger.mark_confirmed(*nonce);
        }
        self.observed_chain_nonce = chain_nonce;
        self.next_to_issue = self.next_to_issue.max(chain_nonce);
        // Nothing below the chain nonce can block progress any more.
        self.last_confirmed_contiguous = self
            .last_confirmed_contiguous
            .max(Some(chain_nonce - 1));
        self.extend_contiguous();
        settled
    }

    pub fn sweep(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<u64> {
        self.ledger
            .sweep(now, retention, self.last_confirmed_contiguous)
    }

    pub fn gaps(&self) -> Vec<u64> {
        self.ledger
            .gaps(self.confirmed_frontier()..self.next_to_issue)
    }

    pub fn status(&self, queue_length: usize) -> StatusSnapshot {
        StatusSnapshot {
            initialized: true,
            observed_chain_nonce: self.observed_chain_nonce,
            next_to_issue: self.next_to_issue,
            in_flight_count: self.ledger.in_flight_count(),
            queue_length,
            last_confirmed_contiguous: self.last_confirmed_contiguous,
            gaps: self.gaps(),
        }
    }

    fn confirmed_frontier(&self) -> u64 {
        self.last_confirmed_contiguous.map_or(0, |nonce| nonce + 1)
    }

    fn extend_contiguous(&mut self) {
        let mut next = self.confirmed_frontier();
        while self.ledger.is_confirmed(next) {
            self.last_confirmed_contiguous = Some(next);
            next += 1;
        }
    }
}
