use super::reservation::Reservation;

/// Signals that the ledger already holds a transaction at this nonce.
const UNDERPRICED_PATTERNS: &[&str] = &["underpriced", "replacement fee too low"];

/// Signals that the local view of the account sequence is stale.
const NONCE_CONFLICT_PATTERNS: &[&str] = &[
    "nonce",
    "already known",
    "known transaction",
    "replaced",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Underpriced,
    NonceConflict,
    Other,
}

/// What the manager does with a reservation that was reported failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    /// Another transaction occupies the nonce. The value is given up for good.
    Abandon,
    /// Resynchronize, then issue a fresh nonce for the same requester.
    Reissue {
        requester_id: String,
        retry_count: u32,
    },
    /// Nonce-class failure with no retries left.
    Exhausted { retry_count: u32 },
    /// Unclassified failure, handed back to the caller.
    Terminal,
    /// Unknown nonce, or the reservation already reached a terminal state.
    Ignored,
}

pub fn classify_failure(error_description: &str) -> FailureKind {
    let description = error_description.to_lowercase();
    if UNDERPRICED_PATTERNS
        .iter()
        .any(|pattern| description.contains(pattern))
    {
        FailureKind::Underpriced
    } else if NONCE_CONFLICT_PATTERNS
        .iter()
        .any(|pattern| description.contains(pattern))
    {
        FailureKind::NonceConflict
    } else {
        FailureKind::Other
    }
}

/// `failed` must already carry the incremented retry count.
pub fn decide(kind: FailureKind, failed: &Reservation, max_retries: u32) -> FailureDecision {
    match kind {
        FailureKind::Underpriced => FailureDecision::Abandon,
        FailureKind::NonceConflict if failed.retry_count <= max_retries => {
            FailureDecision::Reissue {
                requester_id: failed.requester_id.clone(),
                retry_count: failed.retry_count,
            }
        }
        FailureKind::NonceConflict => FailureDecision::Exhausted {
            retry_count: failed.retry_count,
        },
        FailureKind::Other => FailureDecision::Terminal,
    }
}
