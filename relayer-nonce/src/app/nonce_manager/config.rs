use std::time::Duration;

use alloy::primitives::Address;

use crate::EnvVar;

pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_RETENTION_WINDOW_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct NonceManagerConfig {
    pub relayer_address: Address,

    /// Period of the background reconcile + sweep job.
    pub reconcile_interval: Duration,
    /// Unconfirmed reservations older than this are dropped from bookkeeping.
    pub retention_window: Duration,
    /// Reissues allowed per logical request after nonce-class failures.
    pub max_retries: u32,
}

impl NonceManagerConfig {
    pub fn new(relayer_address: Address) -> Self {
        Self {
            relayer_address,
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            retention_window: Duration::from_secs(DEFAULT_RETENTION_WINDOW_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn from_env(env: &EnvVar) -> Self {
        Self {
            relayer_address: env.relayer_address,
            reconcile_interval: Duration::from_secs(
                env.nonce_reconcile_interval
                    .unwrap_or(DEFAULT_RECONCILE_INTERVAL_SECS),
            ),
            retention_window: Duration::from_secs(
                env.nonce_retention_window
                    .unwrap_or(DEFAULT_RETENTION_WINDOW_SECS),
            ),
            max_retries: env.nonce_max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        }
    }
}
