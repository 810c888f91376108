use tokio::task::JoinHandle;

use super::nonce_manager::{
    error::NonceError, InMemoryNonceManager, NonceManager, ReconcileOutcome,
};

/// Handle to the periodic reconcile + sweep job.
#[derive(Debug)]
pub struct JobHandle {
    handle: JoinHandle<()>,
}

impl JobHandle {
    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl InMemoryNonceManager {
    async fn maintain(&self) -> Result<(), NonceError> {
        match self.reconcile().await? {
            ReconcileOutcome::Applied {
                chain_nonce,
                settled,
            } => {
                log::debug!(
                    "Reconciled at chain nonce {} ({} settled)",
                    chain_nonce,
                    settled.len()
                );
            }
            ReconcileOutcome::Skipped => {}
            ReconcileOutcome::Failed(e) => {
                log::warn!("Reconciliation failed, will retry next round: {}", e);
            }
        }
        let evicted = self.sweep().await?;
        if evicted > 0 {
            log::info!("Swept {} stale nonce reservations", evicted);
        }
        Ok(())
    }

    /// Reconcile and sweep every `reconcile_interval` until stopped. Failures are logged and
    /// never end the loop; it only exits once the manager itself is gone.
    pub fn run_jobs(&self) -> JobHandle {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(manager.config.reconcile_interval).await;
                match manager.maintain().await {
                    Ok(_) => {}
                    Err(NonceError::ManagerStopped) => {
                        log::info!("Nonce manager stopped, ending maintenance job");
                        return;
                    }
                    Err(e) => {
                        log::error!("Error in nonce maintenance job: {}", e);
                    }
                }
            }
        });
        JobHandle { handle }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    };

    use alloy::{primitives::Address, transports::TransportErrorKind};

    use super::*;
    use crate::app::{
        nonce_manager::{config::NonceManagerConfig, error::OracleError},
        oracle::MockLedgerOracle,
    };

    #[tokio::test]
    async fn test_jobs_survive_oracle_failures() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let mut oracle = MockLedgerOracle::new();
        // init succeeds, then the ledger is unreachable for two rounds, then it moves to 4
        oracle.expect_pending_nonce_count().returning(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(1),
                1 | 2 => Err(OracleError::RPCError(TransportErrorKind::custom_str(
                    "timeout",
                ))),
                _ => Ok(4),
            }
        });
        let mut config = NonceManagerConfig::new(Address::repeat_byte(7));
        config.reconcile_interval = Duration::from_millis(10);
        let manager = InMemoryNonceManager::new(config, Arc::new(oracle));

        assert_eq!(manager.request_nonce("a").await.unwrap(), 1);
        let jobs = manager.run_jobs();

        let mut observed = 0;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            observed = manager.status().await.unwrap().observed_chain_nonce;
            if observed == 4 {
                break;
            }
        }
        assert_eq!(observed, 4);
        assert!(calls.load(Ordering::SeqCst) >= 4);
        assert!(!jobs.is_finished());

        let status = manager.status().await.unwrap();
        assert_eq!(status.in_flight_count, 0);
        assert_eq!(status.last_confirmed_contiguous, Some(3));
        jobs.stop();
    }
}
