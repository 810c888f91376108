use std::sync::Arc;

use alloy::primitives::TxHash;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

use actor::Command;
use config::NonceManagerConfig;
use error::NonceError;
use reservation::Reservation;
use state::StatusSnapshot;

use crate::{
    app::oracle::{LedgerOracle, ProviderOracle},
    EnvVar,
};

mod actor;
pub mod config;
pub mod error;
pub mod recovery;
pub mod reservation;
pub mod state;

/// Result of one reconciliation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The ledger was read; `settled` lists in-flight nonces it had already moved past.
    Applied { chain_nonce: u64, settled: Vec<u64> },
    /// Another pass was running, or the manager has not been initialized yet.
    Skipped,
    /// The ledger read failed. The error was logged and nothing changed.
    Failed(String),
}

#[async_trait::async_trait]
pub trait NonceManager: Sync + Send {
    /// Reserve the next nonce for `requester_id`. Concurrent callers get distinct, contiguous
    /// values in request order. The first call waits for the ledger to be read.
    async fn request_nonce(&self, requester_id: &str) -> Result<u64, NonceError>;

    /// Record that a transaction using `nonce` was submitted.
    async fn mark_pending(&self, nonce: u64, tx_hash: TxHash) -> Result<(), NonceError>;

    /// Record that the transaction using `nonce` landed.
    async fn mark_confirmed(&self, nonce: u64) -> Result<(), NonceError>;

    /// Record a rejected transaction. Returns a replacement nonce for the same requester when
    /// the failure was a recoverable nonce conflict, `None` when the failure is final.
    async fn mark_failed(
        &self,
        nonce: u64,
        error_description: &str,
    ) -> Result<Option<u64>, NonceError>;

    /// Re-read the ledger and retire reservations it has moved past.
    async fn reconcile(&self) -> Result<ReconcileOutcome, NonceError>;

    /// Drop stale reservations from bookkeeping. Returns how many were removed.
    async fn sweep(&self) -> Result<usize, NonceError>;

    async fn status(&self) -> Result<StatusSnapshot, NonceError>;

    /// Forget everything and start over from the ledger. Nonces handed out before the reset
    /// are orphaned, so this is only meant for tests.
    async fn reset(&self) -> Result<(), NonceError>;

    /// Checks if the given nonce is the smallest among all currently in-flight nonces.
    async fn is_least_in_flight(&self, nonce: u64) -> Result<bool, NonceError>;
}

/// Handle to the in-process nonce manager of one relayer account. Cheap to clone; all clones
/// talk to the same owning task, which stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct InMemoryNonceManager {
    pub config: NonceManagerConfig,
    commands: mpsc::UnboundedSender<Command>,
}

impl InMemoryNonceManager {
    /// Must be called within a tokio runtime.
    pub fn new(config: NonceManagerConfig, oracle: Arc<dyn LedgerOracle>) -> Self {
        let commands = actor::spawn(config.clone(), oracle);
        Self { config, commands }
    }

    pub fn from_env(env: &EnvVar) -> Result<Self, NonceError> {
        let oracle = ProviderOracle::from_rpc_urls(&env.rpc_urls())?;
        Ok(Self::new(NonceManagerConfig::from_env(env), Arc::new(oracle)))
    }

    pub async fn reservation(&self, nonce: u64) -> Result<Option<Reservation>, NonceError> {
        self.call(|reply| Command::Reservation { nonce, reply }).await
    }

    pub async fn smallest_in_flight(&self) -> Result<Option<u64>, NonceError> {
        self.call(|reply| Command::SmallestInFlight { reply }).await
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, NonceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| NonceError::ManagerStopped)?;
        response.await.map_err(|_| NonceError::ManagerStopped)
    }
}

#[async_trait::async_trait]
impl NonceManager for InMemoryNonceManager {
    #[instrument(skip(self), fields(nonce = tracing::field::Empty))]
    async fn request_nonce(&self, requester_id: &str) -> Result<u64, NonceError> {
        let requester_id = requester_id.to_string();
        let nonce = self
            .call(|reply| Command::RequestNonce {
                requester_id,
                reply,
            })
            .await??;
        tracing::Span::current().record("nonce", nonce);
        Ok(nonce)
    }

    async fn mark_pending(&self, nonce: u64, tx_hash: TxHash) -> Result<(), NonceError> {
        self.call(|reply| Command::MarkPending {
            nonce,
            tx_hash,
            reply,
        })
        .await
    }

    async fn mark_confirmed(&self, nonce: u64) -> Result<(), NonceError> {
        self.call(|reply| Command::MarkConfirmed { nonce, reply })
            .await
    }

    #[instrument(skip(self))]
    async fn mark_failed(
        &self,
        nonce: u64,
        error_description: &str,
    ) -> Result<Option<u64>, NonceError> {
        let error_description = error_description.to_string();
        self.call(|reply| Command::MarkFailed {
            nonce,
            error_description,
            reply,
        })
        .await?
    }

    async fn reconcile(&self) -> Result<ReconcileOutcome, NonceError> {
        self.call(|reply| Command::Reconcile { reply }).await
    }

    async fn sweep(&self) -> Result<usize, NonceError> {
        self.call(|reply| Command::Sweep { reply }).await
    }

    async fn status(&self) -> Result<StatusSnapshot, NonceError> {
        self.call(|reply| Command::Status { reply }).await
    }

    #[instrument(skip(self))]
    async fn reset(&self) -> Result<(), NonceError> {
        self.call(|reply| Command::Reset { reply }).await?
    }

    async fn is_least_in_flight(&self, nonce: u64) -> Result<bool, NonceError> {
        Ok(self.smallest_in_flight().await? == Some(nonce))
    }
}
