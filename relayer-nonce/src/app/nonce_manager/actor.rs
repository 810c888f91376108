use std::{collections::VecDeque, sync::Arc};

use alloy::primitives::{Address, TxHash};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::app::oracle::LedgerOracle;

use super::{
    config::NonceManagerConfig,
    error::{NonceError, OracleError},
    recovery::{classify_failure, FailureDecision},
    reservation::Reservation,
    state::{ManagerState, StatusSnapshot},
    ReconcileOutcome,
};

pub(crate) enum Command {
    RequestNonce {
        requester_id: String,
        reply: oneshot::Sender<Result<u64, NonceError>>,
    },
    MarkPending {
        nonce: u64,
        tx_hash: TxHash,
        reply: oneshot::Sender<()>,
    },
    MarkConfirmed {
        nonce: u64,
        reply: oneshot::Sender<()>,
    },
    MarkFailed {
        nonce: u64,
        error_description: String,
        reply: oneshot::Sender<Result<Option<u64>, NonceError>>,
    },
    Reconcile {
        reply: oneshot::Sender<ReconcileOutcome>,
    },
    Sweep {
        reply: oneshot::Sender<usize>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Reset {
        reply: oneshot::Sender<Result<(), NonceError>>,
    },
    Reservation {
        nonce: u64,
        reply: oneshot::Sender<Option<Reservation>>,
    },
    SmallestInFlight {
        reply: oneshot::Sender<Option<u64>>,
    },
}

/// Oracle reads finishing in spawned tasks. `epoch` ties them to the state they were started
/// for, so results from before a reset are dropped.
enum Completion {
    Initialized {
        epoch: u64,
        result: Result<u64, OracleError>,
    },
    Synced {
        epoch: u64,
        result: Result<u64, OracleError>,
    },
}

enum Reply {
    Nonce(oneshot::Sender<Result<u64, NonceError>>),
    Replacement(oneshot::Sender<Result<Option<u64>, NonceError>>),
}

impl Reply {
    fn send_nonce(self, nonce: u64) {
        let delivered = match self {
            Reply::Nonce(tx) => tx.send(Ok(nonce)).is_ok(),
            Reply::Replacement(tx) => tx.send(Ok(Some(nonce))).is_ok(),
        };
        if !delivered {
            // The value stays consumed; it surfaces as in flight until reconciled or swept.
            log::warn!("Requester went away before receiving nonce {}", nonce);
        }
    }

    fn send_error(self, error: NonceError) {
        match self {
            Reply::Nonce(tx) => {
                let _ = tx.send(Err(error));
            }
            Reply::Replacement(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }
}

struct IssueRequest {
    requester_id: String,
    retry_count: u32,
    reply: Reply,
}

/// Sole owner of the manager state. Every mutation is a command processed in arrival order;
/// oracle reads run in spawned tasks and come back as completions, so the loop never waits on
/// the network.
pub(crate) struct NonceActor {
    config: NonceManagerConfig,
    oracle: Arc<dyn LedgerOracle>,
    completions_tx: mpsc::UnboundedSender<Completion>,

    state: Option<ManagerState>,
    /// Requests waiting for issuance, in FIFO order.
    queue: VecDeque<IssueRequest>,
    /// Reissues held back until the reconciliation they triggered has finished.
    parked: Vec<IssueRequest>,
    initializing: bool,
    syncing: bool,
    sync_waiter: Option<oneshot::Sender<ReconcileOutcome>>,
    reset_waiters: Vec<oneshot::Sender<Result<(), NonceError>>>,
    epoch: u64,
}

pub(crate) fn spawn(
    config: NonceManagerConfig,
    oracle: Arc<dyn LedgerOracle>,
) -> mpsc::UnboundedSender<Command> {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let actor = NonceActor {
        config,
        oracle,
        completions_tx,
        state: None,
        queue: VecDeque::new(),
        parked: Vec::new(),
        initializing: false,
        syncing: false,
        sync_waiter: None,
        reset_waiters: Vec::new(),
        epoch: 0,
    };
    tokio::spawn(actor.run(commands_rx, completions_rx));
    commands_tx
}

impl NonceActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        log::debug!("All nonce manager handles dropped, stopping");
                        return;
                    }
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
            }
        }
    }

    fn address(&self) -> Address {
        self.config.relayer_address
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::RequestNonce {
                requester_id,
                reply,
            } => {
                self.queue.push_back(IssueRequest {
                    requester_id,
                    retry_count: 0,
                    reply: Reply::Nonce(reply),
                });
                if self.state.is_some() {
                    self.drain();
                } else {
                    self.start_initialization();
                }
            }
            Command::MarkPending {
                nonce,
                tx_hash,
                reply,
            } => {
                if let Some(state) = self.state.as_mut() {
                    if !state.mark_pending(nonce, tx_hash) {
                        log::debug!("Ignoring pending report for nonce {}", nonce);
                    }
                }
                let _ = reply.send(());
            }
            Command::MarkConfirmed { nonce, reply } => {
                if let Some(state) = self.state.as_mut() {
                    if !state.mark_confirmed(nonce) {
                        log::debug!("Ignoring confirmation for nonce {}", nonce);
                    }
                }
                let _ = reply.send(());
            }
            Command::MarkFailed {
                nonce,
                error_description,
                reply,
            } => self.handle_failure(nonce, &error_description, reply),
            Command::Reconcile { reply } => self.begin_sync(Some(reply)),
            Command::Sweep { reply } => {
                let evicted = match self.state.as_mut() {
                    Some(state) => state.sweep(Utc::now(), self.config.retention_window),
                    None => Vec::new(),
                };
                if !evicted.is_empty() {
                    log::info!("Evicted stale nonce reservations: {:?}", evicted);
                }
                let _ = reply.send(evicted.len());
            }
            Command::Status { reply } => {
                let queue_length = self.queue.len() + self.parked.len();
                let snapshot = match &self.state {
                    Some(state) => state.status(queue_length),
                    None => StatusSnapshot::uninitialized(queue_length),
                };
                let _ = reply.send(snapshot);
            }
            Command::Reset { reply } => self.reset(reply),
            Command::Reservation { nonce, reply } => {
                let reservation = self
                    .state
                    .as_ref()
                    .and_then(|state| state.reservation(nonce).cloned());
                let _ = reply.send(reservation);
            }
            Command::SmallestInFlight { reply } => {
                let smallest = self
                    .state
                    .as_ref()
                    .and_then(|state| state.smallest_in_flight());
                let _ = reply.send(smallest);
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Initialized { epoch, result } if epoch == self.epoch => {
                self.finish_initialization(result)
            }
            Completion::Synced { epoch, result } if epoch == self.epoch => {
                self.finish_sync(result)
            }
            _ => log::debug!("Dropping oracle result from before reset"),
        }
    }

    fn drain(&mut self) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let now = Utc::now();
        while let Some(request) = self.queue.pop_front() {
            let nonce = state.issue(request.requester_id, request.retry_count, now);
            request.reply.send_nonce(nonce);
        }
    }

    fn spawn_oracle_read(&self, on_done: fn(u64, Result<u64, OracleError>) -> Completion) {
        let oracle = self.oracle.clone();
        let address = self.address();
        let epoch = self.epoch;
        let completions_tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = oracle.pending_nonce_count(address).await;
            let _ = completions_tx.send(on_done(epoch, result));
        });
    }

    fn start_initialization(&mut self) {
        if self.initializing {
            return;
        }
        self.initializing = true;
        self.spawn_oracle_read(|epoch, result| Completion::Initialized { epoch, result });
    }

    fn finish_initialization(&mut self, result: Result<u64, OracleError>) {
        self.initializing = false;
        match result {
            Ok(chain_nonce) => {
                log::info!(
                    "Nonce manager for {} initialized at chain nonce {}",
                    self.address(),
                    chain_nonce
                );
                self.state = Some(ManagerState::new(chain_nonce));
                for waiter in self.reset_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.drain();
            }
            Err(e) => {
                log::error!("Failed to initialize nonce manager: {}", e);
                let message = e.to_string();
                for request in self.queue.drain(..) {
                    request
                        .reply
                        .send_error(NonceError::InitializationError(message.clone()));
                }
                for waiter in self.reset_waiters.drain(..) {
                    let _ = waiter.send(Err(NonceError::InitializationError(message.clone())));
                }
            }
        }
    }

    /// Start a reconciliation pass unless one is already running or there is nothing to
    /// reconcile yet. Overlapping requests are answered with `Skipped`.
    fn begin_sync(&mut self, waiter: Option<oneshot::Sender<ReconcileOutcome>>) {
        if self.state.is_none() || self.syncing {
            if let Some(waiter) = waiter {
                let _ = waiter.send(ReconcileOutcome::Skipped);
            }
            return;
        }
        self.syncing = true;
        self.sync_waiter = waiter;
        self.spawn_oracle_read(|epoch, result| Completion::Synced { epoch, result });
    }

    fn finish_sync(&mut self, result: Result<u64, OracleError>) {
        self.syncing = false;
        let outcome = match (result, self.state.as_mut()) {
            (Ok(chain_nonce), Some(state)) => {
                let settled = state.apply_chain_nonce(chain_nonce);
                if !settled.is_empty() {
                    log::info!(
                        "Ledger moved to nonce {}, settled in-flight nonces {:?}",
                        chain_nonce,
                        settled
                    );
                }
                ReconcileOutcome::Applied {
                    chain_nonce,
                    settled,
                }
            }
            (Ok(_), None) => ReconcileOutcome::Skipped,
            (Err(e), _) => {
                log::error!("Error in reconciling nonce with ledger: {}", e);
                ReconcileOutcome::Failed(e.to_string())
            }
        };
        if let Some(waiter) = self.sync_waiter.take() {
            let _ = waiter.send(outcome);
        }
        // Replacements go out even if the read failed: issuance never goes below what this
        // process has already handed out.
        self.queue.extend(self.parked.drain(..));
        self.drain();
    }

    fn handle_failure(
        &mut self,
        nonce: u64,
        error_description: &str,
        reply: oneshot::Sender<Result<Option<u64>, NonceError>>,
    ) {
        let kind = classify_failure(error_description);
        let max_retries = self.config.max_retries;
        let decision = match self.state.as_mut() {
            Some(state) => state.mark_failed(nonce, kind, max_retries),
            None => FailureDecision::Ignored,
        };
        match decision {
            FailureDecision::Reissue {
                requester_id,
                retry_count,
            } => {
                log::warn!(
                    "Nonce {} rejected ({}), reissuing for {} (retry {}/{})",
                    nonce,
                    error_description,
                    requester_id,
                    retry_count,
                    max_retries
                );
                self.begin_sync(None);
                self.parked.push(IssueRequest {
                    requester_id,
                    retry_count,
                    reply: Reply::Replacement(reply),
                });
            }
            FailureDecision::Exhausted { retry_count } => {
                log::error!(
                    "Nonce {} rejected ({}), giving up after {} retries",
                    nonce,
                    error_description,
                    retry_count - 1
                );
                self.begin_sync(None);
                let _ = reply.send(Ok(None));
            }
            FailureDecision::Abandon => {
                log::warn!(
                    "Nonce {} is occupied by another transaction ({}), abandoning it",
                    nonce,
                    error_description
                );
                let _ = reply.send(Ok(None));
            }
            FailureDecision::Terminal => {
                log::info!("Nonce {} failed: {}", nonce, error_description);
                let _ = reply.send(Ok(None));
            }
            FailureDecision::Ignored => {
                log::debug!("Ignoring failure report for nonce {}", nonce);
                let _ = reply.send(Ok(None));
            }
        }
    }

    fn reset(&mut self, reply: oneshot::Sender<Result<(), NonceError>>) {
        log::warn!("Resetting nonce manager for {}", self.address());
        self.epoch += 1;
        self.state = None;
        self.syncing = false;
        self.initializing = false;
        if let Some(waiter) = self.sync_waiter.take() {
            let _ = waiter.send(ReconcileOutcome::Skipped);
        }
        for request in self.parked.drain(..) {
            request.reply.send_error(NonceError::Reset);
        }
        self.reset_waiters.push(reply);
        self.start_initialization();
    }
}
