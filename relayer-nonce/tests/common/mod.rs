use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use alloy::{primitives::Address, transports::TransportErrorKind};
use relayer_nonce::app::{
    nonce_manager::{config::NonceManagerConfig, error::OracleError, InMemoryNonceManager},
    oracle::LedgerOracle,
};

pub const RELAYER: Address = Address::repeat_byte(0x5e);

/// Ledger double with a settable pending count, a read counter, optional latency and failure
/// injection.
pub struct TestOracle {
    value: AtomicU64,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
}

impl TestOracle {
    pub fn new(value: u64) -> Arc<Self> {
        Self::with_delay(value, Duration::ZERO)
    }

    pub fn with_delay(value: u64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            value: AtomicU64::new(value),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LedgerOracle for TestOracle {
    async fn pending_nonce_count(&self, address: Address) -> Result<u64, OracleError> {
        assert_eq!(address, RELAYER);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(OracleError::RPCError(TransportErrorKind::custom_str(
                "connection refused",
            )));
        }
        Ok(self.value.load(Ordering::SeqCst))
    }
}

pub fn setup() {
    let _ = server_common::logger::init_logger();
}

pub fn config() -> NonceManagerConfig {
    NonceManagerConfig::new(RELAYER)
}

pub fn manager(oracle: &Arc<TestOracle>) -> InMemoryNonceManager {
    manager_with_config(oracle, config())
}

pub fn manager_with_config(
    oracle: &Arc<TestOracle>,
    config: NonceManagerConfig,
) -> InMemoryNonceManager {
    setup();
    InMemoryNonceManager::new(config, oracle.clone())
}
