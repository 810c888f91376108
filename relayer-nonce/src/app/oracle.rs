use std::num::NonZeroUsize;

use alloy::{
    primitives::Address,
    providers::{
        fillers::FillProvider, utils::JoinedRecommendedFillers, Provider, ProviderBuilder,
        RootProvider,
    },
    rpc::client::RpcClient,
    transports::{
        http::Http,
        layers::{FallbackLayer, RetryBackoffLayer},
    },
};
use reqwest::Url;
use tower::ServiceBuilder;

use super::nonce_manager::error::OracleError;

pub type NormalProvider = FillProvider<JoinedRecommendedFillers, RootProvider>;

/// Read-only view of the ledger's account sequence.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LedgerOracle: Send + Sync {
    /// The next nonce the ledger would accept for `address`, counting transactions it has seen
    /// but not yet finalized.
    async fn pending_nonce_count(&self, address: Address) -> Result<u64, OracleError>;
}

pub fn get_provider(rpc_urls: &[String]) -> Result<NormalProvider, OracleError> {
    let retry_layer = RetryBackoffLayer::new(5, 1000, 100);
    let transports = rpc_urls
        .iter()
        .map(|url| {
            let url: Url = url.parse().map_err(|e| {
                OracleError::ParseError(format!("Failed to parse URL {}: {}", url, e))
            })?;
            Ok(Http::new(url))
        })
        .collect::<Result<Vec<_>, OracleError>>()?;
    let active_transport_count = NonZeroUsize::new(transports.len())
        .ok_or_else(|| OracleError::ParseError("No RPC URL configured".to_string()))?;
    let fallback_layer =
        FallbackLayer::default().with_active_transport_count(active_transport_count);
    let transport = ServiceBuilder::new()
        .layer(fallback_layer)
        .service(transports);
    let client = RpcClient::builder()
        .layer(retry_layer)
        .transport(transport, false);
    let provider = ProviderBuilder::new().connect_client(client);
    Ok(provider)
}

/// `eth_getTransactionCount(address, "pending")` through an alloy provider.
#[derive(Debug, Clone)]
pub struct ProviderOracle<P = NormalProvider> {
    provider: P,
}

impl ProviderOracle {
    pub fn from_rpc_urls(rpc_urls: &[String]) -> Result<Self, OracleError> {
        Ok(Self::new(get_provider(rpc_urls)?))
    }
}

impl<P> ProviderOracle<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl<P: Provider> LedgerOracle for ProviderOracle<P> {
    async fn pending_nonce_count(&self, address: Address) -> Result<u64, OracleError> {
        let count = self
            .provider
            .get_transaction_count(address)
            .pending()
            .await?;
        Ok(count)
    }
}
