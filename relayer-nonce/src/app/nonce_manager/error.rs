use alloy::transports::{RpcError, TransportErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("RPC error: {0}")]
    RPCError(#[from] RpcError<TransportErrorKind>),

    #[error("Parse error: {0}")]
    ParseError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("Oracle error: {0}")]
    OracleError(#[from] OracleError),

    #[error("Failed to initialize from the ledger: {0}")]
    InitializationError(String),

    #[error("Nonce manager was reset before the request completed")]
    Reset,

    #[error("Nonce manager stopped")]
    ManagerStopped,
}
