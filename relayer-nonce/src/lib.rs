use alloy::primitives::Address;
use serde::Deserialize;

pub mod app;

#[derive(Debug, Clone, Deserialize)]
pub struct EnvVar {
    /// Comma-separated list of RPC endpoints, tried in fallback order.
    pub l2_rpc_url: String,
    pub relayer_address: Address,

    pub nonce_reconcile_interval: Option<u64>,
    pub nonce_retention_window: Option<u64>,
    pub nonce_max_retries: Option<u32>,
}

impl EnvVar {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn rpc_urls(&self) -> Vec<String> {
        self.l2_rpc_url
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> Result<EnvVar, envy::Error> {
        envy::from_iter(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        )
    }

    #[test]
    fn test_env_var_parsing() {
        let env = env_from(&[
            ("L2_RPC_URL", "http://127.0.0.1:8545, http://127.0.0.1:8546,"),
            (
                "RELAYER_ADDRESS",
                "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266",
            ),
            ("NONCE_RETENTION_WINDOW", "120"),
        ])
        .unwrap();

        assert_eq!(
            env.rpc_urls(),
            vec![
                "http://127.0.0.1:8545".to_string(),
                "http://127.0.0.1:8546".to_string()
            ]
        );
        assert_eq!(env.nonce_retention_window, Some(120));
        assert_eq!(env.nonce_reconcile_interval, None);
        assert_eq!(env.nonce_max_retries, None);
    }

    #[test]
    fn test_env_var_requires_relayer_address() {
        let result = env_from(&[("L2_RPC_URL", "http://127.0.0.1:8545")]);
        assert!(result.is_err());
    }
}
