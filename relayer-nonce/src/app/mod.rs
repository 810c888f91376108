pub mod jobs;
pub mod nonce_manager;
pub mod oracle;
