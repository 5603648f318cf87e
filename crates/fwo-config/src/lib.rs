mod env;
pub mod error;

pub use env::{CaConfig, Config, StorageBackend, VaultConfig};
pub use error::ConfigError;
