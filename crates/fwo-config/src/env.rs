use std::time::Duration;

use crate::error::ConfigError;

/// Where Action/Operation/Image/Snapshot state is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Etcd { host: String, port: u16 },
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub enabled: bool,
    pub keypath: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CaConfig {
    pub ca_uri: Option<String>,
    pub vault_pki_url: Option<String>,
    pub ca_pki_url: Option<String>,
    pub vault_jwt_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the inventory/state-component service this instance enumerates against.
    pub sms_server: String,
    pub storage: StorageBackend,
    pub vault: VaultConfig,
    /// Component roles the control loop will never schedule operations for.
    pub node_blacklist: Vec<String>,
    pub load_nexus_wait: Option<Duration>,
    pub ca: CaConfig,
    pub days_to_keep_actions: u64,
    pub log_level: String,
}

fn env_opt(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_required(key: &'static str) -> Result<String, ConfigError> {
    env_opt(key).ok_or(ConfigError::Missing(key))
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Conversion {
            key,
            message: format!("'{other}' is not a boolean"),
        }),
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|e| ConfigError::Conversion {
        key,
        message: e.to_string(),
    })
}

fn parse_u16(key: &'static str, raw: &str) -> Result<u16, ConfigError> {
    raw.parse::<u16>().map_err(|e| ConfigError::Conversion {
        key,
        message: e.to_string(),
    })
}

fn parse_csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_storage(raw: &str) -> Result<StorageBackend, ConfigError> {
    if raw.eq_ignore_ascii_case("memory") {
        return Ok(StorageBackend::Memory);
    }
    let host = env_required("ETCD_HOST")?;
    let port = match env_opt("ETCD_PORT") {
        Some(raw) => parse_u16("ETCD_PORT", &raw)?,
        None => 2379,
    };
    Ok(StorageBackend::Etcd { host, port })
}

impl Config {
    /// Reads the process environment into a validated configuration, one
    /// dedicated parse function per field.
    pub fn from_env() -> Result<Self, ConfigError> {
        let sms_server = env_required("SMS_SERVER")?;

        let storage = match env_opt("STORAGE") {
            Some(raw) => parse_storage(&raw)?,
            None => StorageBackend::Memory,
        };

        let vault_enabled = match env_opt("VAULT_ENABLED") {
            Some(raw) => parse_bool("VAULT_ENABLED", &raw)?,
            None => false,
        };
        let vault = VaultConfig {
            enabled: vault_enabled,
            keypath: env_opt("VAULT_KEYPATH"),
        };

        let node_blacklist = env_opt("NODE_BLACKLIST")
            .map(|raw| parse_csv_list(&raw))
            .unwrap_or_default();

        let load_nexus_wait = match env_opt("LOAD_NEXUS_WAIT_MIN") {
            Some(raw) => Some(Duration::from_secs(
                parse_u64("LOAD_NEXUS_WAIT_MIN", &raw)? * 60,
            )),
            None => None,
        };

        let ca = CaConfig {
            ca_uri: env_opt("FAS_CA_URI"),
            vault_pki_url: env_opt("FAS_VAULT_PKI_URL"),
            ca_pki_url: env_opt("FAS_CA_PKI_URL"),
            vault_jwt_file: env_opt("FAS_VAULT_JWT_FILE"),
        };

        let days_to_keep_actions = match env_opt("DAYS_TO_KEEP_ACTIONS") {
            Some(raw) => parse_u64("DAYS_TO_KEEP_ACTIONS", &raw)?,
            None => 365,
        };

        let log_level = env_opt("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Config {
            sms_server,
            storage,
            vault,
            node_blacklist,
            load_nexus_wait,
            ca,
            days_to_keep_actions,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear() {
        for key in [
            "SMS_SERVER",
            "STORAGE",
            "ETCD_HOST",
            "ETCD_PORT",
            "VAULT_ENABLED",
            "VAULT_KEYPATH",
            "NODE_BLACKLIST",
            "LOAD_NEXUS_WAIT_MIN",
            "FAS_CA_URI",
            "FAS_VAULT_PKI_URL",
            "FAS_CA_PKI_URL",
            "FAS_VAULT_JWT_FILE",
            "DAYS_TO_KEEP_ACTIONS",
            "LOG_LEVEL",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_sms_server_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SMS_SERVER")));
    }

    #[test]
    fn defaults_to_memory_storage() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var("SMS_SERVER", "http://sms.local");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.storage, StorageBackend::Memory);
        assert_eq!(cfg.days_to_keep_actions, 365);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn etcd_storage_requires_host() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var("SMS_SERVER", "http://sms.local");
        std::env::set_var("STORAGE", "etcd");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ETCD_HOST")));
    }

    #[test]
    fn etcd_storage_parses_host_and_port() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var("SMS_SERVER", "http://sms.local");
        std::env::set_var("STORAGE", "etcd");
        std::env::set_var("ETCD_HOST", "etcd.svc");
        std::env::set_var("ETCD_PORT", "2380");
        let cfg = Config::from_env().unwrap();
        assert_eq!(
            cfg.storage,
            StorageBackend::Etcd {
                host: "etcd.svc".to_string(),
                port: 2380,
            }
        );
    }

    #[test]
    fn node_blacklist_splits_on_comma() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var("SMS_SERVER", "http://sms.local");
        std::env::set_var("NODE_BLACKLIST", "Management, Management_Redundant");
        let cfg = Config::from_env().unwrap();
        assert_eq!(
            cfg.node_blacklist,
            vec!["Management".to_string(), "Management_Redundant".to_string()]
        );
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        std::env::set_var("SMS_SERVER", "http://sms.local");
        std::env::set_var("VAULT_ENABLED", "maybe");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Conversion { key: "VAULT_ENABLED", .. }));
    }
}
