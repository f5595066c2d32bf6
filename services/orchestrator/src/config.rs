use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default port of the resource synchronizer.
pub const DEFAULT_RSYNC_PORT: u16 = 9031;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("{0} is required when the context store is sqlite")]
    Missing(&'static str),
}

/// Where contexts are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextStoreConfig {
    Memory,
    Sqlite(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rsync_host: String,
    pub rsync_port: u16,
    pub rpc_timeout: Duration,
    pub context_store: ContextStoreConfig,
    /// JSON catalog backing the metadata store.
    pub catalog_path: PathBuf,
    /// Namespace charts are rendered into.
    pub namespace: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let rsync_host = get("EMCO_RSYNC_HOST", "localhost");
        let rsync_port = parse("EMCO_RSYNC_PORT", lookup("EMCO_RSYNC_PORT"), DEFAULT_RSYNC_PORT)?;
        let rpc_timeout =
            Duration::from_secs(parse("EMCO_RPC_TIMEOUT_SECS", lookup("EMCO_RPC_TIMEOUT_SECS"), 10)?);

        let context_store = match get("EMCO_CONTEXT_STORE", "memory").to_lowercase().as_str() {
            "memory" => ContextStoreConfig::Memory,
            "sqlite" => ContextStoreConfig::Sqlite(
                lookup("EMCO_CONTEXT_DB_PATH")
                    .map(PathBuf::from)
                    .ok_or(ConfigError::Missing("EMCO_CONTEXT_DB_PATH"))?,
            ),
            other => {
                return Err(ConfigError::Invalid {
                    var: "EMCO_CONTEXT_STORE",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            rsync_host,
            rsync_port,
            rpc_timeout,
            context_store,
            catalog_path: PathBuf::from(get("EMCO_CATALOG", "catalog.json")),
            namespace: get("EMCO_NAMESPACE", "default"),
            log_level: get("EMCO_LOG_LEVEL", "info"),
        })
    }
}

fn parse<T: FromStr>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.rsync_host, "localhost");
        assert_eq!(c.rsync_port, DEFAULT_RSYNC_PORT);
        assert_eq!(c.rpc_timeout, Duration::from_secs(10));
        assert_eq!(c.context_store, ContextStoreConfig::Memory);
        assert_eq!(c.namespace, "default");
        assert_eq!(c.log_level, "info");
    }

    #[test]
    fn test_sqlite_needs_path() {
        assert!(matches!(
            config(&[("EMCO_CONTEXT_STORE", "sqlite")]),
            Err(ConfigError::Missing("EMCO_CONTEXT_DB_PATH"))
        ));

        let c = config(&[
            ("EMCO_CONTEXT_STORE", "SQLite"),
            ("EMCO_CONTEXT_DB_PATH", "/var/lib/emco/contexts.db"),
            ("EMCO_RPC_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        assert_eq!(
            c.context_store,
            ContextStoreConfig::Sqlite(PathBuf::from("/var/lib/emco/contexts.db"))
        );
        assert_eq!(c.rpc_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("EMCO_RSYNC_PORT", "http")]),
            Err(ConfigError::Invalid { var: "EMCO_RSYNC_PORT", .. })
        ));
        assert!(matches!(
            config(&[("EMCO_CONTEXT_STORE", "etcd")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
