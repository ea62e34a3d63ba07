use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use fleetsync_reconcile::DeactivationPolicy;

use crate::db::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub environment: String,
    pub dev_mode: bool,
    pub sync: SyncConfig,
    pub database: DbConfig,
}

/// Settings for the component sync endpoint.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on one reconciliation call. On expiry the call is dropped
    /// and its transaction rolled back.
    pub timeout: Duration,

    pub deactivation_policy: DeactivationPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            deactivation_policy: DeactivationPolicy::SkipInactive,
        }
    }
}

/// Variable source. The process environment in production, a map in tests.
trait Vars {
    fn get(&self, name: &str) -> Option<String>;

    /// Parse `name`, or `default` when unset. A set but unparsable value is
    /// an error.
    fn parsed<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(name) {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("invalid {name}: {v}")),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

struct ProcessEnv;

impl Vars for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::load(&ProcessEnv)
    }

    fn load(vars: &impl Vars) -> Result<Self> {
        let timeout_secs: u64 = vars.parsed("FLEETSYNC_SYNC_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            bail!("FLEETSYNC_SYNC_TIMEOUT_SECS must be at least 1");
        }

        let deactivation_policy = if vars.flag("FLEETSYNC_REISSUE_DEACTIVATIONS") {
            DeactivationPolicy::Always
        } else {
            DeactivationPolicy::SkipInactive
        };

        Ok(Self {
            timeout: Duration::from_secs(timeout_secs),
            deactivation_policy,
        })
    }
}

/// Pool settings from `DATABASE_URL`, `DB_MAX_CONNECTIONS` and
/// `DB_MIN_CONNECTIONS`.
fn load_database(vars: &impl Vars) -> Result<DbConfig> {
    let defaults = DbConfig::default();
    let max_connections = vars.parsed("DB_MAX_CONNECTIONS", defaults.max_connections)?;
    let min_connections = vars.parsed("DB_MIN_CONNECTIONS", defaults.min_connections)?;

    if max_connections == 0 {
        bail!("DB_MAX_CONNECTIONS must be at least 1");
    }
    if min_connections > max_connections {
        bail!("DB_MIN_CONNECTIONS ({min_connections}) exceeds DB_MAX_CONNECTIONS ({max_connections})");
    }

    Ok(DbConfig {
        database_url: vars.get("DATABASE_URL").unwrap_or(defaults.database_url),
        max_connections,
        min_connections,
        ..defaults
    })
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::load(&ProcessEnv)
    }

    fn load(vars: &impl Vars) -> Result<Self> {
        let listen_addr = vars.parsed(
            "FLEETSYNC_LISTEN_ADDR",
            SocketAddr::from(([127, 0, 0, 1], 3000)),
        )?;

        let log_level = vars
            .get("FLEETSYNC_LOG_LEVEL")
            .unwrap_or_else(|| "info".to_string());

        let environment = vars
            .get("FLEETSYNC_ENVIRONMENT")
            .unwrap_or_else(|| "development".to_string());

        Ok(Self {
            listen_addr,
            log_level,
            environment,
            dev_mode: vars.flag("FLEETSYNC_DEV"),
            sync: SyncConfig::load(vars)?,
            database: load_database(vars)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    impl Vars for HashMap<&'static str, &'static str> {
        fn get(&self, name: &str) -> Option<String> {
            HashMap::get(self, name).map(|v| v.to_string())
        }
    }

    fn vars(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::load(&vars(&[])).unwrap();
        assert_eq!(config.listen_addr.port(), 3000);
        assert_eq!(config.sync.timeout, Duration::from_secs(30));
        assert_eq!(config.sync.deactivation_policy, DeactivationPolicy::SkipInactive);
        assert_eq!(config.database.max_connections, 10);
        assert!(!config.dev_mode);
    }

    #[test]
    fn test_overrides() {
        let config = Config::load(&vars(&[
            ("FLEETSYNC_SYNC_TIMEOUT_SECS", "5"),
            ("FLEETSYNC_REISSUE_DEACTIVATIONS", "true"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("DB_MIN_CONNECTIONS", "2"),
            ("FLEETSYNC_DEV", "1"),
        ]))
        .unwrap();
        assert_eq!(config.sync.timeout, Duration::from_secs(5));
        assert_eq!(config.sync.deactivation_policy, DeactivationPolicy::Always);
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.database.min_connections, 2);
        assert!(config.dev_mode);
    }

    #[test]
    fn test_zero_sync_timeout_rejected() {
        let err = SyncConfig::load(&vars(&[("FLEETSYNC_SYNC_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(err.to_string().contains("FLEETSYNC_SYNC_TIMEOUT_SECS"));
    }

    #[test]
    fn test_unparsable_pool_size_rejected() {
        let err = Config::load(&vars(&[("DB_MAX_CONNECTIONS", "many")])).unwrap_err();
        assert!(err.to_string().contains("invalid DB_MAX_CONNECTIONS"));

        let err = Config::load(&vars(&[("DB_MIN_CONNECTIONS", "-1")])).unwrap_err();
        assert!(err.to_string().contains("invalid DB_MIN_CONNECTIONS"));
    }

    #[test]
    fn test_min_above_max_rejected() {
        let err = Config::load(&vars(&[
            ("DB_MAX_CONNECTIONS", "2"),
            ("DB_MIN_CONNECTIONS", "3"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
