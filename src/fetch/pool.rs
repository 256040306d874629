//! Process-lifetime registry of SQL connection pools.
//!
//! One pool exists per (endpoint, driver) pair. Pools are created lazily on
//! first demand and never evicted; the set of distinct database sources a
//! deployment queries is expected to stay small.

use crate::config::LookupConfig;
use crate::error::{LookupError, Result};
use dashmap::DashMap;
use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use sqlx::{AnyPool, ConnectOptions};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

/// Database drivers a SQL lookup may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDriver {
    Postgres,
    Sqlite,
}

impl SqlDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDriver::Postgres => "postgres",
            SqlDriver::Sqlite => "sqlite",
        }
    }

    fn accepts_scheme(&self, scheme: &str) -> bool {
        match self {
            SqlDriver::Postgres => matches!(scheme, "postgres" | "postgresql"),
            SqlDriver::Sqlite => scheme == "sqlite",
        }
    }

    /// Whether connecting requires a username and password.
    pub fn requires_credentials(&self) -> bool {
        !matches!(self, SqlDriver::Sqlite)
    }
}

impl FromStr for SqlDriver {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(SqlDriver::Postgres),
            "sqlite" => Ok(SqlDriver::Sqlite),
            other => Err(LookupError::Config(format!(
                "SQL driver [{}] is not supported (expected postgres or sqlite)",
                other
            ))),
        }
    }
}

impl fmt::Display for SqlDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// A pooled connection factory for one (endpoint, driver) pair.
pub struct SqlPool {
    key: String,
    driver: SqlDriver,
    pool: AnyPool,
}

impl SqlPool {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn driver(&self) -> SqlDriver {
        self.driver
    }

    pub fn max_connections(&self) -> u32 {
        self.pool.options().get_max_connections()
    }

    pub(crate) fn inner(&self) -> &AnyPool {
        &self.pool
    }
}

impl fmt::Debug for SqlPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlPool")
            .field("key", &self.key)
            .field("driver", &self.driver)
            .field("max_connections", &self.max_connections())
            .finish()
    }
}

/// Shared registry of SQL pools, injected into every SQL source.
///
/// Lookups for existing pools go through the `DashMap` without taking the
/// creation lock. Only a miss takes `create_lock`, and the map is checked
/// again under it, so concurrent first requests for the same key build a
/// single pool.
///
/// Must be used from within a Tokio runtime: pools spawn their own
/// maintenance tasks.
pub struct ConnectionPoolRegistry {
    pools: DashMap<String, Arc<SqlPool>>,
    create_lock: Mutex<()>,
    created: AtomicUsize,
    config: LookupConfig,
}

impl ConnectionPoolRegistry {
    pub fn new(config: LookupConfig) -> Self {
        sqlx::any::install_default_drivers();
        ConnectionPoolRegistry {
            pools: DashMap::new(),
            create_lock: Mutex::new(()),
            created: AtomicUsize::new(0),
            config,
        }
    }

    /// Case-insensitive identity of a pool. Credentials are not part of it:
    /// the first caller's credentials open the pool for everyone.
    pub fn pool_key(endpoint: &str, driver: &str) -> String {
        format!("{}{}", endpoint.to_lowercase(), driver.to_lowercase())
    }

    pub fn get_or_create_pool(
        &self,
        endpoint: &str,
        driver: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<SqlPool>> {
        let sql_driver: SqlDriver = driver.parse()?;
        let key = Self::pool_key(endpoint, driver);

        if let Some(pool) = self.pools.get(&key) {
            return Ok(Arc::clone(&pool));
        }

        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(pool) = self.pools.get(&key) {
            return Ok(Arc::clone(&pool));
        }

        let url = connection_url(endpoint, sql_driver, credentials)?;
        let options = AnyConnectOptions::from_url(&url).map_err(|e| {
            LookupError::Config(format!(
                "invalid SQL endpoint [{}]: {}",
                mask_url(&url),
                e
            ))
        })?;
        let pool = AnyPoolOptions::new()
            .max_connections(self.config.pool_max_connections)
            .acquire_timeout(self.config.pool_acquire_timeout())
            .connect_lazy_with(options);

        let pool = Arc::new(SqlPool {
            key: key.clone(),
            driver: sql_driver,
            pool,
        });
        self.pools.insert(key, Arc::clone(&pool));
        self.created.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            "[POOL] created {} pool for {} (max {} connections)",
            sql_driver,
            mask_url(&url),
            self.config.pool_max_connections
        );
        Ok(pool)
    }

    /// Number of pools this registry has ever built.
    pub fn pools_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }
}

impl Default for ConnectionPoolRegistry {
    fn default() -> Self {
        Self::new(LookupConfig::default())
    }
}

fn connection_url(
    endpoint: &str,
    driver: SqlDriver,
    credentials: Option<&Credentials>,
) -> Result<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| {
        LookupError::Config(format!("invalid SQL endpoint [{}]: {}", endpoint, e))
    })?;

    if !driver.accepts_scheme(url.scheme()) {
        return Err(LookupError::Config(format!(
            "SQL endpoint scheme [{}] does not match driver [{}]",
            url.scheme(),
            driver
        )));
    }

    if let (Some(credentials), true) = (credentials, driver.requires_credentials()) {
        url.set_username(&credentials.username).map_err(|_| {
            LookupError::Config(format!("cannot set username on endpoint [{}]", endpoint))
        })?;
        url.set_password(Some(&credentials.password)).map_err(|_| {
            LookupError::Config(format!("cannot set password on endpoint [{}]", endpoint))
        })?;
    }

    Ok(url)
}

/// Hide the password before an endpoint reaches a log line.
pub(crate) fn mask_url(url: &Url) -> String {
    let mut masked = url.clone();
    if masked.password().is_some() {
        let _ = masked.set_password(Some("****"));
    }
    masked.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_parsing_is_case_insensitive() {
        assert_eq!("Postgres".parse::<SqlDriver>().unwrap(), SqlDriver::Postgres);
        assert_eq!("POSTGRESQL".parse::<SqlDriver>().unwrap(), SqlDriver::Postgres);
        assert_eq!(" sqlite ".parse::<SqlDriver>().unwrap(), SqlDriver::Sqlite);
    }

    #[test]
    fn test_unknown_driver_is_config_error() {
        let err = "org.h2.Driver".parse::<SqlDriver>().unwrap_err();
        assert!(matches!(err, LookupError::Config(_)));
    }

    #[test]
    fn test_pool_key_normalizes_case() {
        assert_eq!(
            ConnectionPoolRegistry::pool_key("postgres://DB.local/Terms", "Postgres"),
            "postgres://db.local/termspostgres"
        );
    }

    #[test]
    fn test_connection_url_injects_credentials() {
        let creds = Credentials::new("reader", "s3cret");
        let url = connection_url(
            "postgres://db.local:5432/terms",
            SqlDriver::Postgres,
            Some(&creds),
        )
        .unwrap();
        assert_eq!(url.username(), "reader");
        assert_eq!(url.password(), Some("s3cret"));
        assert!(!mask_url(&url).contains("s3cret"));
    }

    #[test]
    fn test_connection_url_rejects_scheme_mismatch() {
        let err = connection_url("mysql://db.local/terms", SqlDriver::Postgres, None).unwrap_err();
        assert!(matches!(err, LookupError::Config(_)));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("reader", "s3cret");
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }

    #[tokio::test]
    async fn test_same_key_reuses_pool() {
        let registry = ConnectionPoolRegistry::default();
        let a = registry
            .get_or_create_pool("sqlite::memory:", "sqlite", None)
            .unwrap();
        let b = registry
            .get_or_create_pool("SQLITE::MEMORY:", "SQLite", None)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.pools_created(), 1);
        assert_eq!(a.max_connections(), 20);
    }

    #[tokio::test]
    async fn test_bad_driver_creates_nothing() {
        let registry = ConnectionPoolRegistry::default();
        assert!(registry
            .get_or_create_pool("sqlite::memory:", "oracle", None)
            .is_err());
        assert!(registry.is_empty());
        assert_eq!(registry.pools_created(), 0);
    }
}
