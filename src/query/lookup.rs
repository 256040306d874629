//! Binding a terms-lookup request to a source, and the service that turns
//! requests into cached membership filters.
//!
//! A request names one field and describes where its values live:
//!
//! ```json
//! {
//!   "user_id": { "url": "http://acl.local/allowed", "path": "data.ids", "timeout": 500 },
//!   "_name": "acl",
//!   "_cache": true,
//!   "_cache_key": "acl-users"
//! }
//! ```
//!
//! The backend is picked from the keys present: `query` selects SQL (with
//! `driver`, `username`, `password`), `command` selects the key store (with
//! `args`), anything else is HTTP (with optional `path` and `timeout`).
//!
//! A request serializes back to the same shape, so it can be built in code
//! and shipped as JSON:
//!
//! ```rust
//! use flapjack_lookup::{LookupTarget, TermsLookupRequest};
//!
//! let request = TermsLookupRequest::new(
//!     "user_id",
//!     LookupTarget::http("http://acl.local/allowed").with_path("data.ids"),
//! )
//! .with_name("acl");
//! let json = request.to_json().unwrap();
//! assert_eq!(TermsLookupRequest::from_json(&json).unwrap(), request);
//! ```

use crate::config::LookupConfig;
use crate::error::{LookupError, Result};
use crate::fetch::{
    ConnectionPoolRegistry, Credentials, HttpSource, KeyStoreCommandSource, SqlSource,
    TermsFetch, TermsSource,
};
use crate::index::schema::FieldResolver;
use crate::query::cache::FilterCache;
use crate::query::membership::{MembershipFilter, MembershipFilterBuilder};
use crate::types::CacheKey;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Where a lookup's values come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// HTTP timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_strings",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub args: Vec<String>,
}

impl LookupTarget {
    pub fn http(url: impl Into<String>) -> Self {
        LookupTarget {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn sql(url: impl Into<String>, driver: impl Into<String>, query: impl Into<String>) -> Self {
        LookupTarget {
            url: Some(url.into()),
            driver: Some(driver.into()),
            query: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn command<I, S>(url: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LookupTarget {
            url: Some(url.into()),
            command: Some(command.into()),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

fn scalar_strings<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<Value>::deserialize(deserializer)?
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(D::Error::custom(format!(
                "args must be strings or numbers, got {}",
                other
            ))),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermsLookupRequest {
    pub field: String,
    pub lookup: LookupTarget,
    /// Name under which the caller may register the filter.
    pub name: Option<String>,
    /// Whether the built filter goes through the [`FilterCache`].
    pub cache: bool,
    pub cache_key: Option<CacheKey>,
}

impl TermsLookupRequest {
    pub fn new(field: impl Into<String>, lookup: LookupTarget) -> Self {
        TermsLookupRequest {
            field: field.into(),
            lookup,
            name: None,
            cache: true,
            cache_key: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<CacheKey>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// The JSON form accepted by [`from_json`](Self::from_json). `_cache` is
    /// written only when caching is off.
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            LookupError::InvalidQuery("[terms_lookup] filter must be a JSON object".to_string())
        })?;

        let mut field: Option<(String, LookupTarget)> = None;
        let mut name = None;
        let mut cache = true;
        let mut cache_key = None;

        for (key, val) in obj {
            match (key.as_str(), val) {
                (_, Value::Object(_)) if !key.starts_with('_') => {
                    if field.is_some() {
                        return Err(LookupError::InvalidQuery(
                            "[terms_lookup] filter supports a single field".to_string(),
                        ));
                    }
                    let target: LookupTarget = serde_json::from_value(val.clone()).map_err(|e| {
                        LookupError::InvalidQuery(format!(
                            "[terms_lookup] invalid lookup for field [{}]: {}",
                            key, e
                        ))
                    })?;
                    field = Some((key.clone(), target));
                }
                ("_name", Value::String(s)) => name = Some(s.clone()),
                ("_cache", Value::Bool(b)) => cache = *b,
                ("_cache_key" | "_cacheKey", Value::String(s)) => {
                    cache_key = Some(CacheKey::new(s.as_str()))
                }
                _ => {
                    return Err(LookupError::InvalidQuery(format!(
                        "[terms_lookup] filter does not support [{}]",
                        key
                    )))
                }
            }
        }

        let Some((field, lookup)) = field else {
            return Err(LookupError::InvalidQuery(
                "[terms_lookup] filter requires a field name and the definition of where the terms should be fetched from"
                    .to_string(),
            ));
        };
        if lookup.url.is_none() {
            return Err(LookupError::InvalidQuery(
                "[terms_lookup] filter requires specifying an [url]".to_string(),
            ));
        }

        Ok(TermsLookupRequest {
            field,
            lookup,
            name,
            cache,
            cache_key,
        })
    }

    /// Construct the source this request describes. Every misconfiguration
    /// is reported here, before any connection is attempted.
    pub fn bind(
        &self,
        registry: &ConnectionPoolRegistry,
        config: &LookupConfig,
    ) -> Result<TermsFetch> {
        let lookup = &self.lookup;
        let url = lookup.url.as_deref().ok_or_else(|| {
            LookupError::InvalidQuery("[terms_lookup] filter requires specifying an [url]".to_string())
        })?;

        let source: TermsSource = match (&lookup.query, &lookup.command) {
            (Some(_), Some(_)) => {
                return Err(LookupError::Config(
                    "a lookup takes either a SQL [query] or a [command], not both".to_string(),
                ))
            }
            (Some(query), None) => {
                let driver = lookup.driver.as_deref().ok_or_else(|| {
                    LookupError::Config("SQL lookup requires a [driver]".to_string())
                })?;
                let credentials = match (&lookup.username, &lookup.password) {
                    (Some(user), Some(pass)) => Some(Credentials::new(user, pass)),
                    (None, None) => None,
                    _ => {
                        return Err(LookupError::Config(
                            "SQL lookup requires both [username] and [password]".to_string(),
                        ))
                    }
                };
                SqlSource::new(registry, url, driver, credentials, query)?.into()
            }
            (None, Some(command)) => {
                KeyStoreCommandSource::new(url, command, lookup.args.clone())?.into()
            }
            (None, None) => {
                let timeout = lookup
                    .timeout
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| config.http_timeout());
                HttpSource::new(url, lookup.path.as_deref(), timeout)?.into()
            }
        };

        Ok(TermsFetch::new(source, &self.field, self.cache_key.clone()))
    }
}

impl Serialize for TermsLookupRequest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(&self.field, &self.lookup)?;
        if let Some(name) = &self.name {
            map.serialize_entry("_name", name)?;
        }
        if !self.cache {
            map.serialize_entry("_cache", &false)?;
        }
        if let Some(key) = &self.cache_key {
            map.serialize_entry("_cache_key", key.as_str())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TermsLookupRequest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        TermsLookupRequest::from_json(&value).map_err(D::Error::custom)
    }
}

/// A built filter together with the request's `_name`, for callers that
/// register named filters.
#[derive(Debug, Clone)]
pub struct NamedFilter {
    pub name: Option<String>,
    pub filter: Arc<MembershipFilter>,
}

/// Turns lookup requests into membership filters, sharing one pool registry
/// and one filter cache across all of them.
pub struct TermsLookup {
    registry: Arc<ConnectionPoolRegistry>,
    cache: FilterCache,
    config: LookupConfig,
}

impl TermsLookup {
    pub fn new(config: LookupConfig) -> Self {
        TermsLookup {
            registry: Arc::new(ConnectionPoolRegistry::new(config.clone())),
            cache: FilterCache::from_config(&config),
            config,
        }
    }

    pub fn with_registry(registry: Arc<ConnectionPoolRegistry>) -> Self {
        let config = registry.config().clone();
        TermsLookup {
            registry,
            cache: FilterCache::from_config(&config),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionPoolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &FilterCache {
        &self.cache
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }

    /// [`filter`](Self::filter), keeping the request's `_name` with the
    /// result.
    pub async fn named_filter<R>(
        &self,
        request: &TermsLookupRequest,
        resolver: &R,
    ) -> Result<NamedFilter>
    where
        R: FieldResolver + ?Sized,
    {
        let filter = self.filter(request, resolver).await?;
        if let Some(name) = &request.name {
            tracing::debug!(
                "[LOOKUP] named filter '{}' on field '{}' ({} terms)",
                name,
                request.field,
                filter.len()
            );
        }
        Ok(NamedFilter {
            name: request.name.clone(),
            filter,
        })
    }

    /// Build (or reuse) the filter for `request`.
    ///
    /// A field the resolver does not know matches nothing, and the request is
    /// not even bound, so no pool or client is created for it. Cached
    /// requests first compute their key (an explicit key needs no fetch) and
    /// reuse a filter already built for the same resolved field and key. The
    /// resolved field includes its tantivy id and type, so one service can
    /// serve indexes with different layouts.
    pub async fn filter<R>(
        &self,
        request: &TermsLookupRequest,
        resolver: &R,
    ) -> Result<Arc<MembershipFilter>>
    where
        R: FieldResolver + ?Sized,
    {
        let Some(schema) = resolver.resolve_field(&request.field) else {
            tracing::debug!(
                "[LOOKUP] field '{}' has no mapping, skipping lookup",
                request.field
            );
            return Ok(MembershipFilter::match_nothing());
        };

        let fetch = Arc::new(request.bind(&self.registry, &self.config)?);
        let builder = MembershipFilterBuilder::new(Arc::clone(&fetch));

        if !request.cache {
            return builder.build(resolver).await;
        }

        let key = fetch.cache_key().await?;
        if let Some(filter) = self.cache.get(&schema, &key) {
            tracing::debug!(
                "[LOOKUP] filter cache hit for field '{}' (key {} bytes)",
                request.field,
                key.as_str().len()
            );
            return Ok(filter);
        }

        let filter = builder.build(resolver).await?;
        tracing::debug!(
            "[LOOKUP] filter cache miss for field '{}', built {} terms",
            request.field,
            filter.len()
        );
        Ok(self.cache.insert(&schema, key, filter))
    }
}

impl Default for TermsLookup {
    fn default() -> Self {
        Self::new(LookupConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_http_lookup() {
        let req = TermsLookupRequest::from_json(&json!({
            "user_id": {"url": "http://acl.local/allowed", "path": "data.ids", "timeout": 500},
            "_name": "acl",
            "_cache_key": "acl-users"
        }))
        .unwrap();
        assert_eq!(req.field, "user_id");
        assert_eq!(req.lookup.path.as_deref(), Some("data.ids"));
        assert_eq!(req.lookup.timeout, Some(500));
        assert_eq!(req.name.as_deref(), Some("acl"));
        assert_eq!(req.cache_key, Some(CacheKey::new("acl-users")));
        assert!(req.cache);
    }

    #[test]
    fn test_parse_camel_case_cache_key_and_numeric_args() {
        let req = TermsLookupRequest::from_json(&json!({
            "user_id": {"url": "redis://127.0.0.1:6379", "command": "zrangebyscore", "args": ["scores", 0, 100]},
            "_cacheKey": "top",
            "_cache": false
        }))
        .unwrap();
        assert_eq!(req.lookup.args, vec!["scores", "0", "100"]);
        assert_eq!(req.cache_key, Some(CacheKey::new("top")));
        assert!(!req.cache);
    }

    #[test]
    fn test_unknown_lookup_key_rejected() {
        let err = TermsLookupRequest::from_json(&json!({
            "user_id": {"url": "http://acl.local", "method": "POST"}
        }))
        .unwrap_err();
        assert!(matches!(err, LookupError::InvalidQuery(_)));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let err = TermsLookupRequest::from_json(&json!({
            "user_id": {"url": "http://acl.local"},
            "boost": 2
        }))
        .unwrap_err();
        assert!(matches!(err, LookupError::InvalidQuery(ref m) if m.contains("boost")));
    }

    #[test]
    fn test_missing_field_or_url_rejected() {
        let err = TermsLookupRequest::from_json(&json!({"_name": "x"})).unwrap_err();
        assert!(matches!(err, LookupError::InvalidQuery(ref m) if m.contains("field name")));

        let err = TermsLookupRequest::from_json(&json!({"user_id": {"path": "ids"}})).unwrap_err();
        assert!(matches!(err, LookupError::InvalidQuery(ref m) if m.contains("[url]")));
    }

    #[test]
    fn test_two_fields_rejected() {
        let err = TermsLookupRequest::from_json(&json!({
            "a": {"url": "http://x.local"},
            "b": {"url": "http://y.local"}
        }))
        .unwrap_err();
        assert!(matches!(err, LookupError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_bind_picks_backend() {
        let registry = ConnectionPoolRegistry::default();
        let config = LookupConfig::default();

        let http = TermsLookupRequest::from_json(&json!({"f": {"url": "http://acl.local"}}))
            .unwrap()
            .bind(&registry, &config)
            .unwrap();
        match http.source() {
            TermsSource::Http(source) => {
                assert_eq!(source.timeout(), Duration::from_millis(300))
            }
            other => panic!("expected http source, got {:?}", other),
        }

        let sql = TermsLookupRequest::from_json(&json!({
            "f": {"url": "sqlite::memory:", "driver": "sqlite", "query": "SELECT 1"}
        }))
        .unwrap()
        .bind(&registry, &config)
        .unwrap();
        assert_eq!(sql.source().kind(), "sql");

        let keystore = TermsLookupRequest::from_json(&json!({
            "f": {"url": "redis://127.0.0.1:6379", "command": "SMEMBERS", "args": ["vip"]}
        }))
        .unwrap()
        .bind(&registry, &config)
        .unwrap();
        assert_eq!(keystore.source().kind(), "keystore");
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_combinations() {
        let registry = ConnectionPoolRegistry::default();
        let config = LookupConfig::default();

        let both = TermsLookupRequest::from_json(&json!({
            "f": {"url": "sqlite::memory:", "driver": "sqlite", "query": "SELECT 1", "command": "lrange", "args": ["k"]}
        }))
        .unwrap();
        assert!(matches!(
            both.bind(&registry, &config),
            Err(LookupError::Config(_))
        ));

        let no_driver = TermsLookupRequest::from_json(&json!({
            "f": {"url": "sqlite::memory:", "query": "SELECT 1"}
        }))
        .unwrap();
        assert!(matches!(
            no_driver.bind(&registry, &config),
            Err(LookupError::Config(_))
        ));

        let half_credentials = TermsLookupRequest::from_json(&json!({
            "f": {"url": "postgres://db.local/terms", "driver": "postgres", "query": "SELECT 1", "username": "reader"}
        }))
        .unwrap();
        assert!(matches!(
            half_credentials.bind(&registry, &config),
            Err(LookupError::Config(_))
        ));

        let shutdown = TermsLookupRequest::from_json(&json!({
            "f": {"url": "redis://127.0.0.1:6379", "command": "shutdown", "args": ["now"]}
        }))
        .unwrap();
        assert!(matches!(
            shutdown.bind(&registry, &config),
            Err(LookupError::Config(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let requests = [
            json!({
                "user_id": {"url": "http://acl.local/allowed", "path": "data.ids", "timeout": 500},
                "_name": "acl",
                "_cache_key": "acl-users"
            }),
            json!({
                "user_id": {
                    "url": "postgres://db.local/terms",
                    "driver": "postgres",
                    "username": "reader",
                    "password": "secret",
                    "query": "SELECT id FROM allowed"
                },
                "_cache": false
            }),
            json!({
                "sku": {"url": "redis://127.0.0.1:6379", "command": "ZRANGEBYSCORE", "args": ["scores", "0", "100"]}
            }),
        ];
        for value in requests {
            let request = TermsLookupRequest::from_json(&value).unwrap();
            assert_eq!(request.to_json().unwrap(), value);
            assert_eq!(TermsLookupRequest::from_json(&request.to_json().unwrap()).unwrap(), request);
        }
    }

    #[test]
    fn test_built_request_serializes_like_parsed_one() {
        let built = TermsLookupRequest::new(
            "user_id",
            LookupTarget::sql("sqlite::memory:", "sqlite", "SELECT 1"),
        )
        .with_cache(false)
        .with_cache_key("k");
        assert_eq!(
            built.to_json().unwrap(),
            json!({
                "user_id": {"url": "sqlite::memory:", "query": "SELECT 1", "driver": "sqlite"},
                "_cache": false,
                "_cache_key": "k"
            })
        );

        let command = TermsLookupRequest::new(
            "sku",
            LookupTarget::command("redis://127.0.0.1:6379", "smembers", ["featured"]),
        );
        let parsed: TermsLookupRequest = serde_json::from_value(command.to_json().unwrap()).unwrap();
        assert_eq!(parsed, command);
    }

    #[test]
    fn test_serde_deserialize_rejects_what_from_json_rejects() {
        let err = serde_json::from_value::<TermsLookupRequest>(json!({"user_id": {"path": "x"}}))
            .unwrap_err();
        assert!(err.to_string().contains("[url]"));
    }
}
