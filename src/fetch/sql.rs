use crate::error::{LookupError, Result};
use crate::fetch::pool::{ConnectionPoolRegistry, Credentials, SqlDriver, SqlPool};
use crate::types::TermValue;
use sqlx::any::AnyRow;
use sqlx::{Row, TypeInfo, ValueRef};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

/// Terms read from the first column of a parameterless SQL query.
#[derive(Debug, Clone)]
pub struct SqlSource {
    url: String,
    driver: String,
    credentials: Option<Credentials>,
    query: String,
    pool: Arc<SqlPool>,
}

impl SqlSource {
    /// Validates the driver and endpoint and registers (or reuses) the pool.
    /// No connection is opened until the first fetch.
    pub fn new(
        registry: &ConnectionPoolRegistry,
        url: &str,
        driver: &str,
        credentials: Option<Credentials>,
        query: &str,
    ) -> Result<Self> {
        if query.trim().is_empty() {
            return Err(LookupError::Config(
                "SQL lookup requires a non-empty [query]".to_string(),
            ));
        }
        let sql_driver: SqlDriver = driver.parse()?;
        if sql_driver.requires_credentials() && credentials.is_none() {
            return Err(LookupError::Config(format!(
                "SQL lookup with driver [{}] requires [username] and [password]",
                sql_driver
            )));
        }

        let pool = registry.get_or_create_pool(url, driver, credentials.as_ref())?;
        Ok(SqlSource {
            url: url.to_string(),
            driver: driver.to_string(),
            credentials,
            query: query.to_string(),
            pool,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn pool(&self) -> &Arc<SqlPool> {
        &self.pool
    }

    pub async fn fetch(&self) -> Result<Vec<TermValue>> {
        let start = Instant::now();

        // Returned to the pool when dropped, on success and on every error path.
        let mut conn = self.pool.inner().acquire().await.map_err(|e| {
            LookupError::Transport(format!(
                "cannot get a connection for [{}]: {}",
                self.pool.key(),
                e
            ))
        })?;

        let rows = sqlx::query(&self.query)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| classify(e, &self.query))?;
        drop(conn);

        let mut terms = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(term) = first_column(row)? {
                terms.push(term);
            }
        }

        tracing::debug!(
            "[SQL] fetched {} terms ({} rows) from {} in {:?}",
            terms.len(),
            rows.len(),
            self.pool.driver(),
            start.elapsed()
        );
        Ok(terms)
    }
}

impl PartialEq for SqlSource {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.driver == other.driver
            && self.credentials == other.credentials
            && self.query == other.query
    }
}

impl Eq for SqlSource {}

impl Hash for SqlSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.driver.hash(state);
        self.credentials.hash(state);
        self.query.hash(state);
    }
}

fn classify(e: sqlx::Error, query: &str) -> LookupError {
    match e {
        sqlx::Error::Database(db) => {
            LookupError::Query(format!("query [{}] was rejected: {}", query, db))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            LookupError::Format(format!("cannot decode result of [{}]: {}", query, e))
        }
        other => LookupError::Transport(format!("error running [{}]: {}", query, other)),
    }
}

/// Decode column 0 as the first type that fits. NULL yields `None`.
fn first_column(row: &AnyRow) -> Result<Option<TermValue>> {
    if row.columns().is_empty() {
        return Err(LookupError::Format(
            "query returned rows without columns".to_string(),
        ));
    }

    let raw = row
        .try_get_raw(0)
        .map_err(|e| LookupError::Format(e.to_string()))?;
    if raw.is_null() {
        return Ok(None);
    }
    let type_name = raw.type_info().name().to_string();

    if let Ok(v) = row.try_get::<i64, _>(0) {
        return Ok(Some(TermValue::Integer(v)));
    }
    if let Ok(v) = row.try_get::<f64, _>(0) {
        return Ok(Some(TermValue::Float(v)));
    }
    if let Ok(v) = row.try_get::<String, _>(0) {
        return Ok(Some(TermValue::Text(v)));
    }
    if let Ok(v) = row.try_get::<bool, _>(0) {
        return Ok(Some(TermValue::Bool(v)));
    }

    Err(LookupError::Format(format!(
        "column type [{}] cannot be used as a term",
        type_name
    )))
}
