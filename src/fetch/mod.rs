//! External sources of filter terms and the memoizing fetch around them.

pub mod http;
pub mod keystore;
pub mod pool;
pub mod sql;
pub mod terms;

pub use http::HttpSource;
pub use keystore::{KeyStoreCommand, KeyStoreCommandSource};
pub use pool::{ConnectionPoolRegistry, Credentials, SqlDriver, SqlPool};
pub use sql::SqlSource;
pub use terms::TermsFetch;

use crate::error::Result;
use crate::types::TermValue;

/// One configured backend. Fetching never retries; the first failure is
/// returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermsSource {
    Http(HttpSource),
    Sql(SqlSource),
    KeyStore(KeyStoreCommandSource),
}

impl TermsSource {
    pub async fn fetch(&self) -> Result<Vec<TermValue>> {
        match self {
            TermsSource::Http(source) => source.fetch().await,
            TermsSource::Sql(source) => source.fetch().await,
            TermsSource::KeyStore(source) => source.fetch().await,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TermsSource::Http(_) => "http",
            TermsSource::Sql(_) => "sql",
            TermsSource::KeyStore(_) => "keystore",
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            TermsSource::Http(source) => source.url(),
            TermsSource::Sql(source) => source.url(),
            TermsSource::KeyStore(source) => source.url(),
        }
    }
}

impl From<HttpSource> for TermsSource {
    fn from(source: HttpSource) -> Self {
        TermsSource::Http(source)
    }
}

impl From<SqlSource> for TermsSource {
    fn from(source: SqlSource) -> Self {
        TermsSource::Sql(source)
    }
}

impl From<KeyStoreCommandSource> for TermsSource {
    fn from(source: KeyStoreCommandSource) -> Self {
        TermsSource::KeyStore(source)
    }
}
