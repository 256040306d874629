//! # Flapjack Lookup
//!
//! Filters whose accepted values live outside the index. A terms lookup names
//! a field and an external source (an HTTP endpoint returning JSON, a SQL
//! query, or a key-store command); the values are fetched once, turned into
//! index terms, and compiled into a [Tantivy](https://github.com/quickwit-oss/tantivy)
//! query matching documents whose field holds one of them.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use flapjack_lookup::{TermsLookup, TermsLookupRequest};
//! use serde_json::json;
//!
//! # async fn run(searcher: tantivy::Searcher) -> flapjack_lookup::Result<()> {
//! let lookup = TermsLookup::new(flapjack_lookup::init_from_env());
//!
//! let request = TermsLookupRequest::from_json(&json!({
//!     "user_id": { "url": "http://acl.local/allowed", "path": "data.ids" }
//! }))?;
//!
//! // Unknown fields and empty value sets yield a filter that matches nothing.
//! let filter = lookup.filter(&request, &searcher).await?;
//! let hits = searcher.search(filter.as_ref(), &tantivy::collector::Count)?;
//! println!("{} documents allowed", hits);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Dependencies | Use case |
//! |---------|-------------|----------|
//! | `axum-support` | axum, uuid | [`LookupError`] implements `IntoResponse` |

pub mod config;
pub mod error;
pub mod fetch;
pub mod index;
pub mod query;
pub mod types;

pub use config::LookupConfig;
pub use error::{LookupError, Result};
pub use fetch::{
    ConnectionPoolRegistry, Credentials, HttpSource, KeyStoreCommand, KeyStoreCommandSource,
    SqlDriver, SqlSource, TermsFetch, TermsSource,
};
pub use index::{FieldResolver, FieldSchema, FieldType};
pub use query::{
    FilterCache, LookupTarget, MembershipFilter, MembershipFilterBuilder, NamedFilter, TermsLookup,
    TermsLookupRequest,
};
pub use types::{CacheKey, TermValue};

/// Initialize configuration from environment variables.
///
/// Reads the `FLAPJACK_LOOKUP_*` variables; see [`LookupConfig::from_env`].
pub fn init_from_env() -> LookupConfig {
    LookupConfig::from_env()
}
