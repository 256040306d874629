use crate::error::Result;
use crate::fetch::TermsSource;
use crate::types::{CacheKey, TermValue};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// A lookup bound to one field, with its terms fetched lazily and at most
/// once.
///
/// A successful fetch is stored and returned from then on. A failed fetch
/// stores nothing, so the next call tries the backend again.
///
/// Callers racing on an instance that has not fetched yet may each reach the
/// backend. The first stored result wins and later ones are discarded, so the
/// terms never change once observed.
#[derive(Debug)]
pub struct TermsFetch {
    source: TermsSource,
    field: String,
    explicit_key: Option<CacheKey>,
    terms: OnceLock<Arc<[TermValue]>>,
    derived_key: OnceLock<CacheKey>,
}

impl TermsFetch {
    pub fn new(source: TermsSource, field: impl Into<String>, key: Option<CacheKey>) -> Self {
        TermsFetch {
            source,
            field: field.into(),
            explicit_key: key,
            terms: OnceLock::new(),
            derived_key: OnceLock::new(),
        }
    }

    pub fn source(&self) -> &TermsSource {
        &self.source
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn is_fetched(&self) -> bool {
        self.terms.get().is_some()
    }

    pub async fn terms(&self) -> Result<Arc<[TermValue]>> {
        if let Some(terms) = self.terms.get() {
            return Ok(Arc::clone(terms));
        }

        let start = Instant::now();
        let fetched = match self.source.fetch().await {
            Ok(terms) => terms,
            Err(e) => {
                tracing::warn!(
                    "[LOOKUP] {} fetch for field '{}' from {} failed: {}",
                    self.source.kind(),
                    self.field,
                    self.source.endpoint(),
                    e
                );
                return Err(e);
            }
        };
        tracing::debug!(
            "[LOOKUP] {} fetch for field '{}' returned {} terms in {:?}",
            self.source.kind(),
            self.field,
            fetched.len(),
            start.elapsed()
        );

        let stored = self.terms.get_or_init(|| Arc::from(fetched));
        Ok(Arc::clone(stored))
    }

    /// The explicit key if one was given, otherwise a key derived from the
    /// fetched terms (fetching them first if needed).
    pub async fn cache_key(&self) -> Result<CacheKey> {
        if let Some(key) = &self.explicit_key {
            return Ok(key.clone());
        }
        if let Some(key) = self.derived_key.get() {
            return Ok(key.clone());
        }
        let terms = self.terms().await?;
        Ok(self
            .derived_key
            .get_or_init(|| CacheKey::derive(&terms))
            .clone())
    }
}

impl PartialEq for TermsFetch {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.field == other.field
    }
}

impl Eq for TermsFetch {}

impl Hash for TermsFetch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.field.hash(state);
    }
}
