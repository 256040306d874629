use crate::error::Result;
use crate::fetch::TermsFetch;
use crate::index::schema::FieldResolver;
use once_cell::sync::Lazy;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};
use tantivy::query::{EmptyQuery, EnableScoring, Query, TermSetQuery, Weight};
use tantivy::Term;

static MATCH_NOTHING: Lazy<Arc<MembershipFilter>> =
    Lazy::new(|| Arc::new(MembershipFilter::MatchNothing));

/// A document-level test: does the field hold one of the fetched values?
///
/// Usable directly as a tantivy [`Query`].
#[derive(Debug, Clone)]
pub enum MembershipFilter {
    /// Canonical filter for an empty value set or an unknown field.
    MatchNothing,
    Terms {
        field: String,
        len: usize,
        query: TermSetQuery,
    },
}

impl MembershipFilter {
    /// The shared match-nothing instance. Every caller gets the same `Arc`.
    pub fn match_nothing() -> Arc<MembershipFilter> {
        Arc::clone(&MATCH_NOTHING)
    }

    /// Distinct `terms` on `field`, or the canonical match-nothing filter
    /// when there are none.
    pub fn from_terms(field: &str, mut terms: Vec<Term>) -> Arc<MembershipFilter> {
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Self::match_nothing();
        }
        Arc::new(MembershipFilter::Terms {
            field: field.to_string(),
            len: terms.len(),
            query: TermSetQuery::new(terms),
        })
    }

    pub fn is_match_nothing(&self) -> bool {
        matches!(self, MembershipFilter::MatchNothing)
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            MembershipFilter::MatchNothing => None,
            MembershipFilter::Terms { field, .. } => Some(field),
        }
    }

    /// Number of distinct terms tested.
    pub fn len(&self) -> usize {
        match self {
            MembershipFilter::MatchNothing => 0,
            MembershipFilter::Terms { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_query(&self) -> Box<dyn Query> {
        Box::new(self.clone())
    }
}

impl Query for MembershipFilter {
    fn weight(&self, enable_scoring: EnableScoring<'_>) -> tantivy::Result<Box<dyn Weight>> {
        match self {
            MembershipFilter::MatchNothing => EmptyQuery.weight(enable_scoring),
            MembershipFilter::Terms { query, .. } => query.weight(enable_scoring),
        }
    }
}

/// Builds the membership filter for one [`TermsFetch`], once.
#[derive(Debug)]
pub struct MembershipFilterBuilder {
    fetch: Arc<TermsFetch>,
    filter: OnceLock<Arc<MembershipFilter>>,
}

impl MembershipFilterBuilder {
    pub fn new(fetch: Arc<TermsFetch>) -> Self {
        MembershipFilterBuilder {
            fetch,
            filter: OnceLock::new(),
        }
    }

    pub fn fetch(&self) -> &Arc<TermsFetch> {
        &self.fetch
    }

    pub fn is_built(&self) -> bool {
        self.filter.get().is_some()
    }

    /// Resolve the field, fetch the terms and build the filter.
    ///
    /// An unresolvable field short-circuits to match-nothing without touching
    /// the source, and that answer is not remembered: the field may appear
    /// once documents carrying it are indexed. An empty fetch also yields
    /// match-nothing. Source errors are returned as-is.
    pub async fn build<R>(&self, resolver: &R) -> Result<Arc<MembershipFilter>>
    where
        R: FieldResolver + ?Sized,
    {
        if let Some(filter) = self.filter.get() {
            return Ok(Arc::clone(filter));
        }

        let Some(schema) = resolver.resolve_field(self.fetch.field()) else {
            tracing::debug!(
                "[FILTER] field '{}' is not indexed, lookup matches nothing",
                self.fetch.field()
            );
            return Ok(MembershipFilter::match_nothing());
        };

        let terms = self.fetch.terms().await?;
        let filter = if terms.is_empty() {
            MembershipFilter::match_nothing()
        } else {
            schema.membership_predicate(&terms)
        };

        Ok(Arc::clone(self.filter.get_or_init(|| filter)))
    }
}

impl PartialEq for MembershipFilterBuilder {
    fn eq(&self, other: &Self) -> bool {
        self.fetch == other.fetch
    }
}

impl Eq for MembershipFilterBuilder {}

impl Hash for MembershipFilterBuilder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fetch.hash(state);
    }
}
