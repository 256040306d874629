use crate::query::membership::MembershipFilter;
use crate::types::TermValue;
use std::collections::HashMap;
use std::sync::Arc;
use tantivy::schema::{Facet, Field, FieldEntry, FieldType as TantivyFieldType, Schema as TantivySchema};
use tantivy::{DateTime, Searcher, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    Integer,
    Unsigned,
    Float,
    Bool,
    Date,
    Facet,
}

impl FieldType {
    /// Field kinds a membership filter can target. Bytes, JSON and IP fields
    /// have no lookup form.
    pub fn from_tantivy(field_type: &TantivyFieldType) -> Option<Self> {
        match field_type {
            TantivyFieldType::Str(_) => Some(FieldType::Text),
            TantivyFieldType::I64(_) => Some(FieldType::Integer),
            TantivyFieldType::U64(_) => Some(FieldType::Unsigned),
            TantivyFieldType::F64(_) => Some(FieldType::Float),
            TantivyFieldType::Bool(_) => Some(FieldType::Bool),
            TantivyFieldType::Date(_) => Some(FieldType::Date),
            TantivyFieldType::Facet(_) => Some(FieldType::Facet),
            _ => None,
        }
    }
}

/// Type metadata for one indexed field: enough to turn fetched values into
/// index terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSchema {
    name: String,
    field: Field,
    field_type: FieldType,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field: Field, field_type: FieldType) -> Self {
        FieldSchema {
            name: name.into(),
            field,
            field_type,
        }
    }

    /// `None` for fields that are not indexed or whose type has no term form.
    pub fn from_entry(field: Field, entry: &FieldEntry) -> Option<Self> {
        if !entry.is_indexed() {
            return None;
        }
        let field_type = FieldType::from_tantivy(entry.field_type())?;
        Some(FieldSchema::new(entry.name(), field, field_type))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Coerce a fetched value into a term for this field. Text is parsed when
    /// the field is numeric, numbers are rendered when the field is text.
    pub fn to_term(&self, value: &TermValue) -> Option<Term> {
        match self.field_type {
            FieldType::Text => Some(Term::from_field_text(self.field, &value.to_string())),
            FieldType::Integer => coerce_i64(value).map(|v| Term::from_field_i64(self.field, v)),
            FieldType::Unsigned => coerce_u64(value).map(|v| Term::from_field_u64(self.field, v)),
            FieldType::Float => coerce_f64(value).map(|v| Term::from_field_f64(self.field, v)),
            FieldType::Bool => coerce_bool(value).map(|v| Term::from_field_bool(self.field, v)),
            FieldType::Date => coerce_i64(value)
                .map(|secs| Term::from_field_date(self.field, DateTime::from_timestamp_secs(secs))),
            FieldType::Facet => coerce_facet(value).map(|f| Term::from_facet(self.field, &f)),
        }
    }

    /// Build the membership test for `values`. Values that cannot become a
    /// term for this field are dropped; if none survive the canonical
    /// match-nothing filter is returned.
    pub fn membership_predicate(&self, values: &[TermValue]) -> Arc<MembershipFilter> {
        let mut terms = Vec::with_capacity(values.len());
        let mut dropped = 0usize;
        for value in values {
            match self.to_term(value) {
                Some(term) => terms.push(term),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            tracing::debug!(
                "[FILTER] dropped {} of {} values that do not fit {:?} field '{}'",
                dropped,
                values.len(),
                self.field_type,
                self.name
            );
        }
        MembershipFilter::from_terms(&self.name, terms)
    }
}

fn coerce_i64(value: &TermValue) -> Option<i64> {
    match value {
        TermValue::Integer(i) => Some(*i),
        TermValue::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
        TermValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_u64(value: &TermValue) -> Option<u64> {
    match value {
        TermValue::Integer(i) => u64::try_from(*i).ok(),
        TermValue::Float(f) if f.fract() == 0.0 && *f >= 0.0 && *f < u64::MAX as f64 => {
            Some(*f as u64)
        }
        TermValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_f64(value: &TermValue) -> Option<f64> {
    match value {
        TermValue::Integer(i) => Some(*i as f64),
        TermValue::Float(f) => Some(*f),
        TermValue::Text(s) => s.trim().parse().ok(),
        TermValue::Bool(_) => None,
    }
}

fn coerce_bool(value: &TermValue) -> Option<bool> {
    match value {
        TermValue::Bool(b) => Some(*b),
        TermValue::Integer(0) => Some(false),
        TermValue::Integer(1) => Some(true),
        TermValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_facet(value: &TermValue) -> Option<Facet> {
    match value {
        TermValue::Text(s) if s.starts_with('/') => Facet::from_text(s).ok(),
        TermValue::Text(s) => Some(Facet::from_path(std::iter::once(s.as_str()))),
        other => Some(Facet::from_path(std::iter::once(other.to_string()))),
    }
}

/// Resolves a field name to the metadata a membership filter needs.
///
/// `None` means the field is unknown to the index, in which case a lookup on
/// it can never match.
pub trait FieldResolver: Send + Sync {
    fn resolve_field(&self, name: &str) -> Option<FieldSchema>;
}

impl FieldResolver for TantivySchema {
    fn resolve_field(&self, name: &str) -> Option<FieldSchema> {
        let field = self.get_field(name).ok()?;
        FieldSchema::from_entry(field, self.get_field_entry(field))
    }
}

/// A searcher only resolves fields that at least one segment has indexed
/// terms for: a declared field that no document ever populated cannot match.
impl FieldResolver for Searcher {
    fn resolve_field(&self, name: &str) -> Option<FieldSchema> {
        let schema = self.schema().resolve_field(name)?;
        let populated = self.segment_readers().iter().any(|reader| {
            reader
                .inverted_index(schema.field())
                .map(|index| index.terms().num_terms() > 0)
                .unwrap_or(false)
        });
        populated.then_some(schema)
    }
}

impl FieldResolver for HashMap<String, FieldSchema> {
    fn resolve_field(&self, name: &str) -> Option<FieldSchema> {
        self.get(name).cloned()
    }
}
