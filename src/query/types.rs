use std::collections::BTreeSet;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};
use crate::query::ast::Query;
use crate::schema::schema::IndexSchema;

/// Sort order for query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,   // Ascending: 0 → 9, A → Z
    Desc,  // Descending: 9 → 0, Z → A
}

/// One `order_by` key. Entries missing the field sort first ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        SortField { field: field.into(), order: SortOrder::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortField { field: field.into(), order: SortOrder::Desc }
    }
}

/// Where a projected field takes its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// The contributing document's id.
    DocumentId,
    Field(String),
}

/// Result shape: target field names with their sources, in order.
///
/// At most one target receives the document id: the first one sourced from
/// [`Source::DocumentId`], or failing that a target that reads the identity
/// property under its own name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub fields: Vec<(String, Source)>,
}

impl Projection {
    pub fn new() -> Self {
        Projection::default()
    }

    /// Copy `name` under the same name.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.push((name.clone(), Source::Field(name)));
        self
    }

    /// Copy `source` into `target`.
    pub fn rename(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.fields.push((target.into(), Source::Field(source.into())));
        self
    }

    pub fn document_id(mut self, target: impl Into<String>) -> Self {
        self.fields.push((target.into(), Source::DocumentId));
        self
    }

    /// The single target that is populated with the document id, if any: the
    /// explicit document id target, else the first copy of the identity property.
    pub fn id_target(&self, identity_property: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, source)| *source == Source::DocumentId)
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|(_, source)| matches!(source, Source::Field(name) if name == identity_property))
            })
            .map(|(target, _)| target.as_str())
    }
}

/// A query against one index.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: Query,
    pub order_by: Vec<SortField>,
    pub skip: usize,
    pub take: Option<usize>,
    pub wait_for_non_stale: bool,
    /// Falls back to the configured default when `None`.
    pub wait_timeout: Option<Duration>,
    pub projection: Option<Projection>,
    /// Return the distinct source documents of the matched rows.
    pub as_documents: bool,
}

impl Default for QueryRequest {
    fn default() -> Self {
        QueryRequest {
            query: Query::MatchAll,
            order_by: Vec::new(),
            skip: 0,
            take: None,
            wait_for_non_stale: false,
            wait_timeout: None,
            projection: None,
            as_documents: false,
        }
    }
}

impl QueryRequest {
    pub fn new() -> Self {
        QueryRequest::default()
    }

    pub fn filter(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by.push(SortField::asc(field));
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by.push(SortField::desc(field));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }

    pub fn wait_for_non_stale(mut self) -> Self {
        self.wait_for_non_stale = true;
        self
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_for_non_stale = true;
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn as_documents(mut self) -> Self {
        self.as_documents = true;
        self
    }

    /// Stable text form of everything that decides which keys a page holds.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(serde_json::to_string(&(
            &self.query,
            &self.order_by,
            self.skip,
            self.take,
            self.as_documents,
        ))?)
    }
}

/// Query validation configuration
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub max_bool_clauses: usize,
    pub max_query_depth: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            max_bool_clauses: 1024,
            max_query_depth: 10,
        }
    }
}

/// Checks a request against the shape an index actually produces.
pub struct QueryValidator<'a> {
    config: &'a ValidationConfig,
    index: &'a str,
    schema: &'a IndexSchema,
    produced: &'a BTreeSet<String>,
    identity_property: &'a str,
}

impl<'a> QueryValidator<'a> {
    /// `produced` is the set of field names the index has emitted so far.
    pub fn new(
        config: &'a ValidationConfig,
        index: &'a str,
        schema: &'a IndexSchema,
        produced: &'a BTreeSet<String>,
        identity_property: &'a str,
    ) -> Self {
        QueryValidator {
            config,
            index,
            schema,
            produced,
            identity_property,
        }
    }

    /// Validate query structure and that every referenced field exists.
    pub fn validate(&self, query: &Query, sort: &[SortField]) -> Result<()> {
        self.validate_depth(query, 0)?;
        self.validate_bool_clauses(query)?;

        for field in query.fields() {
            self.validate_field(field)?;
        }
        for key in sort {
            self.validate_field(&key.field)?;
        }
        Ok(())
    }

    fn validate_field(&self, field: &str) -> Result<()> {
        // Nothing to check against until the index has emitted a row.
        if self.schema.dynamic || self.produced.is_empty() {
            return Ok(());
        }

        let root = field.split('.').next().unwrap_or(field);
        let known = [field, root].iter().any(|name| {
            *name == self.identity_property
                || self.schema.is_declared(name)
                || self.produced.contains(*name)
        });

        if known {
            Ok(())
        } else {
            Err(Error::MalformedPredicate {
                index: self.index.to_string(),
                field: field.to_string(),
            })
        }
    }

    fn validate_depth(&self, query: &Query, depth: usize) -> Result<()> {
        if depth > self.config.max_query_depth {
            return Err(Error::InvalidInput(format!(
                "Query depth {} exceeds maximum {}",
                depth, self.config.max_query_depth
            )));
        }

        if let Query::Bool(bool_query) = query {
            for q in bool_query
                .must
                .iter()
                .chain(&bool_query.should)
                .chain(&bool_query.must_not)
                .chain(&bool_query.filter)
            {
                self.validate_depth(q, depth + 1)?;
            }
        }

        Ok(())
    }

    fn validate_bool_clauses(&self, query: &Query) -> Result<()> {
        if let Query::Bool(bool_query) = query {
            let total_clauses = bool_query.must.len()
                + bool_query.should.len()
                + bool_query.must_not.len()
                + bool_query.filter.len();

            if total_clauses > self.config.max_bool_clauses {
                return Err(Error::InvalidInput(format!(
                    "Boolean query has {} clauses, max is {}",
                    total_clauses, self.config.max_bool_clauses
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::query::ast::BoolQuery;

    fn produced() -> BTreeSet<String> {
        ["Name", "Address"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unknown_field_is_malformed() {
        let config = ValidationConfig::default();
        let schema = IndexSchema::new();
        let produced = produced();
        let validator = QueryValidator::new(&config, "Users/ByName", &schema, &produced, "Id");

        assert!(validator.validate(&Query::equals("Name", "Bob"), &[]).is_ok());
        assert!(validator.validate(&Query::equals("Id", "users/1"), &[]).is_ok());
        assert!(validator.validate(&Query::equals("Address.City", "Hanoi"), &[]).is_ok());

        let err = validator.validate(&Query::equals("Age", 3), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPredicate);

        let err = validator
            .validate(&Query::MatchAll, &[SortField::desc("Age")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPredicate);
    }

    #[test]
    fn test_dynamic_and_empty_indexes_accept_anything() {
        let config = ValidationConfig::default();
        let empty = BTreeSet::new();
        let dynamic = IndexSchema::dynamic();
        let plain = IndexSchema::new();

        let v = QueryValidator::new(&config, "Auto/users", &dynamic, &empty, "Id");
        assert!(v.validate(&Query::equals("Anything", 1), &[]).is_ok());

        let v = QueryValidator::new(&config, "Fresh", &plain, &empty, "Id");
        assert!(v.validate(&Query::equals("Anything", 1), &[]).is_ok());
    }

    #[test]
    fn test_id_target_prefers_explicit_document_id() {
        let plain = Projection::new().field("Id").field("Data");
        assert_eq!(plain.id_target("Id"), Some("Id"));

        let renamed = Projection::new().document_id("FooId").field("Id");
        assert_eq!(renamed.id_target("Id"), Some("FooId"));

        let moved = Projection::new().rename("Id", "Key").field("Id");
        assert_eq!(moved.id_target("Id"), Some("Key"));

        let none = Projection::new().field("Data");
        assert_eq!(none.id_target("Id"), None);
    }

    #[test]
    fn test_fingerprint_ignores_wait_settings() {
        let a = QueryRequest::new().filter(Query::equals("Name", "Bob")).take(10);
        let b = a.clone().wait_for_non_stale();
        let c = a.clone().skip(10);
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn test_depth_limit() {
        let config = ValidationConfig { max_query_depth: 2, ..Default::default() };
        let schema = IndexSchema::dynamic();
        let empty = BTreeSet::new();
        let validator = QueryValidator::new(&config, "x", &schema, &empty, "Id");

        let mut query = Query::MatchAll;
        for _ in 0..4 {
            query = BoolQuery::new().with_must(query).into();
        }
        let err = validator.validate(&query, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
