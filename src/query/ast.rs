use serde::{Serialize, Deserialize};
use crate::core::types::Value;

/// Predicate over the fields of materialized index entries.
///
/// A multi-valued (list) field matches a leaf predicate when any element does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    MatchAll,
    Equals(EqualsQuery),
    Range(RangeQuery),
    In(InQuery),
    Search(SearchQuery),
    Exists(ExistsQuery),
    Bool(BoolQuery),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualsQuery {
    pub field: String,
    pub value: Value,
}

/// Numeric or date range. Values of a different type never match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeQuery {
    pub field: String,
    pub gt: Option<Value>,   // Greater than
    pub gte: Option<Value>,  // Greater than or equal
    pub lt: Option<Value>,   // Less than
    pub lte: Option<Value>,  // Less than or equal
}

/// Membership in a set of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InQuery {
    pub field: String,
    pub values: Vec<Value>,
}

/// Tokenized term match. Entries matching any term are hits, scored by term overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub field: String,
    pub terms: String,
}

/// Field presence, including present-but-null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistsQuery {
    pub field: String,
}

/// Boolean query with must/should/must_not clauses
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoolQuery {
    pub must: Vec<Query>,      // All must match (AND)
    pub should: Vec<Query>,    // At least one must match (OR) when there is no must/filter
    pub must_not: Vec<Query>,  // None must match (NOT)
    pub filter: Vec<Query>,    // Must match but don't affect score
}

impl Query {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Query {
        Query::Equals(EqualsQuery {
            field: field.into(),
            value: value.into(),
        })
    }

    /// `field == null`: present with an explicit null.
    pub fn is_null(field: impl Into<String>) -> Query {
        Query::equals(field, Value::Null)
    }

    pub fn greater_than(field: impl Into<String>, value: impl Into<Value>) -> Query {
        Query::Range(RangeQuery::new(field).gt(value))
    }

    pub fn greater_than_or_equal(field: impl Into<String>, value: impl Into<Value>) -> Query {
        Query::Range(RangeQuery::new(field).gte(value))
    }

    pub fn less_than(field: impl Into<String>, value: impl Into<Value>) -> Query {
        Query::Range(RangeQuery::new(field).lt(value))
    }

    pub fn less_than_or_equal(field: impl Into<String>, value: impl Into<Value>) -> Query {
        Query::Range(RangeQuery::new(field).lte(value))
    }

    /// Inclusive on both ends.
    pub fn between(field: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Query {
        Query::Range(RangeQuery::new(field).gte(low).lte(high))
    }

    pub fn one_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Query {
        Query::In(InQuery {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn search(field: impl Into<String>, terms: impl Into<String>) -> Query {
        Query::Search(SearchQuery {
            field: field.into(),
            terms: terms.into(),
        })
    }

    pub fn exists(field: impl Into<String>) -> Query {
        Query::Exists(ExistsQuery { field: field.into() })
    }

    pub fn and(queries: impl IntoIterator<Item = Query>) -> Query {
        Query::Bool(BoolQuery {
            must: queries.into_iter().collect(),
            ..Default::default()
        })
    }

    pub fn or(queries: impl IntoIterator<Item = Query>) -> Query {
        Query::Bool(BoolQuery {
            should: queries.into_iter().collect(),
            ..Default::default()
        })
    }

    pub fn not(query: Query) -> Query {
        Query::Bool(BoolQuery {
            must_not: vec![query],
            ..Default::default()
        })
    }

    /// Whether any clause produces a relevance score.
    pub fn is_scored(&self) -> bool {
        match self {
            Query::Search(_) => true,
            Query::Bool(b) => b.must.iter().chain(&b.should).any(Query::is_scored),
            _ => false,
        }
    }

    /// Field names referenced anywhere in the predicate.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Query::MatchAll => {}
            Query::Equals(q) => out.push(&q.field),
            Query::Range(q) => out.push(&q.field),
            Query::In(q) => out.push(&q.field),
            Query::Search(q) => out.push(&q.field),
            Query::Exists(q) => out.push(&q.field),
            Query::Bool(b) => {
                for q in b.must.iter().chain(&b.should).chain(&b.must_not).chain(&b.filter) {
                    q.collect_fields(out);
                }
            }
        }
    }
}

impl RangeQuery {
    pub fn new(field: impl Into<String>) -> Self {
        RangeQuery {
            field: field.into(),
            gt: None,
            gte: None,
            lt: None,
            lte: None,
        }
    }

    pub fn gt(mut self, value: impl Into<Value>) -> Self {
        self.gt = Some(value.into());
        self
    }

    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    pub fn lt(mut self, value: impl Into<Value>) -> Self {
        self.lt = Some(value.into());
        self
    }

    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }
}

impl BoolQuery {
    pub fn new() -> Self {
        BoolQuery::default()
    }

    pub fn with_must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn with_should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn with_must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn with_filter(mut self, query: Query) -> Self {
        self.filter.push(query);
        self
    }
}

impl From<BoolQuery> for Query {
    fn from(query: BoolQuery) -> Self {
        Query::Bool(query)
    }
}
