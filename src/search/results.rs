use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::core::error::Result;
use crate::core::types::{Fields, Value};

/// Query results container
#[derive(Debug, Clone)]
pub struct QueryResults {
    pub hits: Vec<QueryHit>,
    pub stats: QueryStats,
}

/// One returned row: an index entry after transform and projection, or a
/// source document when the query asked for documents.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    /// Contributing document. `None` for reduce rows.
    pub id: Option<String>,
    pub fields: Fields,
    pub score: f32,
}

impl QueryHit {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Text value of `field`, if it holds one.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()).to_json())?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStats {
    /// Matching rows (or distinct documents) before paging.
    pub total_results: usize,
    pub skipped: usize,
    /// The index had not caught up with the store when the query ran.
    pub is_stale: bool,
    pub index_name: String,
    pub indexed_sequence: u64,
    pub store_sequence: u64,
    pub duration_ms: u64,
}

impl QueryResults {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryHit> {
        self.hits.iter()
    }

    /// Ids of the hits that have one, in result order.
    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().filter_map(|hit| hit.id.as_deref()).collect()
    }

    /// Convert every hit into `T` through its JSON form.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.hits.iter().map(QueryHit::deserialize).collect()
    }
}

impl IntoIterator for QueryResults {
    type Item = QueryHit;
    type IntoIter = std::vec::IntoIter<QueryHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}
