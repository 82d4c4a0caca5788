use std::borrow::Cow;
use std::cmp::Ordering;
use std::mem::discriminant;
use std::sync::Arc;
use crate::analysis::analyzer::{Analyzer, AnalyzerRegistry};
use crate::core::types::{canonical_date, Fields, Value};
use crate::index::inverted::{InvertedIndex, Term};
use crate::index::materialized::MaterializedEntry;
use crate::index::worker::analyze_value;
use crate::query::ast::{BoolQuery, EqualsQuery, InQuery, Query, RangeQuery, SearchQuery};
use crate::schema::schema::{FieldIndexing, IndexSchema};

/// Evaluates predicates against materialized entries of one snapshot.
///
/// `score` returns `None` for entries that do not match. Search clauses
/// contribute their term-overlap score; every other clause scores zero.
pub struct EntryMatcher<'a> {
    schema: &'a IndexSchema,
    postings: &'a InvertedIndex,
    analyzers: &'a AnalyzerRegistry,
    identity_property: &'a str,
}

impl<'a> EntryMatcher<'a> {
    pub fn new(
        schema: &'a IndexSchema,
        postings: &'a InvertedIndex,
        analyzers: &'a AnalyzerRegistry,
        identity_property: &'a str,
    ) -> Self {
        EntryMatcher {
            schema,
            postings,
            analyzers,
            identity_property,
        }
    }

    pub fn matches(&self, entry: &MaterializedEntry, query: &Query) -> bool {
        self.score(entry, query).is_some()
    }

    pub fn score(&self, entry: &MaterializedEntry, query: &Query) -> Option<f32> {
        match query {
            Query::MatchAll => Some(0.0),
            Query::Equals(q) => self.matches_equals(entry, q).then_some(0.0),
            Query::Range(q) => self.matches_range(entry, q).then_some(0.0),
            Query::In(q) => self.matches_in(entry, q).then_some(0.0),
            Query::Search(q) => self.score_search(entry, q),
            Query::Exists(q) => self.lookup(entry, &q.field).is_some().then_some(0.0),
            Query::Bool(q) => self.score_bool(entry, q),
        }
    }

    /// Field value of an entry. Dotted names walk nested objects; the identity
    /// property falls back to the source document id of map-only entries.
    pub fn lookup<'e>(&self, entry: &'e MaterializedEntry, field: &str) -> Option<Cow<'e, Value>> {
        if let Some(value) = lookup_path(&entry.fields, field) {
            return Some(Cow::Borrowed(value));
        }
        if field == self.identity_property {
            return entry.document_id().map(|id| Cow::Owned(Value::Text(id.to_string())));
        }
        None
    }

    fn matches_equals(&self, entry: &MaterializedEntry, query: &EqualsQuery) -> bool {
        let Some(value) = self.lookup(entry, &query.field) else {
            return false;
        };
        if matches!(query.value, Value::List(_)) {
            return *value == query.value;
        }

        match self.schema.indexing(&query.field) {
            FieldIndexing::Analyzed => self.analyzed_contains_all(entry, &query.field, &query.value),
            FieldIndexing::NotAnalyzed => value.elements().any(|element| *element == query.value),
            FieldIndexing::Default => value.elements().any(|element| loosely_equal(element, &query.value)),
        }
    }

    /// Every token of `expected` is a term of the entry's field.
    fn analyzed_contains_all(&self, entry: &MaterializedEntry, field: &str, expected: &Value) -> bool {
        if expected.is_null() {
            return self
                .lookup(entry, field)
                .map(|value| value.elements().any(Value::is_null))
                .unwrap_or(false);
        }
        let terms = analyze_value(&self.analyzer_for(field), expected);
        !terms.is_empty()
            && terms.iter().all(|token| {
                self.postings
                    .search_term(&Term::new(field, &token.text))
                    .and_then(|list| list.get(&entry.key))
                    .is_some()
            })
    }

    fn matches_range(&self, entry: &MaterializedEntry, query: &RangeQuery) -> bool {
        let Some(value) = self.lookup(entry, &query.field) else {
            return false;
        };
        value.elements().any(|element| in_range(element, query))
    }

    fn matches_in(&self, entry: &MaterializedEntry, query: &InQuery) -> bool {
        query.values.iter().any(|candidate| {
            self.matches_equals(
                entry,
                &EqualsQuery {
                    field: query.field.clone(),
                    value: candidate.clone(),
                },
            )
        })
    }

    fn score_search(&self, entry: &MaterializedEntry, query: &SearchQuery) -> Option<f32> {
        if self.schema.indexing(&query.field) == FieldIndexing::Analyzed {
            let analyzer = self.analyzer_for(&query.field);
            let mut terms = analyzer.terms(&query.terms);
            terms.sort();
            terms.dedup();

            let score: f32 = terms
                .iter()
                .filter_map(|text| {
                    self.postings
                        .search_term(&Term::new(&query.field, text))
                        .and_then(|list| list.get(&entry.key))
                        .map(|posting| posting.term_freq as f32 * posting.field_norm)
                })
                .sum();
            return (score > 0.0).then_some(score);
        }

        // Not analyzed: each query word against the whole, case-folded value.
        let value = self.lookup(entry, &query.field)?;
        let words: Vec<String> = query.terms.split_whitespace().map(str::to_lowercase).collect();
        let matched = value
            .elements()
            .filter_map(|element| match element {
                Value::Null | Value::List(_) | Value::Object(_) => None,
                other => Some(other.to_string().to_lowercase()),
            })
            .filter(|text| words.iter().any(|word| word == text))
            .count();
        (matched > 0).then_some(matched as f32)
    }

    fn score_bool(&self, entry: &MaterializedEntry, query: &BoolQuery) -> Option<f32> {
        let mut score = 0.0;

        for clause in &query.must {
            score += self.score(entry, clause)?;
        }

        for clause in &query.filter {
            self.score(entry, clause)?;
        }

        for clause in &query.must_not {
            if self.matches(entry, clause) {
                return None;
            }
        }

        let mut matched_should = false;
        for clause in &query.should {
            if let Some(s) = self.score(entry, clause) {
                score += s;
                matched_should = true;
            }
        }

        let should_required = query.must.is_empty() && query.filter.is_empty() && !query.should.is_empty();
        if should_required && !matched_should {
            return None;
        }

        Some(score)
    }

    fn analyzer_for(&self, field: &str) -> Arc<Analyzer> {
        self.analyzers.get_or_default(self.schema.analyzer_for(field))
    }
}

pub(crate) fn lookup_path<'e>(fields: &'e Fields, path: &str) -> Option<&'e Value> {
    if let Some(value) = fields.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = fields.get(first)?;
    let mut walked = false;
    for part in parts {
        current = current.get(part)?;
        walked = true;
    }
    walked.then_some(current)
}

/// Whole-value equality, ignoring case for text.
fn loosely_equal(stored: &Value, expected: &Value) -> bool {
    match (stored, expected) {
        (Value::Text(a), Value::Text(b)) => a == b || a.to_lowercase() == b.to_lowercase(),
        (Value::Date(a), Value::Text(b)) => canonical_date(b).is_some_and(|b| *a == b),
        (a, b) => a == b,
    }
}

fn in_range(value: &Value, query: &RangeQuery) -> bool {
    let check = |bound: &Option<Value>, accept: fn(Ordering) -> bool| match bound {
        None => true,
        Some(bound) => {
            discriminant(value) == discriminant(bound) && !value.is_null() && accept(value.cmp(bound))
        }
    };

    check(&query.gt, |o| o == Ordering::Greater)
        && check(&query.gte, |o| o != Ordering::Less)
        && check(&query.lt, |o| o == Ordering::Less)
        && check(&query.lte, |o| o != Ordering::Greater)
        && (query.gt.is_some() || query.gte.is_some() || query.lt.is_some() || query.lte.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::index::materialized::EntryKey;
    use crate::schema::schema::FieldOptions;
    use chrono::{TimeZone, Utc};

    fn entry(id: &str, fields: Fields) -> MaterializedEntry {
        MaterializedEntry {
            key: EntryKey::Document { id: id.to_string(), map: 0, row: 0 },
            fields,
            sources: [id.to_string()].into_iter().collect(),
        }
    }

    fn check(schema: &IndexSchema, postings: &InvertedIndex, entry: &MaterializedEntry, query: &Query) -> bool {
        let registry = AnalyzerRegistry::new();
        EntryMatcher::new(schema, postings, &registry, "Id").matches(entry, query)
    }

    #[test]
    fn test_null_equality_requires_presence() {
        let schema = IndexSchema::dynamic();
        let postings = InvertedIndex::new();
        let null_date = entry("plants/1", fields! { "CaughtDate" => Value::Null });
        let missing = entry("plants/2", fields! { "Name" => "Rose" });
        let dated = entry("plants/3", fields! { "CaughtDate" => Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() });

        let query = Query::is_null("CaughtDate");
        assert!(check(&schema, &postings, &null_date, &query));
        assert!(!check(&schema, &postings, &missing, &query));
        assert!(!check(&schema, &postings, &dated, &query));

        let exists = Query::exists("CaughtDate");
        assert!(check(&schema, &postings, &null_date, &exists));
        assert!(!check(&schema, &postings, &missing, &exists));
    }

    #[test]
    fn test_default_equality_ignores_case_but_not_analyzed_is_exact() {
        let mut schema = IndexSchema::new();
        schema.set_options("Code", FieldOptions::not_analyzed());
        let postings = InvertedIndex::new();
        let e = entry("a/1", fields! { "Name" => "Bob", "Code" => "AbC" });

        assert!(check(&schema, &postings, &e, &Query::equals("Name", "bob")));
        assert!(check(&schema, &postings, &e, &Query::equals("Code", "AbC")));
        assert!(!check(&schema, &postings, &e, &Query::equals("Code", "abc")));
    }

    #[test]
    fn test_default_equality_accepts_date_written_as_text() {
        let schema = IndexSchema::dynamic();
        let postings = InvertedIndex::new();
        let when = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
        let e = entry("notes/1", fields! { "When" => when });

        assert!(check(&schema, &postings, &e, &Query::equals("When", "2024-03-01T03:00:00Z")));
        assert!(!check(&schema, &postings, &e, &Query::equals("When", "2024-03-01T10:00:00+07:00")));
    }

    #[test]
    fn test_list_field_matches_any_element() {
        let schema = IndexSchema::dynamic();
        let postings = InvertedIndex::new();
        let e = entry("users/1", fields! {
            "LoginPlatformId" => vec![2, 3],
            "LoginAccountName" => vec!["alice", "bob"],
        });

        let both = Query::and([
            Query::equals("LoginPlatformId", 3),
            Query::equals("LoginAccountName", "bob"),
        ]);
        assert!(check(&schema, &postings, &e, &both));
        assert!(!check(&schema, &postings, &e, &Query::equals("LoginPlatformId", 4)));
        assert!(check(&schema, &postings, &e, &Query::one_of("LoginAccountName", ["carol", "alice"])));
    }

    #[test]
    fn test_range_only_compares_same_type() {
        let schema = IndexSchema::dynamic();
        let postings = InvertedIndex::new();
        let e = entry("orders/1", fields! { "Quantity" => 12, "Label" => "12" });

        assert!(check(&schema, &postings, &e, &Query::greater_than("Quantity", 10)));
        assert!(!check(&schema, &postings, &e, &Query::greater_than("Quantity", 12)));
        assert!(check(&schema, &postings, &e, &Query::between("Quantity", 12, 20)));
        assert!(!check(&schema, &postings, &e, &Query::greater_than("Label", 10)));
    }

    #[test]
    fn test_search_on_unanalyzed_field_compares_whole_values() {
        let schema = IndexSchema::dynamic();
        let postings = InvertedIndex::new();
        let query = Query::search("Name", "Bob");

        assert!(check(&schema, &postings, &entry("u/1", fields! { "Name" => "Bob" }), &query));
        assert!(check(&schema, &postings, &entry("u/2", fields! { "Name" => "bob" }), &query));
        assert!(!check(&schema, &postings, &entry("u/3", fields! { "Name" => "Bobby" }), &query));
        assert!(!check(&schema, &postings, &entry("u/4", fields! { "Name" => "Bob Smith" }), &query));
    }

    #[test]
    fn test_analyzed_search_and_equality_use_postings() {
        let mut schema = IndexSchema::new();
        schema.set_options("Keyword", FieldOptions::analyzed());
        let analyzer = Analyzer::simple();
        let mut postings = InvertedIndex::new();
        let e = entry("plants/1", fields! { "Keyword" => vec!["Red Rose", "Bill"] });
        postings.add_field(&e.key, "Keyword", &analyze_value(&analyzer, &e.fields["Keyword"]));

        assert!(check(&schema, &postings, &e, &Query::search("Keyword", "rose")));
        assert!(check(&schema, &postings, &e, &Query::search("Keyword", "Onion Bill")));
        assert!(!check(&schema, &postings, &e, &Query::search("Keyword", "Onion")));
        assert!(check(&schema, &postings, &e, &Query::equals("Keyword", "red rose")));
        assert!(!check(&schema, &postings, &e, &Query::equals("Keyword", "white rose")));
    }

    #[test]
    fn test_bool_should_and_not() {
        let schema = IndexSchema::dynamic();
        let postings = InvertedIndex::new();
        let e = entry("a/1", fields! { "A" => 1, "B" => 2 });

        assert!(check(&schema, &postings, &e, &Query::or([Query::equals("A", 5), Query::equals("B", 2)])));
        assert!(!check(&schema, &postings, &e, &Query::not(Query::equals("A", 1))));
        assert!(check(&schema, &postings, &e, &Query::Bool(BoolQuery::new())));
    }

    #[test]
    fn test_identity_falls_back_to_document_id() {
        let schema = IndexSchema::new();
        let postings = InvertedIndex::new();
        let e = entry("foos/1", fields! { "Data" => 2 });
        assert!(check(&schema, &postings, &e, &Query::equals("Id", "foos/1")));
    }

    #[test]
    fn test_dotted_path_walks_objects() {
        let schema = IndexSchema::dynamic();
        let postings = InvertedIndex::new();
        let e = entry("a/1", fields! { "Address" => fields! { "City" => "Hanoi" } });
        assert!(check(&schema, &postings, &e, &Query::equals("Address.City", "hanoi")));
    }
}
