use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{Fields, Value};
use crate::index::definition::{guarded, IndexDefinition, TransformContext};
use crate::index::engine::IndexHandle;
use crate::index::materialized::{IndexSnapshot, MaterializedEntry};
use crate::query::cache::{CachedPage, PageItems, QueryCache, QueryKey};
use crate::query::matcher::{lookup_path, EntryMatcher};
use crate::query::types::{Projection, QueryRequest, QueryValidator, SortOrder, Source, ValidationConfig};
use crate::search::results::{QueryHit, QueryResults, QueryStats};
use crate::storage::document_store::DocumentStore;

/// Runs [`QueryRequest`]s against index snapshots.
///
/// Matching, ordering and paging produce a page of entry keys (cached when a
/// cache is attached); transform and projection run on every execution.
pub struct QueryExecutor<'a> {
    store: &'a DocumentStore,
    analyzers: &'a AnalyzerRegistry,
    cache: Option<&'a QueryCache>,
    validation: ValidationConfig,
    identity_property: &'a str,
    default_wait_timeout: Duration,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(store: &'a DocumentStore, analyzers: &'a AnalyzerRegistry, config: &'a Config) -> Self {
        QueryExecutor {
            store,
            analyzers,
            cache: None,
            validation: ValidationConfig::default(),
            identity_property: &config.identity_property,
            default_wait_timeout: config.default_wait_timeout,
        }
    }

    pub fn with_cache(mut self, cache: Option<&'a QueryCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn execute(&self, index: &IndexHandle, request: &QueryRequest) -> Result<QueryResults> {
        let start = Instant::now();
        let definition = index.definition();
        let store_sequence = self.store.current_sequence();

        let snapshot = if request.wait_for_non_stale {
            let timeout = request.wait_timeout.unwrap_or(self.default_wait_timeout);
            index.wait_for_sequence(store_sequence, timeout)?
        } else {
            index.snapshot()
        };

        QueryValidator::new(
            &self.validation,
            &definition.name,
            &definition.schema,
            &snapshot.fields,
            self.identity_property,
        )
        .validate(&request.query, &request.order_by)?;

        let page = match self.cache {
            Some(cache) => {
                let key = QueryKey {
                    index: definition.name.clone(),
                    generation: index.generation(),
                    sequence: snapshot.sequence,
                    fingerprint: request.fingerprint()?,
                };
                match cache.get(&key) {
                    Some(page) => page,
                    None => {
                        let page = self.collect_page(definition, &snapshot, request);
                        cache.put(key, page.clone());
                        page
                    }
                }
            }
            None => self.collect_page(definition, &snapshot, request),
        };

        let projection = request.projection.as_ref();
        let hits = match page.items {
            PageItems::Entries(keys) => {
                let mut hits = Vec::with_capacity(keys.len());
                for (key, score) in keys {
                    if let Some(entry) = snapshot.entry(&key) {
                        hits.push(self.render_entry(definition, entry, score, projection)?);
                    }
                }
                hits
            }
            PageItems::Documents(ids) => ids
                .iter()
                .filter_map(|id| self.store.try_get(id))
                .map(|doc| QueryHit {
                    id: Some(doc.id.clone()),
                    fields: self.shape(doc.body.clone(), Some(doc.id.as_str()), projection),
                    score: 0.0,
                })
                .collect(),
        };

        let stats = QueryStats {
            total_results: page.total_results,
            skipped: request.skip,
            is_stale: snapshot.sequence < store_sequence,
            index_name: definition.name.clone(),
            indexed_sequence: snapshot.sequence,
            store_sequence,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        debug!(
            index = %definition.name,
            total = stats.total_results,
            returned = hits.len(),
            stale = stats.is_stale,
            "query executed"
        );

        Ok(QueryResults { hits, stats })
    }

    /// Match, order and page the snapshot's entries.
    fn collect_page(&self, definition: &IndexDefinition, snapshot: &IndexSnapshot, request: &QueryRequest) -> CachedPage {
        let matcher = EntryMatcher::new(
            &definition.schema,
            &snapshot.postings,
            self.analyzers,
            self.identity_property,
        );

        let mut matched: Vec<(&Arc<MaterializedEntry>, f32)> = snapshot
            .entries
            .values()
            .filter_map(|entry| matcher.score(entry, &request.query).map(|score| (entry, score)))
            .collect();

        if !request.order_by.is_empty() {
            matched.sort_by(|(a, _), (b, _)| {
                for key in &request.order_by {
                    let ordering = matcher.lookup(a, &key.field).cmp(&matcher.lookup(b, &key.field));
                    let ordering = match key.order {
                        SortOrder::Asc => ordering,
                        SortOrder::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.key.cmp(&b.key)
            });
        } else if request.query.is_scored() {
            matched.sort_by(|(a, score_a), (b, score_b)| {
                score_b.total_cmp(score_a).then_with(|| a.key.cmp(&b.key))
            });
        }

        let take = request.take.unwrap_or(usize::MAX);
        if request.as_documents {
            let mut seen = HashSet::new();
            let ids: Vec<String> = matched
                .iter()
                .flat_map(|(entry, _)| entry.sources.iter())
                .filter(|id| seen.insert(id.as_str()))
                .cloned()
                .collect();
            CachedPage {
                total_results: ids.len(),
                items: PageItems::Documents(ids.into_iter().skip(request.skip).take(take).collect()),
            }
        } else {
            CachedPage {
                total_results: matched.len(),
                items: PageItems::Entries(
                    matched
                        .into_iter()
                        .skip(request.skip)
                        .take(take)
                        .map(|(entry, score)| (entry.key.clone(), score))
                        .collect(),
                ),
            }
        }
    }

    fn render_entry(
        &self,
        definition: &IndexDefinition,
        entry: &MaterializedEntry,
        score: f32,
        projection: Option<&Projection>,
    ) -> Result<QueryHit> {
        let mut fields = entry.fields.clone();
        if let Some(transform) = &definition.transform {
            let context = TransformContext::new(self.store);
            fields = guarded(|| transform(fields, &context)).map_err(|err| Error::TransformFailed {
                index: definition.name.clone(),
                reason: err.to_string(),
            })?;
        }
        fields.retain(|name, _| definition.schema.is_stored(name));

        let document_id = entry.document_id();
        Ok(QueryHit {
            id: document_id.map(str::to_string),
            fields: self.shape(fields, document_id, projection),
            score,
        })
    }

    /// Apply the projection, wiring the document id into at most one field.
    /// Without a projection the identity property is filled in when absent.
    fn shape(&self, mut fields: Fields, document_id: Option<&str>, projection: Option<&Projection>) -> Fields {
        let Some(projection) = projection else {
            if let Some(id) = document_id {
                fields
                    .entry(self.identity_property.to_string())
                    .or_insert_with(|| Value::from(id));
            }
            return fields;
        };

        let id_target = projection.id_target(self.identity_property);
        projection
            .fields
            .iter()
            .map(|(target, source)| {
                let autowired = id_target == Some(target.as_str());
                let value = match source {
                    Source::DocumentId if autowired => document_id.map(Value::from),
                    Source::DocumentId => None,
                    // The identity property only carries the id through the id target.
                    Source::Field(name) if name == self.identity_property && !autowired => None,
                    Source::Field(name) => match lookup_path(&fields, name) {
                        Some(value) => Some(value.clone()),
                        None if autowired => document_id.map(Value::from),
                        None => None,
                    },
                };
                (target.clone(), value.unwrap_or(Value::Null))
            })
            .collect()
    }
}
