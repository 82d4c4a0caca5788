use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

/// How a field of an index's output is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FieldIndexing {
    /// Whole-value equality, case-insensitive for text.
    #[default]
    Default,
    /// Tokenized by the field's analyzer into the posting structure.
    Analyzed,
    /// Exact value equality only.
    NotAnalyzed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FieldStorage {
    /// Value is returned in query results.
    #[default]
    Yes,
    /// Value is searchable but dropped from returned rows.
    No,
}

/// Per-field indexing directives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOptions {
    pub indexing: FieldIndexing,
    pub storage: FieldStorage,
    pub analyzer: Option<String>,  // Analyzer name, default analyzer when None
}

impl FieldOptions {
    pub fn analyzed() -> Self {
        FieldOptions {
            indexing: FieldIndexing::Analyzed,
            ..Default::default()
        }
    }

    pub fn not_analyzed() -> Self {
        FieldOptions {
            indexing: FieldIndexing::NotAnalyzed,
            ..Default::default()
        }
    }

    pub fn with_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }

    pub fn not_stored(mut self) -> Self {
        self.storage = FieldStorage::No;
        self
    }

    pub fn is_analyzed(&self) -> bool {
        self.indexing == FieldIndexing::Analyzed
    }
}

/// Declared output shape of an index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSchema {
    pub fields: BTreeMap<String, FieldOptions>,
    /// Accept predicates on any field name (automatic collection indexes).
    pub dynamic: bool,
}

impl IndexSchema {
    pub fn new() -> Self {
        IndexSchema::default()
    }

    pub fn dynamic() -> Self {
        IndexSchema {
            fields: BTreeMap::new(),
            dynamic: true,
        }
    }

    pub fn declare(&mut self, name: &str) {
        self.fields.entry(name.to_string()).or_default();
    }

    pub fn set_options(&mut self, name: &str, options: FieldOptions) {
        self.fields.insert(name.to_string(), options);
    }

    pub fn options(&self, name: &str) -> Option<&FieldOptions> {
        self.fields.get(name)
    }

    pub fn indexing(&self, name: &str) -> FieldIndexing {
        self.options(name).map(|o| o.indexing).unwrap_or_default()
    }

    pub fn analyzer_for(&self, name: &str) -> Option<&str> {
        self.options(name).and_then(|o| o.analyzer.as_deref())
    }

    pub fn analyzed_fields(&self) -> impl Iterator<Item = (&str, &FieldOptions)> {
        self.fields
            .iter()
            .filter(|(_, options)| options.is_analyzed())
            .map(|(name, options)| (name.as_str(), options))
    }

    pub fn is_stored(&self, name: &str) -> bool {
        self.options(name).map(|o| o.storage == FieldStorage::Yes).unwrap_or(true)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}
