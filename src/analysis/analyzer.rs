use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use rust_stemmers::Algorithm;
use crate::analysis::filter::TokenFilter;
use crate::analysis::filters::lowercase::LowercaseFilter;
use crate::analysis::filters::stemmer::StemmerFilter;
use crate::analysis::filters::stopword::StopWordFilter;
use crate::analysis::token::Token;
use crate::analysis::tokenizer::{SimpleTokenizer, StandardTokenizer, Tokenizer};

/// Analyzer used for `Analyzed` fields that do not name one.
pub const DEFAULT_ANALYZER: &str = "simple";

/// Text analysis pipeline
pub struct Analyzer {
    pub tokenizer: Box<dyn Tokenizer>,
    pub filters: Vec<Box<dyn TokenFilter>>,
    pub name: String,
}

impl Clone for Analyzer {
    fn clone(&self) -> Self {
        Analyzer {
            tokenizer: self.tokenizer.clone_box(),
            filters: self.filters.iter().map(|f| f.clone_box()).collect(),
            name: self.name.clone(),
        }
    }
}

impl Analyzer {
    pub fn new(name: impl Into<String>, tokenizer: Box<dyn Tokenizer>) -> Self {
        Analyzer {
            tokenizer,
            filters: Vec::new(),
            name: name.into(),
        }
    }

    pub fn add_filter(mut self, filter: Box<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);

        for filter in &self.filters {
            tokens = filter.filter(tokens);
        }

        tokens
    }

    /// Analyzed term texts, in order, duplicates kept.
    pub fn terms(&self, text: &str) -> Vec<String> {
        self.analyze(text).into_iter().map(|t| t.text).collect()
    }

    /// Case-folded, split on non-alphanumeric boundaries.
    pub fn simple() -> Self {
        Analyzer::new("simple", Box::new(SimpleTokenizer))
            .add_filter(Box::new(LowercaseFilter))
    }

    /// Unicode word boundaries, case-folded.
    pub fn standard() -> Self {
        Analyzer::new("standard", Box::new(StandardTokenizer::default()))
            .add_filter(Box::new(LowercaseFilter))
    }

    pub fn english() -> Self {
        Analyzer::new("english", Box::new(StandardTokenizer::default()))
            .add_filter(Box::new(LowercaseFilter))
            .add_filter(Box::new(StopWordFilter::english()))
            .add_filter(Box::new(StemmerFilter::new(Algorithm::English)))
    }
}

/// Registry for managing analyzers
pub struct AnalyzerRegistry {
    analyzers: RwLock<HashMap<String, Arc<Analyzer>>>,
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        let registry = AnalyzerRegistry {
            analyzers: RwLock::new(HashMap::new()),
        };

        registry.register(Analyzer::simple());
        registry.register(Analyzer::standard());
        registry.register(Analyzer::english());
        registry
    }

    pub fn register(&self, analyzer: Analyzer) {
        self.analyzers
            .write()
            .insert(analyzer.name.clone(), Arc::new(analyzer));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Analyzer>> {
        self.analyzers.read().get(name).cloned()
    }

    /// Named analyzer, falling back to the default one for unknown names.
    pub fn get_or_default(&self, name: Option<&str>) -> Arc<Analyzer> {
        let analyzers = self.analyzers.read();
        name.and_then(|n| analyzers.get(n))
            .or_else(|| analyzers.get(DEFAULT_ANALYZER))
            .cloned()
            .unwrap_or_else(|| Arc::new(Analyzer::simple()))
    }
}
