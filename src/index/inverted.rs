use std::collections::{BTreeMap, HashMap};
use crate::analysis::token::Token;
use crate::index::materialized::EntryKey;
use crate::index::posting::{Posting, PostingList};

/// Term of one field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Term {
    pub field: String,
    pub text: String,
}

impl Term {
    pub fn new(field: &str, text: &str) -> Self {
        Term {
            field: field.to_string(),
            text: text.to_string(),
        }
    }
}

/// Postings of the analyzed fields of an index's entries.
#[derive(Debug, Clone, Default)]
pub struct InvertedIndex {
    pub postings: HashMap<Term, PostingList>,
    entry_terms: BTreeMap<EntryKey, Vec<Term>>,
    total_tokens: usize,
}

impl InvertedIndex {
    pub fn new() -> Self {
        InvertedIndex::default()
    }

    /// Index the analyzed tokens of one field of an entry.
    pub fn add_field(&mut self, key: &EntryKey, field: &str, tokens: &[Token]) {
        if tokens.is_empty() {
            return;
        }
        let mut term_positions: HashMap<&str, Vec<u32>> = HashMap::new();

        for token in tokens {
            term_positions.entry(token.text.as_str())
                .or_default()
                .push(token.position);
        }

        let field_norm = 1.0 / (tokens.len() as f32).sqrt();
        let terms = self.entry_terms.entry(key.clone()).or_default();

        for (text, positions) in term_positions {
            let term = Term::new(field, text);
            let posting = Posting {
                key: key.clone(),
                term_freq: positions.len() as u32,
                positions,
                field_norm,
            };

            self.postings.entry(term.clone())
                .or_default()
                .add_posting(posting);
            terms.push(term);
        }

        self.total_tokens += tokens.len();
    }

    /// Drop every posting of `key`.
    pub fn remove_entry(&mut self, key: &EntryKey) {
        let Some(terms) = self.entry_terms.remove(key) else {
            return;
        };
        for term in terms {
            if let Some(list) = self.postings.get_mut(&term) {
                if let Some(posting) = list.get(key) {
                    self.total_tokens = self.total_tokens.saturating_sub(posting.term_freq as usize);
                }
                list.remove(key);
                if list.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
    }

    pub fn search_term(&self, term: &Term) -> Option<&PostingList> {
        self.postings.get(term)
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Analyzed tokens across every indexed field.
    pub fn token_count(&self) -> usize {
        self.total_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::Analyzer;

    fn key(id: &str) -> EntryKey {
        EntryKey::Document { id: id.to_string(), map: 0, row: 0 }
    }

    fn indexed(names: &[(&str, &str)]) -> InvertedIndex {
        let analyzer = Analyzer::simple();
        let mut index = InvertedIndex::new();
        for (id, name) in names {
            index.add_field(&key(id), "Name", &analyzer.analyze(name));
        }
        index
    }

    #[test]
    fn test_exact_tokens_only() {
        let index = indexed(&[("u/1", "Bob"), ("u/2", "Bobby"), ("u/3", "Bob Smith")]);
        let list = index.search_term(&Term::new("Name", "bob")).unwrap();
        let hits: Vec<_> = list.iter().map(|posting| posting.key.clone()).collect();
        assert_eq!(hits, vec![key("u/1"), key("u/3")]);
        assert!(list.get(&key("u/1")).unwrap().field_norm > list.get(&key("u/3")).unwrap().field_norm);
        assert_eq!(index.token_count(), 4);
    }

    #[test]
    fn test_remove_entry_drops_postings() {
        let mut index = indexed(&[("u/1", "Bob"), ("u/2", "Bob Smith")]);
        index.remove_entry(&key("u/1"));
        assert_eq!(index.search_term(&Term::new("Name", "bob")).map(|list| list.len()), Some(1));
        index.remove_entry(&key("u/2"));
        assert_eq!(index.term_count(), 0);
        assert_eq!(index.token_count(), 0);
    }

    #[test]
    fn test_terms_are_scoped_by_field() {
        let index = indexed(&[("u/1", "Rose")]);
        assert!(index.search_term(&Term::new("Gardner", "rose")).is_none());
        assert!(index.search_term(&Term::new("Name", "rose")).is_some());
    }
}
