use crate::index::materialized::EntryKey;

#[derive(Debug, Clone)]
pub struct Posting {
    pub key: EntryKey,
    pub term_freq: u32,       // Occurrences of the term in the field
    pub positions: Vec<u32>,  // Token positions within the field
    pub field_norm: f32,      // Length normalization factor
}

/// Posting list for a term, sorted by entry key.
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    pub postings: Vec<Posting>,
}

impl PostingList {
    pub fn add_posting(&mut self, posting: Posting) {
        match self.postings.binary_search_by(|p| p.key.cmp(&posting.key)) {
            Ok(pos) => self.postings[pos] = posting,
            Err(pos) => self.postings.insert(pos, posting),
        }
    }

    /// Drop the posting of `key`. Returns whether one existed.
    pub fn remove(&mut self, key: &EntryKey) -> bool {
        match self.postings.binary_search_by(|p| p.key.cmp(key)) {
            Ok(pos) => {
                self.postings.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, key: &EntryKey) -> Option<&Posting> {
        self.postings
            .binary_search_by(|p| p.key.cmp(key))
            .ok()
            .map(|pos| &self.postings[pos])
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Posting> {
        self.postings.iter()
    }
}
