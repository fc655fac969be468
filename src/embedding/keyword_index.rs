/// BM25 inverted index for keyword search
use ahash::{HashMap, HashMapExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index not finalized: call finalize() after adding fragments and before searching")]
    NotFinalized,

    #[error("Fragment already indexed: {0}")]
    DuplicateFragment(String),

    #[error("Posting for term '{term}' references unknown fragment {fragment_id}")]
    UnknownFragment { term: String, fragment_id: String },
}

/// BM25 ranking parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term frequency saturation
    pub k1: f32,
    /// Document length normalization strength (0.0 to 1.0)
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Search result with fragment ID and BM25 score
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSearchResult {
    pub fragment_id: String,
    pub score: f32,
}

/// A persisted (term, fragment, term frequency) triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub term: String,
    pub fragment_id: String,
    pub term_frequency: u32,
}

#[derive(Debug, Clone)]
struct IndexedFragment {
    fragment_id: String,
    length: u32,
}

/// Split text into lowercase terms
///
/// Splits on whitespace and strips leading/trailing punctuation, so inner
/// hyphens and digits survive ("covid-19," becomes "covid-19").
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|raw| {
            raw.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|term| !term.is_empty())
        .collect()
}

/// In-memory BM25 index over fragment text
///
/// Build with `add_fragment`, then `finalize` once before searching. After
/// finalization the index is read-only and `search` may be called from any
/// number of threads.
#[derive(Debug, Clone)]
pub struct KeywordIndex {
    params: Bm25Params,
    fragments: Vec<IndexedFragment>,
    slots: HashMap<String, u32>,
    // term -> (fragment slot, term frequency)
    postings: HashMap<String, Vec<(u32, u32)>>,
    avg_length: Option<f32>,
}

impl KeywordIndex {
    /// Create an empty index with default BM25 parameters
    pub fn new() -> Self {
        Self::with_params(Bm25Params::default())
    }

    pub fn with_params(params: Bm25Params) -> Self {
        Self {
            params,
            fragments: Vec::new(),
            slots: HashMap::new(),
            postings: HashMap::new(),
            avg_length: None,
        }
    }

    /// Rebuild a finalized index from persisted postings without re-tokenizing
    pub fn from_postings(
        params: Bm25Params,
        fragments: Vec<(String, u32)>,
        postings: Vec<Posting>,
    ) -> Result<Self, KeywordIndexError> {
        let mut index = Self::with_params(params);

        for (fragment_id, length) in fragments {
            index.push_fragment(fragment_id, length)?;
        }

        for posting in postings {
            let slot = *index.slots.get(&posting.fragment_id).ok_or_else(|| {
                KeywordIndexError::UnknownFragment {
                    term: posting.term.clone(),
                    fragment_id: posting.fragment_id.clone(),
                }
            })?;
            index
                .postings
                .entry(posting.term)
                .or_default()
                .push((slot, posting.term_frequency));
        }

        index.finalize();
        Ok(index)
    }

    /// Index a fragment's normalized text
    pub fn add_fragment(
        &mut self,
        fragment_id: &str,
        normalized_text: &str,
    ) -> Result<(), KeywordIndexError> {
        let terms = tokenize(normalized_text);
        let slot = self.push_fragment(fragment_id.to_string(), terms.len() as u32)?;

        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for term in terms {
            *frequencies.entry(term).or_insert(0) += 1;
        }

        for (term, tf) in frequencies {
            self.postings.entry(term).or_default().push((slot, tf));
        }

        Ok(())
    }

    fn push_fragment(&mut self, fragment_id: String, length: u32) -> Result<u32, KeywordIndexError> {
        if self.slots.contains_key(&fragment_id) {
            return Err(KeywordIndexError::DuplicateFragment(fragment_id));
        }

        let slot = self.fragments.len() as u32;
        self.slots.insert(fragment_id.clone(), slot);
        self.fragments.push(IndexedFragment {
            fragment_id,
            length,
        });
        // New content invalidates the corpus statistics
        self.avg_length = None;

        Ok(slot)
    }

    /// Compute corpus statistics; required before `search`
    pub fn finalize(&mut self) {
        let total: u64 = self.fragments.iter().map(|f| f.length as u64).sum();
        let avg = if self.fragments.is_empty() {
            0.0
        } else {
            total as f32 / self.fragments.len() as f32
        };

        debug!(
            "Keyword index finalized: {} fragments, {} terms, avg length {:.2}",
            self.fragments.len(),
            self.postings.len(),
            avg
        );

        self.avg_length = Some(avg);
    }

    pub fn is_finalized(&self) -> bool {
        self.avg_length.is_some()
    }

    /// Rank fragments against the query with BM25
    ///
    /// # Returns
    /// Up to `top_k` results sorted by score descending, ties broken by
    /// fragment ID ascending
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<KeywordSearchResult>, KeywordIndexError> {
        let avg_length = self.avg_length.ok_or(KeywordIndexError::NotFinalized)?;

        if top_k == 0 || self.fragments.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        let n = self.fragments.len() as f32;
        let Bm25Params { k1, b } = self.params;
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for term in &query_terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };

            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for &(slot, tf) in postings {
                let length = self.fragments[slot as usize].length as f32;
                let relative_length = if avg_length > 0.0 {
                    length / avg_length
                } else {
                    1.0
                };
                let tf = tf as f32;
                let term_score =
                    idf * (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * relative_length));
                *scores.entry(slot).or_insert(0.0) += term_score;
            }
        }

        let mut ranked: Vec<(u32, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| {
                self.fragments[a.0 as usize]
                    .fragment_id
                    .cmp(&self.fragments[b.0 as usize].fragment_id)
            })
        });
        ranked.truncate(top_k);

        Ok(ranked
            .into_iter()
            .map(|(slot, score)| KeywordSearchResult {
                fragment_id: self.fragments[slot as usize].fragment_id.clone(),
                score,
            })
            .collect())
    }

    /// Number of indexed fragments containing `term`
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, Vec::len)
    }

    /// Token length of an indexed fragment
    pub fn fragment_length(&self, fragment_id: &str) -> Option<u32> {
        self.slots
            .get(fragment_id)
            .map(|&slot| self.fragments[slot as usize].length)
    }

    /// Indexed fragments with their token lengths
    pub fn fragments(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.fragments
            .iter()
            .map(|f| (f.fragment_id.as_str(), f.length))
    }

    /// All postings as (term, fragment_id, term_frequency)
    pub fn postings(&self) -> impl Iterator<Item = (&str, &str, u32)> + '_ {
        self.postings.iter().flat_map(move |(term, entries)| {
            entries.iter().map(move |&(slot, tf)| {
                (
                    term.as_str(),
                    self.fragments[slot as usize].fragment_id.as_str(),
                    tf,
                )
            })
        })
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Get the number of fragments in the index
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new()
    }
}
