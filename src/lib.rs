//! Earshot - hybrid retrieval over time-coded transcript fragments
//!
//! Finds the few passages of a transcript corpus that answer a question and
//! packages them as a bounded, citation-annotated evidence block. Lexical
//! (BM25) and semantic (embedding) candidates are merged, re-ranked for
//! diversity with Maximal Marginal Relevance, expanded with neighboring
//! fragments, trimmed at sentence boundaries and fitted to a token budget.

pub mod config;
pub mod context;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod fragment;
pub mod logging;
pub mod retrieval;
pub mod storage;

pub use corpus::Corpus;
pub use error::{EarshotError, Result};
