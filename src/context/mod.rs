//! Context assembly
//!
//! Turns the final selection into a bounded, citation-annotated evidence
//! block: neighbor expansion, sentence-boundary trimming, `E#` markers and
//! total token budgeting.

mod assembler;
mod expander;
mod tokens;

pub use assembler::{
    format_timestamp, AssemblerConfig, AssemblyError, ContextAssembler, EvidenceBlock, Excerpt,
    ANSWER_INSTRUCTIONS,
};
pub use expander::{ContextExpander, ExpandedFragment};
pub use tokens::{estimate_tokens, trim_to_token_cap, Trimmed};
