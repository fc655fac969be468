//! Evidence block assembly: citations, trimming and token budgeting

use super::expander::{ContextExpander, ExpandedFragment};
use super::tokens::{estimate_tokens, trim_to_token_cap};
use crate::fragment::{Fragment, FragmentStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Output contract handed to the answering consumer along with the excerpts
pub const ANSWER_INSTRUCTIONS: &str = "\
Answer the question using ONLY the excerpts below. Do not use outside knowledge.
Cite every claim with the marker of the excerpt that supports it, for example [E2].
If excerpts contradict each other, or the evidence is incomplete or uncertain, say so explicitly and cite the excerpts involved.
If the excerpts do not contain the answer, say that the evidence is insufficient.
End with exactly one line of the form \"Confidence: high\", \"Confidence: medium\" or \"Confidence: low\".";

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Token budget {budget} cannot fit the instructions and answer reserve ({required} tokens)")]
    BudgetTooSmall { required: usize, budget: usize },
}

/// Assembly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Maximum tokens of text per excerpt
    pub excerpt_token_cap: usize,
    /// Maximum tokens for instructions + excerpts + answer reserve
    pub total_token_budget: usize,
    /// Tokens kept free for the consumer's answer
    pub reserved_answer_tokens: usize,
    /// Stitch in adjacent fragments when they fit under the excerpt cap
    pub expand_neighbors: bool,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            excerpt_token_cap: 180,
            total_token_budget: 3000,
            reserved_answer_tokens: 500,
            expand_neighbors: true,
        }
    }
}

/// One cited excerpt in an evidence block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Excerpt {
    /// 1-based position, used for the `E{index}` marker
    pub index: usize,
    pub text: String,
    pub document_id: String,
    pub speaker_id: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    /// Fragments stitched into this excerpt, in document order
    pub fragment_ids: Vec<String>,
    /// The fragment that was selected; the others are neighbors
    pub primary_fragment_id: String,
    pub source_path: String,
    pub token_count: usize,
    pub trimmed: bool,
}

impl Excerpt {
    /// Citation marker, e.g. `E3`
    pub fn marker(&self) -> String {
        format!("E{}", self.index)
    }

    /// Human-readable time range, or `unknown`
    pub fn time_label(&self) -> String {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => format!("{}-{}", format_timestamp(start), format_timestamp(end)),
            (Some(start), None) => format!("{}-?", format_timestamp(start)),
            (None, Some(end)) => format!("?-{}", format_timestamp(end)),
            (None, None) => "unknown".to_string(),
        }
    }

    /// Header line plus text, as handed to the consumer
    pub fn render(&self) -> String {
        format!(
            "[{}] doc={} time={} speaker={}\n{}",
            self.marker(),
            self.document_id,
            self.time_label(),
            self.speaker_id.as_deref().unwrap_or("UNKNOWN"),
            self.text
        )
    }
}

/// Format seconds as `HH:MM:SS`; hours are not wrapped at 24
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// The bounded, cited unit of evidence returned for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBlock {
    pub query_id: Uuid,
    pub query: String,
    pub instructions: String,
    pub excerpts: Vec<Excerpt>,
    /// Instructions, question and rendered excerpts in one string
    pub rendered: String,
    /// Estimated tokens of `rendered` plus the answer reserve
    pub total_tokens: usize,
    /// Markers of excerpts dropped to meet the budget
    pub dropped: Vec<String>,
    /// Vector retrieval was skipped for this query
    pub degraded: bool,
}

impl EvidenceBlock {
    pub fn is_empty(&self) -> bool {
        self.excerpts.is_empty()
    }
}

/// Turns selected fragments into an [`EvidenceBlock`]
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    config: AssemblerConfig,
    expander: ContextExpander,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        let expander = ContextExpander::new(config.excerpt_token_cap, config.expand_neighbors);
        Self { config, expander }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Expand, trim, cite and budget the selected fragments
    ///
    /// `selected` is ordered best-first; when the budget is exceeded,
    /// excerpts are dropped from the end.
    pub fn assemble(
        &self,
        query_id: Uuid,
        query: &str,
        selected: &[Arc<Fragment>],
        store: &FragmentStore,
    ) -> Result<EvidenceBlock, AssemblyError> {
        let scaffold = Self::scaffold(query);
        let scaffold_tokens = estimate_tokens(&scaffold);
        let required = scaffold_tokens + self.config.reserved_answer_tokens;

        if required > self.config.total_token_budget {
            return Err(AssemblyError::BudgetTooSmall {
                required,
                budget: self.config.total_token_budget,
            });
        }

        let mut excerpts: Vec<Excerpt> = selected
            .iter()
            .enumerate()
            .map(|(i, fragment)| self.build_excerpt(i + 1, self.expander.expand(store, fragment)))
            .collect();

        let mut rendered: Vec<String> = excerpts.iter().map(Excerpt::render).collect();
        let mut excerpt_tokens: usize = rendered.iter().map(|r| estimate_tokens(r)).sum();
        let mut dropped = Vec::new();

        while required + excerpt_tokens > self.config.total_token_budget {
            let (Some(excerpt), Some(text)) = (excerpts.pop(), rendered.pop()) else {
                break;
            };
            excerpt_tokens -= estimate_tokens(&text);
            warn!(
                "Dropping excerpt {} (fragment {}) to stay within {} token budget",
                excerpt.marker(),
                excerpt.primary_fragment_id,
                self.config.total_token_budget
            );
            dropped.push(excerpt.marker());
        }

        let mut block = scaffold;
        for part in &rendered {
            block.push_str("\n\n");
            block.push_str(part);
        }

        let total_tokens = estimate_tokens(&block) + self.config.reserved_answer_tokens;

        debug!(
            "Assembled {} excerpts ({} dropped), {} of {} tokens",
            excerpts.len(),
            dropped.len(),
            total_tokens,
            self.config.total_token_budget
        );

        Ok(EvidenceBlock {
            query_id,
            query: query.to_string(),
            instructions: ANSWER_INSTRUCTIONS.to_string(),
            excerpts,
            rendered: block,
            total_tokens,
            dropped,
            degraded: false,
        })
    }

    fn scaffold(query: &str) -> String {
        format!("{}\n\nQuestion: {}\n\nExcerpts:", ANSWER_INSTRUCTIONS, query.trim())
    }

    fn build_excerpt(&self, index: usize, expanded: ExpandedFragment) -> Excerpt {
        let trimmed = trim_to_token_cap(&expanded.text, self.config.excerpt_token_cap);
        let primary = &expanded.primary;

        Excerpt {
            index,
            token_count: estimate_tokens(&trimmed.text),
            text: trimmed.text,
            trimmed: trimmed.trimmed,
            document_id: primary.document_id().to_string(),
            speaker_id: primary.speaker_id().map(str::to_string),
            start_time: expanded.start_time,
            end_time: expanded.end_time,
            fragment_ids: expanded.fragment_ids(),
            primary_fragment_id: primary.fragment_id().to_string(),
            source_path: primary.source_path().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sentences(count: usize, words_per_sentence: usize) -> String {
        (0..count)
            .map(|i| {
                let mut words: Vec<String> = (1..words_per_sentence).map(|w| format!("w{}", w)).collect();
                words.push(format!("end{}.", i));
                words.join(" ")
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn store_of(texts: &[String]) -> (FragmentStore, Vec<Arc<Fragment>>) {
        let mut store = FragmentStore::new();
        for (i, text) in texts.iter().enumerate() {
            store
                .insert(
                    Fragment::builder(format!("f{}", i), format!("doc{}", i), text.clone())
                        .speaker("S1")
                        .time_range(65.0, 80.5)
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        let selected = (0..texts.len())
            .map(|i| store.get(&format!("f{}", i)).unwrap().clone())
            .collect();
        (store, selected)
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00");
        assert_eq!(format_timestamp(65.9), "00:01:05");
        assert_eq!(format_timestamp(90061.0), "25:01:01");
    }

    #[test]
    fn test_render_with_placeholders() {
        let excerpt = Excerpt {
            index: 2,
            text: "We agreed to ship.".to_string(),
            document_id: "standup-7".to_string(),
            speaker_id: None,
            start_time: None,
            end_time: None,
            fragment_ids: vec!["a".to_string()],
            primary_fragment_id: "a".to_string(),
            source_path: String::new(),
            token_count: 4,
            trimmed: false,
        };

        assert_eq!(
            excerpt.render(),
            "[E2] doc=standup-7 time=unknown speaker=UNKNOWN\nWe agreed to ship."
        );
    }

    #[test]
    fn test_assemble_cites_in_order() {
        let (store, selected) = store_of(&[sentences(2, 5), sentences(3, 5)]);
        let assembler = ContextAssembler::new(AssemblerConfig::default());

        let block = assembler
            .assemble(Uuid::new_v4(), "what happened?", &selected, &store)
            .unwrap();

        assert_eq!(block.excerpts.len(), 2);
        assert_eq!(block.excerpts[0].marker(), "E1");
        assert_eq!(block.excerpts[1].marker(), "E2");
        assert!(block.rendered.contains("[E1] doc=doc0 time=00:01:05-00:01:20 speaker=S1"));
        assert!(block.rendered.starts_with(ANSWER_INSTRUCTIONS));
        assert!(block.rendered.contains("Question: what happened?"));
        assert!(block.total_tokens <= 3000);
        assert!(block.dropped.is_empty());
    }

    #[test]
    fn test_oversized_fragment_trimmed_at_sentence() {
        let (store, selected) = store_of(&[sentences(50, 10)]);
        let assembler = ContextAssembler::new(AssemblerConfig {
            excerpt_token_cap: 160,
            ..AssemblerConfig::default()
        });

        let block = assembler
            .assemble(Uuid::new_v4(), "agenda", &selected, &store)
            .unwrap();

        let excerpt = &block.excerpts[0];
        assert!(excerpt.trimmed);
        assert!(excerpt.token_count <= 160);
        assert!(excerpt.text.ends_with('.'));
        assert!(store.get("f0").unwrap().verbatim_text().starts_with(&excerpt.text));
    }

    #[test]
    fn test_drops_lowest_ranked_to_fit_budget() {
        let texts: Vec<String> = (0..6).map(|_| sentences(10, 10)).collect();
        let (store, selected) = store_of(&texts);

        let assembler = ContextAssembler::new(AssemblerConfig {
            excerpt_token_cap: 180,
            total_token_budget: 600,
            reserved_answer_tokens: 100,
            expand_neighbors: false,
        });

        let block = assembler
            .assemble(Uuid::new_v4(), "question", &selected, &store)
            .unwrap();

        assert!(block.total_tokens <= 600);
        assert!(!block.dropped.is_empty());
        assert_eq!(block.excerpts.len() + block.dropped.len(), 6);
        // Survivors keep their original markers, the tail is what goes
        assert_eq!(block.excerpts[0].marker(), "E1");
        assert_eq!(block.dropped[0], "E6");
    }

    #[test]
    fn test_budget_too_small() {
        let (store, selected) = store_of(&[sentences(1, 5)]);
        let assembler = ContextAssembler::new(AssemblerConfig {
            total_token_budget: 50,
            reserved_answer_tokens: 40,
            ..AssemblerConfig::default()
        });

        assert!(matches!(
            assembler.assemble(Uuid::new_v4(), "q", &selected, &store),
            Err(AssemblyError::BudgetTooSmall { .. })
        ));
    }

    #[test]
    fn test_empty_selection_gives_empty_block() {
        let store = FragmentStore::new();
        let assembler = ContextAssembler::new(AssemblerConfig::default());

        let block = assembler
            .assemble(Uuid::new_v4(), "anything", &[], &store)
            .unwrap();
        assert!(block.is_empty());
        assert!(block.total_tokens <= 3000);
    }

    proptest! {
        #[test]
        fn proptest_never_exceeds_budget(
            lengths in prop::collection::vec((1usize..40, 1usize..20), 0..12),
            cap in 20usize..200,
            budget in 400usize..2500,
            reserve in 0usize..100,
        ) {
            let texts: Vec<String> = lengths
                .iter()
                .map(|(count, words)| sentences(*count, *words))
                .collect();
            let (store, selected) = store_of(&texts);

            let assembler = ContextAssembler::new(AssemblerConfig {
                excerpt_token_cap: cap,
                total_token_budget: budget,
                reserved_answer_tokens: reserve,
                expand_neighbors: true,
            });

            let block = assembler
                .assemble(Uuid::new_v4(), "what was decided about the launch?", &selected, &store)
                .unwrap();

            prop_assert!(block.total_tokens <= budget);
            prop_assert_eq!(block.total_tokens, estimate_tokens(&block.rendered) + reserve);
            for excerpt in &block.excerpts {
                prop_assert!(excerpt.token_count <= cap);
            }
        }
    }
}
