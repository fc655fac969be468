//! Neighbor expansion: stitch adjacent fragments around a selected one

use crate::fragment::{Fragment, FragmentStore};
use std::sync::Arc;
use tracing::trace;

/// A selected fragment plus whichever neighbors fit under the token cap
#[derive(Debug, Clone)]
pub struct ExpandedFragment {
    /// The fragment chosen by selection
    pub primary: Arc<Fragment>,
    /// Included fragments in document order (primary among them)
    pub fragments: Vec<Arc<Fragment>>,
    /// Verbatim text of `fragments`, space-joined
    pub text: String,
    /// Sum of the included fragments' token counts
    pub token_count: usize,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
}

impl ExpandedFragment {
    fn single(fragment: Arc<Fragment>) -> Self {
        Self {
            text: fragment.verbatim_text().to_string(),
            token_count: fragment.token_count(),
            start_time: fragment.start_time(),
            end_time: fragment.end_time(),
            fragments: vec![fragment.clone()],
            primary: fragment,
        }
    }

    pub fn fragment_ids(&self) -> Vec<String> {
        self.fragments
            .iter()
            .map(|f| f.fragment_id().to_string())
            .collect()
    }

    fn rebuild(&mut self) {
        self.text = self
            .fragments
            .iter()
            .map(|f| f.verbatim_text())
            .collect::<Vec<_>>()
            .join(" ");
        self.token_count = self.fragments.iter().map(|f| f.token_count()).sum();
        self.start_time = self
            .fragments
            .iter()
            .filter_map(|f| f.start_time())
            .reduce(f64::min);
        self.end_time = self
            .fragments
            .iter()
            .filter_map(|f| f.end_time())
            .reduce(f64::max);
    }
}

/// Best-effort expansion with the previous, then the next, neighbor
#[derive(Debug, Clone)]
pub struct ContextExpander {
    token_cap: usize,
    enabled: bool,
}

impl ContextExpander {
    pub fn new(token_cap: usize, enabled: bool) -> Self {
        Self { token_cap, enabled }
    }

    /// Expand `fragment` with its document neighbors while the total stays
    /// within the token cap. Missing neighbors are skipped.
    pub fn expand(&self, store: &FragmentStore, fragment: &Arc<Fragment>) -> ExpandedFragment {
        let mut expanded = ExpandedFragment::single(fragment.clone());
        if !self.enabled {
            return expanded;
        }

        let mut budget_used = fragment.token_count();

        if let Some(previous) = store.previous(fragment) {
            if budget_used + previous.token_count() <= self.token_cap {
                budget_used += previous.token_count();
                expanded.fragments.insert(0, previous.clone());
            } else {
                trace!(
                    "Skipping previous neighbor {} of {}: over cap",
                    previous.fragment_id(),
                    fragment.fragment_id()
                );
            }
        }

        if let Some(next) = store.next(fragment) {
            if budget_used + next.token_count() <= self.token_cap {
                expanded.fragments.push(next.clone());
            } else {
                trace!(
                    "Skipping next neighbor {} of {}: over cap",
                    next.fragment_id(),
                    fragment.fragment_id()
                );
            }
        }

        if expanded.fragments.len() > 1 {
            expanded.rebuild();
        }
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize, word: &str) -> String {
        vec![word; n].join(" ")
    }

    fn store_with(fragments: &[(&str, u32, usize, f64)]) -> FragmentStore {
        let mut store = FragmentStore::new();
        for (id, position, tokens, start) in fragments {
            store
                .insert(
                    Fragment::builder(*id, "doc", words(*tokens, id))
                        .position(*position)
                        .time_range(*start, start + 10.0)
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn test_expands_both_neighbors_within_cap() {
        let store = store_with(&[("prev", 4, 60, 40.0), ("mid", 5, 40, 50.0), ("next", 6, 60, 60.0)]);
        let expander = ContextExpander::new(180, true);

        let expanded = expander.expand(&store, store.get("mid").unwrap());
        assert_eq!(expanded.fragment_ids(), vec!["prev", "mid", "next"]);
        assert_eq!(expanded.token_count, 160);
        assert_eq!(expanded.start_time, Some(40.0));
        assert_eq!(expanded.end_time, Some(70.0));
        assert!(expanded.text.starts_with("prev"));
        assert!(expanded.text.ends_with("next"));
    }

    #[test]
    fn test_previous_neighbor_has_priority() {
        let store = store_with(&[("prev", 4, 60, 40.0), ("mid", 5, 40, 50.0), ("next", 6, 60, 60.0)]);
        let expander = ContextExpander::new(120, true);

        let expanded = expander.expand(&store, store.get("mid").unwrap());
        assert_eq!(expanded.fragment_ids(), vec!["prev", "mid"]);
        assert_eq!(expanded.token_count, 100);
    }

    #[test]
    fn test_skips_oversized_previous_but_takes_next() {
        let store = store_with(&[("prev", 4, 200, 40.0), ("mid", 5, 40, 50.0), ("next", 6, 60, 60.0)]);
        let expander = ContextExpander::new(180, true);

        let expanded = expander.expand(&store, store.get("mid").unwrap());
        assert_eq!(expanded.fragment_ids(), vec!["mid", "next"]);
    }

    #[test]
    fn test_missing_neighbors_are_not_errors() {
        let store = store_with(&[("only", 0, 40, 0.0)]);
        let expander = ContextExpander::new(180, true);

        let expanded = expander.expand(&store, store.get("only").unwrap());
        assert_eq!(expanded.fragment_ids(), vec!["only"]);
    }

    #[test]
    fn test_disabled_expander() {
        let store = store_with(&[("prev", 4, 10, 40.0), ("mid", 5, 10, 50.0)]);
        let expander = ContextExpander::new(180, false);

        let expanded = expander.expand(&store, store.get("mid").unwrap());
        assert_eq!(expanded.fragment_ids(), vec!["mid"]);
    }
}
