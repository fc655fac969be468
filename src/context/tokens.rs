//! Token estimation and sentence-boundary trimming

use once_cell::sync::Lazy;
use regex::Regex;

// Sentence terminator, optional closing quotes/brackets, then whitespace or end of text
static SENTENCE_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[.!?\u{2026}]+["'\u{201D}\u{2019})\]]*(?:\s+|$)"#).unwrap()
});

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").unwrap());

/// Estimated token count: whitespace-delimited words
///
/// Additive over whitespace-joined parts, which is what lets the assembler
/// budget a block piece by piece.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Text cut down to a token cap
#[derive(Debug, Clone, PartialEq)]
pub struct Trimmed {
    pub text: String,
    pub trimmed: bool,
}

/// Cut `text` so it holds at most `cap` tokens
///
/// Prefers the last sentence boundary that fits. When even the first
/// sentence is longer than `cap`, falls back to the last whole word that
/// fits and appends an ellipsis; the cut never lands inside a word.
pub fn trim_to_token_cap(text: &str, cap: usize) -> Trimmed {
    let text = text.trim();
    if estimate_tokens(text) <= cap {
        return Trimmed {
            text: text.to_string(),
            trimmed: false,
        };
    }

    let mut best_end = None;
    for boundary in SENTENCE_END.find_iter(text) {
        let candidate = text[..boundary.end()].trim_end();
        if estimate_tokens(candidate) > cap {
            break;
        }
        best_end = Some(candidate.len());
    }

    if let Some(end) = best_end {
        return Trimmed {
            text: text[..end].to_string(),
            trimmed: true,
        };
    }

    let cut = WORD
        .find_iter(text)
        .take(cap)
        .last()
        .map(|word| word.end())
        .unwrap_or(0);

    let mut truncated = text[..cut].to_string();
    if !truncated.is_empty() {
        truncated.push('\u{2026}');
    }

    Trimmed {
        text: truncated,
        trimmed: true,
    }
}
