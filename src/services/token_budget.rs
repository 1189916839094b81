use std::sync::Arc;

use anyhow::{bail, Context};
use tiktoken_rs::CoreBPE;

use crate::core::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetPolicy {
    pub cap: usize,
    pub hard_limit: usize,
}

impl BudgetPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self { cap: settings.budget().token_cap, hard_limit: settings.budget().token_hard_limit }
    }

    pub fn effective_cap(&self) -> usize {
        self.cap.min(self.hard_limit)
    }
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self { cap: 25_000, hard_limit: 30_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetedText {
    pub text: String,
    pub truncated: bool,
    pub original_tokens: usize,
    pub kept_tokens: usize,
    /// Byte offset of the cut in the original text, when truncated.
    pub boundary: Option<usize>,
}

/// Deterministic token cap over extracted text using the `o200k_base` BPE,
/// whose vocabulary ships inside the binary.
#[derive(Clone)]
pub struct TokenBudgeter {
    bpe: Arc<CoreBPE>,
    policy: BudgetPolicy,
}

impl TokenBudgeter {
    pub fn new(policy: BudgetPolicy) -> anyhow::Result<Self> {
        if policy.effective_cap() == 0 {
            bail!("token cap must be positive");
        }
        let bpe = tiktoken_rs::o200k_base().context("Failed to load o200k_base tokenizer")?;
        Ok(Self { bpe: Arc::new(bpe), policy })
    }

    pub fn policy(&self) -> BudgetPolicy {
        self.policy
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    pub fn budget(&self, text: &str) -> BudgetedText {
        let cap = self.policy.effective_cap();
        let original_tokens = self.count(text);
        if original_tokens <= cap {
            return BudgetedText {
                text: text.to_string(),
                truncated: false,
                original_tokens,
                kept_tokens: original_tokens,
                boundary: None,
            };
        }

        let boundary = self
            .longest_fitting(&word_ends(text), text, cap)
            .or_else(|| self.longest_fitting(&char_ends(text), text, cap))
            .unwrap_or(0);

        let kept = &text[..boundary];
        BudgetedText {
            text: kept.to_string(),
            truncated: true,
            original_tokens,
            kept_tokens: self.count(kept),
            boundary: Some(boundary),
        }
    }

    /// Largest candidate offset whose prefix encodes to at most `cap` tokens.
    /// Only offsets that were actually measured are returned.
    fn longest_fitting(&self, candidates: &[usize], text: &str, cap: usize) -> Option<usize> {
        let mut best = None;
        let (mut lo, mut hi) = (0usize, candidates.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let end = candidates[mid];
            if self.count(&text[..end]) <= cap {
                best = Some(end);
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        best
    }
}

/// Byte offsets just past each whitespace-delimited word.
fn word_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut in_word = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_word {
                ends.push(idx);
            }
            in_word = false;
        } else {
            in_word = true;
        }
    }
    if in_word {
        ends.push(text.len());
    }
    ends
}

fn char_ends(text: &str) -> Vec<usize> {
    text.char_indices().map(|(idx, ch)| idx + ch.len_utf8()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budgeter(cap: usize) -> TokenBudgeter {
        TokenBudgeter::new(BudgetPolicy { cap, hard_limit: 30_000 }).expect("tokenizer")
    }

    fn essay(words: usize) -> String {
        let vocabulary = ["revenue", "analysis", "customers", "branch", "survey", "growth", "loan"];
        (0..words).map(|idx| vocabulary[idx % vocabulary.len()]).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn word_ends_skip_whitespace_runs() {
        assert_eq!(word_ends("ab  cd\ne"), vec![2, 6, 8]);
        assert_eq!(word_ends("  "), Vec::<usize>::new());
        assert_eq!(word_ends("tail "), vec![4]);
    }

    #[test]
    fn short_text_is_unchanged() {
        let budgeter = budgeter(100);
        let out = budgeter.budget("A short executive summary.");
        assert!(!out.truncated);
        assert_eq!(out.text, "A short executive summary.");
        assert_eq!(out.boundary, None);
    }

    #[test]
    fn long_text_is_cut_at_word_end_within_cap() {
        let budgeter = budgeter(50);
        let text = essay(400);
        let out = budgeter.budget(&text);

        assert!(out.truncated);
        assert!(out.original_tokens > 50);
        assert!(out.kept_tokens <= 50);
        assert_eq!(budgeter.count(&out.text), out.kept_tokens);
        assert!(text.starts_with(&out.text));

        let boundary = out.boundary.expect("boundary");
        assert!(!out.text.ends_with(char::is_whitespace));
        let next = text[boundary..].chars().next();
        assert!(next.map_or(true, char::is_whitespace));
    }

    #[test]
    fn truncation_is_deterministic() {
        let budgeter = budgeter(40);
        let text = essay(300);
        assert_eq!(budgeter.budget(&text), budgeter.budget(&text));
    }

    #[test]
    fn single_oversized_word_falls_back_to_char_boundary() {
        let budgeter = budgeter(5);
        let text = "é".repeat(400);
        let out = budgeter.budget(&text);

        assert!(out.truncated);
        assert!(!out.text.is_empty());
        assert!(out.kept_tokens <= 5);
        assert!(text.starts_with(&out.text));
    }

    #[test]
    fn hard_limit_caps_configured_cap() {
        let policy = BudgetPolicy { cap: 500, hard_limit: 20 };
        assert_eq!(policy.effective_cap(), 20);

        let budgeter = TokenBudgeter::new(policy).expect("tokenizer");
        let out = budgeter.budget(&essay(300));
        assert!(out.kept_tokens <= 20);
    }
}
