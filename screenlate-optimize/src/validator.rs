//! Text validator
//!
//! OCR on live screens produces plenty of garbage: window chrome fragments,
//! icon glyphs, dotted borders read as punctuation. The validator scores
//! every block and drops the ones that cannot be prose. Dropping preserves
//! the order of the survivors.

use crate::text::{has_cjk, is_cjk, is_common_word, is_known_word};
use crate::{meta, Optimizer, OptimizerContext, Phase, PipelineData, Result};
use serde_json::json;

/// Thresholds for the validator
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Minimum normalized length; "I", "A" and single CJK characters pass at 1
    pub min_length: usize,

    /// Minimum composite score for a block to survive
    pub min_confidence: f32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_length: 2,
            min_confidence: 0.3,
        }
    }
}

/// Outcome of validating one text
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    /// Whether the text should be kept
    pub is_valid: bool,

    /// Composite score in [0, 1]
    pub score: f32,

    /// Human-readable reason when invalid
    pub reason: Option<String>,
}

impl Validation {
    fn invalid(reason: &str) -> Self {
        Self {
            is_valid: false,
            score: 0.0,
            reason: Some(reason.to_string()),
        }
    }

    fn valid(score: f32) -> Self {
        Self {
            is_valid: true,
            score,
            reason: None,
        }
    }
}

fn longest_char_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut last: Option<char> = None;
    for c in text.chars() {
        if Some(c) == last {
            current += 1;
        } else {
            current = 1;
            last = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

/// Structural checks shared by block validation and sentence validation
///
/// Returns the rejection reason, or `None` when the text is structurally
/// sound. Deliberately vocabulary-free so it also holds for text in the
/// target language.
fn structural_reason(text: &str, min_length: usize) -> Option<&'static str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some("Empty text");
    }

    let char_count = trimmed.chars().count();
    let single_valid_word =
        char_count == 1 && (trimmed == "I" || trimmed == "A" || trimmed.chars().all(is_cjk));
    if char_count < min_length && !single_valid_word {
        return Some("Too short");
    }

    let has_letter = trimmed.chars().any(|c| c.is_alphabetic() || is_cjk(c));
    if !has_letter {
        // Covers digit-only and special-character-only blocks
        return Some("Garbage pattern detected");
    }
    if longest_char_run(trimmed) >= 5 {
        return Some("Garbage pattern detected");
    }
    None
}

/// Validate a single text against the garbage heuristics and score it
pub fn validate_text(text: &str, config: &ValidatorConfig) -> Validation {
    if let Some(reason) = structural_reason(text, config.min_length) {
        return Validation::invalid(reason);
    }
    let trimmed = text.trim();

    let score = composite_score(trimmed);
    if score < config.min_confidence {
        return Validation {
            is_valid: false,
            score,
            reason: Some("Low confidence score".to_string()),
        };
    }
    Validation::valid(score)
}

/// Composite plausibility score
///
/// common-word ratio x 0.3 + known-word ratio x 0.4, plus small bonuses for
/// grammatical shape, capitalization and punctuation. CJK tokens count as
/// known words since the vocabulary is Latin-only. A trailing hyphen marks a
/// likely line continuation and nudges the score up.
fn composite_score(text: &str) -> f32 {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && !is_cjk(c))
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return 0.0;
    }

    let common = words.iter().filter(|w| is_common_word(w)).count();
    let known = words
        .iter()
        .filter(|w| is_known_word(w) || has_cjk(w) || w.chars().all(|c| c.is_numeric()))
        .count();
    let mut score = (common as f32 / words.len() as f32) * 0.3
        + (known as f32 / words.len() as f32) * 0.4;

    // Grammar-pattern bonus: multi-word text reads like a phrase
    if words.len() >= 2 {
        score += 0.1;
    }
    // Proper capitalization bonus
    if text
        .chars()
        .next()
        .map(|c| c.is_uppercase() || is_cjk(c))
        .unwrap_or(false)
    {
        score += 0.1;
    }
    // Punctuation bonus
    if text
        .chars()
        .last()
        .map(|c| ".!?,:;。！？".contains(c))
        .unwrap_or(false)
    {
        score += 0.1;
    }
    // Sentence-continuation tie-break
    if text.ends_with('-') {
        score += 0.05;
    }

    score.min(1.0)
}

/// Minimal sentence validity used when deciding whether to learn a
/// translation: real text, not garbage, in any language. Vocabulary scoring
/// is deliberately skipped; it only models the OCR source language.
pub fn is_valid_sentence(text: &str) -> bool {
    structural_reason(text, ValidatorConfig::default().min_length).is_none()
}

/// The validator optimizer: drops invalid blocks, annotates survivors
pub struct TextValidator {
    config: ValidatorConfig,
    enabled: bool,
    dropped: u64,
}

impl TextValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            enabled: true,
            dropped: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Total blocks dropped over the session
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for TextValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl Optimizer for TextValidator {
    fn name(&self) -> &str {
        "text_validator"
    }

    fn phase(&self) -> Phase {
        Phase::PostOcr
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, data: &mut PipelineData, _ctx: &OptimizerContext) -> Result<()> {
        let before = data.blocks.len();
        data.blocks.retain_mut(|block| {
            let validation = validate_text(&block.text, &self.config);
            if validation.is_valid {
                block.set_meta(meta::VALIDATION_SCORE, json!(validation.score));
                true
            } else {
                tracing::trace!(
                    "Dropping block '{}': {}",
                    block.text,
                    validation.reason.as_deref().unwrap_or("invalid")
                );
                false
            }
        });
        self.dropped += (before - data.blocks.len()) as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screenlate_capture::Rect;
    use screenlate_cache::{CacheManager, CacheManagerConfig};
    use screenlate_plugins::{PluginRegistry, TextBlock};

    fn config() -> ValidatorConfig {
        ValidatorConfig::default()
    }

    #[test]
    fn test_garbage_special_chars() {
        let v = validate_text("!!!###", &config());
        assert!(!v.is_valid);
        assert_eq!(v.reason.as_deref(), Some("Garbage pattern detected"));
    }

    #[test]
    fn test_garbage_digits_only() {
        let v = validate_text("12345", &config());
        assert!(!v.is_valid);
        assert_eq!(v.reason.as_deref(), Some("Garbage pattern detected"));
    }

    #[test]
    fn test_garbage_repeated_character() {
        let v = validate_text("aaaaa", &config());
        assert!(!v.is_valid);
        assert_eq!(v.reason.as_deref(), Some("Garbage pattern detected"));
    }

    #[test]
    fn test_single_letter_exceptions() {
        assert!(validate_text("I", &config()).is_valid);
        assert!(validate_text("A", &config()).is_valid);
        assert!(validate_text("日", &config()).is_valid);
        assert!(!validate_text("x", &config()).is_valid);
    }

    #[test]
    fn test_normal_sentence_passes() {
        let v = validate_text("The quick brown fox jumps over the lazy dog.", &config());
        assert!(v.is_valid);
        assert!(v.score > 0.5);
    }

    #[test]
    fn test_cjk_sentence_passes() {
        assert!(validate_text("こんにちは世界", &config()).is_valid);
    }

    #[test]
    fn test_continuation_hyphen_tie_break() {
        let with = composite_score("Some sentence frag-");
        let without = composite_score("Some sentence frag");
        assert!(with > without);
    }

    #[test]
    fn test_sentence_validity_is_language_neutral() {
        assert!(is_valid_sentence("Guter Satz hier"));
        assert!(is_valid_sentence("こんにちは"));
        assert!(!is_valid_sentence("!!!###"));
        assert!(!is_valid_sentence("   "));
    }

    #[test]
    fn test_validator_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("screenlate-val-{}", std::process::id()));
        let cache = CacheManager::new(CacheManagerConfig {
            dictionary_dir: dir,
            ..Default::default()
        });
        let registry = PluginRegistry::new();
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut validator = TextValidator::default();
        let mut data = PipelineData::new("en", "de");
        data.blocks = vec![
            TextBlock::new("Hello there, how are you?", Rect::new(0, 0, 10, 10), 0.9),
            TextBlock::new("!!!###", Rect::new(0, 20, 10, 10), 0.9),
            TextBlock::new("The screen shows text.", Rect::new(0, 40, 10, 10), 0.9),
        ];

        validator.process(&mut data, &ctx).unwrap();
        let after_first: Vec<String> = data.blocks.iter().map(|b| b.text.clone()).collect();
        assert_eq!(
            after_first,
            vec!["Hello there, how are you?", "The screen shows text."]
        );

        validator.process(&mut data, &ctx).unwrap();
        let after_second: Vec<String> = data.blocks.iter().map(|b| b.text.clone()).collect();
        assert_eq!(after_first, after_second);
        assert_eq!(validator.dropped(), 1);
    }

    #[test]
    fn test_order_preserved() {
        let dir = std::env::temp_dir().join(format!("screenlate-valord-{}", std::process::id()));
        let cache = CacheManager::new(CacheManagerConfig {
            dictionary_dir: dir,
            ..Default::default()
        });
        let registry = PluginRegistry::new();
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut validator = TextValidator::default();
        let mut data = PipelineData::new("en", "de");
        // Geometrically out of order on purpose: OCR order must win
        data.blocks = vec![
            TextBlock::new("Second line of text here", Rect::new(0, 100, 10, 10), 0.9),
            TextBlock::new("First line of text here", Rect::new(0, 0, 10, 10), 0.9),
        ];
        validator.process(&mut data, &ctx).unwrap();
        assert_eq!(data.blocks[0].text, "Second line of text here");
        assert_eq!(data.blocks[1].text, "First line of text here");
    }
}
