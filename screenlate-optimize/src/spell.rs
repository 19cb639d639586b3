//! Spell corrector
//!
//! Cleans up characteristic OCR misreads before translation. Three layers,
//! cheapest first: a learned-dictionary near-match short-circuits the whole
//! block; character-level substitutions fix classic confusions (`|` read for
//! `I`, `rn` read for `m`); finally, out-of-vocabulary tokens take the spell
//! checker's suggestion when it is close enough.

use crate::text::{has_cjk, is_known_word, similarity, suggest};
use crate::{meta, Optimizer, OptimizerContext, Phase, PipelineData, Result};
use serde_json::json;

/// Tunables for the corrector
#[derive(Debug, Clone)]
pub struct SpellConfig {
    /// Minimum similarity between token and suggestion to accept it
    pub min_confidence: f32,

    /// Accept any suggestion the checker offers, regardless of similarity
    pub aggressive: bool,

    /// Similarity above which a dictionary source text replaces the block
    pub dictionary_match_threshold: f32,
}

impl Default for SpellConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            aggressive: false,
            dictionary_match_threshold: 0.9,
        }
    }
}

/// Smart-quote and dash normalizations applied to every block
const CHAR_NORMALIZATIONS: &[(char, char)] = &[
    ('\u{2018}', '\''),
    ('\u{2019}', '\''),
    ('\u{201C}', '"'),
    ('\u{201D}', '"'),
    ('\u{2013}', '-'),
    ('\u{2014}', '-'),
];

/// Letter-pair misreads, applied only when the fix lands in the vocabulary
const PAIR_SUBSTITUTIONS: &[(&str, &str)] = &[("rn", "m"), ("cl", "d"), ("vv", "w")];

fn normalize_chars(text: &str) -> String {
    text.chars()
        .map(|c| {
            CHAR_NORMALIZATIONS
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .collect()
}

/// Fix `|` and `0` misreads that only make sense between letters, and the
/// standalone `|` / `l` tokens OCR produces for a capital I
fn fix_char_confusions(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        let prev_letter = i > 0 && chars[i - 1].is_alphabetic();
        let next_letter = i + 1 < chars.len() && chars[i + 1].is_alphabetic();
        let standalone = !prev_letter
            && !next_letter
            && (i == 0 || chars[i - 1].is_whitespace())
            && (i + 1 == chars.len() || chars[i + 1].is_whitespace());
        match c {
            '|' if standalone || (prev_letter && next_letter) => out.push('I'),
            '0' if prev_letter && next_letter => {
                // Match the case of the surrounding letters
                if chars[i - 1].is_uppercase() {
                    out.push('O')
                } else {
                    out.push('o')
                }
            }
            'l' if standalone => out.push('I'),
            _ => out.push(c),
        }
    }
    out
}

fn split_token(token: &str) -> (String, String, String) {
    let core_start = token
        .find(|c: char| c.is_alphanumeric())
        .unwrap_or(token.len());
    let core_end = token
        .rfind(|c: char| c.is_alphanumeric())
        .map(|i| i + token[i..].chars().next().map(char::len_utf8).unwrap_or(1))
        .unwrap_or(token.len());
    if core_start >= core_end {
        return (String::new(), token.to_string(), String::new());
    }
    (
        token[..core_start].to_string(),
        token[core_start..core_end].to_string(),
        token[core_end..].to_string(),
    )
}

fn match_capitalization(pattern: &str, word: &str) -> String {
    let upper_count = pattern.chars().filter(|c| c.is_uppercase()).count();
    let letter_count = pattern.chars().filter(|c| c.is_alphabetic()).count();
    if letter_count > 0 && upper_count == letter_count {
        return word.to_uppercase();
    }
    if pattern.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
        let mut chars = word.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    word.to_string()
}

/// Normalize chaotic casing: majority-upper goes all upper, a stray capital
/// in the middle goes title case
fn normalize_case(core: &str) -> String {
    let letters: Vec<char> = core.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 2 {
        return core.to_string();
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    let interior_upper = core.chars().skip(1).any(|c| c.is_uppercase());
    if !interior_upper {
        return core.to_string();
    }
    if upper * 2 > letters.len() {
        core.to_uppercase()
    } else {
        let lower = core.to_lowercase();
        match_capitalization("X", &lower)
    }
}

fn correct_token(token: &str, config: &SpellConfig) -> String {
    if token.chars().count() <= 2 || token.chars().all(|c| c.is_numeric()) || has_cjk(token) {
        return token.to_string();
    }
    let (prefix, core, suffix) = split_token(token);
    if core.is_empty() {
        return token.to_string();
    }

    let mut core = normalize_case(&core);
    let lower = core.to_lowercase();

    if !is_known_word(&lower) {
        // Letter-pair misreads first; only when the repaired word exists
        for (from, to) in PAIR_SUBSTITUTIONS {
            if lower.contains(from) {
                let candidate = lower.replace(from, to);
                if is_known_word(&candidate) {
                    core = match_capitalization(&core, &candidate);
                    return format!("{prefix}{core}{suffix}");
                }
            }
        }
        // Then the spell checker
        if let Some((word, sim)) = suggest(&lower) {
            if config.aggressive || sim >= config.min_confidence {
                core = match_capitalization(&core, word);
            }
        }
    }
    format!("{prefix}{core}{suffix}")
}

/// Correct one text: character fixes, then per-token vocabulary repair
pub fn correct_text(text: &str, config: &SpellConfig) -> String {
    let text = normalize_chars(text);
    let text = fix_char_confusions(&text);
    text.split(' ')
        .map(|token| correct_token(token, config))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The spell-corrector optimizer
pub struct SpellCorrector {
    config: SpellConfig,
    enabled: bool,
    corrections: u64,
}

impl SpellCorrector {
    pub fn new(config: SpellConfig) -> Self {
        Self {
            config,
            enabled: true,
            corrections: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Total blocks rewritten over the session
    pub fn corrections(&self) -> u64 {
        self.corrections
    }
}

impl Default for SpellCorrector {
    fn default() -> Self {
        Self::new(SpellConfig::default())
    }
}

impl Optimizer for SpellCorrector {
    fn name(&self) -> &str {
        "spell_corrector"
    }

    fn phase(&self) -> Phase {
        Phase::PostOcr
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, data: &mut PipelineData, ctx: &OptimizerContext) -> Result<()> {
        let known_sources = ctx
            .cache
            .dictionary()
            .source_texts(&data.source_lang, &data.target_lang);

        for block in data.blocks.iter_mut() {
            if has_cjk(&block.text) {
                continue;
            }

            // A near-match against text we have already translated wins over
            // any character-level guessing
            if let Some(known) = known_sources
                .iter()
                .find(|s| similarity(s, &block.text) > self.config.dictionary_match_threshold)
            {
                if *known != block.text {
                    block.text = known.clone();
                    block.set_meta(meta::SPELL_CORRECTED, json!("dictionary"));
                    self.corrections += 1;
                }
                continue;
            }

            let corrected = correct_text(&block.text, &self.config);
            if corrected != block.text {
                tracing::debug!("Spell-corrected '{}' -> '{}'", block.text, corrected);
                block.text = corrected;
                block.set_meta(meta::SPELL_CORRECTED, json!("checker"));
                self.corrections += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screenlate_capture::Rect;
    use screenlate_cache::{CacheManager, CacheManagerConfig};
    use screenlate_plugins::{PluginRegistry, TextBlock};

    fn config() -> SpellConfig {
        SpellConfig::default()
    }

    #[test]
    fn test_pipe_and_horne() {
        assert_eq!(
            correct_text("When | was at horne", &config()),
            "When I was at home"
        );
    }

    #[test]
    fn test_standalone_l_becomes_i() {
        assert_eq!(correct_text("l was here", &config()), "I was here");
    }

    #[test]
    fn test_zero_between_letters() {
        assert_eq!(correct_text("w0rd", &config()), "word");
    }

    #[test]
    fn test_numeric_tokens_untouched() {
        assert_eq!(correct_text("Room 1004 open", &config()), "Room 1004 open");
    }

    #[test]
    fn test_smart_quotes_normalized() {
        assert_eq!(
            correct_text("\u{2018}red\u{2019} text", &config()),
            "'red' text"
        );
    }

    #[test]
    fn test_known_words_untouched() {
        let text = "The quick morning light";
        assert_eq!(correct_text(text, &config()), text);
    }

    #[test]
    fn test_mixed_case_normalization() {
        // Majority upper goes all upper; stray capital goes title case
        assert_eq!(correct_text("WOrLD news", &config()), "WORLD news");
        assert_eq!(correct_text("heLlo there", &config()), "Hello there");
    }

    #[test]
    fn test_capitalization_preserved_on_suggestion() {
        assert_eq!(correct_text("Horne", &config()), "Home");
    }

    #[test]
    fn test_aggressive_accepts_weak_suggestions() {
        let weak = SpellConfig {
            aggressive: true,
            ..Default::default()
        };
        // "qzv" has no close vocabulary word; aggressive still takes the best
        let out = correct_text("qzv", &weak);
        assert_ne!(out, "qzv");
    }

    #[test]
    fn test_corrector_is_idempotent() {
        let once = correct_text("When | was at horne", &config());
        let twice = correct_text(&once, &config());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_dictionary_near_match_wins() {
        let dir = std::env::temp_dir().join(format!("screenlate-spell-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        let cache = CacheManager::new(CacheManagerConfig {
            dictionary_dir: dir.clone(),
            ..Default::default()
        });
        cache
            .learn_translation("en", "de", "Start the game now", "Starte das Spiel", 0.9, "e")
            .unwrap();
        let registry = PluginRegistry::new();
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut corrector = SpellCorrector::default();
        let mut data = PipelineData::new("en", "de");
        // One-character OCR slip against a known source text
        data.blocks = vec![TextBlock::new(
            "Start the game n0w",
            Rect::new(0, 0, 10, 10),
            0.9,
        )];
        corrector.process(&mut data, &ctx).unwrap();
        assert_eq!(data.blocks[0].text, "Start the game now");
        assert_eq!(
            data.blocks[0].meta(meta::SPELL_CORRECTED).unwrap(),
            &json!("dictionary")
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_cjk_blocks_left_alone() {
        let dir = std::env::temp_dir().join(format!("screenlate-spellcjk-{}", std::process::id()));
        let cache = CacheManager::new(CacheManagerConfig {
            dictionary_dir: dir,
            ..Default::default()
        });
        let registry = PluginRegistry::new();
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut corrector = SpellCorrector::default();
        let mut data = PipelineData::new("ja", "en");
        data.blocks = vec![TextBlock::new("こんにちは", Rect::new(0, 0, 10, 10), 0.9)];
        corrector.process(&mut data, &ctx).unwrap();
        assert_eq!(data.blocks[0].text, "こんにちは");
    }
}
