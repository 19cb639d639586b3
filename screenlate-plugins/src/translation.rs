//! Translation engine interface
//!
//! Engines translate a single string between a language pair. Batch
//! translation has a default implementation that loops; engines with a real
//! batch path override it. Unsupported language pairs are an error, never a
//! silent identity.

use crate::{PluginError, Result};
use screenlate_capture::Rect;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A translated text block, positioned for the overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    /// Original text as recognized
    pub source_text: String,

    /// Translated text
    pub translated_text: String,

    /// Source language tag
    pub source_lang: String,

    /// Target language tag
    pub target_lang: String,

    /// Screen rectangle; starts as the OCR rectangle, adjusted by positioning
    pub rect: Rect,

    /// Translation confidence in [0, 1]
    pub confidence: f32,

    /// Name of the engine (or cache/dictionary) that produced this
    pub engine: String,
}

impl Translation {
    /// Create a translation
    pub fn new(
        source_text: impl Into<String>,
        translated_text: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        rect: Rect,
        confidence: f32,
        engine: impl Into<String>,
    ) -> Self {
        Self {
            source_text: source_text.into(),
            translated_text: translated_text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            rect,
            confidence: confidence.clamp(0.0, 1.0),
            engine: engine.into(),
        }
    }
}

/// A translation implementation
pub trait TranslationEngine: Send {
    /// Engine name for logs and plugin listings
    fn name(&self) -> &str;

    /// One-time initialization (model loading, endpoint checks)
    fn initialize(&mut self) -> Result<()>;

    /// Whether the engine can translate this pair
    fn supports_pair(&self, source_lang: &str, target_lang: &str) -> bool;

    /// Translate one string; returns the text and a confidence in [0, 1]
    fn translate(
        &mut self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<(String, f32)>;

    /// Translate several strings; the default loops over `translate`
    fn translate_batch(
        &mut self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<(String, f32)>> {
        texts
            .iter()
            .map(|t| self.translate(t, source_lang, target_lang))
            .collect()
    }

    /// Release resources before the engine is dropped or swapped
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Marker engine that wraps the source text with the target language tag
///
/// Exists so the full pipeline can run headless without a real model; the
/// output is visibly not a translation.
pub struct EchoTranslation {
    initialized: bool,
}

impl EchoTranslation {
    pub fn new() -> Self {
        Self { initialized: false }
    }
}

impl Default for EchoTranslation {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationEngine for EchoTranslation {
    fn name(&self) -> &str {
        "echo"
    }

    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn supports_pair(&self, _source_lang: &str, _target_lang: &str) -> bool {
        true
    }

    fn translate(
        &mut self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
    ) -> Result<(String, f32)> {
        if !self.initialized {
            return Err(PluginError::EngineFailure(
                "echo engine used before initialize".into(),
            ));
        }
        Ok((format!("[{}] {}", target_lang, text), 0.1))
    }
}

/// Exact-match glossary engine
///
/// Translates via a fixed `(source_lang, target_lang, text) -> translation`
/// table. Useful as an offline engine for fixed UI strings and as the
/// scripted engine in tests. Lookups are exact after trimming.
pub struct GlossaryTranslation {
    name: String,
    entries: HashMap<(String, String, String), (String, f32)>,
    pairs: std::collections::HashSet<(String, String)>,
    initialized: bool,
    calls: usize,
}

impl GlossaryTranslation {
    /// Empty glossary
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: HashMap::new(),
            pairs: std::collections::HashSet::new(),
            initialized: false,
            calls: 0,
        }
    }

    /// Add one glossary entry
    pub fn insert(
        &mut self,
        source_lang: &str,
        target_lang: &str,
        text: &str,
        translation: &str,
        confidence: f32,
    ) {
        self.pairs
            .insert((source_lang.to_string(), target_lang.to_string()));
        self.entries.insert(
            (
                source_lang.to_string(),
                target_lang.to_string(),
                text.trim().to_string(),
            ),
            (translation.to_string(), confidence.clamp(0.0, 1.0)),
        );
    }

    /// Number of `translate` calls so far
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl TranslationEngine for GlossaryTranslation {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn supports_pair(&self, source_lang: &str, target_lang: &str) -> bool {
        self.pairs
            .contains(&(source_lang.to_string(), target_lang.to_string()))
    }

    fn translate(
        &mut self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<(String, f32)> {
        if !self.initialized {
            return Err(PluginError::EngineFailure(
                "glossary engine used before initialize".into(),
            ));
        }
        if !self.supports_pair(source_lang, target_lang) {
            return Err(PluginError::UnsupportedLanguagePair {
                engine: self.name.clone(),
                source_lang: source_lang.to_string(),
                target: target_lang.to_string(),
            });
        }
        self.calls += 1;
        let key = (
            source_lang.to_string(),
            target_lang.to_string(),
            text.trim().to_string(),
        );
        self.entries
            .get(&key)
            .cloned()
            .ok_or_else(|| PluginError::EngineFailure(format!("no glossary entry for '{}'", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_marks_output() {
        let mut engine = EchoTranslation::new();
        engine.initialize().unwrap();
        let (text, conf) = engine.translate("hello", "en", "de").unwrap();
        assert_eq!(text, "[de] hello");
        assert!(conf < 0.5);
    }

    #[test]
    fn test_glossary_hit_and_miss() {
        let mut engine = GlossaryTranslation::new("glossary");
        engine.insert("ja", "en", "こんにちは", "hello", 0.95);
        engine.initialize().unwrap();

        let (text, conf) = engine.translate("こんにちは", "ja", "en").unwrap();
        assert_eq!(text, "hello");
        assert!((conf - 0.95).abs() < f32::EPSILON);

        assert!(engine.translate("さようなら", "ja", "en").is_err());
    }

    #[test]
    fn test_glossary_unsupported_pair_is_error_not_identity() {
        let mut engine = GlossaryTranslation::new("glossary");
        engine.insert("ja", "en", "こんにちは", "hello", 0.95);
        engine.initialize().unwrap();

        match engine.translate("hello", "en", "fr") {
            Err(PluginError::UnsupportedLanguagePair { source_lang, target, .. }) => {
                assert_eq!(source_lang, "en");
                assert_eq!(target, "fr");
            }
            other => panic!("expected UnsupportedLanguagePair, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_default_batch_loops() {
        let mut engine = GlossaryTranslation::new("glossary");
        engine.insert("ja", "en", "一", "one", 0.9);
        engine.insert("ja", "en", "二", "two", 0.9);
        engine.initialize().unwrap();

        let out = engine
            .translate_batch(&["一".to_string(), "二".to_string()], "ja", "en")
            .unwrap();
        assert_eq!(out[0].0, "one");
        assert_eq!(out[1].0, "two");
        assert_eq!(engine.calls(), 2);
    }
}
