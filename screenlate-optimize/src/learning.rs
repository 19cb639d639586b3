//! Learning-dictionary optimizers
//!
//! Two halves of the same loop. The lookup runs before translation and
//! satisfies blocks whose text the pipeline has already translated, marking
//! them `skip_translation`. The save runs after translation and feeds every
//! validated new pair back into the persistent dictionary, so tomorrow's
//! lookup is today's save.

use crate::validator::is_valid_sentence;
use crate::{meta, Optimizer, OptimizerContext, Phase, PipelineData, Result};
use serde_json::json;

/// Pre-translation dictionary lookup
pub struct DictionaryLookup {
    enabled: bool,
    hits: u64,
}

impl DictionaryLookup {
    pub fn new() -> Self {
        Self {
            enabled: true,
            hits: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Blocks satisfied from the dictionary over the session
    pub fn hits(&self) -> u64 {
        self.hits
    }
}

impl Default for DictionaryLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer for DictionaryLookup {
    fn name(&self) -> &str {
        "learning_dictionary_lookup"
    }

    fn phase(&self) -> Phase {
        Phase::PreTranslation
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, data: &mut PipelineData, ctx: &OptimizerContext) -> Result<()> {
        for block in data.blocks.iter_mut() {
            if PipelineData::block_skips_translation(block) {
                continue;
            }
            if let Some(translated) =
                ctx.cache
                    .get_translation(&data.source_lang, &data.target_lang, &block.text)
            {
                block.set_meta(meta::SKIP_TRANSLATION, json!(true));
                block.set_meta(meta::TRANSLATED_TEXT, json!(translated));
                block.set_meta(meta::TRANSLATION_CONFIDENCE, json!(1.0));
                block.set_meta(meta::TRANSLATION_ENGINE, json!("dictionary"));
                self.hits += 1;
            }
        }
        Ok(())
    }
}

/// Minimum confidence a translation needs before it is learned
pub const DEFAULT_MIN_SAVE_CONFIDENCE: f32 = 0.8;

/// Post-translation dictionary save
pub struct DictionarySave {
    enabled: bool,
    min_save_confidence: f32,
    saves: u64,
}

impl DictionarySave {
    pub fn new(min_save_confidence: f32) -> Self {
        Self {
            enabled: true,
            min_save_confidence,
            saves: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Pairs learned over the session
    pub fn saves(&self) -> u64 {
        self.saves
    }
}

impl Default for DictionarySave {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SAVE_CONFIDENCE)
    }
}

impl Optimizer for DictionarySave {
    fn name(&self) -> &str {
        "learning_dictionary_save"
    }

    fn phase(&self) -> Phase {
        Phase::PostTranslation
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, data: &mut PipelineData, ctx: &OptimizerContext) -> Result<()> {
        for translation in &data.translations {
            // Dictionary and cache hits are already learned
            if translation.engine == "dictionary" || translation.engine == "cache" {
                continue;
            }
            if translation.confidence < self.min_save_confidence {
                continue;
            }
            if translation.source_text.trim() == translation.translated_text.trim() {
                continue;
            }
            if !is_valid_sentence(&translation.source_text)
                || !is_valid_sentence(&translation.translated_text)
            {
                continue;
            }
            match ctx.cache.learn_translation(
                &translation.source_lang,
                &translation.target_lang,
                &translation.source_text,
                &translation.translated_text,
                translation.confidence,
                &translation.engine,
            ) {
                Ok(()) => self.saves += 1,
                Err(e) => tracing::warn!(
                    "Could not learn translation for '{}': {}",
                    translation.source_text,
                    e
                ),
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
    use screenlate_plugins::{PluginRegistry, TextBlock, Translation};

    fn parts(tag: &str) -> (CacheManager, PluginRegistry, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "screenlate-learn-{}-{}",
            tag,
            std::process::id()
        ));
        std::fs::remove_dir_all(&dir).ok();
        let cache = CacheManager::new(CacheManagerConfig {
            dictionary_dir: dir.clone(),
            ..Default::default()
        });
        (cache, PluginRegistry::new(), dir)
    }

    fn translation(source: &str, translated: &str, confidence: f32) -> Translation {
        Translation::new(
            source,
            translated,
            "en",
            "de",
            Rect::new(0, 0, 10, 10),
            confidence,
            "engine",
        )
    }

    #[test]
    fn test_lookup_marks_known_blocks() {
        let (cache, registry, dir) = parts("lookup");
        cache
            .learn_translation("en", "de", "Hello world", "Hallo Welt", 0.9, "e")
            .unwrap();
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut lookup = DictionaryLookup::new();
        let mut data = PipelineData::new("en", "de");
        data.blocks = vec![
            TextBlock::new("Hello world", Rect::new(0, 0, 10, 10), 0.9),
            TextBlock::new("Unknown text", Rect::new(0, 20, 10, 10), 0.9),
        ];
        lookup.process(&mut data, &ctx).unwrap();

        assert!(PipelineData::block_skips_translation(&data.blocks[0]));
        assert_eq!(
            data.blocks[0].meta(meta::TRANSLATED_TEXT).unwrap(),
            &json!("Hallo Welt")
        );
        assert!(!PipelineData::block_skips_translation(&data.blocks[1]));
        assert_eq!(lookup.hits(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_applies_all_gates() {
        let (cache, registry, dir) = parts("save");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut save = DictionarySave::default();
        let mut data = PipelineData::new("en", "de");
        data.translations = vec![
            translation("Good sentence here", "Guter Satz hier", 0.9), // saved
            translation("Low confidence text", "Niedrig", 0.5),        // below 0.8
            translation("Identical text", "Identical text", 0.95),     // identity
            translation("!!!###", "###!!!", 0.95),                     // invalid source
        ];
        save.process(&mut data, &ctx).unwrap();

        assert_eq!(save.saves(), 1);
        assert!(cache
            .dictionary()
            .lookup("en", "de", "Good sentence here")
            .is_some());
        assert!(cache
            .dictionary()
            .lookup("en", "de", "Low confidence text")
            .is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_skips_dictionary_sourced_translations() {
        let (cache, registry, dir) = parts("skipdict");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut save = DictionarySave::default();
        let mut data = PipelineData::new("en", "de");
        let mut t = translation("Some text here", "Etwas Text hier", 0.95);
        t.engine = "dictionary".to_string();
        data.translations = vec![t];
        save.process(&mut data, &ctx).unwrap();
        assert_eq!(save.saves(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
