//! Translation chain
//!
//! Some language pairs have no good direct engine; they route through an
//! intermediate ("ja -> de" as "ja -> en -> de"). The chain translates
//! stepwise, caches every intermediate hop, and on success persists both the
//! intermediate pairs and the direct pair to the learned dictionary. From
//! then on the same source string is a one-shot dictionary lookup.

use crate::{meta, Optimizer, OptimizerContext, Phase, PipelineData, Result};
use serde_json::json;
use std::collections::HashMap;

/// Configured chain routes: `(source, target) -> intermediate languages`
#[derive(Debug, Clone, Default)]
pub struct ChainRoutes {
    routes: HashMap<(String, String), Vec<String>>,
}

impl ChainRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a pair through the given intermediates
    pub fn add(&mut self, source_lang: &str, target_lang: &str, via: &[&str]) {
        self.routes.insert(
            (source_lang.to_string(), target_lang.to_string()),
            via.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// The intermediates configured for a pair, if any
    pub fn via(&self, source_lang: &str, target_lang: &str) -> Option<&[String]> {
        self.routes
            .get(&(source_lang.to_string(), target_lang.to_string()))
            .map(|v| v.as_slice())
    }
}

/// The translation-chain optimizer
pub struct TranslationChain {
    routes: ChainRoutes,
    // In-memory hop cache: (step_src, step_tgt, text) -> (text, confidence)
    hop_cache: HashMap<(String, String, String), (String, f32)>,
    enabled: bool,
    chains_completed: u64,
}

impl TranslationChain {
    pub fn new(routes: ChainRoutes) -> Self {
        Self {
            routes,
            hop_cache: HashMap::new(),
            enabled: true,
            chains_completed: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Chains fully completed over the session
    pub fn chains_completed(&self) -> u64 {
        self.chains_completed
    }

    fn translate_hop(
        &mut self,
        ctx: &OptimizerContext,
        text: &str,
        step_src: &str,
        step_tgt: &str,
    ) -> Result<(String, f32)> {
        let key = (
            step_src.to_string(),
            step_tgt.to_string(),
            text.to_string(),
        );
        if let Some(cached) = self.hop_cache.get(&key) {
            return Ok(cached.clone());
        }
        let result = ctx
            .registry
            .with_translation(|engine| engine.translate(text, step_src, step_tgt))?;
        self.hop_cache.insert(key, result.clone());
        Ok(result)
    }
}

impl Optimizer for TranslationChain {
    fn name(&self) -> &str {
        "translation_chain"
    }

    fn phase(&self) -> Phase {
        Phase::Translation
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, data: &mut PipelineData, ctx: &OptimizerContext) -> Result<()> {
        let via: Vec<String> = match self.routes.via(&data.source_lang, &data.target_lang) {
            Some(via) => via.to_vec(),
            None => return Ok(()),
        };
        let source_lang = data.source_lang.clone();
        let target_lang = data.target_lang.clone();

        for block in data.blocks.iter_mut() {
            if PipelineData::block_skips_translation(block) {
                continue;
            }

            // Direct pair first: a finished chain from an earlier tick means
            // no engine call at all
            if let Some(direct) =
                ctx.cache
                    .get_translation(&source_lang, &target_lang, &block.text)
            {
                block.set_meta(meta::SKIP_TRANSLATION, json!(true));
                block.set_meta(meta::TRANSLATED_TEXT, json!(direct));
                block.set_meta(meta::TRANSLATION_CONFIDENCE, json!(1.0));
                block.set_meta(meta::TRANSLATION_ENGINE, json!("dictionary"));
                continue;
            }

            // Step through the route
            let mut path = vec![source_lang.clone()];
            path.extend(via.iter().cloned());
            path.push(target_lang.clone());

            let mut hops: Vec<(String, String, String, String)> = Vec::new();
            let mut current = block.text.clone();
            let mut confidence: f32 = 1.0;
            let mut failed = false;
            for pair in path.windows(2) {
                let (step_src, step_tgt) = (&pair[0], &pair[1]);
                match self.translate_hop(ctx, &current, step_src, step_tgt) {
                    Ok((translated, hop_confidence)) => {
                        hops.push((
                            step_src.clone(),
                            step_tgt.clone(),
                            current.clone(),
                            translated.clone(),
                        ));
                        confidence = confidence.min(hop_confidence);
                        current = translated;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Chain hop {}->{} failed for '{}': {}",
                            step_src,
                            step_tgt,
                            current,
                            e
                        );
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                continue;
            }

            // Persist every hop and the direct pair; the direct save also
            // primes the translation cache
            for (hop_src, hop_tgt, hop_source_text, hop_translated) in &hops {
                if let Err(e) = ctx.cache.dictionary().save(
                    hop_src,
                    hop_tgt,
                    hop_source_text,
                    hop_translated,
                    confidence,
                    "chain",
                ) {
                    tracing::debug!("Skipping chain hop save: {}", e);
                }
            }
            if let Err(e) = ctx.cache.learn_translation(
                &source_lang,
                &target_lang,
                &block.text,
                &current,
                confidence,
                "chain",
            ) {
                tracing::debug!("Skipping chain direct save: {}", e);
            }

            block.set_meta(meta::SKIP_TRANSLATION, json!(true));
            block.set_meta(meta::TRANSLATED_TEXT, json!(current));
            block.set_meta(meta::TRANSLATION_CONFIDENCE, json!(confidence));
            block.set_meta(meta::TRANSLATION_ENGINE, json!("chain"));
            self.chains_completed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screenlate_cache::{CacheManager, CacheManagerConfig};
    use screenlate_capture::Rect;
    use screenlate_plugins::{
        GlossaryTranslation, PluginDescriptor, PluginKind, PluginRegistry, TextBlock,
    };

    fn chain_setup(tag: &str) -> (CacheManager, PluginRegistry, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "screenlate-chain-{}-{}",
            tag,
            std::process::id()
        ));
        std::fs::remove_dir_all(&dir).ok();
        let cache = CacheManager::new(CacheManagerConfig {
            dictionary_dir: dir.clone(),
            ..Default::default()
        });

        let registry = PluginRegistry::new();
        registry.register_translation(
            PluginDescriptor::new(PluginKind::Translation, "glossary").essential(),
            || {
                let mut engine = GlossaryTranslation::new("glossary");
                engine.insert("ja", "en", "こんにちは", "hello", 0.95);
                engine.insert("en", "de", "hello", "hallo", 0.95);
                Box::new(engine)
            },
        );
        (cache, registry, dir)
    }

    fn routed_chain() -> TranslationChain {
        let mut routes = ChainRoutes::new();
        routes.add("ja", "de", &["en"]);
        TranslationChain::new(routes)
    }

    #[test]
    fn test_chain_translates_and_persists_both_pairs() {
        let (cache, registry, dir) = chain_setup("persist");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut chain = routed_chain();
        let mut data = PipelineData::new("ja", "de");
        data.blocks = vec![TextBlock::new("こんにちは", Rect::new(0, 0, 40, 20), 0.9)];
        chain.process(&mut data, &ctx).unwrap();

        assert!(PipelineData::block_skips_translation(&data.blocks[0]));
        assert_eq!(
            data.blocks[0].meta(meta::TRANSLATED_TEXT).unwrap(),
            &json!("hallo")
        );

        // Both the intermediate and the direct pair were learned
        assert_eq!(
            cache
                .dictionary()
                .lookup("ja", "en", "こんにちは")
                .unwrap()
                .translation,
            "hello"
        );
        assert_eq!(
            cache
                .dictionary()
                .lookup("ja", "de", "こんにちは")
                .unwrap()
                .translation,
            "hallo"
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_second_call_uses_dictionary_not_engine() {
        let (cache, registry, dir) = chain_setup("oneshot");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut chain = routed_chain();
        let mut first = PipelineData::new("ja", "de");
        first.blocks = vec![TextBlock::new("こんにちは", Rect::new(0, 0, 40, 20), 0.9)];
        chain.process(&mut first, &ctx).unwrap();
        assert_eq!(chain.chains_completed(), 1);

        // Fresh chain instance: hop cache is cold, the dictionary is not
        let mut second_chain = routed_chain();
        let mut second = PipelineData::new("ja", "de");
        second.blocks = vec![TextBlock::new("こんにちは", Rect::new(0, 0, 40, 20), 0.9)];
        second_chain.process(&mut second, &ctx).unwrap();

        assert_eq!(
            second.blocks[0].meta(meta::TRANSLATED_TEXT).unwrap(),
            &json!("hallo")
        );
        assert_eq!(
            second.blocks[0].meta(meta::TRANSLATION_ENGINE).unwrap(),
            &json!("dictionary")
        );
        // Completed no new chain for the repeat
        assert_eq!(second_chain.chains_completed(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unrouted_pair_is_left_alone() {
        let (cache, registry, dir) = chain_setup("unrouted");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut chain = routed_chain();
        let mut data = PipelineData::new("en", "fr");
        data.blocks = vec![TextBlock::new("hello", Rect::new(0, 0, 40, 20), 0.9)];
        chain.process(&mut data, &ctx).unwrap();
        assert!(!PipelineData::block_skips_translation(&data.blocks[0]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_failed_hop_leaves_block_untranslated() {
        let (cache, registry, dir) = chain_setup("failhop");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut chain = routed_chain();
        let mut data = PipelineData::new("ja", "de");
        // Not in the glossary: the first hop fails
        data.blocks = vec![TextBlock::new("さようなら", Rect::new(0, 0, 40, 20), 0.9)];
        chain.process(&mut data, &ctx).unwrap();

        assert!(!PipelineData::block_skips_translation(&data.blocks[0]));
        assert!(cache.dictionary().lookup("ja", "de", "さようなら").is_none());

        std::fs::remove_dir_all(&dir).ok();
    }
}
