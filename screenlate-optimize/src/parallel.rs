//! Parallel translation
//!
//! Batches translation work onto a fixed pool of worker threads, each owning
//! its own engine instance. Workers warm-start once (initialize plus a dummy
//! translation) so model loading happens before real traffic. Harvesting is
//! deadline-bounded: whatever finished in time is used, the rest falls back
//! to the sequential path. Unrecoverable pool errors latch fallback mode and
//! the optimizer stays out of the way for the rest of the session.

use crate::{meta, OptimizeError, Optimizer, OptimizerContext, Phase, PipelineData, Result};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde_json::json;
use std::time::{Duration, Instant};

/// Pool sizing and harvest deadline
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Worker threads in the pool
    pub workers: usize,

    /// Maximum blocks submitted per tick
    pub batch_size: usize,

    /// Harvest deadline per batch
    pub timeout: Duration,

    /// Engine to instantiate per worker; `None` uses the active engine's name
    pub engine: Option<String>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 8,
            timeout: Duration::from_secs(5),
            engine: None,
        }
    }
}

enum Job {
    Translate {
        generation: u64,
        index: usize,
        text: String,
        source_lang: String,
        target_lang: String,
    },
}

struct JobResult {
    generation: u64,
    index: usize,
    outcome: std::result::Result<(String, f32), String>,
}

struct Pool {
    job_tx: Sender<Job>,
    result_rx: Receiver<JobResult>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Closing the job channel lets the workers drain and exit
        let (closed_tx, _) = unbounded();
        self.job_tx = closed_tx;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// The parallel-translation optimizer
pub struct ParallelTranslation {
    config: ParallelConfig,
    pool: Option<Pool>,
    fallback: bool,
    enabled: bool,
    generation: u64,
    batches: u64,
    harvest_timeouts: u64,
}

impl ParallelTranslation {
    pub fn new(config: ParallelConfig) -> Self {
        Self {
            config,
            pool: None,
            fallback: false,
            enabled: true,
            generation: 0,
            batches: 0,
            harvest_timeouts: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the optimizer latched itself off after pool errors
    pub fn in_fallback(&self) -> bool {
        self.fallback
    }

    /// Batches submitted to the pool over the session
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Batches with at least one unharvested result
    pub fn harvest_timeouts(&self) -> u64 {
        self.harvest_timeouts
    }

    fn latch_fallback(&mut self, reason: &str) {
        tracing::error!(
            "Parallel translation entering fallback mode for this session: {}",
            reason
        );
        self.fallback = true;
        self.pool = None;
    }

    fn ensure_pool(
        &mut self,
        ctx: &OptimizerContext,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        let engine_name = match self
            .config
            .engine
            .clone()
            .or_else(|| ctx.registry.active_translation_name())
        {
            Some(name) => name,
            None => {
                return Err(OptimizeError::Internal(
                    "no translation engine registered for the pool".into(),
                ))
            }
        };

        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<JobResult>();
        let (warm_tx, warm_rx) = unbounded::<std::result::Result<(), String>>();

        let mut handles = Vec::with_capacity(self.config.workers);
        for worker_id in 0..self.config.workers {
            let mut engine = ctx.registry.create_translation(&engine_name)?;
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let warm_tx = warm_tx.clone();
            let (warm_src, warm_tgt) = (source_lang.to_string(), target_lang.to_string());

            let handle = std::thread::Builder::new()
                .name(format!("translate-pool-{worker_id}"))
                .spawn(move || {
                    // Warm start: load models before real traffic arrives
                    if let Err(e) = engine.initialize() {
                        let _ = warm_tx.send(Err(e.to_string()));
                        return;
                    }
                    let _ = engine.translate("warm start", &warm_src, &warm_tgt);
                    let _ = warm_tx.send(Ok(()));

                    for job in job_rx.iter() {
                        match job {
                            Job::Translate {
                                generation,
                                index,
                                text,
                                source_lang,
                                target_lang,
                            } => {
                                let outcome = engine
                                    .translate(&text, &source_lang, &target_lang)
                                    .map_err(|e| e.to_string());
                                if result_tx
                                    .send(JobResult {
                                        generation,
                                        index,
                                        outcome,
                                    })
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                })
                .map_err(|e| OptimizeError::Internal(format!("pool spawn failed: {e}")))?;
            handles.push(handle);
        }

        // Every worker must report a successful warm start
        let warm_deadline = Instant::now() + self.config.timeout.max(Duration::from_secs(10));
        for _ in 0..self.config.workers {
            let remaining = warm_deadline.saturating_duration_since(Instant::now());
            match warm_rx.recv_timeout(remaining) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(OptimizeError::Internal(format!("warm start failed: {e}")))
                }
                Err(_) => {
                    return Err(OptimizeError::Internal("warm start timed out".into()));
                }
            }
        }

        tracing::info!(
            "Parallel translation pool ready: {} workers running '{}'",
            self.config.workers,
            engine_name
        );
        self.pool = Some(Pool {
            job_tx,
            result_rx,
            handles,
        });
        Ok(())
    }
}

impl Default for ParallelTranslation {
    fn default() -> Self {
        Self::new(ParallelConfig::default())
    }
}

impl Optimizer for ParallelTranslation {
    fn name(&self) -> &str {
        "parallel_translation"
    }

    fn phase(&self) -> Phase {
        Phase::Translation
    }

    fn enabled(&self) -> bool {
        self.enabled && !self.fallback
    }

    fn process(&mut self, data: &mut PipelineData, ctx: &OptimizerContext) -> Result<()> {
        let pending: Vec<usize> = data
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| !PipelineData::block_skips_translation(b))
            .map(|(i, _)| i)
            .take(self.config.batch_size)
            .collect();
        if pending.len() < 2 {
            // Nothing to parallelize
            return Ok(());
        }

        if let Err(e) = self.ensure_pool(ctx, &data.source_lang, &data.target_lang) {
            self.latch_fallback(&e.to_string());
            return Err(OptimizeError::FallbackMode {
                name: self.name().to_string(),
            });
        }
        self.generation += 1;
        self.batches += 1;
        let generation = self.generation;

        let (job_tx, result_rx) = match self.pool.as_ref() {
            Some(pool) => (pool.job_tx.clone(), pool.result_rx.clone()),
            None => return Ok(()),
        };
        for &index in &pending {
            let job = Job::Translate {
                generation,
                index,
                text: data.blocks[index].text.clone(),
                source_lang: data.source_lang.clone(),
                target_lang: data.target_lang.clone(),
            };
            if job_tx.send(job).is_err() {
                self.latch_fallback("pool shut down");
                return Err(OptimizeError::FallbackMode {
                    name: self.name().to_string(),
                });
            }
        }

        // Harvest until the deadline; late results are skipped, not waited on
        let deadline = Instant::now() + self.config.timeout;
        let mut harvested = 0usize;
        while harvested < pending.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.harvest_timeouts += 1;
                tracing::warn!(
                    "Parallel harvest deadline hit: {}/{} blocks translated",
                    harvested,
                    pending.len()
                );
                break;
            }
            match result_rx.recv_timeout(remaining) {
                Ok(result) if result.generation == generation => {
                    harvested += 1;
                    match result.outcome {
                        Ok((translated, confidence)) => {
                            let block = &mut data.blocks[result.index];
                            block.set_meta(meta::SKIP_TRANSLATION, json!(true));
                            block.set_meta(meta::TRANSLATED_TEXT, json!(translated));
                            block.set_meta(meta::TRANSLATION_CONFIDENCE, json!(confidence));
                            block.set_meta(meta::TRANSLATION_ENGINE, json!("parallel"));
                        }
                        Err(e) => {
                            tracing::debug!(
                                "Pool translation failed for block {}: {}",
                                result.index,
                                e
                            );
                        }
                    }
                }
                Ok(_) => {} // stale result from a timed-out batch
                Err(RecvTimeoutError::Timeout) => {
                    self.harvest_timeouts += 1;
                    tracing::warn!(
                        "Parallel harvest deadline hit: {}/{} blocks translated",
                        harvested,
                        pending.len()
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.latch_fallback("result channel closed");
                    return Err(OptimizeError::FallbackMode {
                        name: self.name().to_string(),
                    });
                }
            }
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

    fn setup(tag: &str) -> (CacheManager, PluginRegistry, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "screenlate-par-{}-{}",
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
                engine.insert("en", "de", "one", "eins", 0.9);
                engine.insert("en", "de", "two", "zwei", 0.9);
                engine.insert("en", "de", "three", "drei", 0.9);
                Box::new(engine)
            },
        );
        (cache, registry, dir)
    }

    fn blocks(texts: &[&str]) -> Vec<TextBlock> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| TextBlock::new(*t, Rect::new(0, 30 * i as i32, 50, 20), 0.9))
            .collect()
    }

    #[test]
    fn test_batch_translates_all_blocks() {
        let (cache, registry, dir) = setup("batch");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut parallel = ParallelTranslation::new(ParallelConfig {
            workers: 2,
            ..Default::default()
        });
        let mut data = PipelineData::new("en", "de");
        data.blocks = blocks(&["one", "two", "three"]);
        parallel.process(&mut data, &ctx).unwrap();

        let translated: Vec<_> = data
            .blocks
            .iter()
            .map(|b| b.meta(meta::TRANSLATED_TEXT).cloned())
            .collect();
        assert_eq!(
            translated,
            vec![
                Some(json!("eins")),
                Some(json!("zwei")),
                Some(json!("drei"))
            ]
        );
        assert!(!parallel.in_fallback());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_single_block_is_not_parallelized() {
        let (cache, registry, dir) = setup("single");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut parallel = ParallelTranslation::default();
        let mut data = PipelineData::new("en", "de");
        data.blocks = blocks(&["one"]);
        parallel.process(&mut data, &ctx).unwrap();
        assert!(!PipelineData::block_skips_translation(&data.blocks[0]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_failed_jobs_are_left_for_sequential_path() {
        let (cache, registry, dir) = setup("failed");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut parallel = ParallelTranslation::new(ParallelConfig {
            workers: 2,
            ..Default::default()
        });
        let mut data = PipelineData::new("en", "de");
        // "missing" has no glossary entry; its job errors
        data.blocks = blocks(&["one", "missing"]);
        parallel.process(&mut data, &ctx).unwrap();

        assert!(PipelineData::block_skips_translation(&data.blocks[0]));
        assert!(!PipelineData::block_skips_translation(&data.blocks[1]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_fallback_latches_when_no_engine_exists() {
        let dir = std::env::temp_dir().join(format!("screenlate-par-noeng-{}", std::process::id()));
        let cache = CacheManager::new(CacheManagerConfig {
            dictionary_dir: dir.clone(),
            ..Default::default()
        });
        let registry = PluginRegistry::new(); // nothing registered
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };

        let mut parallel = ParallelTranslation::default();
        let mut data = PipelineData::new("en", "de");
        data.blocks = blocks(&["one", "two"]);
        assert!(parallel.process(&mut data, &ctx).is_err());
        assert!(parallel.in_fallback());
        assert!(!parallel.enabled());

        std::fs::remove_dir_all(&dir).ok();
    }
}
