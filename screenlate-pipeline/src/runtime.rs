//! The frame loop
//!
//! One dedicated worker thread owns every stage and the optimizer chain and
//! runs the tick protocol at the configured rate. The runtime is a state
//! machine: `Idle -> Running <-> Paused -> Stopping -> Idle`. Ticks that run
//! over their period are dropped, never queued. A stage that fails several
//! ticks in a row is declared dead: the runtime pauses with a user-visible
//! status instead of burning the CPU on a broken stage.

use crate::metrics::{timing, MetricsRegistry};
use crate::stages::{
    CaptureRequest, CaptureResponse, OcrRequest, OcrResponse, StageSet, TranslateRequest,
    TranslateResponse, TranslatedItem,
};
use crate::{PipelineConfig, PipelineError, Result};
use screenlate_cache::CacheManager;
use screenlate_capture::{Region, RegionSet, SimilarityGate};
use screenlate_optimize::{meta, Optimizer, OptimizerChain, OptimizerContext, Phase, PipelineData};
use screenlate_overlay::{
    FrameInfo, IntelligentPositioner, OverlayRenderer, PositionerConfig, UiInvoker,
};
use screenlate_plugins::{PluginRegistry, Translation};
use screenlate_worker::decode_frame;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Lifecycle states of the pipeline runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Idle,
    Running,
    Paused,
    Stopping,
}

impl RuntimeState {
    /// Whether transitioning from `self` to `next` is valid
    pub fn can_transition_to(self, next: RuntimeState) -> bool {
        matches!(
            (self, next),
            (RuntimeState::Idle, RuntimeState::Running)
                | (RuntimeState::Running, RuntimeState::Paused)
                | (RuntimeState::Running, RuntimeState::Stopping)
                | (RuntimeState::Paused, RuntimeState::Running)
                | (RuntimeState::Paused, RuntimeState::Stopping)
                | (RuntimeState::Stopping, RuntimeState::Idle)
        )
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuntimeState::Idle => "Idle",
            RuntimeState::Running => "Running",
            RuntimeState::Paused => "Paused",
            RuntimeState::Stopping => "Stopping",
        };
        f.write_str(s)
    }
}

/// Thread-safe holder for the runtime state
pub struct StateCell {
    state: Mutex<RuntimeState>,
}

impl StateCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(RuntimeState::Idle),
        }
    }

    /// Current state
    pub fn current(&self) -> RuntimeState {
        *lock(&self.state)
    }

    /// Attempt a validated transition
    pub fn transition(&self, next: RuntimeState) -> std::result::Result<RuntimeState, String> {
        let mut state = lock(&self.state);
        let current = *state;
        if !current.can_transition_to(next) {
            return Err(format!("invalid transition: {current} -> {next}"));
        }
        *state = next;
        tracing::info!("Pipeline state: {} -> {}", current, next);
        Ok(next)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything the runtime needs, assembled by the application
pub struct RuntimeDeps {
    pub stages: StageSet,
    pub chain: OptimizerChain,
    pub cache: Arc<CacheManager>,
    pub registry: Arc<PluginRegistry>,
    pub renderer: Arc<dyn OverlayRenderer>,
    pub invoker: Arc<dyn UiInvoker>,
    pub regions: RegionSet,
}

enum StageKind {
    Capture,
    Ocr,
    Translation,
}

impl StageKind {
    fn name(&self) -> &'static str {
        match self {
            StageKind::Capture => "capture",
            StageKind::Ocr => "ocr",
            StageKind::Translation => "translation",
        }
    }
}

/// The pipeline runtime
pub struct PipelineRuntime {
    config: PipelineConfig,
    stages: StageSet,
    chain: OptimizerChain,
    cache: Arc<CacheManager>,
    registry: Arc<PluginRegistry>,
    renderer: Arc<dyn OverlayRenderer>,
    invoker: Arc<dyn UiInvoker>,
    regions: RegionSet,
    positioner: IntelligentPositioner,
    metrics: Arc<MetricsRegistry>,
    state: Arc<StateCell>,
    gates: HashMap<String, SimilarityGate>,
    consecutive_failures: HashMap<&'static str, u32>,
}

impl PipelineRuntime {
    /// Create a runtime; the configuration is validated here
    pub fn new(config: PipelineConfig, deps: RuntimeDeps) -> Result<Self> {
        config.validate()?;
        if deps.regions.active().next().is_none() {
            return Err(PipelineError::ConfigInvalid(
                "region set has no enabled regions".into(),
            ));
        }
        let positioner = IntelligentPositioner::new(PositionerConfig::default());
        Ok(Self {
            config,
            stages: deps.stages,
            chain: deps.chain,
            cache: deps.cache,
            registry: deps.registry,
            renderer: deps.renderer,
            invoker: deps.invoker,
            regions: deps.regions,
            positioner,
            metrics: Arc::new(MetricsRegistry::new()),
            state: Arc::new(StateCell::new()),
            gates: HashMap::new(),
            consecutive_failures: HashMap::new(),
        })
    }

    /// The runtime's metrics registry
    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// The runtime's state cell
    pub fn state(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    /// Run one stage, tracking consecutive failures
    ///
    /// A stage that fails `max_consecutive_stage_failures` ticks in a row is
    /// declared dead: the runtime pauses with a user-visible status.
    fn run_stage(&mut self, kind: StageKind, data: serde_json::Value) -> Result<serde_json::Value> {
        let name = kind.name();
        let stage = match kind {
            StageKind::Capture => &mut self.stages.capture,
            StageKind::Ocr => &mut self.stages.ocr,
            StageKind::Translation => &mut self.stages.translation,
        };
        match stage.process(data) {
            Ok(value) => {
                self.consecutive_failures.insert(name, 0);
                Ok(value)
            }
            Err(e) => {
                if matches!(e, screenlate_worker::WorkerError::RequestTimeout { .. }) {
                    self.metrics.stage_timeouts.fetch_add(1, Ordering::Relaxed);
                }
                self.metrics.record_stage_failure(name);
                let count = self.consecutive_failures.entry(name).or_insert(0);
                *count += 1;
                tracing::warn!("{} stage failed ({} consecutive): {}", name, count, e);
                if *count >= self.config.max_consecutive_stage_failures {
                    self.metrics.set_status(Some(format!(
                        "{name} stage disabled after {count} consecutive failures"
                    )));
                    let _ = self.state.transition(RuntimeState::Paused);
                }
                Err(e.into())
            }
        }
    }

    fn run_phase(&mut self, phase: Phase, data: &mut PipelineData) {
        let cache = Arc::clone(&self.cache);
        let registry = Arc::clone(&self.registry);
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };
        self.chain.run_phase(phase, data, &ctx);
    }

    /// Run one tick over every active region
    ///
    /// Public so tests (and the in-process runtime embedding) can drive the
    /// pipeline deterministically without the scheduler thread.
    pub fn tick(&mut self) -> Result<()> {
        let tick_start = Instant::now();
        let regions: Vec<Region> = self.regions.active().cloned().collect();
        for region in regions {
            if let Err(e) = self.tick_region(&region) {
                tracing::debug!("Tick abandoned for region {}: {}", region.id, e);
            }
        }
        self.metrics.ticks.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_timing(timing::TICK, tick_start);
        Ok(())
    }

    fn tick_region(&mut self, region: &Region) -> Result<()> {
        // 1. Capture
        let capture_start = Instant::now();
        let request = serde_json::to_value(CaptureRequest {
            region: region.clone(),
        })?;
        let response = self.run_stage(StageKind::Capture, request)?;
        let captured: CaptureResponse = serde_json::from_value(response)?;
        let frame = decode_frame(&captured.image, captured.region.clone())?;
        self.metrics.frames_captured.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_timing(timing::CAPTURE, capture_start);

        // 2. Similarity gate
        let downsample = self.config.similarity_downsample;
        let gate = self
            .gates
            .entry(region.id.clone())
            .or_insert_with(|| SimilarityGate::with_downsample(downsample));
        let (frame_hash, similar) = gate.observe(&frame);
        self.cache.remember_frame(&frame_hash, frame.byte_size());

        if similar {
            // Identical content: nothing to re-OCR and nothing has moved
            self.metrics.frames_skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let mut data = PipelineData::new(&self.config.source_lang, &self.config.target_lang);
        data.frame_hash = Some(frame_hash.clone());
        data.frame = Some(frame);

        // 3. Pre-OCR optimizers (motion tracking, frame gating)
        self.run_phase(Phase::PreOcr, &mut data);
        if data.skip_ocr && !data.force_ocr {
            if let Some((dx, dy)) = data.overlay_offset {
                let renderer = Arc::clone(&self.renderer);
                self.invoker.invoke(Box::new(move || {
                    if let Err(e) = renderer.shift(dx, dy) {
                        tracing::warn!("Overlay shift failed: {}", e);
                    }
                }))?;
            }
            return Ok(());
        }

        // 4. OCR, through the result cache unless a fresh pass was forced
        let ocr_start = Instant::now();
        let cached_blocks = if data.force_ocr {
            None
        } else {
            self.cache.get_ocr(&frame_hash)
        };
        data.blocks = match cached_blocks {
            Some(blocks) => {
                self.metrics.ocr_cache_hits.fetch_add(1, Ordering::Relaxed);
                blocks
            }
            None => {
                let request = serde_json::to_value(OcrRequest {
                    image: captured.image,
                    region: captured.region.clone(),
                    options: self.config.ocr_options.clone(),
                })?;
                let response = self.run_stage(StageKind::Ocr, request)?;
                let parsed: OcrResponse = serde_json::from_value(response)?;
                self.metrics.ocr_runs.fetch_add(1, Ordering::Relaxed);
                self.cache.put_ocr(&frame_hash, &parsed.blocks);
                parsed.blocks
            }
        };
        self.metrics
            .blocks_recognized
            .fetch_add(data.blocks.len() as u64, Ordering::Relaxed);
        self.metrics.record_timing(timing::OCR, ocr_start);

        // 5. Post-OCR optimizers: merge, validate, spell-correct
        self.run_phase(Phase::PostOcr, &mut data);

        // 6. Translation: dictionary lookups, chain, parallel batch, then a
        //    sequential pass over whatever is left
        self.run_phase(Phase::PreTranslation, &mut data);
        self.run_phase(Phase::Translation, &mut data);

        let translate_start = Instant::now();
        let pending: Vec<usize> = data
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| !PipelineData::block_skips_translation(b))
            .map(|(i, _)| i)
            .collect();
        let mut engine_items: HashMap<usize, TranslatedItem> = HashMap::new();
        if !pending.is_empty() {
            let request = serde_json::to_value(TranslateRequest {
                texts: pending.iter().map(|&i| data.blocks[i].text.clone()).collect(),
                source_lang: self.config.source_lang.clone(),
                target_lang: self.config.target_lang.clone(),
            })?;
            let response = self.run_stage(StageKind::Translation, request)?;
            let parsed: TranslateResponse = serde_json::from_value(response)?;
            if parsed.items.len() != pending.len() {
                return Err(PipelineError::FatalInternal(format!(
                    "translation stage returned {} items for {} texts",
                    parsed.items.len(),
                    pending.len()
                )));
            }
            for (&index, item) in pending.iter().zip(parsed.items) {
                engine_items.insert(index, item);
            }
        }

        let engine_name = self
            .registry
            .active_translation_name()
            .unwrap_or_else(|| "engine".to_string());
        let mut translations: Vec<Translation> = Vec::with_capacity(data.blocks.len());
        for (index, block) in data.blocks.iter().enumerate() {
            let screen_rect = block.rect.translated(region.rect.x, region.rect.y);
            let translation = if PipelineData::block_skips_translation(block) {
                let translated = block
                    .meta(meta::TRANSLATED_TEXT)
                    .and_then(|v| v.as_str())
                    .unwrap_or(&block.text)
                    .to_string();
                let confidence = block
                    .meta(meta::TRANSLATION_CONFIDENCE)
                    .and_then(|v| v.as_f64())
                    .unwrap_or(1.0) as f32;
                let engine = block
                    .meta(meta::TRANSLATION_ENGINE)
                    .and_then(|v| v.as_str())
                    .unwrap_or("dictionary")
                    .to_string();
                Translation::new(
                    block.text.clone(),
                    translated,
                    self.config.source_lang.clone(),
                    self.config.target_lang.clone(),
                    screen_rect,
                    confidence,
                    engine,
                )
            } else if let Some(item) = engine_items.remove(&index) {
                if item.fallback {
                    self.metrics
                        .translation_fallbacks
                        .fetch_add(1, Ordering::Relaxed);
                }
                Translation::new(
                    block.text.clone(),
                    item.text,
                    self.config.source_lang.clone(),
                    self.config.target_lang.clone(),
                    screen_rect,
                    item.confidence,
                    if item.fallback {
                        "fallback".to_string()
                    } else {
                        engine_name.clone()
                    },
                )
            } else {
                continue;
            };
            translations.push(translation);
        }
        self.metrics
            .translations
            .fetch_add(translations.len() as u64, Ordering::Relaxed);
        self.metrics.record_timing(timing::TRANSLATE, translate_start);

        // 7. Position overlays
        self.positioner
            .position(&mut translations, &self.config.screen_bounds);

        // 8. Hand off to the renderer on the UI thread; one atomic replace
        let render_start = Instant::now();
        let info = FrameInfo {
            rect: region.rect,
            monitor_index: region.monitor_index,
        };
        let renderer = Arc::clone(&self.renderer);
        let to_render = translations.clone();
        self.invoker.invoke(Box::new(move || {
            if let Err(e) = renderer.render(&info, &to_render) {
                tracing::warn!("Overlay render failed: {}", e);
            }
        }))?;
        self.metrics.renders.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_timing(timing::RENDER, render_start);

        // 9. Learn validated new translations
        data.translations = translations;
        self.run_phase(Phase::PostTranslation, &mut data);

        Ok(())
    }

    /// Register chain optimizers after construction (tests, custom setups)
    pub fn push_optimizer(&mut self, optimizer: Box<dyn Optimizer>) {
        self.chain.push(optimizer);
    }

    /// Start the scheduler thread; consumes the runtime
    pub fn start(self) -> Result<PipelineHandle> {
        self.state
            .transition(RuntimeState::Running)
            .map_err(PipelineError::FatalInternal)?;

        let state = Arc::clone(&self.state);
        let metrics = Arc::clone(&self.metrics);
        let cache = Arc::clone(&self.cache);
        let thread = std::thread::Builder::new()
            .name("pipeline".into())
            .spawn(move || self.run_loop())
            .map_err(|e| PipelineError::FatalInternal(format!("pipeline thread: {e}")))?;

        Ok(PipelineHandle {
            state,
            metrics,
            cache,
            thread: Some(thread),
        })
    }

    fn run_loop(mut self) {
        let period = self.config.tick_period();
        tracing::info!(
            "Pipeline running at {} fps ({} ms period)",
            self.config.fps,
            period.as_millis()
        );

        loop {
            match self.state.current() {
                RuntimeState::Stopping | RuntimeState::Idle => break,
                RuntimeState::Paused => {
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                }
                RuntimeState::Running => {}
            }

            let tick_start = Instant::now();
            if let Err(e) = self.tick() {
                tracing::error!("Tick failed: {}", e);
            }

            // Late ticks are dropped, not queued
            let elapsed = tick_start.elapsed();
            if elapsed > period {
                let missed = (elapsed.as_secs_f64() / period.as_secs_f64()) as u64;
                self.metrics
                    .frames_skipped_late
                    .fetch_add(missed, Ordering::Relaxed);
                tracing::debug!(
                    "Tick ran {} ms over its {} ms period; dropping {} tick(s)",
                    elapsed.as_millis(),
                    period.as_millis(),
                    missed
                );
            } else {
                std::thread::sleep(period - elapsed);
            }
        }

        self.shutdown();
    }

    fn shutdown(mut self) {
        tracing::info!("Pipeline stopping");
        self.stages.capture.shutdown();
        self.stages.ocr.shutdown();
        self.stages.translation.shutdown();
        if let Err(e) = self.cache.flush() {
            tracing::warn!("Dictionary flush on shutdown failed: {}", e);
        }
        let _ = self.state.transition(RuntimeState::Idle);
        tracing::info!("Pipeline stopped");
    }
}

/// Handle to a started runtime
pub struct PipelineHandle {
    state: Arc<StateCell>,
    metrics: Arc<MetricsRegistry>,
    cache: Arc<CacheManager>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PipelineHandle {
    /// Current runtime state
    pub fn state(&self) -> RuntimeState {
        self.state.current()
    }

    /// Pause ticking; stages stay alive
    pub fn pause(&self) -> std::result::Result<(), String> {
        self.state.transition(RuntimeState::Paused).map(|_| ())
    }

    /// Resume from pause
    pub fn resume(&self) -> std::result::Result<(), String> {
        self.metrics.set_status(None);
        self.state.transition(RuntimeState::Running).map(|_| ())
    }

    /// Metrics registry
    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// Cache manager (stats for the control surface)
    pub fn cache(&self) -> Arc<CacheManager> {
        Arc::clone(&self.cache)
    }

    /// A cloneable controller for the control API
    pub fn controller(&self) -> PipelineController {
        PipelineController {
            state: Arc::clone(&self.state),
            metrics: Arc::clone(&self.metrics),
            cache: Arc::clone(&self.cache),
        }
    }

    /// Request shutdown and join the pipeline thread
    ///
    /// The thread gets a bounded grace period on top of the per-worker
    /// shutdown budget; a thread that still has not finished is detached
    /// with a warning rather than blocking the caller forever.
    pub fn stop(mut self) {
        let _ = self.state.transition(RuntimeState::Stopping);
        if let Some(thread) = self.thread.take() {
            let deadline = Instant::now() + Duration::from_secs(2);
            while !thread.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            if thread.is_finished() {
                let _ = thread.join();
            } else {
                tracing::warn!("Pipeline thread did not stop in time; detaching");
            }
        }
    }
}

/// Cloneable control surface over a running pipeline
#[derive(Clone)]
pub struct PipelineController {
    state: Arc<StateCell>,
    metrics: Arc<MetricsRegistry>,
    cache: Arc<CacheManager>,
}

impl PipelineController {
    pub fn state(&self) -> RuntimeState {
        self.state.current()
    }

    pub fn pause(&self) -> std::result::Result<(), String> {
        self.state.transition(RuntimeState::Paused).map(|_| ())
    }

    pub fn resume(&self) -> std::result::Result<(), String> {
        self.metrics.set_status(None);
        self.state.transition(RuntimeState::Running).map(|_| ())
    }

    pub fn request_stop(&self) -> std::result::Result<(), String> {
        self.state.transition(RuntimeState::Stopping).map(|_| ())
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    pub fn cache(&self) -> Arc<CacheManager> {
        Arc::clone(&self.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::build_stages;
    use screenlate_capture::{
        CaptureBackend, Frame, PixelFormat, Rect, ScriptedBackend,
    };
    use screenlate_overlay::{DirectInvoker, RecordingRenderer};
    use screenlate_plugins::{
        EchoTranslation, PluginDescriptor, PluginKind, StubOcr, TextBlock,
    };

    fn test_region() -> Region {
        Region::new("main", 0, Rect::new(100, 100, 64, 64))
    }

    fn frame_of(value: u8) -> Frame {
        Frame::new(
            vec![value; 64 * 64 * 3],
            64,
            64,
            PixelFormat::Rgb8,
            test_region(),
        )
        .unwrap()
    }

    struct TestRig {
        runtime: PipelineRuntime,
        renderer: Arc<RecordingRenderer>,
        dict_dir: std::path::PathBuf,
    }

    fn build_rig(tag: &str, frames: Vec<Frame>, ocr_script: Vec<Vec<TextBlock>>) -> TestRig {
        let dict_dir = std::env::temp_dir().join(format!(
            "screenlate-runtime-{}-{}",
            tag,
            std::process::id()
        ));
        std::fs::remove_dir_all(&dict_dir).ok();

        let mut backend = ScriptedBackend::new();
        for frame in frames {
            backend.push(frame);
        }

        let registry = PluginRegistry::new();
        registry.register_ocr(
            PluginDescriptor::new(PluginKind::Ocr, "stub").essential(),
            move || {
                let mut ocr = StubOcr::new();
                for blocks in ocr_script.clone() {
                    ocr.push_result(blocks);
                }
                Box::new(ocr)
            },
        );
        registry.register_translation(
            PluginDescriptor::new(PluginKind::Translation, "echo").essential(),
            || Box::new(EchoTranslation::new()),
        );
        let registry = Arc::new(registry);

        let cache = Arc::new(CacheManager::with_dictionary_dir(&dict_dir));
        let config = PipelineConfig {
            motion_tracking: false,
            ..Default::default()
        };
        let stages = build_stages(
            &config,
            Box::new(backend) as Box<dyn CaptureBackend>,
            Arc::clone(&registry),
            None,
        )
        .unwrap();
        let chain = crate::stages::build_default_chain(&config);

        let renderer = Arc::new(RecordingRenderer::new());
        let mut regions = RegionSet::new("test");
        regions.upsert(test_region());

        let runtime = PipelineRuntime::new(
            config,
            RuntimeDeps {
                stages,
                chain,
                cache,
                registry,
                renderer: Arc::clone(&renderer) as Arc<dyn OverlayRenderer>,
                invoker: Arc::new(DirectInvoker),
                regions,
            },
        )
        .unwrap();

        TestRig {
            runtime,
            renderer,
            dict_dir,
        }
    }

    fn block(text: &str, y: i32) -> TextBlock {
        TextBlock::new(text, Rect::new(0, y, 60, 20), 0.9)
    }

    #[test]
    fn test_identical_frames_skip_ocr() {
        let mut rig = build_rig(
            "skip",
            vec![frame_of(100), frame_of(100)],
            vec![vec![block("Hello there friend", 0)]],
        );

        rig.runtime.tick().unwrap();
        rig.runtime.tick().unwrap();

        let metrics = rig.runtime.metrics();
        assert_eq!(metrics.ocr_runs.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.frames_skipped.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.frames_captured.load(Ordering::Relaxed), 2);

        std::fs::remove_dir_all(&rig.dict_dir).ok();
    }

    #[test]
    fn test_changed_frame_with_same_text_hits_ocr_cache() {
        // Frame 3 repeats frame 1's content hash
        let mut rig = build_rig(
            "ocrcache",
            vec![frame_of(100), frame_of(200), frame_of(100)],
            vec![
                vec![block("First screen text", 0)],
                vec![block("Second screen text", 0)],
            ],
        );

        rig.runtime.tick().unwrap();
        rig.runtime.tick().unwrap();
        rig.runtime.tick().unwrap();

        let metrics = rig.runtime.metrics();
        assert_eq!(metrics.ocr_runs.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.ocr_cache_hits.load(Ordering::Relaxed), 1);

        std::fs::remove_dir_all(&rig.dict_dir).ok();
    }

    #[test]
    fn test_translations_reach_renderer_in_order() {
        let mut rig = build_rig(
            "render",
            vec![frame_of(10)],
            vec![vec![
                block("First line of text here.", 0),
                block("Second line of text here.", 100),
            ]],
        );

        rig.runtime.tick().unwrap();

        let rendered = rig.renderer.current();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].source_text, "First line of text here.");
        assert_eq!(rendered[1].source_text, "Second line of text here.");
        assert_eq!(rendered[0].translated_text, "[de] First line of text here.");
        // Screen coordinates include the region origin
        assert_eq!(rendered[0].rect.x, 100);
        assert_eq!(rig.renderer.renders(), 1);

        std::fs::remove_dir_all(&rig.dict_dir).ok();
    }

    #[test]
    fn test_garbage_blocks_never_reach_renderer() {
        let mut rig = build_rig(
            "garbage",
            vec![frame_of(10)],
            vec![vec![block("!!!###", 0), block("Real text goes here.", 100)]],
        );

        rig.runtime.tick().unwrap();

        let rendered = rig.renderer.current();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].source_text, "Real text goes here.");

        std::fs::remove_dir_all(&rig.dict_dir).ok();
    }

    #[test]
    fn test_state_machine_transitions() {
        assert!(RuntimeState::Idle.can_transition_to(RuntimeState::Running));
        assert!(RuntimeState::Running.can_transition_to(RuntimeState::Paused));
        assert!(RuntimeState::Paused.can_transition_to(RuntimeState::Running));
        assert!(RuntimeState::Paused.can_transition_to(RuntimeState::Stopping));
        assert!(!RuntimeState::Idle.can_transition_to(RuntimeState::Paused));
        assert!(!RuntimeState::Stopping.can_transition_to(RuntimeState::Running));
    }

    #[test]
    fn test_start_pause_resume_stop() {
        let rig = build_rig(
            "lifecycle",
            vec![frame_of(10)],
            vec![vec![block("Some visible text here", 0)]],
        );

        let handle = rig.runtime.start().unwrap();
        assert_eq!(handle.state(), RuntimeState::Running);

        handle.pause().unwrap();
        assert_eq!(handle.state(), RuntimeState::Paused);
        handle.resume().unwrap();
        assert_eq!(handle.state(), RuntimeState::Running);

        std::thread::sleep(Duration::from_millis(250));
        let metrics = handle.metrics();
        assert!(metrics.ticks.load(Ordering::Relaxed) > 0);

        handle.stop();
        std::fs::remove_dir_all(&rig.dict_dir).ok();
    }

    #[test]
    fn test_runtime_requires_active_region() {
        let rig = build_rig("noregion", vec![frame_of(1)], vec![vec![]]);
        // Rebuild with an empty region set
        drop(rig);
        let registry = Arc::new(PluginRegistry::new());
        let config = PipelineConfig::default();
        let stages = build_stages(
            &config,
            Box::new(ScriptedBackend::new()) as Box<dyn CaptureBackend>,
            Arc::clone(&registry),
            None,
        )
        .unwrap();
        let result = PipelineRuntime::new(
            config,
            RuntimeDeps {
                stages,
                chain: OptimizerChain::new(),
                cache: Arc::new(CacheManager::with_dictionary_dir(
                    std::env::temp_dir().join("screenlate-noregion"),
                )),
                registry,
                renderer: Arc::new(RecordingRenderer::new()),
                invoker: Arc::new(DirectInvoker),
                regions: RegionSet::new("empty"),
            },
        );
        assert!(matches!(result, Err(PipelineError::ConfigInvalid(_))));
    }
}
