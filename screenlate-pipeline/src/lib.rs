//! Pipeline Runtime Module
//!
//! The frame loop that drives capture -> preprocessing -> OCR -> translation
//! -> overlay at a user-chosen frame rate. The runtime is a small state
//! machine on a dedicated worker thread; heavy stages run behind the uniform
//! `Stage` interface either in-process or in crash-isolated subprocesses,
//! and the optimizer chain transforms the carrier between stages.

use screenlate_capture::Rect;
use screenlate_plugins::OcrOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod metrics;
pub mod runtime;
pub mod stages;

pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use runtime::{
    PipelineController, PipelineHandle, PipelineRuntime, RuntimeDeps, RuntimeState,
};
pub use stages::{
    build_default_chain, build_stages, StageSet, WorkerCommands, WorkerOcrEngine,
    WorkerTranslationEngine,
};

/// Errors from the pipeline runtime
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] screenlate_capture::CaptureError),

    #[error(transparent)]
    Plugin(#[from] screenlate_plugins::PluginError),

    #[error(transparent)]
    Cache(#[from] screenlate_cache::CacheError),

    #[error(transparent)]
    Worker(#[from] screenlate_worker::WorkerError),

    #[error(transparent)]
    Overlay(#[from] screenlate_overlay::OverlayError),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Stage '{0}' is disabled after repeated failures")]
    StageDisabled(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal invariant violated: {0}")]
    FatalInternal(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Which execution graph to assemble at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// All stages inline on the pipeline thread; lowest overhead
    InProcess,

    /// Inline stages plus the optimizer chain and the cache manager
    Optimized,

    /// Capture, OCR and translation each in an isolated subprocess
    Subprocess,
}

/// A configured chain route (`source -> via... -> target`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRouteConfig {
    pub source: String,
    pub target: String,
    pub via: Vec<String>,
}

/// Pipeline configuration, assembled by the application from its config file
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Execution graph to run
    pub kind: RuntimeKind,

    /// Ticks per second
    pub fps: f32,

    /// Source language tag
    pub source_lang: String,

    /// Target language tag
    pub target_lang: String,

    /// Options handed to every OCR call
    pub ocr_options: OcrOptions,

    /// Downsample factor for the similarity gate
    pub similarity_downsample: u32,

    /// Screen bounds the positioner clamps to
    pub screen_bounds: Rect,

    /// Minimum confidence for learning a translation
    pub min_save_confidence: f32,

    /// Capture stage deadline
    pub capture_timeout: Duration,

    /// OCR stage deadline
    pub ocr_timeout: Duration,

    /// Translation stage deadline
    pub translation_timeout: Duration,

    /// Consecutive failures before a stage is declared dead
    pub max_consecutive_stage_failures: u32,

    /// Language-chain routes
    pub chain_routes: Vec<ChainRouteConfig>,

    /// Whether the motion tracker runs
    pub motion_tracking: bool,

    /// Whether the parallel-translation pool runs
    pub parallel_translation: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kind: RuntimeKind::Optimized,
            fps: 10.0,
            source_lang: "en".to_string(),
            target_lang: "de".to_string(),
            ocr_options: OcrOptions::default(),
            similarity_downsample: 4,
            screen_bounds: Rect::new(0, 0, 1920, 1080),
            min_save_confidence: 0.8,
            capture_timeout: Duration::from_secs(2),
            ocr_timeout: Duration::from_secs(5),
            translation_timeout: Duration::from_secs(10),
            max_consecutive_stage_failures: 3,
            chain_routes: Vec::new(),
            motion_tracking: true,
            parallel_translation: false,
        }
    }
}

impl PipelineConfig {
    /// Validate ranges; refuse to start on nonsense
    pub fn validate(&self) -> Result<()> {
        if !(0.1..=60.0).contains(&self.fps) {
            return Err(PipelineError::ConfigInvalid(format!(
                "fps {} out of range (0.1-60)",
                self.fps
            )));
        }
        if self.source_lang.is_empty() || self.target_lang.is_empty() {
            return Err(PipelineError::ConfigInvalid(
                "source and target languages must be set".into(),
            ));
        }
        if self.source_lang == self.target_lang {
            return Err(PipelineError::ConfigInvalid(
                "source and target languages must differ".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_save_confidence) {
            return Err(PipelineError::ConfigInvalid(
                "min_save_confidence must be within [0, 1]".into(),
            ));
        }
        if self.screen_bounds.is_empty() {
            return Err(PipelineError::ConfigInvalid("screen bounds are empty".into()));
        }
        Ok(())
    }

    /// Tick period derived from fps
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }
}
