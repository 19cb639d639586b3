//! Application configuration
//!
//! One consolidated `config.toml` holds every subsystem's settings. Each
//! section deserializes into its own struct with sensible defaults, and the
//! sections convert into the concrete configs the library crates consume.

use anyhow::{Context, Result};
use screenlate_capture::{Rect, Region, RegionSet};
use screenlate_cache::CacheManagerConfig;
use screenlate_control::ControlConfig;
use screenlate_overlay::OverlayStyle;
use screenlate_pipeline::{ChainRouteConfig, PipelineConfig, RuntimeKind, WorkerCommands};
use screenlate_plugins::OcrOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub ocr: OcrSettings,
    #[serde(default)]
    pub translation: TranslationSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub overlay: OverlaySettings,
    #[serde(default)]
    pub control: ControlSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub region_sets: Vec<RegionSetSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Runtime kind: "in_process", "optimized" or "subprocess"
    pub runtime: RuntimeKind,
    /// Ticks per second
    pub fps: f32,
    /// Source language tag
    pub source_lang: String,
    /// Target language tag
    pub target_lang: String,
    /// Downsample factor for the frame-similarity gate
    pub similarity_downsample: u32,
    /// Minimum confidence before a translation is learned
    pub min_save_confidence: f32,
    /// Whether the motion tracker runs
    pub motion_tracking: bool,
    /// Whether the parallel-translation pool runs
    pub parallel_translation: bool,
    /// Stage deadlines in milliseconds
    pub capture_timeout_ms: u64,
    pub ocr_timeout_ms: u64,
    pub translation_timeout_ms: u64,
    /// Consecutive failures before a stage is disabled
    pub max_consecutive_stage_failures: u32,
    /// Language-chain routes
    pub chain_routes: Vec<ChainRouteSettings>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Optimized,
            fps: 10.0,
            source_lang: "en".to_string(),
            target_lang: "de".to_string(),
            similarity_downsample: 4,
            min_save_confidence: 0.8,
            motion_tracking: true,
            parallel_translation: false,
            capture_timeout_ms: 2_000,
            ocr_timeout_ms: 5_000,
            translation_timeout_ms: 10_000,
            max_consecutive_stage_failures: 3,
            chain_routes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainRouteSettings {
    pub source: String,
    pub target: String,
    pub via: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Engine name to activate at startup
    pub engine: String,
    /// Language hint passed to the engine
    pub language: String,
    /// Blocks below this confidence are dropped by the engine
    pub min_confidence: f32,
    /// Whether the engine runs its own preprocessing
    pub preprocessing: bool,
    /// Whether the engine may use the GPU
    pub gpu: bool,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            engine: "stub".to_string(),
            language: "en".to_string(),
            min_confidence: 0.3,
            preprocessing: true,
            gpu: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    /// Engine name to activate at startup
    pub engine: String,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            engine: "echo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub frame_max_entries: usize,
    pub frame_max_bytes: usize,
    pub ocr_max_entries: usize,
    pub ocr_max_bytes: usize,
    pub translation_max_entries: usize,
    pub translation_max_bytes: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            frame_max_entries: 100,
            frame_max_bytes: 50 * 1024 * 1024,
            ocr_max_entries: 500,
            ocr_max_bytes: 20 * 1024 * 1024,
            translation_max_entries: 1000,
            translation_max_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OverlaySettings {
    /// Style fields mirror [`OverlayStyle`]; omitted ones keep defaults
    pub font_size: Option<u32>,
    pub opacity: Option<f32>,
    pub max_line_length: Option<usize>,
    pub screen_margin: Option<i32>,
    pub click_through: Option<bool>,
    pub auto_contrast: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8164,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub log_to_file: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WorkerSettings {
    /// Command lines for the subprocess runtime
    pub capture: Vec<String>,
    pub ocr: Vec<String>,
    pub translation: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionSetSettings {
    pub name: String,
    #[serde(default)]
    pub regions: Vec<RegionSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionSettings {
    pub id: String,
    #[serde(default)]
    pub monitor: usize,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from a file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            tracing::info!("Loaded configuration from {}", path.display());
            Ok(config)
        } else {
            tracing::warn!(
                "{} not found, using default configuration",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Convert to PipelineConfig
    pub fn pipeline_config(&self, screen_bounds: Rect) -> PipelineConfig {
        PipelineConfig {
            kind: self.pipeline.runtime,
            fps: self.pipeline.fps,
            source_lang: self.pipeline.source_lang.clone(),
            target_lang: self.pipeline.target_lang.clone(),
            ocr_options: self.ocr_options(),
            similarity_downsample: self.pipeline.similarity_downsample,
            screen_bounds,
            min_save_confidence: self.pipeline.min_save_confidence,
            capture_timeout: Duration::from_millis(self.pipeline.capture_timeout_ms),
            ocr_timeout: Duration::from_millis(self.pipeline.ocr_timeout_ms),
            translation_timeout: Duration::from_millis(self.pipeline.translation_timeout_ms),
            max_consecutive_stage_failures: self.pipeline.max_consecutive_stage_failures,
            chain_routes: self
                .pipeline
                .chain_routes
                .iter()
                .map(|r| ChainRouteConfig {
                    source: r.source.clone(),
                    target: r.target.clone(),
                    via: r.via.clone(),
                })
                .collect(),
            motion_tracking: self.pipeline.motion_tracking,
            parallel_translation: self.pipeline.parallel_translation,
        }
    }

    /// Convert to OcrOptions
    pub fn ocr_options(&self) -> OcrOptions {
        OcrOptions {
            language: self.ocr.language.clone(),
            confidence_threshold: self.ocr.min_confidence,
            preprocessing: self.ocr.preprocessing,
            gpu: self.ocr.gpu,
            timeout_ms: self.pipeline.ocr_timeout_ms,
            ..Default::default()
        }
    }

    /// Convert to CacheManagerConfig rooted at the data directory
    pub fn cache_config(&self, dictionary_dir: PathBuf) -> CacheManagerConfig {
        CacheManagerConfig {
            frame: screenlate_cache::TierConfig::new(
                self.cache.frame_max_entries,
                self.cache.frame_max_bytes,
            ),
            ocr: screenlate_cache::TierConfig::new(
                self.cache.ocr_max_entries,
                self.cache.ocr_max_bytes,
            ),
            translation: screenlate_cache::TierConfig::new(
                self.cache.translation_max_entries,
                self.cache.translation_max_bytes,
            ),
            dictionary_dir,
            ..Default::default()
        }
    }

    /// Convert to OverlayStyle
    pub fn overlay_style(&self) -> OverlayStyle {
        let mut style = OverlayStyle::default();
        if let Some(v) = self.overlay.font_size {
            style.font_size = v;
        }
        if let Some(v) = self.overlay.opacity {
            style.opacity = v.clamp(0.0, 1.0);
        }
        if let Some(v) = self.overlay.max_line_length {
            style.max_line_length = v;
        }
        if let Some(v) = self.overlay.screen_margin {
            style.screen_margin = v;
        }
        if let Some(v) = self.overlay.click_through {
            style.click_through = v;
        }
        if let Some(v) = self.overlay.auto_contrast {
            style.auto_contrast = v;
        }
        style
    }

    /// Convert to ControlConfig
    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            host: self.control.host.clone(),
            port: self.control.port,
        }
    }

    /// Worker commands for the subprocess runtime, if configured
    pub fn worker_commands(&self) -> Option<WorkerCommands> {
        if self.workers.capture.is_empty()
            || self.workers.ocr.is_empty()
            || self.workers.translation.is_empty()
        {
            return None;
        }
        Some(WorkerCommands {
            capture: self.workers.capture.clone(),
            ocr: self.workers.ocr.clone(),
            translation: self.workers.translation.clone(),
        })
    }

    /// Resolve a region set by name; `None` picks the first configured set
    /// or a full-screen default
    pub fn region_set(&self, name: Option<&str>, screen_bounds: Rect) -> Result<RegionSet> {
        let settings = match name {
            Some(name) => Some(
                self.region_sets
                    .iter()
                    .find(|s| s.name == name)
                    .with_context(|| format!("Region set '{name}' not found in config"))?,
            ),
            None => self.region_sets.first(),
        };

        let mut set = match settings {
            Some(settings) => {
                let mut set = RegionSet::new(&settings.name);
                for r in &settings.regions {
                    let mut region =
                        Region::new(&r.id, r.monitor, Rect::new(r.x, r.y, r.width, r.height));
                    region.enabled = r.enabled;
                    set.upsert(region);
                }
                set
            }
            None => {
                let mut set = RegionSet::new("default");
                set.upsert(Region::new("fullscreen", 0, screen_bounds));
                set
            }
        };

        if set.active().next().is_none() {
            // A configured but empty set still needs something to capture
            set.upsert(Region::new("fullscreen", 0, screen_bounds));
        }
        Ok(set)
    }
}

/// Directory layout rooted at the executable's own directory
///
/// State deliberately lives next to the binary, never in the user profile.
#[derive(Debug, Clone)]
pub struct AppDirs {
    pub root: PathBuf,
    pub dictionary: PathBuf,
    pub models_ocr: PathBuf,
    pub models_translation: PathBuf,
    pub plugins: PathBuf,
    pub logs: PathBuf,
}

impl AppDirs {
    /// Resolve against the running executable
    pub fn resolve() -> Result<Self> {
        let exe = std::env::current_exe().context("Cannot locate the running executable")?;
        let root = exe
            .parent()
            .context("Executable has no parent directory")?
            .to_path_buf();
        Ok(Self::rooted_at(root))
    }

    /// Layout under an explicit root (tests)
    pub fn rooted_at(root: PathBuf) -> Self {
        Self {
            dictionary: root.join("dictionary"),
            models_ocr: root.join("models").join("ocr"),
            models_translation: root.join("models").join("translation"),
            plugins: root.join("plugins"),
            logs: root.join("logs"),
            root,
        }
    }

    /// Create every directory
    pub fn create_all(&self) -> Result<()> {
        for dir in [
            &self.dictionary,
            &self.models_ocr,
            &self.models_translation,
            &self.plugins,
            &self.logs,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Path of the consent record
    pub fn consent_file(&self) -> PathBuf {
        self.root.join("consent.toml")
    }
}
