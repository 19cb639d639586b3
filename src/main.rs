//! screenlate - Main Binary
//!
//! Headless entry point for the real-time on-screen translation pipeline:
//! - Consolidated config.toml configuration
//! - Consent gate before the first run
//! - Plugin discovery and engine selection
//! - Pipeline runtime on a dedicated thread
//! - Loopback control API for status, metrics, pause/resume, stop
//! - Graceful shutdown handling

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use screenlate_capture::{CaptureBackend, MonitorInfo, Rect, ScreenBackend};
use screenlate_cache::CacheManager;
use screenlate_control::ControlServer;
use screenlate_overlay::{DirectInvoker, FrameInfo, OverlayRenderer, OverlayStyle, UiInvoker};
use screenlate_pipeline::{
    build_default_chain, build_stages, PipelineRuntime, RuntimeDeps, RuntimeKind, RuntimeState,
    WorkerOcrEngine, WorkerTranslationEngine,
};
use screenlate_plugins::{
    EchoTranslation, GlossaryTranslation, PluginDescriptor, PluginKind, PluginRegistry, StubOcr,
    Translation,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod consent;

use config::{AppConfig, AppDirs};
use consent::{ConsentRecord, ModelMode};

#[derive(Parser)]
#[command(
    name = "screenlate",
    version,
    about = "Real-time on-screen translation pipeline"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the pipeline and run until stopped
    Run {
        /// Override the runtime kind (in_process, optimized, subprocess)
        #[arg(long)]
        runtime: Option<String>,

        /// Region set to capture
        #[arg(long)]
        region_set: Option<String>,

        /// Override the source language
        #[arg(long)]
        source: Option<String>,

        /// Override the target language
        #[arg(long)]
        target: Option<String>,

        /// Override the frame rate
        #[arg(long)]
        fps: Option<f32>,
    },

    /// Validate the configuration and exit
    Check,

    /// Show or record consent
    Consent {
        #[command(subcommand)]
        action: ConsentAction,
    },

    /// List configured region sets
    Regions,

    /// Talk to a running instance over the control API
    Ctl {
        #[command(subcommand)]
        action: CtlAction,

        /// Control API port of the running instance
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand)]
enum ConsentAction {
    /// Show the current consent state
    Status,
    /// Accept the terms and choose a model mode
    Accept {
        /// Model mode: local, online or hybrid
        #[arg(long, default_value = "local")]
        model_mode: String,
    },
}

#[derive(Subcommand)]
enum CtlAction {
    Status,
    Metrics,
    Pause,
    Resume,
    Stop,
}

/// Headless overlay renderer: logs what a GUI shell would draw
struct LoggingRenderer {
    style: OverlayStyle,
    state: std::sync::Mutex<Vec<Translation>>,
}

impl LoggingRenderer {
    fn new(style: OverlayStyle) -> Self {
        Self {
            style,
            state: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn wrap(&self, text: &str) -> String {
        let max = self.style.max_line_length.max(1);
        let mut lines = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines.join(" / ")
    }
}

impl OverlayRenderer for LoggingRenderer {
    fn render(
        &self,
        frame: &FrameInfo,
        translations: &[Translation],
    ) -> screenlate_overlay::Result<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = translations.to_vec();
        for t in translations {
            info!(
                monitor = frame.monitor_index,
                x = t.rect.x,
                y = t.rect.y,
                engine = %t.engine,
                "overlay: {}",
                self.wrap(&t.translated_text)
            );
        }
        Ok(())
    }

    fn shift(&self, dx: i32, dy: i32) -> screenlate_overlay::Result<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for t in state.iter_mut() {
            t.rect = t.rect.translated(dx, dy);
        }
        Ok(())
    }

    fn clear(&self) -> screenlate_overlay::Result<()> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        Ok(())
    }
}

/// Initialize tracing/logging subsystem
fn init_tracing(config: &config::LoggingSettings, dirs: &AppDirs) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true);

    if config.log_to_file {
        std::fs::create_dir_all(&dirs.logs)?;
        let file_appender = tracing_appender::rolling::daily(&dirs.logs, "screenlate.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    Ok(())
}

/// Register built-in plugins and everything the directory scan finds
fn build_registry(app: &AppConfig, dirs: &AppDirs) -> Result<Arc<PluginRegistry>> {
    let registry = PluginRegistry::new();

    registry.register_capture(
        PluginDescriptor::new(PluginKind::Capture, "screen").essential(),
        || {
            ScreenBackend::new()
                .map(|backend| Box::new(backend) as Box<dyn CaptureBackend>)
                .map_err(|e| screenlate_plugins::PluginError::InitFailed {
                    name: "screen".into(),
                    reason: e.to_string(),
                })
        },
    );
    registry.register_ocr(
        PluginDescriptor::new(PluginKind::Ocr, "stub").essential(),
        || Box::new(StubOcr::new()),
    );
    registry.register_translation(
        PluginDescriptor::new(PluginKind::Translation, "echo").essential(),
        || Box::new(EchoTranslation::new()),
    );
    // Offline exact-match tables under models/translation/, one file per pair
    let glossary_dir = dirs.models_translation.clone();
    registry.register_translation(
        PluginDescriptor::new(PluginKind::Translation, "glossary"),
        move || {
            let mut engine = GlossaryTranslation::new("glossary");
            load_glossaries(&glossary_dir, &mut engine);
            Box::new(engine)
        },
    );

    match registry.scan_directory(&dirs.plugins) {
        Ok(found) if found > 0 => info!("Discovered {} external plugin(s)", found),
        Ok(_) => {}
        Err(e) => warn!("Plugin scan failed: {}", e),
    }
    let ocr_timeout = Duration::from_millis(app.pipeline.ocr_timeout_ms);
    let translation_timeout = Duration::from_millis(app.pipeline.translation_timeout_ms);
    for discovered in registry.discovered() {
        if discovered.command.is_empty() {
            continue;
        }
        let name = discovered.descriptor.name.clone();
        let command = discovered.command.clone();
        match discovered.descriptor.kind {
            PluginKind::Ocr => {
                registry.register_ocr(discovered.descriptor.clone(), move || {
                    Box::new(WorkerOcrEngine::new(name.clone(), command.clone(), ocr_timeout))
                });
            }
            PluginKind::Translation => {
                registry.register_translation(discovered.descriptor.clone(), move || {
                    Box::new(WorkerTranslationEngine::new(
                        name.clone(),
                        command.clone(),
                        translation_timeout,
                    ))
                });
            }
            _ => {}
        }
    }

    Ok(Arc::new(registry))
}

/// Load `glossary_<src>_<tgt>.toml` tables into the glossary engine
///
/// Each file is a flat `source = "translation"` map. Malformed files are
/// skipped with a warning; a missing directory is fine.
fn load_glossaries(dir: &std::path::Path, engine: &mut GlossaryTranslation) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(pair) = file_name
            .strip_prefix("glossary_")
            .and_then(|rest| rest.strip_suffix(".toml"))
        else {
            continue;
        };
        let Some((source_lang, target_lang)) = pair.split_once('_') else {
            warn!("Skipping glossary file with unrecognized name: {}", file_name);
            continue;
        };
        let text = match std::fs::read_to_string(entry.path()) {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not read {}: {}", file_name, e);
                continue;
            }
        };
        let table: std::collections::HashMap<String, String> = match toml::from_str(&text) {
            Ok(table) => table,
            Err(e) => {
                warn!("Skipping malformed glossary {}: {}", file_name, e);
                continue;
            }
        };
        let count = table.len();
        for (source, translation) in table {
            engine.insert(source_lang, target_lang, &source, &translation, 0.95);
        }
        info!(
            "Loaded {} glossary entries for {}->{}",
            count, source_lang, target_lang
        );
    }
}

fn screen_bounds() -> Rect {
    match MonitorInfo::by_index(0) {
        Ok(monitor) => monitor.bounds(),
        Err(e) => {
            warn!("Monitor enumeration failed ({}); assuming 1920x1080", e);
            Rect::new(0, 0, 1920, 1080)
        }
    }
}

fn run_pipeline(
    config_path: PathBuf,
    runtime: Option<String>,
    region_set: Option<String>,
    source: Option<String>,
    target: Option<String>,
    fps: Option<f32>,
) -> Result<()> {
    let dirs = AppDirs::resolve()?;
    let mut app = AppConfig::load(&config_path)?;
    init_tracing(&app.logging, &dirs)?;
    dirs.create_all()?;

    info!("Starting screenlate v{}", env!("CARGO_PKG_VERSION"));

    let consent = ConsentRecord::require(&dirs.consent_file())?;
    info!(
        "Consent on file ({} mode, accepted {})",
        consent.model_mode, consent.date
    );

    // CLI overrides
    if let Some(kind) = runtime.as_deref() {
        app.pipeline.runtime = match kind {
            "in_process" => RuntimeKind::InProcess,
            "optimized" => RuntimeKind::Optimized,
            "subprocess" => RuntimeKind::Subprocess,
            other => anyhow::bail!("unknown runtime kind '{other}'"),
        };
    }
    if let Some(lang) = source {
        app.pipeline.source_lang = lang;
    }
    if let Some(lang) = target {
        app.pipeline.target_lang = lang;
    }
    if let Some(fps) = fps {
        app.pipeline.fps = fps;
    }

    let bounds = screen_bounds();
    let pipeline_config = app.pipeline_config(bounds);
    pipeline_config
        .validate()
        .context("Invalid pipeline configuration")?;

    let registry = build_registry(&app, &dirs)?;
    if app.ocr.engine != "stub" {
        registry
            .swap_ocr(&app.ocr.engine, &app.ocr_options())
            .with_context(|| format!("OCR engine '{}' unavailable", app.ocr.engine))?;
    }
    if app.translation.engine != "echo" {
        registry.swap_translation(&app.translation.engine).with_context(|| {
            format!("Translation engine '{}' unavailable", app.translation.engine)
        })?;
    }

    let cache = Arc::new(CacheManager::new(app.cache_config(dirs.dictionary.clone())));
    let regions = app.region_set(region_set.as_deref(), bounds)?;
    info!(
        "Capturing region set '{}' ({} active region(s))",
        regions.name,
        regions.active().count()
    );

    let backend = registry.create_capture("screen")?;
    let stages = build_stages(
        &pipeline_config,
        backend,
        Arc::clone(&registry),
        app.worker_commands(),
    )?;
    let chain = build_default_chain(&pipeline_config);
    let renderer: Arc<dyn OverlayRenderer> = Arc::new(LoggingRenderer::new(app.overlay_style()));
    let invoker: Arc<dyn UiInvoker> = Arc::new(DirectInvoker);

    let pipeline = PipelineRuntime::new(
        pipeline_config,
        RuntimeDeps {
            stages,
            chain,
            cache,
            registry,
            renderer,
            invoker,
            regions,
        },
    )?;
    let handle = pipeline.start()?;
    let controller = handle.controller();

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    tokio_runtime.block_on(async {
        let server_task = if app.control.enabled {
            let server = ControlServer::new(app.control_config(), controller.clone());
            Some(tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!("Control API failed: {}", e);
                }
            }))
        } else {
            None
        };

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, shutting down");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    if controller.state() == RuntimeState::Idle {
                        info!("Pipeline stopped via control API");
                        break;
                    }
                }
            }
        }

        if let Some(task) = server_task {
            task.abort();
        }
    });

    handle.stop();
    info!("Shutdown complete");
    Ok(())
}

fn ctl(action: CtlAction, config_path: PathBuf, port: Option<u16>) -> Result<()> {
    let app = AppConfig::load(&config_path).unwrap_or_default();
    let port = port.unwrap_or(app.control.port);
    let base = format!("http://127.0.0.1:{port}/api");

    let tokio_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    tokio_runtime.block_on(async {
        let client = reqwest::Client::new();
        let response = match action {
            CtlAction::Status => client.get(format!("{base}/status")).send().await,
            CtlAction::Metrics => client.get(format!("{base}/metrics")).send().await,
            CtlAction::Pause => client.post(format!("{base}/pause")).send().await,
            CtlAction::Resume => client.post(format!("{base}/resume")).send().await,
            CtlAction::Stop => client.post(format!("{base}/stop")).send().await,
        }
        .context("No running instance reachable on the control port")?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        println!("{}", serde_json::to_string_pretty(&body)?);
        if !status.is_success() {
            anyhow::bail!("control request failed with HTTP {status}");
        }
        Ok(())
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            runtime,
            region_set,
            source,
            target,
            fps,
        } => run_pipeline(cli.config, runtime, region_set, source, target, fps),

        Command::Check => {
            let app = AppConfig::load(&cli.config)?;
            let pipeline_config = app.pipeline_config(Rect::new(0, 0, 1920, 1080));
            pipeline_config.validate()?;
            if app.pipeline.runtime == RuntimeKind::Subprocess && app.worker_commands().is_none() {
                anyhow::bail!("subprocess runtime selected but [workers] commands are missing");
            }
            println!("Configuration OK ({})", cli.config.display());
            Ok(())
        }

        Command::Consent { action } => {
            let dirs = AppDirs::resolve()?;
            match action {
                ConsentAction::Status => {
                    match ConsentRecord::load(&dirs.consent_file())? {
                        Some(record) if record.accepted => println!(
                            "Consent accepted on {} ({} mode)",
                            record.date, record.model_mode
                        ),
                        _ => println!("Consent has not been given"),
                    }
                    Ok(())
                }
                ConsentAction::Accept { model_mode } => {
                    let mode: ModelMode = model_mode.parse()?;
                    let record = ConsentRecord::accept(&dirs.consent_file(), mode)?;
                    println!(
                        "Consent recorded ({} mode, {})",
                        record.model_mode, record.date
                    );
                    Ok(())
                }
            }
        }

        Command::Regions => {
            let app = AppConfig::load(&cli.config)?;
            if app.region_sets.is_empty() {
                println!("No region sets configured; the primary monitor is captured in full");
                return Ok(());
            }
            for set in &app.region_sets {
                println!("{} ({} region(s))", set.name, set.regions.len());
                for region in &set.regions {
                    println!(
                        "  {} monitor={} rect=({}, {}, {}x{}){}",
                        region.id,
                        region.monitor,
                        region.x,
                        region.y,
                        region.width,
                        region.height,
                        if region.enabled { "" } else { " [disabled]" }
                    );
                }
            }
            Ok(())
        }

        Command::Ctl { action, port } => ctl(action, cli.config, port),
    }
}
