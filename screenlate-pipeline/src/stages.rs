//! Stage assembly
//!
//! Builds the three heavy stages for whichever runtime kind was selected.
//! Inline stages wrap the capture backend and the engine registry; the
//! subprocess kind wraps one worker host per stage. Either way the runtime
//! drives the same `Stage` interface with the same JSON payloads the worker
//! wire protocol uses.

use crate::{PipelineConfig, PipelineError, Result, RuntimeKind};
use screenlate_capture::{CaptureBackend, Region};
use screenlate_optimize::{
    BlockMerger, ChainRoutes, DictionaryLookup, DictionarySave, MergerConfig, MotionConfig,
    MotionTracker, OptimizerChain, ParallelConfig, ParallelTranslation, SpellConfig,
    SpellCorrector, TextValidator, TranslationChain, ValidatorConfig,
};
use screenlate_plugins::{OcrOptions, PluginRegistry, TextBlock};
use screenlate_worker::{
    encode_frame, ImagePayload, InlineStage, IsolatedStage, Stage, WorkerConfig, WorkerError,
    WorkerHost,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Request to the capture stage
#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub region: Region,
}

/// Response from the capture stage
#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub image: ImagePayload,
    pub region: Region,
}

/// Request to the OCR stage
#[derive(Debug, Serialize, Deserialize)]
pub struct OcrRequest {
    pub image: ImagePayload,
    pub region: Region,
    pub options: OcrOptions,
}

/// Response from the OCR stage
#[derive(Debug, Serialize, Deserialize)]
pub struct OcrResponse {
    pub blocks: Vec<TextBlock>,
}

/// Request to the translation stage
#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub texts: Vec<String>,
    pub source_lang: String,
    pub target_lang: String,
}

/// One translated item; `fallback` marks a per-item engine failure where the
/// source text was passed through
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatedItem {
    pub text: String,
    pub confidence: f32,
    #[serde(default)]
    pub fallback: bool,
}

/// Response from the translation stage
#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub items: Vec<TranslatedItem>,
}

/// The three heavy stages of one runtime
pub struct StageSet {
    pub capture: Box<dyn Stage>,
    pub ocr: Box<dyn Stage>,
    pub translation: Box<dyn Stage>,
}

/// Worker command lines for the subprocess runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCommands {
    pub capture: Vec<String>,
    pub ocr: Vec<String>,
    pub translation: Vec<String>,
}

/// Assemble the stages for the configured runtime kind
///
/// Inline kinds take ownership of the capture backend and share the engine
/// registry; the subprocess kind spawns one worker per stage and completes
/// the init handshake before returning.
pub fn build_stages(
    config: &PipelineConfig,
    backend: Box<dyn CaptureBackend>,
    registry: Arc<PluginRegistry>,
    workers: Option<WorkerCommands>,
) -> Result<StageSet> {
    match config.kind {
        RuntimeKind::InProcess | RuntimeKind::Optimized => {
            Ok(build_inline_stages(backend, registry))
        }
        RuntimeKind::Subprocess => {
            let commands = workers.ok_or_else(|| {
                PipelineError::ConfigInvalid(
                    "subprocess runtime requires worker commands".into(),
                )
            })?;
            build_subprocess_stages(config, commands)
        }
    }
}

fn build_inline_stages(
    backend: Box<dyn CaptureBackend>,
    registry: Arc<PluginRegistry>,
) -> StageSet {
    let mut backend = backend;
    let capture = InlineStage::new("capture", move |data| {
        let request: CaptureRequest = serde_json::from_value(data)
            .map_err(|e| WorkerError::Protocol(format!("capture request: {e}")))?;
        let frame = backend
            .capture(&request.region)
            .map_err(|e| WorkerError::Stage(e.to_string()))?;
        let response = CaptureResponse {
            image: encode_frame(&frame),
            region: frame.region.clone(),
        };
        serde_json::to_value(response).map_err(|e| WorkerError::Protocol(e.to_string()))
    });

    let ocr_registry = Arc::clone(&registry);
    let ocr = InlineStage::new("ocr", move |data| {
        let request: OcrRequest = serde_json::from_value(data)
            .map_err(|e| WorkerError::Protocol(format!("ocr request: {e}")))?;
        let frame = screenlate_worker::decode_frame(&request.image, request.region)?;
        let blocks = ocr_registry
            .with_ocr(&request.options, |engine| {
                engine.extract_text(&frame, &request.options)
            })
            .map_err(|e| WorkerError::Stage(e.to_string()))?;
        serde_json::to_value(OcrResponse { blocks })
            .map_err(|e| WorkerError::Protocol(e.to_string()))
    });

    let translation_registry = registry;
    let translation = InlineStage::new("translation", move |data| {
        let request: TranslateRequest = serde_json::from_value(data)
            .map_err(|e| WorkerError::Protocol(format!("translate request: {e}")))?;
        let items = translation_registry
            .with_translation(|engine| {
                Ok(request
                    .texts
                    .iter()
                    .map(|text| {
                        match engine.translate(text, &request.source_lang, &request.target_lang)
                        {
                            Ok((translated, confidence)) => TranslatedItem {
                                text: translated,
                                confidence,
                                fallback: false,
                            },
                            Err(e) => {
                                tracing::debug!("Translation failed for '{}': {}", text, e);
                                TranslatedItem {
                                    text: text.clone(),
                                    confidence: 0.0,
                                    fallback: true,
                                }
                            }
                        }
                    })
                    .collect::<Vec<_>>())
            })
            .map_err(|e| WorkerError::Stage(e.to_string()))?;
        serde_json::to_value(TranslateResponse { items })
            .map_err(|e| WorkerError::Protocol(e.to_string()))
    });

    StageSet {
        capture: Box::new(capture),
        ocr: Box::new(ocr),
        translation: Box::new(translation),
    }
}

fn build_subprocess_stages(
    config: &PipelineConfig,
    commands: WorkerCommands,
) -> Result<StageSet> {
    let init = json!({
        "source_lang": config.source_lang,
        "target_lang": config.target_lang,
        "ocr": config.ocr_options,
    });

    let mut make = |name: &str, command: Vec<String>, timeout| -> Result<Box<dyn Stage>> {
        let mut worker_config = WorkerConfig::new(name, command);
        worker_config.request_timeout = timeout;
        let mut host = WorkerHost::new(worker_config);
        host.start(init.clone())?;
        Ok(Box::new(IsolatedStage::new(host)))
    };

    Ok(StageSet {
        capture: make("capture", commands.capture, config.capture_timeout)?,
        ocr: make("ocr", commands.ocr, config.ocr_timeout)?,
        translation: make("translation", commands.translation, config.translation_timeout)?,
    })
}

/// OCR engine backed by a discovered worker plugin
///
/// The subprocess is spawned on `initialize` and torn down on `cleanup`, so
/// the registry's engine lifecycle drives the worker lifecycle.
pub struct WorkerOcrEngine {
    name: String,
    host: WorkerHost,
    started: bool,
}

impl WorkerOcrEngine {
    pub fn new(name: impl Into<String>, command: Vec<String>, timeout: std::time::Duration) -> Self {
        let name = name.into();
        let mut config = WorkerConfig::new(format!("ocr-{name}"), command);
        config.request_timeout = timeout;
        Self {
            name,
            host: WorkerHost::new(config),
            started: false,
        }
    }
}

impl screenlate_plugins::OcrEngine for WorkerOcrEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, options: &OcrOptions) -> screenlate_plugins::Result<()> {
        let init = serde_json::to_value(options)
            .map_err(|e| screenlate_plugins::PluginError::EngineFailure(e.to_string()))?;
        self.host
            .start(init)
            .map_err(|e| screenlate_plugins::PluginError::InitFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        self.started = true;
        Ok(())
    }

    fn extract_text(
        &mut self,
        frame: &screenlate_capture::Frame,
        options: &OcrOptions,
    ) -> screenlate_plugins::Result<Vec<TextBlock>> {
        if !self.started {
            return Err(screenlate_plugins::PluginError::EngineFailure(
                "worker OCR engine used before initialize".into(),
            ));
        }
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let request = serde_json::to_value(OcrRequest {
            image: encode_frame(frame),
            region: frame.region.clone(),
            options: options.clone(),
        })
        .map_err(|e| screenlate_plugins::PluginError::EngineFailure(e.to_string()))?;
        let response = self
            .host
            .request(request)
            .map_err(|e| screenlate_plugins::PluginError::EngineFailure(e.to_string()))?;
        let parsed: OcrResponse = serde_json::from_value(response)
            .map_err(|e| screenlate_plugins::PluginError::EngineFailure(e.to_string()))?;
        Ok(parsed.blocks)
    }

    fn cleanup(&mut self) -> screenlate_plugins::Result<()> {
        self.host.shutdown();
        self.started = false;
        Ok(())
    }
}

/// Translation engine backed by a discovered worker plugin
pub struct WorkerTranslationEngine {
    name: String,
    host: WorkerHost,
    started: bool,
}

impl WorkerTranslationEngine {
    pub fn new(name: impl Into<String>, command: Vec<String>, timeout: std::time::Duration) -> Self {
        let name = name.into();
        let mut config = WorkerConfig::new(format!("translation-{name}"), command);
        config.request_timeout = timeout;
        Self {
            name,
            host: WorkerHost::new(config),
            started: false,
        }
    }
}

impl screenlate_plugins::TranslationEngine for WorkerTranslationEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> screenlate_plugins::Result<()> {
        self.host
            .start(json!({}))
            .map_err(|e| screenlate_plugins::PluginError::InitFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        self.started = true;
        Ok(())
    }

    fn supports_pair(&self, _source_lang: &str, _target_lang: &str) -> bool {
        // Pair support lives in the worker; unsupported pairs come back as
        // per-item errors
        true
    }

    fn translate(
        &mut self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> screenlate_plugins::Result<(String, f32)> {
        if !self.started {
            return Err(screenlate_plugins::PluginError::EngineFailure(
                "worker translation engine used before initialize".into(),
            ));
        }
        let request = serde_json::to_value(TranslateRequest {
            texts: vec![text.to_string()],
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        })
        .map_err(|e| screenlate_plugins::PluginError::EngineFailure(e.to_string()))?;
        let response = self
            .host
            .request(request)
            .map_err(|e| screenlate_plugins::PluginError::EngineFailure(e.to_string()))?;
        let parsed: TranslateResponse = serde_json::from_value(response)
            .map_err(|e| screenlate_plugins::PluginError::EngineFailure(e.to_string()))?;
        match parsed.items.into_iter().next() {
            Some(item) if !item.fallback => Ok((item.text, item.confidence)),
            Some(_) => Err(screenlate_plugins::PluginError::EngineFailure(format!(
                "worker could not translate '{text}'"
            ))),
            None => Err(screenlate_plugins::PluginError::EngineFailure(
                "worker returned no items".into(),
            )),
        }
    }

    fn cleanup(&mut self) -> screenlate_plugins::Result<()> {
        self.host.shutdown();
        self.started = false;
        Ok(())
    }
}

/// Build the optimizer chain for the configured runtime kind
///
/// The in-process runtime is the bare loop: stages only, no optimizers. The
/// optimized and subprocess runtimes get the full chain; registration order
/// is execution order within each phase: motion tracking before OCR; merge,
/// validate, spell-correct after OCR; dictionary lookup before translation;
/// chain and parallel at translation time; dictionary save afterwards.
pub fn build_default_chain(config: &PipelineConfig) -> OptimizerChain {
    let mut chain = OptimizerChain::new();
    if config.kind == RuntimeKind::InProcess {
        return chain;
    }

    if config.motion_tracking {
        chain.push(Box::new(MotionTracker::new(MotionConfig::default())));
    }
    chain.push(Box::new(BlockMerger::new(MergerConfig::default())));
    chain.push(Box::new(TextValidator::new(ValidatorConfig::default())));
    chain.push(Box::new(SpellCorrector::new(SpellConfig::default())));
    chain.push(Box::new(DictionaryLookup::new()));

    if !config.chain_routes.is_empty() {
        let mut routes = ChainRoutes::new();
        for route in &config.chain_routes {
            let via: Vec<&str> = route.via.iter().map(String::as_str).collect();
            routes.add(&route.source, &route.target, &via);
        }
        chain.push(Box::new(TranslationChain::new(routes)));
    }
    if config.parallel_translation {
        chain.push(Box::new(ParallelTranslation::new(ParallelConfig {
            timeout: config.translation_timeout,
            ..Default::default()
        })));
    }
    chain.push(Box::new(DictionarySave::new(config.min_save_confidence)));

    chain
}
