//! Plugin registry
//!
//! Owns plugin descriptors, their factories and the per-process engine
//! singletons. Engines are created lazily on first use and can be swapped at
//! runtime: the new engine is built and initialized first, and only then
//! replaces (and cleans up) the previous one, so an initialization failure
//! leaves the previous engine active.

use crate::ocr::{OcrEngine, OcrOptions};
use crate::translation::TranslationEngine;
use crate::{PluginError, PluginKind, Result};
use screenlate_capture::CaptureBackend;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Describes one registered plugin
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    /// What kind of plugin this is
    pub kind: PluginKind,

    /// Unique name within the kind
    pub name: String,

    /// Free-form capability tags ("gpu", "batch", "vertical_text", ...)
    pub capabilities: Vec<String>,

    /// Essential plugins are instantiated even when optional plugins are off
    pub essential: bool,
}

impl PluginDescriptor {
    /// Create a non-essential descriptor with no capabilities
    pub fn new(kind: PluginKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            capabilities: Vec::new(),
            essential: false,
        }
    }

    /// Mark the plugin essential
    pub fn essential(mut self) -> Self {
        self.essential = true;
        self
    }

    /// Attach capability tags
    pub fn with_capabilities(mut self, caps: &[&str]) -> Self {
        self.capabilities = caps.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// A plugin found by the directory scan
///
/// External plugins are described by a `plugin.toml` manifest; worker-based
/// ones carry the command line used to spawn their subprocess.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    /// Descriptor parsed from the manifest
    pub descriptor: PluginDescriptor,

    /// Directory the manifest was found in
    pub path: PathBuf,

    /// Subprocess command for worker-backed plugins
    pub command: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PluginManifest {
    name: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    essential: bool,
    #[serde(default)]
    command: Vec<String>,
}

type OcrFactory = Arc<dyn Fn() -> Box<dyn OcrEngine> + Send + Sync>;
type TranslationFactory = Arc<dyn Fn() -> Box<dyn TranslationEngine> + Send + Sync>;
type CaptureFactory = Arc<dyn Fn() -> crate::Result<Box<dyn CaptureBackend>> + Send + Sync>;

struct ActiveEngine<T: ?Sized> {
    name: String,
    engine: Box<T>,
}

/// The per-process plugin registry
pub struct PluginRegistry {
    descriptors: Mutex<Vec<PluginDescriptor>>,
    discovered: Mutex<Vec<DiscoveredPlugin>>,
    ocr_factories: Mutex<HashMap<String, OcrFactory>>,
    translation_factories: Mutex<HashMap<String, TranslationFactory>>,
    capture_factories: Mutex<HashMap<String, CaptureFactory>>,
    active_ocr: Mutex<Option<ActiveEngine<dyn OcrEngine>>>,
    active_translation: Mutex<Option<ActiveEngine<dyn TranslationEngine>>>,
    default_ocr: Mutex<Option<String>>,
    default_translation: Mutex<Option<String>>,
    optional_enabled: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PluginRegistry {
    /// Empty registry with optional plugins enabled
    pub fn new() -> Self {
        Self {
            descriptors: Mutex::new(Vec::new()),
            discovered: Mutex::new(Vec::new()),
            ocr_factories: Mutex::new(HashMap::new()),
            translation_factories: Mutex::new(HashMap::new()),
            capture_factories: Mutex::new(HashMap::new()),
            active_ocr: Mutex::new(None),
            active_translation: Mutex::new(None),
            default_ocr: Mutex::new(None),
            default_translation: Mutex::new(None),
            optional_enabled: AtomicBool::new(true),
        }
    }

    /// Globally enable or disable non-essential plugins
    pub fn set_optional_enabled(&self, enabled: bool) {
        self.optional_enabled.store(enabled, Ordering::SeqCst);
    }

    fn usable(&self, descriptor: &PluginDescriptor) -> bool {
        descriptor.essential || self.optional_enabled.load(Ordering::SeqCst)
    }

    fn descriptor_for(&self, kind: PluginKind, name: &str) -> Option<PluginDescriptor> {
        lock(&self.descriptors)
            .iter()
            .find(|d| d.kind == kind && d.name == name)
            .cloned()
    }

    /// All registered descriptors, filtered by the optional-plugins toggle
    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        lock(&self.descriptors)
            .iter()
            .filter(|d| self.usable(d))
            .cloned()
            .collect()
    }

    /// Register an OCR engine factory
    pub fn register_ocr<F>(&self, descriptor: PluginDescriptor, factory: F)
    where
        F: Fn() -> Box<dyn OcrEngine> + Send + Sync + 'static,
    {
        debug_assert_eq!(descriptor.kind, PluginKind::Ocr);
        let name = descriptor.name.clone();
        lock(&self.ocr_factories).insert(name.clone(), Arc::new(factory));
        lock(&self.descriptors).push(descriptor);
        let mut default = lock(&self.default_ocr);
        if default.is_none() {
            *default = Some(name);
        }
    }

    /// Register a translation engine factory
    pub fn register_translation<F>(&self, descriptor: PluginDescriptor, factory: F)
    where
        F: Fn() -> Box<dyn TranslationEngine> + Send + Sync + 'static,
    {
        debug_assert_eq!(descriptor.kind, PluginKind::Translation);
        let name = descriptor.name.clone();
        lock(&self.translation_factories).insert(name.clone(), Arc::new(factory));
        lock(&self.descriptors).push(descriptor);
        let mut default = lock(&self.default_translation);
        if default.is_none() {
            *default = Some(name);
        }
    }

    /// Register a capture backend factory
    pub fn register_capture<F>(&self, descriptor: PluginDescriptor, factory: F)
    where
        F: Fn() -> crate::Result<Box<dyn CaptureBackend>> + Send + Sync + 'static,
    {
        debug_assert_eq!(descriptor.kind, PluginKind::Capture);
        lock(&self.capture_factories).insert(descriptor.name.clone(), Arc::new(factory));
        lock(&self.descriptors).push(descriptor);
    }

    /// Register a metadata-only descriptor (optimizers, text processors)
    pub fn register_descriptor(&self, descriptor: PluginDescriptor) {
        lock(&self.descriptors).push(descriptor);
    }

    /// Whether a named optimizer/text-processor plugin should run
    pub fn plugin_enabled(&self, kind: PluginKind, name: &str) -> bool {
        match self.descriptor_for(kind, name) {
            Some(d) => self.usable(&d),
            None => false,
        }
    }

    /// Instantiate a capture backend by name
    pub fn create_capture(&self, name: &str) -> Result<Box<dyn CaptureBackend>> {
        let descriptor = self
            .descriptor_for(PluginKind::Capture, name)
            .ok_or_else(|| PluginError::NotFound {
                kind: PluginKind::Capture,
                name: name.to_string(),
            })?;
        if !self.usable(&descriptor) {
            return Err(PluginError::NotFound {
                kind: PluginKind::Capture,
                name: name.to_string(),
            });
        }
        let factory = lock(&self.capture_factories)
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                kind: PluginKind::Capture,
                name: name.to_string(),
            })?;
        factory()
    }

    fn ocr_factory(&self, name: &str) -> Result<OcrFactory> {
        let descriptor = self
            .descriptor_for(PluginKind::Ocr, name)
            .ok_or_else(|| PluginError::NotFound {
                kind: PluginKind::Ocr,
                name: name.to_string(),
            })?;
        if !self.usable(&descriptor) {
            return Err(PluginError::NotFound {
                kind: PluginKind::Ocr,
                name: name.to_string(),
            });
        }
        lock(&self.ocr_factories)
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                kind: PluginKind::Ocr,
                name: name.to_string(),
            })
    }

    fn translation_factory(&self, name: &str) -> Result<TranslationFactory> {
        let descriptor =
            self.descriptor_for(PluginKind::Translation, name)
                .ok_or_else(|| PluginError::NotFound {
                    kind: PluginKind::Translation,
                    name: name.to_string(),
                })?;
        if !self.usable(&descriptor) {
            return Err(PluginError::NotFound {
                kind: PluginKind::Translation,
                name: name.to_string(),
            });
        }
        lock(&self.translation_factories)
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                kind: PluginKind::Translation,
                name: name.to_string(),
            })
    }

    /// Build an uninitialized translation engine instance
    ///
    /// The active engine is a singleton; this exists for the parallel
    /// translation pool, where each pool worker owns its own instance.
    pub fn create_translation(&self, name: &str) -> Result<Box<dyn TranslationEngine>> {
        let factory = self.translation_factory(name)?;
        Ok(factory())
    }

    /// Swap the active OCR engine
    ///
    /// The caller (the pipeline runtime) is expected to have paused ticks.
    /// On initialization failure the previous engine stays active.
    pub fn swap_ocr(&self, name: &str, options: &OcrOptions) -> Result<()> {
        let factory = self.ocr_factory(name)?;
        let mut engine = factory();
        engine.initialize(options).map_err(|e| {
            tracing::error!("OCR engine '{}' failed to initialize: {}", name, e);
            PluginError::InitFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut slot = lock(&self.active_ocr);
        if let Some(mut previous) = slot.take() {
            if let Err(e) = previous.engine.cleanup() {
                tracing::warn!("Cleanup of OCR engine '{}' failed: {}", previous.name, e);
            }
        }
        tracing::info!("OCR engine switched to '{}'", name);
        *slot = Some(ActiveEngine {
            name: name.to_string(),
            engine,
        });
        *lock(&self.default_ocr) = Some(name.to_string());
        Ok(())
    }

    /// Swap the active translation engine; same contract as [`swap_ocr`]
    ///
    /// [`swap_ocr`]: PluginRegistry::swap_ocr
    pub fn swap_translation(&self, name: &str) -> Result<()> {
        let factory = self.translation_factory(name)?;
        let mut engine = factory();
        engine.initialize().map_err(|e| {
            tracing::error!("Translation engine '{}' failed to initialize: {}", name, e);
            PluginError::InitFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut slot = lock(&self.active_translation);
        if let Some(mut previous) = slot.take() {
            if let Err(e) = previous.engine.cleanup() {
                tracing::warn!(
                    "Cleanup of translation engine '{}' failed: {}",
                    previous.name,
                    e
                );
            }
        }
        tracing::info!("Translation engine switched to '{}'", name);
        *slot = Some(ActiveEngine {
            name: name.to_string(),
            engine,
        });
        *lock(&self.default_translation) = Some(name.to_string());
        Ok(())
    }

    /// Name of the active (or default) OCR engine
    pub fn active_ocr_name(&self) -> Option<String> {
        lock(&self.active_ocr)
            .as_ref()
            .map(|a| a.name.clone())
            .or_else(|| lock(&self.default_ocr).clone())
    }

    /// Name of the active (or default) translation engine
    pub fn active_translation_name(&self) -> Option<String> {
        lock(&self.active_translation)
            .as_ref()
            .map(|a| a.name.clone())
            .or_else(|| lock(&self.default_translation).clone())
    }

    /// Run a closure against the active OCR engine, creating it on first use
    pub fn with_ocr<R>(
        &self,
        options: &OcrOptions,
        f: impl FnOnce(&mut dyn OcrEngine) -> Result<R>,
    ) -> Result<R> {
        {
            let mut slot = lock(&self.active_ocr);
            if let Some(active) = slot.as_mut() {
                return f(active.engine.as_mut());
            }
        }
        // First use: initialize the default engine, then retry the slot
        let name = lock(&self.default_ocr)
            .clone()
            .ok_or_else(|| PluginError::NotFound {
                kind: PluginKind::Ocr,
                name: "<default>".to_string(),
            })?;
        self.swap_ocr(&name, options)?;
        let mut slot = lock(&self.active_ocr);
        let active = slot.as_mut().ok_or_else(|| {
            PluginError::EngineFailure("OCR engine vanished after initialization".into())
        })?;
        f(active.engine.as_mut())
    }

    /// Run a closure against the active translation engine, creating it on first use
    pub fn with_translation<R>(
        &self,
        f: impl FnOnce(&mut dyn TranslationEngine) -> Result<R>,
    ) -> Result<R> {
        {
            let mut slot = lock(&self.active_translation);
            if let Some(active) = slot.as_mut() {
                return f(active.engine.as_mut());
            }
        }
        let name = lock(&self.default_translation)
            .clone()
            .ok_or_else(|| PluginError::NotFound {
                kind: PluginKind::Translation,
                name: "<default>".to_string(),
            })?;
        self.swap_translation(&name)?;
        let mut slot = lock(&self.active_translation);
        let active = slot.as_mut().ok_or_else(|| {
            PluginError::EngineFailure("Translation engine vanished after initialization".into())
        })?;
        f(active.engine.as_mut())
    }

    /// Scan `root/<kind>/<name>/plugin.toml` manifests for external plugins
    ///
    /// Found plugins are recorded as descriptors; worker-backed ones keep
    /// their spawn command for the subprocess host. Missing directories are
    /// fine; malformed manifests are skipped with a warning.
    pub fn scan_directory(&self, root: &Path) -> Result<usize> {
        let mut found = 0;
        for kind in [
            PluginKind::Capture,
            PluginKind::Ocr,
            PluginKind::Translation,
            PluginKind::Optimizer,
            PluginKind::TextProcessor,
        ] {
            let kind_dir = root.join(kind.to_string());
            if !kind_dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&kind_dir)? {
                let entry = entry?;
                let manifest_path = entry.path().join("plugin.toml");
                if !manifest_path.is_file() {
                    continue;
                }
                let text = std::fs::read_to_string(&manifest_path)?;
                let manifest: PluginManifest = match toml::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(
                            "Skipping malformed plugin manifest {}: {}",
                            manifest_path.display(),
                            e
                        );
                        continue;
                    }
                };
                let descriptor = PluginDescriptor {
                    kind,
                    name: manifest.name.clone(),
                    capabilities: manifest.capabilities.clone(),
                    essential: manifest.essential,
                };
                tracing::info!(
                    "Discovered {} plugin '{}' at {}",
                    kind,
                    manifest.name,
                    entry.path().display()
                );
                lock(&self.descriptors).push(descriptor.clone());
                lock(&self.discovered).push(DiscoveredPlugin {
                    descriptor,
                    path: entry.path(),
                    command: manifest.command,
                });
                found += 1;
            }
        }
        Ok(found)
    }

    /// Plugins found by [`scan_directory`]
    ///
    /// [`scan_directory`]: PluginRegistry::scan_directory
    pub fn discovered(&self) -> Vec<DiscoveredPlugin> {
        lock(&self.discovered).clone()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::StubOcr;
    use crate::translation::{EchoTranslation, GlossaryTranslation};

    fn registry_with_builtins() -> PluginRegistry {
        let registry = PluginRegistry::new();
        registry.register_ocr(
            PluginDescriptor::new(PluginKind::Ocr, "stub").essential(),
            || Box::new(StubOcr::new()),
        );
        registry.register_translation(
            PluginDescriptor::new(PluginKind::Translation, "echo").essential(),
            || Box::new(EchoTranslation::new()),
        );
        registry.register_translation(
            PluginDescriptor::new(PluginKind::Translation, "glossary"),
            || Box::new(GlossaryTranslation::new("glossary")),
        );
        registry
    }

    #[test]
    fn test_first_registered_becomes_default() {
        let registry = registry_with_builtins();
        assert_eq!(registry.active_ocr_name().as_deref(), Some("stub"));
        assert_eq!(registry.active_translation_name().as_deref(), Some("echo"));
    }

    #[test]
    fn test_with_translation_initializes_lazily() {
        let registry = registry_with_builtins();
        let out = registry
            .with_translation(|engine| engine.translate("hi", "en", "de"))
            .unwrap();
        assert_eq!(out.0, "[de] hi");
    }

    #[test]
    fn test_swap_translation() {
        let registry = registry_with_builtins();
        registry
            .with_translation(|engine| Ok(engine.name().to_string()))
            .unwrap();
        registry.swap_translation("glossary").unwrap();
        let name = registry
            .with_translation(|engine| Ok(engine.name().to_string()))
            .unwrap();
        assert_eq!(name, "glossary");
    }

    #[test]
    fn test_swap_to_unknown_engine_keeps_previous() {
        let registry = registry_with_builtins();
        registry
            .with_translation(|engine| Ok(engine.name().to_string()))
            .unwrap();
        assert!(registry.swap_translation("missing").is_err());
        let name = registry
            .with_translation(|engine| Ok(engine.name().to_string()))
            .unwrap();
        assert_eq!(name, "echo");
    }

    #[test]
    fn test_optional_toggle_hides_non_essential() {
        let registry = registry_with_builtins();
        registry.set_optional_enabled(false);

        let names: Vec<_> = registry
            .descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(names.contains(&"stub".to_string()));
        assert!(names.contains(&"echo".to_string()));
        assert!(!names.contains(&"glossary".to_string()));

        assert!(registry.swap_translation("glossary").is_err());
    }

    #[test]
    fn test_scan_directory_reads_manifests() {
        let dir = std::env::temp_dir().join(format!(
            "screenlate-plugins-test-{}",
            std::process::id()
        ));
        let ocr_dir = dir.join("ocr").join("external");
        std::fs::create_dir_all(&ocr_dir).unwrap();
        std::fs::write(
            ocr_dir.join("plugin.toml"),
            "name = \"external\"\ncapabilities = [\"gpu\"]\ncommand = [\"worker\", \"--ocr\"]\n",
        )
        .unwrap();

        let registry = PluginRegistry::new();
        let found = registry.scan_directory(&dir).unwrap();
        assert_eq!(found, 1);

        let discovered = registry.discovered();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].descriptor.name, "external");
        assert_eq!(discovered[0].command, vec!["worker", "--ocr"]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
