//! Plugin Registry Module
//!
//! Engines (OCR, translation) and capture backends are plugins: discoverable,
//! swappable implementations behind narrow traits. This crate defines those
//! traits, the descriptor/factory model used to register implementations, and
//! the registry that owns the per-process engine singletons.
//!
//! Plugins are described by an explicit [`PluginDescriptor`] with a single
//! factory per kind; capability differences live in the descriptor, never
//! discovered at call time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod ocr;
pub mod registry;
pub mod translation;

pub use ocr::{OcrEngine, OcrOptions, StubOcr, TextBlock};
pub use registry::{DiscoveredPlugin, PluginDescriptor, PluginRegistry};
pub use translation::{EchoTranslation, GlossaryTranslation, Translation, TranslationEngine};

/// Errors from plugin discovery, instantiation and engine calls
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("No {kind} plugin named '{name}' is registered")]
    NotFound { kind: PluginKind, name: String },

    #[error("Plugin '{name}' failed to initialize: {reason}")]
    InitFailed { name: String, reason: String },

    #[error("Language pair {source_lang}->{target} is not supported by engine '{engine}'")]
    UnsupportedLanguagePair {
        engine: String,
        source_lang: String,
        target: String,
    },

    #[error("Engine failure: {0}")]
    EngineFailure(String),

    #[error("Plugin manifest error in {path}: {reason}")]
    ManifestError { path: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

/// The kinds of plugin the registry knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Capture,
    Ocr,
    Translation,
    Optimizer,
    TextProcessor,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PluginKind::Capture => "capture",
            PluginKind::Ocr => "ocr",
            PluginKind::Translation => "translation",
            PluginKind::Optimizer => "optimizer",
            PluginKind::TextProcessor => "text_processor",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_matches_directory_names() {
        assert_eq!(PluginKind::Ocr.to_string(), "ocr");
        assert_eq!(PluginKind::TextProcessor.to_string(), "text_processor");
    }

    #[test]
    fn test_unsupported_pair_message() {
        let err = PluginError::UnsupportedLanguagePair {
            engine: "glossary".into(),
            source_lang: "ja".into(),
            target: "de".into(),
        };
        assert!(err.to_string().contains("ja->de"));
    }
}
