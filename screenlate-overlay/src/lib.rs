//! Overlay Module
//!
//! The pipeline ends at the overlay: translated text drawn over the source
//! text's position on screen. Rendering itself belongs to the GUI layer;
//! this crate defines the interface the pipeline drives (UI-thread affinity
//! included), the style configuration, and the intelligent positioner that
//! keeps overlapping translations readable.

use screenlate_plugins::Translation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod position;

pub use position::{IntelligentPositioner, PositionerConfig};

/// Errors from overlay scheduling
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Renderer unavailable: {0}")]
    RendererUnavailable(String),

    #[error("UI invoke failed: {0}")]
    InvokeFailed(String),
}

/// Result type alias for overlay operations
pub type Result<T> = std::result::Result<T, OverlayError>;

/// An RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Visual style for rendered overlays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayStyle {
    /// Font family name
    pub font_family: String,

    /// Font size in points
    pub font_size: u32,

    /// Text color
    pub text_color: Color,

    /// Background fill behind the text
    pub background_color: Color,

    /// Overall opacity in [0, 1]
    pub opacity: f32,

    /// Border width in pixels (0 disables the border)
    pub border_width: u32,

    /// Border color
    pub border_color: Color,

    /// Padding between text and overlay edge in pixels
    pub padding: u32,

    /// Maximum characters per line before wrapping
    pub max_line_length: usize,

    /// Minimum distance from the screen edge in pixels
    pub screen_margin: i32,

    /// Whether clicks pass through the overlay to the window below
    pub click_through: bool,

    /// Sample the frame behind each overlay and pick a contrasting text color
    pub auto_contrast: bool,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font_family: "Sans".to_string(),
            font_size: 14,
            text_color: Color::rgba(255, 255, 255, 255),
            background_color: Color::rgba(0, 0, 0, 200),
            opacity: 0.9,
            border_width: 1,
            border_color: Color::rgba(80, 80, 80, 255),
            padding: 4,
            max_line_length: 60,
            screen_margin: 10,
            click_through: true,
            auto_contrast: false,
        }
    }
}

/// Summary of the frame a set of overlays belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// Screen rectangle the frame covered
    pub rect: screenlate_capture::Rect,

    /// Monitor the frame came from
    pub monitor_index: usize,
}

/// Runs a closure on the UI thread
///
/// The renderer's thread affinity is declared here instead of being implied:
/// the pipeline never calls the renderer directly, it schedules the call
/// through an invoker owned by the GUI layer.
pub trait UiInvoker: Send + Sync {
    /// Schedule `f` to run on the UI thread
    fn invoke(&self, f: Box<dyn FnOnce() + Send>) -> Result<()>;
}

/// Invoker that runs the closure immediately on the calling thread
///
/// For tests and the headless CLI, where there is no UI thread to defer to.
pub struct DirectInvoker;

impl UiInvoker for DirectInvoker {
    fn invoke(&self, f: Box<dyn FnOnce() + Send>) -> Result<()> {
        f();
        Ok(())
    }
}

/// Receives positioned translations for one tick
///
/// `render` is always called on the UI thread (the pipeline arranges this
/// via [`UiInvoker`]) and must replace all overlays from the previous tick
/// in one atomic set operation.
pub trait OverlayRenderer: Send + Sync {
    /// Replace the current overlay set
    fn render(&self, frame: &FrameInfo, translations: &[Translation]) -> Result<()>;

    /// Shift every current overlay by an offset (motion tracking)
    fn shift(&self, dx: i32, dy: i32) -> Result<()>;

    /// Remove all overlays
    fn clear(&self) -> Result<()>;
}

/// Renderer that records what it was asked to draw
///
/// The headless renderer: tests assert against it, and the CLI uses it to
/// log what would be drawn.
#[derive(Default)]
pub struct RecordingRenderer {
    state: std::sync::Mutex<RecordedState>,
}

#[derive(Default)]
struct RecordedState {
    translations: Vec<Translation>,
    offset: (i32, i32),
    renders: u64,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translations currently on "screen"
    pub fn current(&self) -> Vec<Translation> {
        self.lock().translations.clone()
    }

    /// Accumulated motion offset
    pub fn offset(&self) -> (i32, i32) {
        self.lock().offset
    }

    /// Number of full renders so far
    pub fn renders(&self) -> u64 {
        self.lock().renders
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OverlayRenderer for RecordingRenderer {
    fn render(&self, _frame: &FrameInfo, translations: &[Translation]) -> Result<()> {
        let mut state = self.lock();
        state.translations = translations.to_vec();
        state.offset = (0, 0);
        state.renders += 1;
        Ok(())
    }

    fn shift(&self, dx: i32, dy: i32) -> Result<()> {
        let mut state = self.lock();
        state.offset.0 += dx;
        state.offset.1 += dy;
        for t in state.translations.iter_mut() {
            t.rect = t.rect.translated(dx, dy);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.lock();
        state.translations.clear();
        state.offset = (0, 0);
        Ok(())
    }
}
