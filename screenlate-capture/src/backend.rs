//! Capture backends
//!
//! The pipeline asks a `CaptureBackend` for one frame per region per tick.
//! `ScreenBackend` grabs real pixels from the desktop; `ScriptedBackend`
//! replays pre-built frames for tests and headless operation.

use crate::frame::{Frame, PixelFormat};
use crate::monitor::MonitorInfo;
use crate::region::Region;
use crate::{CaptureError, Result};
use screenshots::Screen;
use std::collections::VecDeque;

/// A source of captured frames
///
/// Implementations must validate that the region lies on an attached monitor
/// and is nonempty, and must return pixel data in a documented format.
pub trait CaptureBackend: Send {
    /// Backend name for logs and plugin listings
    fn name(&self) -> &str;

    /// Capture one frame of the given region
    fn capture(&mut self, region: &Region) -> Result<Frame>;
}

/// Desktop capture backed by the `screenshots` crate
pub struct ScreenBackend {
    screens: Vec<Screen>,
}

impl ScreenBackend {
    /// Create a backend, enumerating screens once up front
    pub fn new() -> Result<Self> {
        let screens = Screen::all().map_err(|e| {
            CaptureError::InitializationError(format!("Failed to enumerate screens: {}", e))
        })?;
        if screens.is_empty() {
            return Err(CaptureError::InitializationError(
                "No screens attached".to_string(),
            ));
        }
        tracing::info!("Screen backend initialized with {} screen(s)", screens.len());
        Ok(Self { screens })
    }

    /// Re-enumerate screens after a display change
    pub fn refresh(&mut self) -> Result<()> {
        self.screens = Screen::all().map_err(|e| {
            CaptureError::InitializationError(format!("Failed to enumerate screens: {}", e))
        })?;
        Ok(())
    }
}

impl CaptureBackend for ScreenBackend {
    fn name(&self) -> &str {
        "screen"
    }

    fn capture(&mut self, region: &Region) -> Result<Frame> {
        if region.rect.is_empty() {
            return Err(CaptureError::InvalidRegion(region.id.clone()));
        }

        let screen = self
            .screens
            .get(region.monitor_index)
            .ok_or(CaptureError::InvalidMonitor(region.monitor_index))?;

        let monitor = MonitorInfo {
            index: region.monitor_index,
            x: screen.display_info.x,
            y: screen.display_info.y,
            width: screen.display_info.width,
            height: screen.display_info.height,
            is_primary: screen.display_info.is_primary,
        };
        if !region.rect.intersects_padded(&monitor.bounds(), 0) {
            return Err(CaptureError::InvalidRegion(region.id.clone()));
        }

        // Capture coordinates are monitor-relative
        let rel_x = region.rect.x - monitor.x;
        let rel_y = region.rect.y - monitor.y;
        let captured = screen
            .capture_area(rel_x, rel_y, region.rect.width, region.rect.height)
            .map_err(|e| {
                CaptureError::ScreenCaptureError(format!(
                    "Capture of region {} failed: {}",
                    region.id, e
                ))
            })?;

        let width = captured.width();
        let height = captured.height();
        let rgba_data = captured.into_raw();

        tracing::debug!(
            "Captured region {} ({}x{}) from monitor {}",
            region.id,
            width,
            height,
            region.monitor_index
        );

        Frame::new(rgba_data, width, height, PixelFormat::Rgba8, region.clone())
    }
}

/// Capture backend that replays queued frames
///
/// Used by tests and by the subprocess capture worker's dry-run mode. When
/// the queue is empty it repeats the last frame, so a scripted run behaves
/// like a static screen.
pub struct ScriptedBackend {
    queue: VecDeque<Frame>,
    last: Option<Frame>,
}

impl ScriptedBackend {
    /// Create an empty scripted backend
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            last: None,
        }
    }

    /// Queue a frame for a later `capture` call
    pub fn push(&mut self, frame: Frame) {
        self.queue.push_back(frame);
    }

    /// Number of frames still queued
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capture(&mut self, region: &Region) -> Result<Frame> {
        if region.rect.is_empty() {
            return Err(CaptureError::InvalidRegion(region.id.clone()));
        }
        if let Some(frame) = self.queue.pop_front() {
            self.last = Some(frame.clone());
            return Ok(frame);
        }
        self.last
            .clone()
            .ok_or_else(|| CaptureError::ScreenCaptureError("No scripted frames queued".into()))
    }
}
