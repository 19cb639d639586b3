//! Screen Capture Module
//!
//! This crate provides the capture side of the screenlate pipeline: screen
//! regions, captured frames, monitor enumeration and the frame-similarity
//! gate that decides whether a frame is worth re-processing.
//!
//! # Features
//!
//! - Named capture regions pinned to a monitor
//! - Cross-platform screen capture backend
//! - Content hashing over a downsampled copy for cheap change detection
//! - Scripted backend for tests and headless runs
//!
//! # Example
//!
//! ```no_run
//! use screenlate_capture::{CaptureBackend, Rect, Region, ScreenBackend};
//!
//! fn main() -> anyhow::Result<()> {
//!     let region = Region::new("main", 0, Rect::new(0, 0, 800, 600));
//!     let mut backend = ScreenBackend::new()?;
//!     let frame = backend.capture(&region)?;
//!     println!("captured {}x{}", frame.width, frame.height);
//!     Ok(())
//! }
//! ```

use thiserror::Error;

pub mod backend;
pub mod frame;
pub mod geometry;
pub mod monitor;
pub mod region;
pub mod similarity;

pub use backend::{CaptureBackend, ScreenBackend, ScriptedBackend};
pub use frame::{Frame, PixelFormat};
pub use geometry::Rect;
pub use monitor::MonitorInfo;
pub use region::{Region, RegionSet};
pub use similarity::{frame_hash, SimilarityGate};

/// Errors that can occur during screen capture operations
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to initialize capture: {0}")]
    InitializationError(String),

    #[error("Failed to capture screen: {0}")]
    ScreenCaptureError(String),

    #[error("Invalid monitor index: {0}")]
    InvalidMonitor(usize),

    #[error("Region {0} is empty or off-screen")]
    InvalidRegion(String),

    #[error("Image processing error: {0}")]
    ImageProcessingError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, CaptureError>;
