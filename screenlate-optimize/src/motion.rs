//! Motion tracker
//!
//! Scrolling text does not need fresh OCR, it needs the overlays moved.
//! The tracker cross-correlates a downsampled luminance grid of the current
//! frame against the previous one inside a bounded search window. A
//! confident match means the content translated rigidly: OCR is skipped and
//! the renderer shifts the existing overlays by the detected offset. Once
//! motion has been still for a short period, one forced OCR pass verifies
//! the reused blocks against reality.

use crate::{Optimizer, OptimizerContext, Phase, PipelineData, Result};
use std::time::{Duration, Instant};

/// Tunables for motion tracking
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Downsample factor for the correlation grid
    pub downsample: u32,

    /// Search window half-size in original-resolution pixels
    pub search_px: u32,

    /// Minimum normalized correlation to accept an offset
    pub correlation_threshold: f32,

    /// Maximum displacement in pixels considered plausible motion
    pub max_motion_distance: u32,

    /// Still time after which one verification OCR pass is forced
    pub stop_threshold: Duration,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            downsample: 8,
            search_px: 48,
            correlation_threshold: 0.8,
            max_motion_distance: 200,
            stop_threshold: Duration::from_millis(500),
        }
    }
}

struct GrayGrid {
    pixels: Vec<f32>,
    width: i32,
    height: i32,
}

impl GrayGrid {
    fn at(&self, x: i32, y: i32) -> f32 {
        self.pixels[(y * self.width + x) as usize]
    }
}

/// Normalized cross-correlation of two grids at a given shift
///
/// A positive `(dx, dy)` models content that moved right/down by that many
/// cells: `curr(x, y)` is compared against `prev(x - dx, y - dy)` over the
/// overlap. Returns a value in [-1, 1]; degenerate overlaps return 0.
fn correlation_at(prev: &GrayGrid, curr: &GrayGrid, dx: i32, dy: i32) -> f32 {
    let x0 = dx.max(0);
    let y0 = dy.max(0);
    let x1 = (curr.width + dx.min(0)).min(curr.width);
    let y1 = (curr.height + dy.min(0)).min(curr.height);
    let count = ((x1 - x0) * (y1 - y0)) as f32;
    if count < 16.0 {
        return 0.0;
    }

    let mut sum_p = 0.0;
    let mut sum_c = 0.0;
    for y in y0..y1 {
        for x in x0..x1 {
            sum_p += prev.at(x - dx, y - dy);
            sum_c += curr.at(x, y);
        }
    }
    let mean_p = sum_p / count;
    let mean_c = sum_c / count;

    let mut cov = 0.0;
    let mut var_p = 0.0;
    let mut var_c = 0.0;
    for y in y0..y1 {
        for x in x0..x1 {
            let p = prev.at(x - dx, y - dy) - mean_p;
            let c = curr.at(x, y) - mean_c;
            cov += p * c;
            var_p += p * p;
            var_c += c * c;
        }
    }
    let denom = (var_p * var_c).sqrt();
    if denom <= f32::EPSILON {
        // Flat regions correlate perfectly with themselves at zero shift
        return if dx == 0 && dy == 0 { 1.0 } else { 0.0 };
    }
    cov / denom
}

/// The motion-tracker optimizer
pub struct MotionTracker {
    config: MotionConfig,
    enabled: bool,
    previous: Option<GrayGrid>,
    last_motion: Option<Instant>,
    motions: u64,
}

impl MotionTracker {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            enabled: true,
            previous: None,
            last_motion: None,
            motions: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Accepted motion events over the session
    pub fn motions(&self) -> u64 {
        self.motions
    }

    /// Best offset between the previous grid and this one, with correlation
    fn detect(&self, curr: &GrayGrid) -> Option<(i32, i32, f32)> {
        let prev = self.previous.as_ref()?;
        if prev.width != curr.width || prev.height != curr.height {
            return None;
        }
        let max_shift = (self.config.search_px / self.config.downsample).max(1) as i32;

        let mut best = (0i32, 0i32, f32::MIN);
        for dy in -max_shift..=max_shift {
            for dx in -max_shift..=max_shift {
                let corr = correlation_at(prev, curr, dx, dy);
                if corr > best.2 {
                    best = (dx, dy, corr);
                }
            }
        }
        Some(best)
    }
}

impl Default for MotionTracker {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

impl Optimizer for MotionTracker {
    fn name(&self) -> &str {
        "motion_tracker"
    }

    fn phase(&self) -> Phase {
        Phase::PreOcr
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, data: &mut PipelineData, _ctx: &OptimizerContext) -> Result<()> {
        let frame = match data.frame.as_ref() {
            Some(frame) => frame,
            None => return Ok(()),
        };
        let (pixels, width, height) = frame.downsampled_gray(self.config.downsample);
        let grid = GrayGrid {
            pixels: pixels.iter().map(|&p| p as f32).collect(),
            width: width as i32,
            height: height as i32,
        };

        if let Some((dx, dy, corr)) = self.detect(&grid) {
            let offset_x = dx * self.config.downsample as i32;
            let offset_y = dy * self.config.downsample as i32;
            let displacement =
                ((offset_x * offset_x + offset_y * offset_y) as f32).sqrt() as u32;

            let moving = (dx != 0 || dy != 0)
                && corr > self.config.correlation_threshold
                && displacement < self.config.max_motion_distance;

            if moving {
                tracing::debug!(
                    "Motion detected: offset ({}, {}) correlation {:.3}",
                    offset_x,
                    offset_y,
                    corr
                );
                data.skip_ocr = true;
                data.overlay_offset = Some((offset_x, offset_y));
                self.last_motion = Some(Instant::now());
                self.motions += 1;
            } else if let Some(last) = self.last_motion {
                if last.elapsed() >= self.config.stop_threshold {
                    // Content settled: verify the reused blocks once
                    data.force_ocr = true;
                    self.last_motion = None;
                    tracing::debug!("Motion stopped; forcing a verification OCR pass");
                }
            }
        }

        self.previous = Some(grid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screenlate_cache::{CacheManager, CacheManagerConfig};
    use screenlate_capture::{Frame, PixelFormat, Rect, Region};
    use screenlate_plugins::PluginRegistry;

    fn ctx_parts(tag: &str) -> (CacheManager, PluginRegistry) {
        let dir = std::env::temp_dir().join(format!(
            "screenlate-motion-{}-{}",
            tag,
            std::process::id()
        ));
        let cache = CacheManager::new(CacheManagerConfig {
            dictionary_dir: dir,
            ..Default::default()
        });
        (cache, PluginRegistry::new())
    }

    /// Frame with a bright square at (x, y) on a dark background
    fn frame_with_square(x: u32, y: u32) -> Frame {
        const SIZE: u32 = 128;
        let mut pixels = vec![10u8; (SIZE * SIZE) as usize];
        for sy in y..(y + 24).min(SIZE) {
            for sx in x..(x + 24).min(SIZE) {
                pixels[(sy * SIZE + sx) as usize] = 240;
            }
        }
        let region = Region::new("r", 0, Rect::new(0, 0, SIZE, SIZE));
        Frame::new(pixels, SIZE, SIZE, PixelFormat::Gray8, region).unwrap()
    }

    fn tracker() -> MotionTracker {
        MotionTracker::new(MotionConfig {
            downsample: 8,
            search_px: 48,
            correlation_threshold: 0.8,
            max_motion_distance: 200,
            stop_threshold: Duration::from_millis(50),
        })
    }

    #[test]
    fn test_first_frame_detects_nothing() {
        let (cache, registry) = ctx_parts("first");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };
        let mut tracker = tracker();
        let mut data = PipelineData::new("en", "de");
        data.frame = Some(frame_with_square(20, 20));
        tracker.process(&mut data, &ctx).unwrap();
        assert!(!data.skip_ocr);
        assert!(data.overlay_offset.is_none());
    }

    #[test]
    fn test_translation_motion_is_detected() {
        let (cache, registry) = ctx_parts("moved");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };
        let mut tracker = tracker();
        let mut data = PipelineData::new("en", "de");
        data.frame = Some(frame_with_square(20, 20));
        tracker.process(&mut data, &ctx).unwrap();

        // Square moved 16px right (2 grid cells at 8x downsample)
        let mut data2 = PipelineData::new("en", "de");
        data2.frame = Some(frame_with_square(36, 20));
        tracker.process(&mut data2, &ctx).unwrap();

        assert!(data2.skip_ocr);
        let (dx, dy) = data2.overlay_offset.expect("offset expected");
        assert_eq!(dy, 0);
        assert_eq!(dx, 16);
        assert_eq!(tracker.motions(), 1);
    }

    #[test]
    fn test_static_frames_do_not_skip_ocr() {
        let (cache, registry) = ctx_parts("static");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };
        let mut tracker = tracker();
        for _ in 0..2 {
            let mut data = PipelineData::new("en", "de");
            data.frame = Some(frame_with_square(20, 20));
            tracker.process(&mut data, &ctx).unwrap();
            assert!(!data.skip_ocr);
        }
    }

    #[test]
    fn test_force_ocr_after_motion_stops() {
        let (cache, registry) = ctx_parts("stop");
        let ctx = OptimizerContext {
            cache: &cache,
            registry: &registry,
        };
        let mut tracker = tracker();

        let mut data = PipelineData::new("en", "de");
        data.frame = Some(frame_with_square(20, 20));
        tracker.process(&mut data, &ctx).unwrap();

        let mut data = PipelineData::new("en", "de");
        data.frame = Some(frame_with_square(36, 20));
        tracker.process(&mut data, &ctx).unwrap();
        assert!(data.skip_ocr);

        std::thread::sleep(Duration::from_millis(60));

        // Still frame after the stop threshold: one forced verification pass
        let mut data = PipelineData::new("en", "de");
        data.frame = Some(frame_with_square(36, 20));
        tracker.process(&mut data, &ctx).unwrap();
        assert!(data.force_ocr);
        assert!(!data.skip_ocr);

        // And only one
        let mut data = PipelineData::new("en", "de");
        data.frame = Some(frame_with_square(36, 20));
        tracker.process(&mut data, &ctx).unwrap();
        assert!(!data.force_ocr);
    }
}
