//! Intelligent overlay positioning
//!
//! Overlapping source text produces overlapping overlays. The positioner
//! walks the translations in order, keeps every rectangle that fits, and
//! nudges the rest through a fixed candidate ladder (above, below, left,
//! right, then the right-side diagonals) until it finds a spot that is
//! on-screen and collision-free. When everything collides, the least-bad
//! candidate wins. Every result is clamped inside the screen margin.

use screenlate_capture::Rect;
use screenlate_plugins::Translation;

/// Placement tunables
#[derive(Debug, Clone)]
pub struct PositionerConfig {
    /// Padding used for collision tests, in pixels
    pub collision_padding: i32,

    /// Distance between a rectangle and its repositioned candidates
    pub offset_padding: i32,

    /// Minimum distance from the screen edge
    pub screen_margin: i32,
}

impl Default for PositionerConfig {
    fn default() -> Self {
        Self {
            collision_padding: 5,
            offset_padding: 12,
            screen_margin: 10,
        }
    }
}

/// The positioner
pub struct IntelligentPositioner {
    config: PositionerConfig,
}

impl IntelligentPositioner {
    pub fn new(config: PositionerConfig) -> Self {
        Self { config }
    }

    /// Candidate offsets in preference order
    fn candidates(&self, rect: &Rect) -> [Rect; 6] {
        let pad = self.config.offset_padding;
        let h = rect.height as i32;
        let w = rect.width as i32;
        [
            rect.translated(0, -(h + pad)),      // above
            rect.translated(0, h + pad),         // below
            rect.translated(-(w + pad), 0),      // left
            rect.translated(w + pad, 0),         // right
            rect.translated(w + pad, -(h + pad)), // above-right
            rect.translated(w + pad, h + pad),   // below-right
        ]
    }

    fn collisions(&self, rect: &Rect, placed: &[Rect]) -> usize {
        placed
            .iter()
            .filter(|p| rect.intersects_padded(p, self.config.collision_padding))
            .count()
    }

    /// Place one rectangle against those already placed
    fn place(&self, rect: Rect, placed: &[Rect], screen: &Rect) -> Rect {
        let margin = self.config.screen_margin;

        if self.collisions(&rect, placed) == 0 && rect.fits_within(screen, margin) {
            return rect;
        }

        let candidates = self.candidates(&rect);
        for candidate in &candidates {
            if candidate.fits_within(screen, margin) && self.collisions(candidate, placed) == 0 {
                return *candidate;
            }
        }

        // Everything collides: take the candidate with the fewest collisions,
        // the original position included
        let mut best = rect;
        let mut best_collisions = self.collisions(&rect, placed);
        for candidate in &candidates {
            let count = self.collisions(candidate, placed);
            if count < best_collisions {
                best = *candidate;
                best_collisions = count;
            }
        }
        best.clamped_to(screen, margin)
    }

    /// Adjust all translation rectangles for collision-free display
    ///
    /// Order is preserved; earlier translations win their original spots.
    pub fn position(&self, translations: &mut [Translation], screen: &Rect) {
        let mut placed: Vec<Rect> = Vec::with_capacity(translations.len());
        let mut moved = 0;
        for translation in translations.iter_mut() {
            let rect = self
                .place(translation.rect, &placed, screen)
                .clamped_to(screen, self.config.screen_margin);
            if rect != translation.rect {
                moved += 1;
            }
            translation.rect = rect;
            placed.push(rect);
        }
        if moved > 0 {
            tracing::debug!("Repositioned {} of {} overlays", moved, translations.len());
        }
    }
}

impl Default for IntelligentPositioner {
    fn default() -> Self {
        Self::new(PositionerConfig::default())
    }
}
