//! Capture regions
//!
//! A region is a named rectangle on a specific monitor. Region sets are
//! user-configured; the capture stage observes whichever set is active and
//! captures each enabled region once per tick.

use crate::geometry::Rect;
use serde::{Deserialize, Serialize};

/// A named capture region pinned to one monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Stable identifier, unique within a set
    pub id: String,

    /// Monitor the rectangle lives on (0-based)
    pub monitor_index: usize,

    /// Screen-space rectangle to capture
    pub rect: Rect,

    /// Disabled regions are kept in the set but not captured
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Region {
    /// Create an enabled region
    pub fn new(id: impl Into<String>, monitor_index: usize, rect: Rect) -> Self {
        Self {
            id: id.into(),
            monitor_index,
            rect,
            enabled: true,
        }
    }
}

/// A named collection of regions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionSet {
    /// Set name, referenced from the CLI and config
    pub name: String,

    /// Regions in the set
    pub regions: Vec<Region>,
}

impl RegionSet {
    /// Create an empty set
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regions: Vec::new(),
        }
    }

    /// Add a region, replacing any existing region with the same id
    pub fn upsert(&mut self, region: Region) {
        if let Some(existing) = self.regions.iter_mut().find(|r| r.id == region.id) {
            *existing = region;
        } else {
            self.regions.push(region);
        }
    }

    /// Iterate over enabled, non-empty regions
    pub fn active(&self) -> impl Iterator<Item = &Region> {
        self.regions
            .iter()
            .filter(|r| r.enabled && !r.rect.is_empty())
    }

    /// Look up a region by id
    pub fn get(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }
}
