use crate::layout::{ScrollMode, DEFAULT_TILE_SIZE};
use crate::widget::{self, Mode};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings a dashboard starts with.
///
/// Every key is optional in TOML; missing keys take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DashboardSettings {
    /// Grid unit for snapping in grid-edit mode (pixels)
    pub tile_size: i64,
    pub mode: Mode,
    pub scroll_mode: ScrollMode,
    /// Canvas width; 0 means unbounded
    pub width: i64,
    /// Canvas height; 0 means unbounded
    pub height: i64,
    /// Offset applied to pasted widgets on both axes
    pub paste_offset: i64,
    pub default_widget_width: i64,
    pub default_widget_height: i64,
    pub min_widget_width: i64,
    pub min_widget_height: i64,
    pub bump_distance: i64,
    pub drag_threshold: i64,
    /// How far an infinite canvas grows when scrolled past its edge
    pub scroll_expand_step: i64,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            mode: Mode::GridEdit,
            scroll_mode: ScrollMode::Constrained,
            width: 0,
            height: 0,
            paste_offset: 20,
            default_widget_width: widget::DEFAULT_WIDTH,
            default_widget_height: widget::DEFAULT_HEIGHT,
            min_widget_width: widget::MIN_WIDTH,
            min_widget_height: widget::MIN_HEIGHT,
            bump_distance: widget::BUMP_DISTANCE,
            drag_threshold: widget::DRAG_THRESHOLD,
            scroll_expand_step: 200,
        }
    }
}

impl DashboardSettings {
    /// Load from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("Failed to parse dashboard settings")
    }

    /// Load from a TOML file on disk
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings from: {}", path.display()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render dashboard settings")
    }

    /// Problems with the values; empty when the settings are usable
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.tile_size <= 0 {
            errors.push(format!("tile_size must be positive, got {}", self.tile_size));
        }
        if self.width < 0 || self.height < 0 {
            errors.push(format!(
                "canvas size must not be negative, got {}x{}",
                self.width, self.height
            ));
        }
        if self.min_widget_width <= 0 || self.min_widget_height <= 0 {
            errors.push("minimum widget size must be positive".to_string());
        }
        if self.default_widget_width < self.min_widget_width
            || self.default_widget_height < self.min_widget_height
        {
            errors.push("default widget size is below the minimum".to_string());
        }
        if self.scroll_expand_step <= 0 {
            errors.push(format!(
                "scroll_expand_step must be positive, got {}",
                self.scroll_expand_step
            ));
        }
        errors
    }
}
