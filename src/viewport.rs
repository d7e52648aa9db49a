//! Viewport management for virtual scrolling

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Rows rendered above and below the visible viewport
pub const OVERSCAN: usize = 5;

/// Container height changes smaller than this are treated as noise
pub const RESIZE_THRESHOLD: f64 = 5.0;

/// Inclusive index window of rendered rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleRange {
    pub start_index: usize,
    pub end_index: usize,
    /// Number of rows in the window; zero when there is nothing to render
    pub len: usize,
}

impl VisibleRange {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Half-open range for slicing
    pub fn as_range(&self) -> Range<usize> {
        self.start_index..self.start_index + self.len
    }
}

/// Compute the rendered row window for a scroll position
///
/// Negative or non-finite geometry is clamped to zero, and a non-positive
/// row height is treated as one pixel.
pub fn compute_range(scroll_top: f64, container_height: f64, row_height: f64, total_rows: usize) -> VisibleRange {
    if total_rows == 0 {
        return VisibleRange::default();
    }
    let scroll_top = non_negative(scroll_top);
    let container_height = non_negative(container_height);
    let row_height = if row_height.is_finite() { row_height.max(1.0) } else { 1.0 };

    let first_visible = (scroll_top / row_height).floor() as usize;
    let visible_rows = (container_height / row_height).ceil() as usize;

    let last = total_rows - 1;
    let start_index = first_visible.saturating_sub(OVERSCAN).min(last);
    let end_index = start_index
        .saturating_add(visible_rows)
        .saturating_add(OVERSCAN * 2)
        .min(last);

    VisibleRange {
        start_index,
        end_index,
        len: end_index - start_index + 1,
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() {
        v.max(0.0)
    } else {
        0.0
    }
}

/// Scroll geometry of one virtualized table body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualScroll {
    pub scroll_top: f64,
    pub container_height: f64,
    pub row_height: f64,
    pub range: VisibleRange,
}

impl VirtualScroll {
    pub fn new(row_height: f64) -> Self {
        Self {
            scroll_top: 0.0,
            container_height: 0.0,
            row_height,
            range: VisibleRange::default(),
        }
    }

    /// Recompute the window for `total_rows` at the current geometry
    pub fn recompute(&mut self, total_rows: usize) -> VisibleRange {
        self.range = compute_range(self.scroll_top, self.container_height, self.row_height, total_rows);
        self.range
    }

    pub fn scroll_to(&mut self, scroll_top: f64, container_height: f64, total_rows: usize) -> VisibleRange {
        self.scroll_top = non_negative(scroll_top);
        self.container_height = non_negative(container_height);
        self.recompute(total_rows)
    }

    /// Apply a measured container height; returns `false` for sub-threshold noise
    pub fn resize(&mut self, container_height: f64, total_rows: usize) -> bool {
        let container_height = non_negative(container_height);
        if (container_height - self.container_height).abs() < RESIZE_THRESHOLD {
            return false;
        }
        self.container_height = container_height;
        self.recompute(total_rows);
        true
    }

    pub fn reset(&mut self, total_rows: usize) -> VisibleRange {
        self.scroll_top = 0.0;
        self.recompute(total_rows)
    }

    /// Pixel offset of the first rendered row
    pub fn offset_y(&self) -> f64 {
        self.range.start_index as f64 * self.row_height
    }

    /// Height of the full scrollable body
    pub fn total_height(&self, total_rows: usize) -> f64 {
        total_rows as f64 * self.row_height
    }
}

impl Default for VirtualScroll {
    fn default() -> Self {
        Self::new(32.0)
    }
}
