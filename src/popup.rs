//! Filter popup geometry and open/close lifecycle

use crate::cell::Column;
use crate::editor::{FilterEditor, RangeField};
use serde::{Deserialize, Serialize};

/// Gap between the trigger button and the popup
pub const POPUP_GAP: f64 = 12.0;
/// Fade-out time before the popup unmounts
pub const CLOSE_DELAY_MS: f64 = 200.0;
/// Padding used when the dashboard config has none
pub const DEFAULT_PADDING: f64 = 8.0;
/// Size assumed before the popup has been measured
pub const ESTIMATED_POPUP_SIZE: Size = Size {
    width: 200.0,
    height: 150.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.left + self.width / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub top: f64,
    pub left: f64,
}

/// Place a popup centered under its trigger, flipping above when it would overflow
///
/// Both coordinates stay within `[padding, viewport - popup - padding]` whenever
/// the popup fits in the viewport; otherwise they pin to `padding`.
pub fn compute_popup_position(trigger: &Rect, popup: Size, viewport: Size, padding: f64) -> Position {
    let max_left = viewport.width - popup.width - padding;
    let left = (trigger.center_x() - popup.width / 2.0).min(max_left).max(padding);

    let max_top = viewport.height - popup.height - padding;
    let mut top = trigger.bottom() + POPUP_GAP;
    if top + popup.height > viewport.height - padding {
        top = trigger.top - popup.height - POPUP_GAP;
        if top < padding {
            top = max_top.max(padding);
        }
    }
    // A trigger scrolled above the viewport can still place the popup too high
    let top = top.min(max_top).max(padding);

    Position { top, left }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum PopupPhase {
    /// Rendered invisible at the estimated position, awaiting a size
    Measuring,
    Open,
    /// Fading out; unmount once `now >= unmount_at`
    Closing { unmount_at: f64 },
}

/// Popup editing the pending filter of one column
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPopup {
    pub data_index: String,
    pub editor: FilterEditor,
    pub phase: PopupPhase,
    pub position: Position,
    pending: String,
    trigger: Rect,
    viewport: Size,
    padding: f64,
}

impl FilterPopup {
    /// Open for `column` with its current filter value, positioned by estimate
    pub fn open(column: &Column, value: &str, trigger: Rect, viewport: Size, padding: f64) -> Self {
        Self {
            data_index: column.data_index.clone(),
            editor: FilterEditor::for_column(column.data_type, value),
            phase: PopupPhase::Measuring,
            position: compute_popup_position(&trigger, ESTIMATED_POPUP_SIZE, viewport, padding),
            pending: value.to_string(),
            trigger,
            viewport,
            padding,
        }
    }

    /// Reposition with the measured size and fade in
    pub fn measured(&mut self, size: Size) {
        if self.phase != PopupPhase::Measuring {
            return;
        }
        self.position = compute_popup_position(&self.trigger, size, self.viewport, self.padding);
        self.phase = PopupPhase::Open;
    }

    pub fn pending_value(&self) -> &str {
        &self.pending
    }

    pub fn set_field(&mut self, field: RangeField, value: &str) {
        self.pending = self.editor.set_field(field, value);
    }

    pub fn is_closing(&self) -> bool {
        matches!(self.phase, PopupPhase::Closing { .. })
    }

    pub fn is_visible(&self) -> bool {
        self.phase == PopupPhase::Open
    }

    /// Commit the pending value and start closing
    pub fn apply(&mut self, now_ms: f64) -> Option<String> {
        self.close(now_ms).then(|| self.pending.clone())
    }

    /// Commit an empty filter and start closing
    pub fn clear(&mut self, now_ms: f64) -> Option<String> {
        self.close(now_ms).then(String::new)
    }

    /// Outside click or Escape: close without committing
    pub fn dismiss(&mut self, now_ms: f64) {
        self.close(now_ms);
    }

    fn close(&mut self, now_ms: f64) -> bool {
        if self.is_closing() {
            return false;
        }
        self.phase = PopupPhase::Closing {
            unmount_at: now_ms + CLOSE_DELAY_MS,
        };
        true
    }

    /// `true` once the close delay has elapsed and the popup should unmount
    pub fn tick(&self, now_ms: f64) -> bool {
        match self.phase {
            PopupPhase::Closing { unmount_at } => now_ms >= unmount_at,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::DataType;

    const VIEWPORT: Size = Size {
        width: 1024.0,
        height: 768.0,
    };

    #[test]
    fn test_position_below_trigger() {
        let trigger = Rect::new(500.0, 100.0, 20.0, 20.0);
        let pos = compute_popup_position(&trigger, Size::new(200.0, 150.0), VIEWPORT, 10.0);
        assert_eq!(pos, Position { top: 132.0, left: 410.0 });
    }

    #[test]
    fn test_position_flips_above_and_clamps() {
        let trigger = Rect::new(500.0, 700.0, 20.0, 20.0);
        let pos = compute_popup_position(&trigger, Size::new(200.0, 150.0), VIEWPORT, 10.0);
        assert_eq!(pos.top, 700.0 - 150.0 - 12.0);

        // Tall popup fits neither above nor below
        let trigger = Rect::new(0.0, 300.0, 20.0, 20.0);
        let pos = compute_popup_position(&trigger, Size::new(200.0, 600.0), VIEWPORT, 10.0);
        assert_eq!(pos, Position { top: 158.0, left: 10.0 });

        let trigger = Rect::new(1010.0, 10.0, 20.0, 20.0);
        let pos = compute_popup_position(&trigger, Size::new(200.0, 150.0), VIEWPORT, 10.0);
        assert_eq!(pos.left, 1024.0 - 200.0 - 10.0);
    }

    #[test]
    fn test_position_stays_in_bounds() {
        let pad = 8.0;
        for tx in (-100..1200).step_by(37) {
            for ty in (-200..1000).step_by(41) {
                for (pw, ph) in [(200.0, 150.0), (320.0, 400.0), (50.0, 700.0)] {
                    let trigger = Rect::new(tx as f64, ty as f64, 24.0, 24.0);
                    let pos = compute_popup_position(&trigger, Size::new(pw, ph), VIEWPORT, pad);
                    assert!(pos.left >= pad && pos.left <= VIEWPORT.width - pw - pad);
                    assert!(pos.top >= pad && pos.top <= VIEWPORT.height - ph - pad);
                }
            }
        }
    }

    #[test]
    fn test_lifecycle() {
        let column = Column::new("n", DataType::Number);
        let trigger = Rect::new(100.0, 100.0, 20.0, 20.0);
        let mut popup = FilterPopup::open(&column, "10-20", trigger, VIEWPORT, DEFAULT_PADDING);
        assert_eq!(popup.phase, PopupPhase::Measuring);
        assert!(!popup.is_visible());

        popup.measured(Size::new(240.0, 120.0));
        assert!(popup.is_visible());

        popup.set_field(RangeField::End, "30");
        assert_eq!(popup.pending_value(), "10-30");

        assert_eq!(popup.apply(1000.0).as_deref(), Some("10-30"));
        // A second commit while fading out is ignored
        assert_eq!(popup.clear(1050.0), None);
        assert!(!popup.tick(1100.0));
        assert!(popup.tick(1200.0));
    }

    #[test]
    fn test_dismiss_and_clear() {
        let column = Column::new("s", DataType::String);
        let mut popup = FilterPopup::open(&column, "abc", Rect::default(), VIEWPORT, DEFAULT_PADDING);
        popup.dismiss(0.0);
        assert!(popup.is_closing());
        assert_eq!(popup.apply(10.0), None);

        let mut popup = FilterPopup::open(&column, "abc", Rect::default(), VIEWPORT, DEFAULT_PADDING);
        assert_eq!(popup.clear(0.0).as_deref(), Some(""));
    }
}
