//! Grid container: device classification, row height and per-mode layout

use crate::card::{CardDescriptor, GridRect};
use crate::config::{DashboardConfig, EditorConfig};
use crate::events::Debounce;
use crate::mobile::{LayoutItem, MobileLayoutEngine};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::debug;

/// Viewports at or below this width are treated as phones
pub const MOBILE_BREAKPOINT: f64 = 768.0;
pub const RESIZE_DEBOUNCE_MS: f64 = 100.0;
const FALLBACK_ROW_HEIGHT: f64 = 32.0;
const MIN_ROW_HEIGHT: f64 = 1.0;

const MOBILE_AGENTS: [&str; 8] = [
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Mobile if the user agent names a handheld platform or the viewport is narrow
pub fn is_mobile_device(user_agent: &str, viewport_width: f64) -> bool {
    let agent = user_agent.to_lowercase();
    MOBILE_AGENTS.iter().any(|name| agent.contains(name)) || viewport_width <= MOBILE_BREAKPOINT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportSize {
    pub width: f64,
    pub height: f64,
}

impl ViewportSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Round `value` down to `precision` decimal places
pub fn floor_to(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    (value * factor).floor() / factor
}

/// Row height that packs whole rows into `viewport_height`
///
/// The row count is the number of base-height rows (plus margins) needed to
/// cover the viewport; the overshoot is taken back evenly from every row.
/// Viewports shorter than the container padding still get a 1px row.
pub fn dynamic_row_height(config: Option<&DashboardConfig>, viewport_height: f64) -> f64 {
    let Some(config) = config else {
        return FALLBACK_ROW_HEIGHT;
    };
    let base = config.grid_default_row_height;
    let margin = config.grid_margin[0];
    let padding = config.grid_container_padding[0];

    let max_rows = ((viewport_height + margin) / (base + margin)).ceil().max(1.0);
    let packed = max_rows * base + (max_rows - 1.0) * margin + 2.0 * padding;
    (base + floor_to((viewport_height - packed) / max_rows, 2)).max(MIN_ROW_HEIGHT)
}

/// Card id with its grid rectangle, as exchanged with the grid widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridItem {
    pub i: String,
    #[serde(flatten)]
    pub rect: GridRect,
}

impl From<LayoutItem> for GridItem {
    fn from(item: LayoutItem) -> Self {
        Self {
            i: item.i,
            rect: GridRect {
                x: item.x,
                y: item.y,
                w: item.w,
                h: item.h,
                min_w: Some(item.min_w),
                min_h: Some(item.min_h),
                max_w: Some(item.max_w),
                max_h: Some(item.max_h),
            },
        }
    }
}

/// Result of a settled resize that changed the grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridChange {
    pub mode_changed: bool,
    pub mode: LayoutMode,
    pub row_height: f64,
}

/// Mobile variants derived from a specific pair of source configs
struct MobileConfigs {
    dashboard_source: Rc<DashboardConfig>,
    editor_source: Rc<EditorConfig>,
    dashboard: Rc<DashboardConfig>,
    editor: Rc<EditorConfig>,
}

/// Grid state owned by one mounted dashboard
pub struct GridContainer {
    dashboard: Rc<DashboardConfig>,
    editor: Rc<EditorConfig>,
    user_agent: String,
    mode: LayoutMode,
    row_height: f64,
    resize: Debounce,
    pending_size: ViewportSize,
    mobile_configs: Option<MobileConfigs>,
    mobile_layout: MobileLayoutEngine,
    torn_down: bool,
}

impl GridContainer {
    pub fn new(
        dashboard: Rc<DashboardConfig>,
        editor: Rc<EditorConfig>,
        user_agent: &str,
        size: ViewportSize,
    ) -> Self {
        let mode = if is_mobile_device(user_agent, size.width) {
            LayoutMode::Mobile
        } else {
            LayoutMode::Desktop
        };
        let mut grid = Self {
            dashboard,
            editor,
            user_agent: user_agent.to_string(),
            mode,
            row_height: FALLBACK_ROW_HEIGHT,
            resize: Debounce::new(RESIZE_DEBOUNCE_MS),
            pending_size: size,
            mobile_configs: None,
            mobile_layout: MobileLayoutEngine::new(),
            torn_down: false,
        };
        let config = grid.dashboard_config();
        grid.row_height = dynamic_row_height(Some(&config), size.height);
        grid
    }

    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn is_mobile(&self) -> bool {
        self.mode == LayoutMode::Mobile
    }

    pub fn row_height(&self) -> f64 {
        self.row_height
    }

    /// Replace the source configs; derived mobile variants are rebuilt lazily
    pub fn set_configs(&mut self, dashboard: Rc<DashboardConfig>, editor: Rc<EditorConfig>) {
        if !Rc::ptr_eq(&self.dashboard, &dashboard) || !Rc::ptr_eq(&self.editor, &editor) {
            self.mobile_configs = None;
        }
        self.dashboard = dashboard;
        self.editor = editor;
    }

    fn mobile_configs(&mut self) -> &MobileConfigs {
        let stale = self.mobile_configs.as_ref().map_or(true, |cached| {
            !Rc::ptr_eq(&cached.dashboard_source, &self.dashboard)
                || !Rc::ptr_eq(&cached.editor_source, &self.editor)
        });
        if stale {
            self.mobile_configs = None;
        }
        self.mobile_configs.get_or_insert_with(|| MobileConfigs {
            dashboard: Rc::new(self.dashboard.for_mobile()),
            editor: Rc::new(self.editor.for_mobile()),
            dashboard_source: self.dashboard.clone(),
            editor_source: self.editor.clone(),
        })
    }

    /// Dashboard config for the current mode
    pub fn dashboard_config(&mut self) -> Rc<DashboardConfig> {
        match self.mode {
            LayoutMode::Desktop => self.dashboard.clone(),
            LayoutMode::Mobile => self.mobile_configs().dashboard.clone(),
        }
    }

    /// Editor config for the current mode; mobile never drags or resizes
    pub fn editor_config(&mut self) -> Rc<EditorConfig> {
        match self.mode {
            LayoutMode::Desktop => self.editor.clone(),
            LayoutMode::Mobile => self.mobile_configs().editor.clone(),
        }
    }

    /// Record a viewport resize; the grid settles on the next [`tick`](Self::tick)
    /// after the debounce period
    pub fn on_resize(&mut self, size: ViewportSize, now_ms: f64) {
        if self.torn_down {
            return;
        }
        self.pending_size = size;
        self.resize.trigger(now_ms);
    }

    pub fn resize_pending(&self) -> bool {
        self.resize.is_pending()
    }

    /// Apply a settled resize; `Some` only when the mode or row height changed
    pub fn tick(&mut self, now_ms: f64) -> Option<GridChange> {
        if self.torn_down || !self.resize.poll(now_ms) {
            return None;
        }
        let size = self.pending_size;
        let mode = if is_mobile_device(&self.user_agent, size.width) {
            LayoutMode::Mobile
        } else {
            LayoutMode::Desktop
        };
        let mode_changed = mode != self.mode;
        self.mode = mode;
        let config = self.dashboard_config();
        let row_height = dynamic_row_height(Some(&config), size.height);

        if !mode_changed && row_height == self.row_height {
            return None;
        }
        debug!(target: "layout", ?mode, row_height, "grid resized");
        self.row_height = row_height;
        Some(GridChange {
            mode_changed,
            mode,
            row_height,
        })
    }

    /// Rectangles for the current mode
    ///
    /// Desktop keeps the authored rectangles; mobile repacks via [`MobileLayoutEngine`].
    pub fn layout(&mut self, cards: &Rc<Vec<CardDescriptor>>) -> Vec<GridItem> {
        match self.mode {
            LayoutMode::Desktop => cards
                .iter()
                .map(|card| GridItem {
                    i: card.id.clone(),
                    rect: card.layout,
                })
                .collect(),
            LayoutMode::Mobile => {
                let cols = self.dashboard_config().grid_cols;
                self.mobile_layout
                    .layout(cards, cols)
                    .into_iter()
                    .map(|(_, item)| item.into())
                    .collect()
            }
        }
    }

    /// Stop reacting to resizes; a pending debounce never fires
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.resize.cancel();
        self.mobile_layout.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardType;

    const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0";
    const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)";

    fn container(width: f64) -> GridContainer {
        GridContainer::new(
            Rc::new(DashboardConfig::default()),
            Rc::new(EditorConfig {
                draggable: true,
                resizable: true,
                deletable: true,
                expandable: false,
            }),
            DESKTOP_UA,
            ViewportSize::new(width, 800.0),
        )
    }

    #[test]
    fn test_device_detection() {
        assert!(is_mobile_device(IPHONE_UA, 1200.0));
        assert!(is_mobile_device("Opera Mini/8.0", 1200.0));
        assert!(is_mobile_device(DESKTOP_UA, 768.0));
        assert!(!is_mobile_device(DESKTOP_UA, 769.0));
    }

    #[test]
    fn test_dynamic_row_height() {
        assert_eq!(dynamic_row_height(None, 800.0), 32.0);
        // 20 rows of 32 + 19 margins + 2 paddings = 850, 50px over
        assert_eq!(dynamic_row_height(Some(&DashboardConfig::default()), 800.0), 29.5);
        assert_eq!(dynamic_row_height(Some(&DashboardConfig::default()), 830.0), 31.0);
        assert_eq!(floor_to(-2.555, 2), -2.56);
    }

    #[test]
    fn test_dynamic_row_height_short_viewport() {
        let desktop = DashboardConfig::default();
        let mobile = desktop.for_mobile();
        for height in [0.0, 10.0, 19.0] {
            assert_eq!(dynamic_row_height(Some(&desktop), height), 1.0);
        }
        assert_eq!(dynamic_row_height(Some(&mobile), 0.0), 1.0);
        assert_eq!(dynamic_row_height(Some(&mobile), 10.0), 1.0);
        assert_eq!(dynamic_row_height(Some(&mobile), 19.0), 7.0);
    }

    #[test]
    fn test_mobile_configs_are_cached_by_identity() {
        let mut grid = container(400.0);
        assert!(grid.is_mobile());
        let first = grid.dashboard_config();
        assert_eq!(first.grid_cols, 12);
        assert!(Rc::ptr_eq(&first, &grid.dashboard_config()));

        let editor = grid.editor_config();
        assert!(!editor.draggable && !editor.resizable && editor.expandable);

        grid.set_configs(Rc::new(DashboardConfig::default()), grid.editor.clone());
        assert!(!Rc::ptr_eq(&first, &grid.dashboard_config()));
    }

    #[test]
    fn test_resize_is_debounced_and_diffed() {
        let mut grid = container(1280.0);
        assert_eq!(grid.mode(), LayoutMode::Desktop);
        assert_eq!(grid.row_height(), 29.5);

        grid.on_resize(ViewportSize::new(1000.0, 830.0), 0.0);
        grid.on_resize(ViewportSize::new(600.0, 830.0), 50.0);
        assert_eq!(grid.tick(100.0), None);

        let change = grid.tick(150.0).unwrap();
        assert!(change.mode_changed);
        assert_eq!(change.mode, LayoutMode::Mobile);
        assert_eq!(grid.dashboard_config().grid_cols, 12);

        // Same size again settles without a change
        grid.on_resize(ViewportSize::new(600.0, 830.0), 200.0);
        assert_eq!(grid.tick(400.0), None);
    }

    #[test]
    fn test_no_tick_after_teardown() {
        let mut grid = container(1280.0);
        grid.on_resize(ViewportSize::new(500.0, 500.0), 0.0);
        grid.teardown();
        assert!(!grid.resize_pending());
        assert_eq!(grid.tick(1000.0), None);
        grid.on_resize(ViewportSize::new(500.0, 500.0), 2000.0);
        assert_eq!(grid.tick(3000.0), None);
        assert_eq!(grid.mode(), LayoutMode::Desktop);
    }

    #[test]
    fn test_layout_per_mode() {
        let cards = Rc::new(vec![
            CardDescriptor::new("t", CardType::Table, GridRect::new(0, 0, 12, 6)),
            CardDescriptor::new("m", CardType::Metric, GridRect::new(12, 0, 6, 3)),
        ]);
        let mut grid = container(1280.0);
        let desktop = grid.layout(&cards);
        assert_eq!(desktop[1].rect, GridRect::new(12, 0, 6, 3));

        grid.on_resize(ViewportSize::new(375.0, 700.0), 0.0);
        grid.tick(RESIZE_DEBOUNCE_MS);
        let mobile = grid.layout(&cards);
        assert_eq!(mobile[0].i, "m");
        assert_eq!((mobile[0].rect.x, mobile[0].rect.w), (0, 6));
        assert_eq!((mobile[1].rect.y, mobile[1].rect.w), (3, 12));
    }
}
