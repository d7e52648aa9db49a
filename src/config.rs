//! Dashboard, editor and project configuration

use crate::temporal::parse_int_prefix;
use serde::{Deserialize, Serialize};

const DEFAULT_TABLE_ROW_HEIGHT: f64 = 32.0;
const DEFAULT_CELL_MIN_WIDTH: f64 = 80.0;

/// Visual and grid configuration of a dashboard
///
/// Every key is optional in the JSON; missing keys keep the built-in default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct DashboardConfig {
    pub base_font_size: String,
    pub grid_cols: u32,
    pub grid_default_row_height: f64,
    /// `[horizontal, vertical]`
    pub grid_margin: [f64; 2],
    pub grid_container_padding: [f64; 2],
    pub body_background: String,
    pub body_background_image: Vec<String>,
    pub body_font_family: String,
    pub colors_primary: String,
    pub colors_success: String,
    pub colors_warning: String,
    pub colors_error: String,
    pub colors_info: String,
    pub colors_link: String,
    pub colors_text_primary: String,
    pub colors_text_secondary: String,
    pub colors_text_third: String,
    pub colors_border: String,
    pub card_background: String,
    pub card_title_font_size: String,
    pub card_border_width: String,
    pub card_border_color: String,
    pub card_border_style: String,
    pub card_border_radius: String,
    pub card_gap: String,
    pub card_shadow: String,
    pub card_hover_border_color: String,
    pub card_hover_border_style: String,
    pub card_hover_shadow: String,
    pub table_font_size: String,
    pub table_header_background_color: String,
    pub table_cell_min_width: String,
    pub table_cell_height: String,
    pub table_cell_padding: String,
    pub table_border_color: String,
    pub table_border_radius: String,
    pub echarts_color: Vec<String>,
    pub interaction_card_hoverable: bool,
    pub metric_card_icon_type: MetricIconType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricIconType {
    #[default]
    Circle,
    Normal,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        let border = "rgba(28, 29, 35, 0.08)".to_string();
        Self {
            base_font_size: "12px".into(),
            grid_cols: 24,
            grid_default_row_height: 32.0,
            grid_margin: [10.0, 10.0],
            grid_container_padding: [10.0, 10.0],
            body_background: "#ffffff".into(),
            body_background_image: vec![
                "linear-gradient(135deg, rgba(49, 92, 236, 0.04) 0%, rgba(248, 250, 252, 0.6) 50%, #ffffff 100%)".into(),
                "radial-gradient(circle at 15% 85%, rgba(49, 92, 236, 0.06) 0%, transparent 40%)".into(),
                "radial-gradient(circle at 85% 15%, rgba(49, 92, 236, 0.03) 0%, transparent 40%)".into(),
            ],
            body_font_family: r#""Microsoft YaHei", "PingFang SC", "Hiragino Sans GB", "SimSun", sans-serif"#.into(),
            colors_primary: "#6851ff".into(),
            colors_success: "#52c41a".into(),
            colors_warning: "#faad14".into(),
            colors_error: "#ff4d4f".into(),
            colors_info: "#1677ff".into(),
            colors_link: "#315cec".into(),
            colors_text_primary: "rgba(28, 29, 35, 1)".into(),
            colors_text_secondary: "rgba(28, 29, 35, 0.8)".into(),
            colors_text_third: "rgba(28, 29, 35, 0.6)".into(),
            colors_border: border.clone(),
            card_background: "rgba(255, 255, 255, 1)".into(),
            card_title_font_size: "14px".into(),
            card_border_width: "0px".into(),
            card_border_color: border.clone(),
            card_border_style: "solid".into(),
            card_border_radius: "4px".into(),
            card_gap: "10px".into(),
            card_shadow: "0 0 8px 1px rgba(0, 0, 0, 0.05)".into(),
            card_hover_border_color: border.clone(),
            card_hover_border_style: "solid".into(),
            card_hover_shadow: "0 0 6px 1px rgba(0, 0, 0, 0.1)".into(),
            table_font_size: "12px".into(),
            table_header_background_color: "#6851ff".into(),
            table_cell_min_width: "80px".into(),
            table_cell_height: "32px".into(),
            table_cell_padding: "0 10px".into(),
            table_border_color: border,
            table_border_radius: "4px".into(),
            echarts_color: [
                "#6851ff", "#4c9dff", "#57c7e6", "#4cc9a6", "#3e7d6b", "#f3bd51",
                "#fd905a", "#e65454", "#f3738c", "#c34b9d", "#7a89a6", "#4c4c5c",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            interaction_card_hoverable: true,
            metric_card_icon_type: MetricIconType::Circle,
        }
    }
}

impl DashboardConfig {
    pub fn from_json(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }

    /// Compact variant used on phones: 12 columns, tighter spacing, smaller type
    pub fn for_mobile(&self) -> Self {
        Self {
            grid_cols: 12,
            grid_container_padding: [6.0, 6.0],
            grid_margin: [6.0, 6.0],
            grid_default_row_height: 32.0,
            interaction_card_hoverable: true,
            base_font_size: "10px".into(),
            card_title_font_size: "12px".into(),
            card_gap: "6px".into(),
            table_font_size: "11px".into(),
            table_cell_min_width: "80px".into(),
            table_cell_height: "28px".into(),
            table_cell_padding: "0 6px".into(),
            ..self.clone()
        }
    }

    /// Table row height in pixels, from `TABLE_CELL_HEIGHT`
    pub fn row_height_px(&self) -> f64 {
        px_or(&self.table_cell_height, DEFAULT_TABLE_ROW_HEIGHT)
    }

    pub fn cell_min_width_px(&self) -> f64 {
        px_or(&self.table_cell_min_width, DEFAULT_CELL_MIN_WIDTH)
    }
}

fn px_or(value: &str, fallback: f64) -> f64 {
    match parse_int_prefix(value) {
        Some(px) if px > 0 => px as f64,
        _ => fallback,
    }
}

/// Which editing affordances the grid offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct EditorConfig {
    pub draggable: bool,
    pub resizable: bool,
    pub deletable: bool,
    pub expandable: bool,
}

impl EditorConfig {
    pub fn for_mobile(&self) -> Self {
        Self {
            draggable: false,
            resizable: false,
            deletable: false,
            expandable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUrl {
    pub name: String,
    pub url: String,
}

/// Project manifest listing the CSV sources and GeoJSON maps
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub data_sources: Vec<NamedUrl>,
    pub geo: Vec<NamedUrl>,
}

impl ProjectConfig {
    pub fn from_json(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_on_defaults() {
        let config = DashboardConfig::from_json(r##"{"GRID_COLS": 12, "COLORS_PRIMARY": "#000"}"##).unwrap();
        assert_eq!(config.grid_cols, 12);
        assert_eq!(config.colors_primary, "#000");
        assert_eq!(config.grid_margin, [10.0, 10.0]);
        assert_eq!(config.echarts_color.len(), 12);
        assert_eq!(config.row_height_px(), 32.0);
    }

    #[test]
    fn test_mobile_config() {
        let desktop = DashboardConfig {
            colors_primary: "#123456".into(),
            ..Default::default()
        };
        let mobile = desktop.for_mobile();
        assert_eq!(mobile.grid_cols, 12);
        assert_eq!(mobile.grid_margin, [6.0, 6.0]);
        assert_eq!(mobile.row_height_px(), 28.0);
        assert_eq!(mobile.colors_primary, "#123456");

        let editor = EditorConfig {
            draggable: true,
            resizable: true,
            deletable: true,
            expandable: false,
        };
        let mobile = editor.for_mobile();
        assert!(!mobile.draggable && !mobile.resizable && !mobile.deletable);
        assert!(mobile.expandable);
    }

    #[test]
    fn test_row_height_fallback() {
        let config = DashboardConfig {
            table_cell_height: "auto".into(),
            ..Default::default()
        };
        assert_eq!(config.row_height_px(), 32.0);
    }

    #[test]
    fn test_project_config() {
        let project = ProjectConfig::from_json(
            r#"{"version":"1.0.0","type":"dashboard","name":"Ops","dataSources":[{"name":"sales","url":"./sales.csv"}],"geo":[]}"#,
        )
        .unwrap();
        assert_eq!(project.kind, "dashboard");
        assert_eq!(project.data_sources[0].url, "./sales.csv");
    }
}
