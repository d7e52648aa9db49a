//! Card descriptors, per-kind payloads and the card load lifecycle

use crate::cell::TableData;
use crate::data::CsvManager;
use crate::errors::{ConfigWarning, DataError, ErrorCategory};
use crate::events::{now_ms, EventBus};
use crate::services::Services;
use futures::future::LocalBoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::rc::Rc;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Metric,
    Kpi,
    Table,
    Text,
    Image,
    Echarts,
    Markdown,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Kpi => "kpi",
            Self::Table => "table",
            Self::Text => "text",
            Self::Image => "image",
            Self::Echarts => "echarts",
            Self::Markdown => "markdown",
        }
    }
}

/// Card rectangle in grid units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_h: Option<u32>,
}

impl GridRect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            ..Default::default()
        }
    }

    pub fn same_position(&self, other: &GridRect) -> bool {
        (self.x, self.y, self.w, self.h) == (other.x, other.y, other.w, other.h)
    }
}

type LoadFn = dyn Fn(Rc<CsvManager>) -> LocalBoxFuture<'static, Result<Value, String>>;

/// Async producer of a card's raw payload
#[derive(Clone)]
pub struct CardLoader(Rc<LoadFn>);

impl CardLoader {
    pub fn new(f: impl Fn(Rc<CsvManager>) -> LocalBoxFuture<'static, Result<Value, String>> + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, csv: Rc<CsvManager>) -> LocalBoxFuture<'static, Result<Value, String>> {
        (self.0)(csv)
    }
}

impl fmt::Debug for CardLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CardLoader(..)")
    }
}

/// One card of the dashboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub card_type: CardType,
    #[serde(default)]
    pub title: String,
    pub layout: GridRect,
    /// Static content, used for sizing cards before their data loads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip)]
    pub loader: Option<CardLoader>,
}

impl CardDescriptor {
    pub fn new(id: &str, card_type: CardType, layout: GridRect) -> Self {
        Self {
            id: id.to_string(),
            card_type,
            title: String::new(),
            layout,
            data: None,
            loader: None,
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_loader(mut self, loader: CardLoader) -> Self {
        self.loader = Some(loader);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Positive,
    Negative,
    Neutral,
}

/// Classify a metric's change by sign
pub fn change_type(change: &Value) -> ChangeType {
    match change {
        Value::String(s) if s.starts_with('+') => ChangeType::Positive,
        Value::String(s) if s.starts_with('-') => ChangeType::Negative,
        Value::Number(n) => match n.as_f64() {
            Some(v) if v > 0.0 => ChangeType::Positive,
            Some(v) if v < 0.0 => ChangeType::Negative,
            _ => ChangeType::Neutral,
        },
        _ => ChangeType::Neutral,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricData {
    pub label: Option<String>,
    pub value: Value,
    pub change: Value,
    pub unit: String,
    pub icon: String,
    pub icon_color: Option<String>,
}

impl Default for MetricData {
    fn default() -> Self {
        Self {
            label: None,
            value: json!(0),
            change: json!(""),
            unit: String::new(),
            icon: String::new(),
            icon_color: None,
        }
    }
}

impl MetricData {
    /// Payloads without a label and a value fall back to the empty metric
    pub fn from_payload(value: &Value) -> Self {
        let valid = value.get("label").is_some_and(is_truthy) && value.get("value").is_some();
        if !valid {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn change_type(&self) -> ChangeType {
        change_type(&self.change)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KpiIndicator {
    pub label: String,
    pub value: Value,
    pub unit: String,
    pub icon: String,
    pub target: Option<f64>,
    pub change: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiData {
    #[serde(default)]
    pub indicators: Vec<KpiIndicator>,
}

impl KpiData {
    pub fn from_payload(value: &Value) -> Self {
        value
            .get("indicators")
            .and_then(|i| serde_json::from_value(i.clone()).ok())
            .map(|indicators| Self { indicators })
            .unwrap_or_default()
    }
}

/// An icon used by more than one KPI indicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateIcon {
    pub icon: String,
    pub count: usize,
    /// One-based, comma separated
    pub positions: String,
}

pub fn duplicate_icons(indicators: &[KpiIndicator]) -> Vec<DuplicateIcon> {
    let mut by_icon: IndexMap<&str, Vec<usize>> = IndexMap::new();
    for (index, indicator) in indicators.iter().enumerate() {
        if !indicator.icon.is_empty() {
            by_icon.entry(indicator.icon.as_str()).or_default().push(index);
        }
    }
    by_icon
        .into_iter()
        .filter(|(_, positions)| positions.len() >= 2)
        .map(|(icon, positions)| DuplicateIcon {
            icon: icon.to_string(),
            count: positions.len(),
            positions: positions
                .iter()
                .map(|p| (p + 1).to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect()
}

fn duplicate_icon_warnings(card_id: &str, data: &KpiData) -> Vec<ConfigWarning> {
    duplicate_icons(&data.indicators)
        .into_iter()
        .map(|dup| ConfigWarning {
            kind: "KPI_CONFIG_WARNING".into(),
            category: ErrorCategory::ComponentRender,
            message: format!(
                "KPI card has duplicate icon '{}' used {} times at positions: {}. Consider using different icons for better visual distinction.",
                dup.icon, dup.count, dup.positions
            ),
            details: json!({
                "cardId": card_id,
                "cardType": "KPICard",
                "duplicatedIcon": dup.icon,
                "count": dup.count,
                "positions": dup.positions,
            }),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextData {
    pub content: Vec<String>,
    #[serde(default = "default_text_align")]
    pub text_align: String,
}

fn default_text_align() -> String {
    "left".into()
}

impl TextData {
    /// A bare string or a single content value becomes a one-paragraph list
    pub fn from_payload(value: &Value) -> Self {
        let text_align = value
            .get("textAlign")
            .and_then(Value::as_str)
            .map_or_else(default_text_align, str::to_string);
        let content = match value {
            Value::String(s) => vec![s.clone()],
            _ => match value.get("content") {
                Some(Value::Array(items)) => items.iter().map(value_text).collect(),
                Some(other) if is_truthy(other) => vec![value_text(other)],
                _ => Vec::new(),
            },
        };
        Self { content, text_align }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub src: String,
    pub alt: String,
    pub fit: String,
    pub position: String,
    pub border_radius: String,
    pub opacity: f64,
}

impl Default for ImageData {
    fn default() -> Self {
        Self {
            src: String::new(),
            alt: "Image".into(),
            fit: "contain".into(),
            position: "center".into(),
            border_radius: "0".into(),
            opacity: 1.0,
        }
    }
}

impl ImageData {
    pub fn from_payload(value: &Value) -> Self {
        let mut image = Self::default();
        match value {
            Value::String(src) => image.src = src.clone(),
            Value::Object(map) => {
                let text = |key: &str, into: &mut String| {
                    if let Some(s) = map.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) {
                        *into = s.to_string();
                    }
                };
                text("src", &mut image.src);
                text("alt", &mut image.alt);
                text("fit", &mut image.fit);
                text("position", &mut image.position);
                text("borderRadius", &mut image.border_radius);
                if let Some(opacity) = map.get("opacity").and_then(Value::as_f64).filter(|o| *o != 0.0) {
                    image.opacity = opacity;
                }
            }
            _ => {}
        }
        image
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkdownData {
    #[serde(default)]
    pub content: String,
}

impl MarkdownData {
    pub fn from_payload(value: &Value) -> Self {
        match value {
            Value::String(s) => Self { content: s.clone() },
            _ => Self {
                content: value.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
            },
        }
    }
}

/// Loaded card content, one variant per card type
#[derive(Debug, Clone)]
pub enum CardKind {
    Metric(MetricData),
    Kpi(KpiData),
    Table(TableData),
    Text(TextData),
    Image(ImageData),
    Echarts(Value),
    Markdown(MarkdownData),
}

impl CardKind {
    pub fn from_payload(card_type: CardType, value: &Value) -> Self {
        match card_type {
            CardType::Metric => Self::Metric(MetricData::from_payload(value)),
            CardType::Kpi => Self::Kpi(KpiData::from_payload(value)),
            CardType::Table => Self::Table(TableData::from_payload(value)),
            CardType::Text => Self::Text(TextData::from_payload(value)),
            CardType::Image => Self::Image(ImageData::from_payload(value)),
            CardType::Echarts => Self::Echarts(value.clone()),
            CardType::Markdown => Self::Markdown(MarkdownData::from_payload(value)),
        }
    }

    pub fn card_type(&self) -> CardType {
        match self {
            Self::Metric(_) => CardType::Metric,
            Self::Kpi(_) => CardType::Kpi,
            Self::Table(_) => CardType::Table,
            Self::Text(_) => CardType::Text,
            Self::Image(_) => CardType::Image,
            Self::Echarts(_) => CardType::Echarts,
            Self::Markdown(_) => CardType::Markdown,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0 && !v.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

const CHART_KEYS: [&str; 6] = ["series", "xAxis", "yAxis", "title", "tooltip", "legend"];

/// An object carrying at least one of the chart's top-level components
pub fn is_valid_echarts_option(option: &Value) -> bool {
    option
        .as_object()
        .is_some_and(|o| CHART_KEYS.iter().any(|k| o.get(*k).is_some_and(is_truthy)))
}

fn series_list(option: &Value) -> Vec<&Value> {
    match option.get("series") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(series @ Value::Object(_)) => vec![series],
        _ => Vec::new(),
    }
}

pub fn has_map_component(option: &Value) -> bool {
    series_list(option).iter().any(|s| s.get("type").and_then(Value::as_str) == Some("map"))
        || option.get("geo").and_then(|g| g.get("map")).is_some_and(is_truthy)
}

/// Map names used by map series and the geo component, deduplicated in order
pub fn extract_map_names(option: &Value) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: Option<&str>| {
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    };
    for series in series_list(option) {
        if series.get("type").and_then(Value::as_str) == Some("map") {
            push(series.get("map").and_then(Value::as_str));
        }
    }
    push(option.get("geo").and_then(|g| g.get("map")).and_then(Value::as_str));
    names
}

fn has_pie_component(option: &Value) -> bool {
    series_list(option).iter().any(|s| s.get("type").and_then(Value::as_str) == Some("pie"))
}

const SIDES: [&str; 4] = ["left", "right", "top", "bottom"];

fn legend_warnings(legend: &Value, prefix: &str, out: &mut Vec<String>) {
    if !SIDES.iter().any(|side| legend.get(*side).is_some()) {
        out.push(format!("{prefix}legend must explicitly declare position (left/right/top/bottom)"));
    }
    if legend.get("type").and_then(Value::as_str) != Some("scroll") {
        out.push(format!("{prefix}legend should enable type: 'scroll' to avoid taking up too much space"));
    }
}

fn grid_warnings(option: &Value, grid: &Value, out: &mut Vec<String>) {
    if grid.get("containLabel") == Some(&Value::Bool(true)) {
        out.push(
            "grid.containLabel is deprecated in ECharts v6.0.0, recommend using { left: 0, right: 0, top: 0, bottom: 0, containLabel: false } configuration"
                .into(),
        );
    }
    for side in SIDES {
        if grid.get(side).is_some_and(Value::is_string) {
            out.push(format!("grid.{side} must be a number, strings or percentages are not allowed"));
        }
    }
    let non_zero: Vec<String> = SIDES
        .iter()
        .filter_map(|side| {
            let value = grid.get(*side)?;
            (value.as_f64() != Some(0.0)).then(|| format!("{}: {}", side, value_text(value)))
        })
        .collect();
    if !non_zero.is_empty() {
        out.push(format!(
            "grid has non-zero position values ({}). Please carefully check if these configurations are necessary, as they may affect chart layout.",
            non_zero.join(", ")
        ));
    }

    let series = series_list(option);
    let has_legend = option.get("legend").is_some() || series.iter().any(|s| s.get("legend").is_some_and(is_truthy));
    let has_visual_map =
        option.get("visualMap").is_some() || series.iter().any(|s| s.get("visualMap").is_some_and(is_truthy));

    match grid.get("outerBounds").filter(|b| is_truthy(b)) {
        Some(bounds) => {
            if !has_legend && !has_visual_map {
                out.push(
                    "grid.outerBounds should only be used when legend or visualMap components are configured, otherwise remove this configuration"
                        .into(),
                );
            }
            for side in SIDES {
                if bounds.get(side).is_some_and(|v| !v.is_number()) {
                    out.push(format!(
                        "grid.outerBounds.{side} must be a number, strings or percentages are not allowed"
                    ));
                }
            }
            let set: Vec<&str> = SIDES.into_iter().filter(|side| bounds.get(*side).is_some()).collect();
            if set.len() > 1 {
                out.push(format!(
                    "grid.outerBounds has {} directions set ({}). Usually only one direction is needed to reserve space for legend/visualMap components. Please verify if all settings are necessary.",
                    set.len(),
                    set.join(", ")
                ));
            }
        }
        None => {
            let exempt = has_map_component(option) || (has_pie_component(option) && has_legend && !has_visual_map);
            if !exempt && (has_legend || has_visual_map) {
                out.push(
                    "grid.outerBounds must be configured to reserve space when legend or visualMap components are present"
                        .into(),
                );
            }
        }
    }
}

/// Layout problems in a chart option that render but look wrong
///
/// Checks the grid, the top-level legend and every per-series legend.
pub fn echarts_config_warnings(card_id: &str, option: &Value) -> Vec<ConfigWarning> {
    let mut messages = Vec::new();
    if let Some(grid) = option.get("grid").filter(|g| is_truthy(g)) {
        grid_warnings(option, grid, &mut messages);
    }
    if let Some(legend) = option.get("legend").filter(|l| is_truthy(l)) {
        legend_warnings(legend, "", &mut messages);
    }
    for (index, series) in series_list(option).iter().enumerate() {
        if let Some(legend) = series.get("legend").filter(|l| is_truthy(l)) {
            legend_warnings(legend, &format!("series[{index}]."), &mut messages);
        }
    }
    messages
        .into_iter()
        .map(|message| ConfigWarning {
            kind: "ECHARTS_CONFIG_WARNING".into(),
            category: ErrorCategory::ComponentRender,
            message,
            details: json!({ "cardId": card_id, "cardType": "ChartCard" }),
        })
        .collect()
}

/// Preprocessing failure; codes containing `INVALID` reject the payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PreprocessError {
    pub code: String,
    pub message: String,
}

impl PreprocessError {
    pub fn is_invalid_data(&self) -> bool {
        self.code.contains("INVALID")
    }
}

/// Result of per-kind preprocessing
#[derive(Debug, Clone, Default)]
pub struct Preprocessed {
    pub data: Value,
    pub warnings: Vec<ConfigWarning>,
}

/// Validate a raw payload for its card type and prepare its collaborators
pub async fn preprocess(
    card_id: &str,
    card_type: CardType,
    data: Value,
    services: &Services,
) -> Result<Preprocessed, PreprocessError> {
    let mut warnings = Vec::new();
    match card_type {
        CardType::Echarts => {
            if !is_valid_echarts_option(&data) {
                return Err(PreprocessError {
                    code: "INVALID_ECHARTS_CONFIG".into(),
                    message: "Invalid ECharts configuration data".into(),
                });
            }
            if has_map_component(&data) {
                let names = extract_map_names(&data);
                if !services.maps.ensure_maps_registered(&names).await {
                    warn!(target: "maps", card_id, maps = %names.join(", "), "map preloading failed, continuing");
                }
            }
            warnings = echarts_config_warnings(card_id, &data);
        }
        CardType::Kpi => warnings = duplicate_icon_warnings(card_id, &KpiData::from_payload(&data)),
        CardType::Metric | CardType::Table | CardType::Text | CardType::Image | CardType::Markdown => {}
    }
    Ok(Preprocessed { data, warnings })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStatus {
    Loading,
    Success,
    Error,
}

impl RenderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Loading)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStatusChange {
    pub card_id: String,
    pub status: RenderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: f64,
}

#[derive(Debug, Clone)]
pub enum CardState {
    Loading,
    /// `None` when the card has no data source
    Success(Option<CardKind>),
    Error(DataError),
}

impl CardState {
    pub fn status(&self) -> RenderStatus {
        match self {
            Self::Loading => RenderStatus::Loading,
            Self::Success(_) => RenderStatus::Success,
            Self::Error(_) => RenderStatus::Error,
        }
    }
}

/// One mounted card: its descriptor and load state
#[derive(Debug)]
pub struct BaseCard {
    pub descriptor: CardDescriptor,
    state: CardState,
    notified_terminal: bool,
}

impl BaseCard {
    pub fn new(descriptor: CardDescriptor) -> Self {
        Self {
            descriptor,
            state: CardState::Loading,
            notified_terminal: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn state(&self) -> &CardState {
        &self.state
    }

    /// Fetch and preprocess the card's data
    ///
    /// Publishes `loading` and then a single terminal status per card, even
    /// when the card is loaded again.
    pub async fn load(&mut self, services: &Services, status: &EventBus<RenderStatusChange>) -> RenderStatus {
        self.state = CardState::Loading;
        self.notify(status, RenderStatus::Loading, None);

        self.state = match self.fetch_and_prepare(services).await {
            Ok(kind) => CardState::Success(kind),
            Err(e) => {
                error!(target: "errors", card_id = %self.descriptor.id, "card data loading failed: {}", e);
                CardState::Error(e)
            }
        };
        let error = match &self.state {
            CardState::Error(e) => Some(e.to_string()),
            _ => None,
        };
        let terminal = self.state.status();
        self.notify(status, terminal, error);
        terminal
    }

    async fn fetch_and_prepare(&self, services: &Services) -> Result<Option<CardKind>, DataError> {
        let Some(loader) = &self.descriptor.loader else {
            return Ok(None);
        };
        let card_id = self.descriptor.id.as_str();
        let card_type = self.descriptor.card_type;

        let raw = loader.call(services.csv.clone()).await.map_err(|message| {
            services.collector.collect_data_fetch_error(card_id, &message);
            DataError::DataLoad(message)
        })?;

        let data = match preprocess(card_id, card_type, raw.clone(), services).await {
            Ok(prepared) => {
                for warning in prepared.warnings {
                    services.collector.collect_warning(warning.into_report(card_id, card_type.as_str()));
                }
                prepared.data
            }
            Err(e) if e.is_invalid_data() => {
                services.collector.collect_data_format_error(card_id, &e.code, &e.message);
                return Err(DataError::DataFormat(e.message));
            }
            Err(e) => {
                warn!(target: "errors", card_id, "preprocessing failed, continuing with original data: {}", e);
                raw
            }
        };
        Ok(Some(CardKind::from_payload(card_type, &data)))
    }

    fn notify(&mut self, bus: &EventBus<RenderStatusChange>, status: RenderStatus, error: Option<String>) {
        if status.is_terminal() {
            if self.notified_terminal {
                return;
            }
            self.notified_terminal = true;
        }
        bus.emit(&RenderStatusChange {
            card_id: self.descriptor.id.clone(),
            status,
            error,
            timestamp: now_ms(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NamedUrl, ProjectConfig};
    use crate::data::tests::FakeFetch;
    use crate::maps::{MapError, MapRegistry};
    use futures::executor::block_on;
    use futures::FutureExt;
    use std::cell::RefCell;

    struct NoopRegistry;

    impl MapRegistry for NoopRegistry {
        fn register_map(&self, _name: &str, _geo_json: &Value) -> Result<(), MapError> {
            Ok(())
        }
    }

    fn services() -> Services {
        let project = ProjectConfig {
            data_sources: vec![NamedUrl {
                name: "sales".into(),
                url: "./sales.csv".into(),
            }],
            ..Default::default()
        };
        let fetch = FakeFetch::with("./sales.csv", "region,amount\nnorth,10\nsouth,20\n");
        Services::new(&project, Rc::new(fetch), Rc::new(NoopRegistry))
    }

    fn static_loader(value: Value) -> CardLoader {
        CardLoader::new(move |_| {
            let value = value.clone();
            async move { Ok::<Value, String>(value) }.boxed_local()
        })
    }

    fn record(bus: &EventBus<RenderStatusChange>) -> (Rc<RefCell<Vec<RenderStatus>>>, crate::events::Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe(move |c: &RenderStatusChange| sink.borrow_mut().push(c.status));
        (seen, sub)
    }

    #[test]
    fn test_change_type() {
        assert_eq!(change_type(&json!("+5%")), ChangeType::Positive);
        assert_eq!(change_type(&json!("-2")), ChangeType::Negative);
        assert_eq!(change_type(&json!("3%")), ChangeType::Neutral);
        assert_eq!(change_type(&json!(-0.5)), ChangeType::Negative);
        assert_eq!(change_type(&json!(0)), ChangeType::Neutral);
        assert_eq!(change_type(&Value::Null), ChangeType::Neutral);
    }

    #[test]
    fn test_metric_payload() {
        let metric = MetricData::from_payload(&json!({"label": "Revenue", "value": "1.2M", "change": "+4%"}));
        assert_eq!(metric.label.as_deref(), Some("Revenue"));
        assert_eq!(metric.change_type(), ChangeType::Positive);

        let empty = MetricData::from_payload(&json!({"value": 3}));
        assert_eq!(empty, MetricData::default());
        assert_eq!(empty.value, json!(0));
    }

    #[test]
    fn test_text_and_image_payloads() {
        assert_eq!(TextData::from_payload(&json!("hello")).content, vec!["hello"]);
        assert_eq!(TextData::from_payload(&json!({"content": "one"})).content, vec!["one"]);
        assert_eq!(TextData::from_payload(&json!({"content": ["a", "b"]})).content.len(), 2);
        assert!(TextData::from_payload(&json!({})).content.is_empty());

        let image = ImageData::from_payload(&json!("/logo.png"));
        assert_eq!(image.src, "/logo.png");
        assert_eq!(image.fit, "contain");
        let image = ImageData::from_payload(&json!({"src": "/a.png", "fit": "cover"}));
        assert_eq!((image.fit.as_str(), image.alt.as_str()), ("cover", "Image"));
    }

    #[test]
    fn test_echarts_inspection() {
        assert!(!is_valid_echarts_option(&json!([])));
        assert!(!is_valid_echarts_option(&json!({"grid": {}})));
        assert!(is_valid_echarts_option(&json!({"series": []})));

        let option = json!({
            "series": [{"type": "map", "map": "china"}, {"type": "bar"}, {"type": "map", "map": "china"}],
            "geo": {"map": "world"}
        });
        assert!(has_map_component(&option));
        assert_eq!(extract_map_names(&option), vec!["china", "world"]);

        let single = json!({"series": {"type": "map", "map": "usa"}});
        assert!(has_map_component(&single));
        assert_eq!(extract_map_names(&single), vec!["usa"]);
        assert!(!has_map_component(&json!({"series": [{"type": "line"}]})));
    }

    fn messages(option: Value) -> Vec<String> {
        echarts_config_warnings("chart", &option).into_iter().map(|w| w.message).collect()
    }

    #[test]
    fn test_echarts_config_warnings() {
        assert!(messages(json!({"series": [{"type": "bar"}]})).is_empty());
        assert!(messages(json!({
            "grid": {"left": 0, "right": 0, "top": 0, "bottom": 0, "outerBounds": {"bottom": 30}},
            "legend": {"bottom": 0, "type": "scroll"},
            "series": [{"type": "bar"}]
        }))
        .is_empty());

        let found = messages(json!({
            "grid": {"left": "10%", "top": 0, "containLabel": true},
            "legend": {"type": "plain"},
            "series": [{"type": "line"}]
        }));
        assert_eq!(found.len(), 6);
        assert!(found[0].starts_with("grid.containLabel is deprecated"));
        assert!(found[1].starts_with("grid.left must be a number"));
        assert!(found[2].contains("(left: 10%)"));
        assert!(found[3].starts_with("grid.outerBounds must be configured"));
        assert!(found[4].starts_with("legend must explicitly declare position"));
        assert!(found[5].starts_with("legend should enable type: 'scroll'"));

        let bounds = messages(json!({
            "grid": {"outerBounds": {"left": "5%", "bottom": 10}},
            "series": [{"type": "bar", "legend": {"right": 0}}]
        }));
        assert_eq!(
            bounds,
            vec![
                "grid.outerBounds.left must be a number, strings or percentages are not allowed".to_string(),
                "grid.outerBounds has 2 directions set (left, bottom). Usually only one direction is needed to reserve space for legend/visualMap components. Please verify if all settings are necessary.".to_string(),
                "series[0].legend should enable type: 'scroll' to avoid taking up too much space".to_string(),
            ]
        );

        let unnecessary = messages(json!({"grid": {"outerBounds": {"top": 10}}, "series": [{"type": "bar"}]}));
        assert_eq!(unnecessary.len(), 1);
        assert!(unnecessary[0].contains("should only be used when legend or visualMap"));

        // pie with a legend and map charts never need outerBounds
        let pie = json!({"grid": {}, "legend": {"top": 0, "type": "scroll"}, "series": [{"type": "pie"}]});
        assert!(messages(pie).is_empty());
        let map = json!({"grid": {}, "visualMap": {}, "series": [{"type": "map", "map": "usa"}]});
        assert!(messages(map).is_empty());
    }

    #[test]
    fn test_duplicate_icons() {
        let kpi = KpiData::from_payload(&json!({"indicators": [
            {"label": "a", "icon": "ti-star"},
            {"label": "b", "icon": "ti-user"},
            {"label": "c", "icon": "ti-star"},
            {"label": "d"},
            {"label": "e", "icon": "ti-star"}
        ]}));
        let dups = duplicate_icons(&kpi.indicators);
        assert_eq!(
            dups,
            vec![DuplicateIcon {
                icon: "ti-star".into(),
                count: 3,
                positions: "1, 3, 5".into()
            }]
        );
    }

    #[test]
    fn test_load_without_loader() {
        let services = services();
        let bus = EventBus::new();
        let (seen, _sub) = record(&bus);
        let mut card = BaseCard::new(CardDescriptor::new("m", CardType::Metric, GridRect::new(0, 0, 6, 4)));

        assert_eq!(block_on(card.load(&services, &bus)), RenderStatus::Success);
        assert!(matches!(card.state(), CardState::Success(None)));
        assert_eq!(*seen.borrow(), vec![RenderStatus::Loading, RenderStatus::Success]);
    }

    #[test]
    fn test_load_from_csv() {
        let services = services();
        let bus = EventBus::new();
        let loader = CardLoader::new(|csv: Rc<CsvManager>| {
            async move {
                let result = csv.load("sales").await.map_err(|e| e.to_string())?;
                Ok::<Value, String>(json!({"label": "Regions", "value": result.data.len()}))
            }
            .boxed_local()
        });
        let descriptor = CardDescriptor::new("m", CardType::Metric, GridRect::default()).with_loader(loader);
        let mut card = BaseCard::new(descriptor);
        block_on(card.load(&services, &bus));
        match card.state() {
            CardState::Success(Some(CardKind::Metric(metric))) => assert_eq!(metric.value, json!(2)),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_load_failures() {
        let services = services();
        let bus = EventBus::new();
        let (seen, _sub) = record(&bus);

        let failing = CardLoader::new(|_| async { Err::<Value, String>("timeout".to_string()) }.boxed_local());
        let mut card = BaseCard::new(CardDescriptor::new("a", CardType::Table, GridRect::default()).with_loader(failing));
        assert_eq!(block_on(card.load(&services, &bus)), RenderStatus::Error);
        assert!(matches!(card.state(), CardState::Error(DataError::DataLoad(m)) if m == "timeout"));

        // Terminal status is published once per card
        block_on(card.load(&services, &bus));
        assert_eq!(
            *seen.borrow(),
            vec![RenderStatus::Loading, RenderStatus::Error, RenderStatus::Loading]
        );

        let chart = CardDescriptor::new("c", CardType::Echarts, GridRect::default())
            .with_loader(static_loader(json!({"grid": {}})));
        let mut card = BaseCard::new(chart);
        block_on(card.load(&services, &bus));
        assert!(matches!(card.state(), CardState::Error(DataError::DataFormat(_))));

        let kinds: Vec<String> = services.collector.errors().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["DATA_FETCH_FAILED", "DATA_FETCH_FAILED", "DATA_FORMAT_ERROR"]);
        assert_eq!(services.collector.card_error_stats(&["c".to_string()]).total_errors_for_cards, 1);
    }

    #[test]
    fn test_kpi_warnings_collected() {
        let services = services();
        let bus = EventBus::new();
        let payload = json!({"indicators": [{"icon": "x"}, {"icon": "x"}]});
        let descriptor =
            CardDescriptor::new("k", CardType::Kpi, GridRect::default()).with_loader(static_loader(payload));
        let mut card = BaseCard::new(descriptor);
        assert_eq!(block_on(card.load(&services, &bus)), RenderStatus::Success);

        let warnings = services.collector.warnings_by_type("KPI_CONFIG_WARNING");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].details["positions"], "1, 2");
        assert_eq!(warnings[0].card_id.as_deref(), Some("k"));
    }

    #[test]
    fn test_echarts_warnings_collected() {
        let services = services();
        let bus = EventBus::new();
        let option = json!({"legend": {"type": "scroll"}, "series": [{"type": "bar"}]});
        let descriptor =
            CardDescriptor::new("e", CardType::Echarts, GridRect::default()).with_loader(static_loader(option));
        let mut card = BaseCard::new(descriptor);
        assert_eq!(block_on(card.load(&services, &bus)), RenderStatus::Success);

        let warnings = services.collector.warnings_by_type("ECHARTS_CONFIG_WARNING");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].details["cardType"], "ChartCard");
        assert_eq!(warnings[0].card_id.as_deref(), Some("e"));
        assert!(services.collector.errors().is_empty());
    }
}
