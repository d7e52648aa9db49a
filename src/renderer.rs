//! Declarative element trees for cards, handed to the page's renderer

use crate::card::{CardDescriptor, CardKind, CardState, ChangeType, ImageData, KpiData, MetricData, TextData};
use crate::cell::TableData;
use crate::config::{DashboardConfig, MetricIconType};
use crate::errors::DataError;
use crate::table::{SortIcon, TableController, TableView};
use crate::theme::circle_gradient_background;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// One element of the tree: a tag, its attributes and inline style, and children
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    pub tag: String,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub attrs: IndexMap<String, String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub style: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attrs: IndexMap::new(),
            style: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn class(self, class: &str) -> Self {
        self.attr("className", class)
    }

    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn style(mut self, property: &str, value: impl Into<String>) -> Self {
        self.style.insert(property.to_string(), value.into());
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children.into_iter().map(Node::Element));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attrs
            .get("className")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    /// First element in document order carrying `class`, including `self`
    pub fn find_class(&self, class: &str) -> Option<&Element> {
        if self.has_class(class) {
            return Some(self);
        }
        self.children.iter().find_map(|child| match child {
            Node::Element(e) => e.find_class(class),
            Node::Text(_) => None,
        })
    }

    pub fn count_class(&self, class: &str) -> usize {
        let own = usize::from(self.has_class(class));
        own + self
            .children
            .iter()
            .map(|child| match child {
                Node::Element(e) => e.count_class(class),
                Node::Text(_) => 0,
            })
            .sum::<usize>()
    }

    /// Concatenated text of the subtree
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                Node::Element(e) => out.push_str(&e.text_content()),
                Node::Text(t) => out.push_str(t),
            }
        }
        out
    }
}

/// Fixed body shown in place of a failed card's content
pub fn error_element(error: &DataError) -> Element {
    let (title, class) = match error {
        DataError::DataLoad(_) => ("Failed to load data", "card-error data-load"),
        DataError::DataFormat(_) => ("Invalid data format", "card-error data-format"),
        DataError::Render(_) => ("Failed to render card", "card-error render"),
    };
    Element::new("div")
        .class(class)
        .child(Element::new("span").class("card-error-icon").text("!"))
        .child(Element::new("div").class("card-error-title").text(title))
        .child(Element::new("div").class("card-error-message").text(error.to_string()))
}

pub fn no_data_element() -> Element {
    Element::new("div").class("card-empty").text("No data")
}

fn loading_element() -> Element {
    Element::new("div").class("card-loading")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn change_class(change: ChangeType) -> &'static str {
    match change {
        ChangeType::Positive => "change positive",
        ChangeType::Negative => "change negative",
        ChangeType::Neutral => "change neutral",
    }
}

fn icon_element(icon: &str, color: Option<&str>, config: &DashboardConfig) -> Element {
    let glyph = Element::new("i").class(&format!("icon {icon}"));
    match config.metric_card_icon_type {
        MetricIconType::Circle => Element::new("div")
            .class("icon-circle")
            .style("background", circle_gradient_background(color, &config.colors_primary))
            .child(glyph.style("color", "white")),
        MetricIconType::Normal => Element::new("div")
            .class("icon-plain")
            .child(glyph.style("color", color.unwrap_or(config.colors_primary.as_str()).to_string())),
    }
}

fn render_metric(metric: &MetricData, config: &DashboardConfig) -> Element {
    let mut card = Element::new("div").class("metric-card");
    if !metric.icon.is_empty() {
        card = card.child(icon_element(&metric.icon, metric.icon_color.as_deref(), config));
    }
    let mut value = Element::new("div").class("metric-value").text(display_value(&metric.value));
    if !metric.unit.is_empty() {
        value = value.child(Element::new("span").class("metric-unit").text(metric.unit.clone()));
    }
    let mut body = Element::new("div").class("metric-body");
    if let Some(label) = &metric.label {
        body = body.child(Element::new("div").class("metric-label").text(label.clone()));
    }
    body = body.child(value);
    let change = display_value(&metric.change);
    if !change.is_empty() {
        body = body.child(Element::new("span").class(change_class(metric.change_type())).text(change));
    }
    card.child(body)
}

fn render_kpi(kpi: &KpiData, config: &DashboardConfig) -> Element {
    if kpi.indicators.is_empty() {
        return no_data_element();
    }
    let indicators = kpi.indicators.iter().map(|indicator| {
        let mut item = Element::new("div").class("kpi-indicator");
        if !indicator.icon.is_empty() {
            item = item.child(icon_element(&indicator.icon, None, config));
        }
        item = item
            .child(Element::new("div").class("kpi-label").text(indicator.label.clone()))
            .child(
                Element::new("div")
                    .class("kpi-value")
                    .text(display_value(&indicator.value))
                    .text(indicator.unit.clone()),
            );
        if let Some(target) = indicator.target {
            item = item.child(Element::new("div").class("kpi-target").text(format!("Target: {target}")));
        }
        let change = display_value(&indicator.change);
        if !change.is_empty() {
            item = item.child(
                Element::new("span")
                    .class(change_class(crate::card::change_type(&indicator.change)))
                    .text(change),
            );
        }
        item
    });
    Element::new("div").class("kpi-card").children(indicators)
}

fn render_text(text: &TextData) -> Element {
    if text.content.is_empty() {
        return no_data_element();
    }
    Element::new("div")
        .class("text-card")
        .style("textAlign", text.text_align.clone())
        .children(text.content.iter().map(|p| Element::new("p").text(p.clone())))
}

fn render_image(image: &ImageData) -> Element {
    if image.src.is_empty() {
        return no_data_element();
    }
    Element::new("div").class("image-card").child(
        Element::new("img")
            .attr("src", image.src.clone())
            .attr("alt", image.alt.clone())
            .style("objectFit", image.fit.clone())
            .style("objectPosition", image.position.clone())
            .style("borderRadius", image.border_radius.clone())
            .style("opacity", image.opacity.to_string()),
    )
}

fn sort_icon_class(icon: SortIcon) -> &'static str {
    match icon {
        SortIcon::Ascending => "sort-icon ascending",
        SortIcon::Descending => "sort-icon descending",
        SortIcon::Neutral => "sort-icon",
    }
}

/// One frame of a virtualized table
pub fn render_table(view: &TableView) -> Element {
    let headers = view.headers.iter().map(|header| {
        let mut cell = Element::new("div")
            .class("table-header-cell")
            .attr("data-index", header.data_index.clone())
            .style("width", format!("{}px", header.width))
            .child(Element::new("span").class("table-header-title").text(header.title.clone()));
        if header.filter_button.visible {
            let class = if header.filtered { "filter-button active" } else { "filter-button" };
            cell = cell.child(Element::new("button").class(class));
        }
        if header.sort_button.visible {
            cell = cell.child(Element::new("button").class(sort_icon_class(header.sort_icon)));
        }
        cell
    });
    let header_row = Element::new("div").class("table-header").children(headers);

    let body = if view.is_empty {
        no_data_element()
    } else {
        let rows = view.rows.iter().map(|row| {
            Element::new("div")
                .class("table-row")
                .children(row.iter().map(|cell| Element::new("div").class("table-cell").text(cell.clone())))
        });
        Element::new("div")
            .class("table-body")
            .style("height", format!("{}px", view.total_height))
            .child(
                Element::new("div")
                    .class("table-rows")
                    .style("transform", format!("translateY({}px)", view.offset_y))
                    .children(rows),
            )
    };

    Element::new("div")
        .class("virtual-table")
        .style("minWidth", format!("{}px", view.min_width))
        .child(header_row)
        .child(body)
}

fn render_table_data(data: &TableData, config: &DashboardConfig) -> Element {
    if data.columns.is_empty() {
        return no_data_element();
    }
    let table = TableController::new(data.clone(), config.row_height_px()).with_cell_min_width(config.cell_min_width_px());
    render_table(&table.view())
}

/// Body for loaded content; `table` overrides the first frame of a table card
pub fn render_kind(kind: &CardKind, config: &DashboardConfig, table: Option<&TableView>) -> Element {
    match kind {
        CardKind::Metric(metric) => render_metric(metric, config),
        CardKind::Kpi(kpi) => render_kpi(kpi, config),
        CardKind::Table(data) => match table {
            Some(view) => render_table(view),
            None => render_table_data(data, config),
        },
        CardKind::Text(text) => render_text(text),
        CardKind::Image(image) => render_image(image),
        CardKind::Echarts(option) => Element::new("div")
            .class("echarts-card")
            .attr("data-option", option.to_string())
            .attr("data-colors", config.echarts_color.join(",")),
        CardKind::Markdown(markdown) => Element::new("div")
            .class("markdown-card")
            .attr("data-format", "markdown")
            .text(markdown.content.clone()),
    }
}

/// Full card: frame, optional title and the body for its load state
pub fn render_card(
    descriptor: &CardDescriptor,
    state: &CardState,
    config: &DashboardConfig,
    table: Option<&TableView>,
) -> Element {
    let body = match state {
        CardState::Loading => loading_element(),
        CardState::Error(error) => error_element(error),
        CardState::Success(None) => no_data_element(),
        CardState::Success(Some(kind)) => render_kind(kind, config, table),
    };
    let mut card = Element::new("div")
        .class(&format!("card card-{}", descriptor.card_type.as_str()))
        .attr("data-card-id", descriptor.id.clone());
    if config.interaction_card_hoverable {
        card = card.class(&format!("card card-{} hoverable", descriptor.card_type.as_str()));
    }
    if !descriptor.title.trim().is_empty() {
        card = card.child(Element::new("div").class("card-title").text(descriptor.title.clone()));
    }
    card.child(Element::new("div").class("card-content").child(body))
}
