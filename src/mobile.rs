//! Single-column mobile layout derived from the desktop card list

use crate::card::{CardDescriptor, CardType};
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use tracing::debug;

pub const METRIC_HEIGHT: u32 = 2;
pub const DEFAULT_HEIGHT: u32 = 6;
pub const ECHARTS_HEIGHT: u32 = 7;
pub const TABLE_HEIGHT: u32 = 8;
/// Empty grid rows between stacked cards
pub const ROW_GAP: u32 = 1;

/// Positioned card in the mobile grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutItem {
    pub i: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub min_w: u32,
    pub min_h: u32,
    pub max_w: u32,
    pub max_h: u32,
}

fn has_title(card: &CardDescriptor) -> bool {
    !card.title.trim().is_empty()
}

/// Height of a KPI card from its title and indicator count
pub fn kpi_height(card: &CardDescriptor) -> u32 {
    let mut height = 0.5;
    if has_title(card) {
        height += 1.0;
    }
    let indicators = card
        .data
        .as_ref()
        .and_then(|d| d.get("indicators"))
        .and_then(Value::as_array);
    height += match indicators {
        Some(list) => {
            let count = list.len() as f64;
            let per_indicator = match list.len() {
                0..=2 => 1.0,
                3..=4 => 0.8,
                _ => 0.7,
            };
            count * per_indicator + 0.3
        }
        // Assume two indicators
        None => 2.0 + 0.3,
    };
    (height.ceil() as u32).clamp(2, 7)
}

fn markdown_line_weight(line: &str) -> f64 {
    let line = line.trim();
    if line.is_empty() {
        return 0.3;
    }
    if line.starts_with('#') {
        let level = line.chars().take_while(|c| *c == '#').count();
        return if level <= 2 { 1.5 } else { 1.2 };
    }
    if line.starts_with("- ") || line.starts_with("* ") || is_ordered_item(line) {
        return 1.0;
    }
    if line.starts_with("```") {
        return 1.5;
    }
    // Roughly 50 characters per wrapped line on a phone
    (line.chars().count() as f64 / 50.0).ceil().max(1.0)
}

fn is_ordered_item(line: &str) -> bool {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    let mut rest = line[digits..].chars();
    rest.next() == Some('.') && rest.next().is_some_and(char::is_whitespace)
}

/// Height of a markdown card estimated from its line structure
pub fn markdown_height(card: &CardDescriptor) -> u32 {
    let mut height = 2.0;
    if has_title(card) {
        height += 1.0;
    }
    let content = card
        .data
        .as_ref()
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty());
    height += match content {
        Some(content) => {
            let lines: f64 = content.trim().split('\n').map(markdown_line_weight).sum();
            (lines / 2.5).ceil()
        }
        None => 3.0,
    };
    (height.ceil() as u32).clamp(4, 12)
}

/// Grid height of a full-width card
pub fn stacked_height(card: &CardDescriptor) -> u32 {
    match card.card_type {
        CardType::Kpi => kpi_height(card),
        CardType::Markdown => markdown_height(card),
        CardType::Echarts => ECHARTS_HEIGHT,
        CardType::Table => TABLE_HEIGHT,
        CardType::Metric => METRIC_HEIGHT,
        CardType::Text | CardType::Image => DEFAULT_HEIGHT,
    }
}

fn priority(card_type: CardType) -> u8 {
    match card_type {
        CardType::Metric => 1,
        CardType::Kpi => 2,
        _ => 3,
    }
}

/// Indices of `cards` with metrics first, then KPIs, then the rest; stable within each class
pub fn priority_order(cards: &[CardDescriptor]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..cards.len()).collect();
    order.sort_by_key(|&i| priority(cards[i].card_type));
    order
}

/// Desktop constraint, capped by the mobile value; absent or zero means the mobile value
fn capped(desktop: Option<u32>, mobile: u32) -> u32 {
    desktop.filter(|v| *v != 0).unwrap_or(mobile).min(mobile)
}

fn place(card: &CardDescriptor, x: u32, y: u32, w: u32, h: u32) -> LayoutItem {
    let desktop = &card.layout;
    LayoutItem {
        i: card.id.clone(),
        x,
        y,
        w,
        h,
        min_w: capped(desktop.min_w, w),
        min_h: capped(desktop.min_h, h),
        max_w: capped(desktop.max_w, w),
        max_h: capped(desktop.max_h, h),
    }
}

/// Lays out cards in priority order along a running row cursor
///
/// Metric cards pair up two per row at half width; every other card spans
/// the full width with a content-dependent height.
struct Packer {
    total_cols: u32,
    cursor: u32,
    metrics_seen: u32,
    metric_row_y: u32,
}

impl Packer {
    fn new(total_cols: u32) -> Self {
        Self {
            total_cols,
            cursor: 0,
            metrics_seen: 0,
            metric_row_y: 0,
        }
    }

    fn next(&mut self, card: &CardDescriptor) -> LayoutItem {
        if card.card_type == CardType::Metric {
            let w = (self.total_cols / 2).max(1);
            let first_in_row = self.metrics_seen % 2 == 0;
            self.metrics_seen += 1;
            if first_in_row {
                self.metric_row_y = self.cursor;
                self.cursor += METRIC_HEIGHT + ROW_GAP;
                place(card, 0, self.metric_row_y, w, METRIC_HEIGHT)
            } else {
                place(card, w, self.metric_row_y, w, METRIC_HEIGHT)
            }
        } else {
            let h = stacked_height(card);
            let item = place(card, 0, self.cursor, self.total_cols, h);
            self.cursor += h + ROW_GAP;
            item
        }
    }
}

/// Mobile rectangles for `cards`, in priority order
pub fn layout_mobile(cards: &[CardDescriptor], total_cols: u32) -> Vec<LayoutItem> {
    let mut packer = Packer::new(total_cols);
    priority_order(cards).into_iter().map(|i| packer.next(&cards[i])).collect()
}

/// Identity of a card list's ordering inputs
fn cards_hash(cards: &[CardDescriptor]) -> u64 {
    let key = cards
        .iter()
        .map(|c| {
            let layout = serde_json::to_string(&c.layout).unwrap_or_default();
            format!("{}-{}-{}", c.id, c.card_type.as_str(), layout)
        })
        .collect::<Vec<_>>()
        .join("|");
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Memoizing wrapper around [`layout_mobile`]
///
/// Entries are keyed by card id, sorted position, column count and card count.
/// Supplying a different card list `Rc` drops every entry.
#[derive(Default)]
pub struct MobileLayoutEngine {
    cards: Option<Rc<Vec<CardDescriptor>>>,
    cache: HashMap<String, LayoutItem>,
    sorted: Option<(u64, Vec<usize>)>,
}

impl MobileLayoutEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.cache.clear();
        self.sorted = None;
        self.cards = None;
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn sorted_order(&mut self, cards: &[CardDescriptor]) -> Vec<usize> {
        let hash = cards_hash(cards);
        match &self.sorted {
            Some((cached, order)) if *cached == hash => order.clone(),
            _ => {
                let order = priority_order(cards);
                self.sorted = Some((hash, order.clone()));
                order
            }
        }
    }

    /// Returns `(card index, rectangle)` pairs in display order
    pub fn layout(&mut self, cards: &Rc<Vec<CardDescriptor>>, total_cols: u32) -> Vec<(usize, LayoutItem)> {
        let same_list = self.cards.as_ref().is_some_and(|prev| Rc::ptr_eq(prev, cards));
        if !same_list {
            if !self.cache.is_empty() {
                debug!(target: "layout", entries = self.cache.len(), "card list changed, clearing mobile layout cache");
            }
            self.cache.clear();
            self.cards = Some(cards.clone());
        }

        let order = self.sorted_order(cards);
        let mut packer = Packer::new(total_cols);
        let count = cards.len();
        order
            .into_iter()
            .enumerate()
            .map(|(position, index)| {
                let card = &cards[index];
                // The packer always runs so the cursor stays in step with cache hits
                let computed = packer.next(card);
                let key = format!("{}-{}-{}-{}", card.id, position, total_cols, count);
                let item = self.cache.entry(key).or_insert(computed).clone();
                (index, item)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::GridRect;
    use serde_json::json;

    fn card(id: &str, card_type: CardType) -> CardDescriptor {
        CardDescriptor::new(id, card_type, GridRect::new(0, 0, 6, 4))
    }

    fn rect(item: &LayoutItem) -> (u32, u32, u32, u32) {
        (item.x, item.y, item.w, item.h)
    }

    #[test]
    fn test_metrics_then_kpi_then_table() {
        let cards = vec![
            card("table", CardType::Table),
            card("m1", CardType::Metric),
            card("kpi", CardType::Kpi).with_title("Overview"),
            card("m2", CardType::Metric),
        ];
        let items = layout_mobile(&cards, 12);
        let ids: Vec<&str> = items.iter().map(|i| i.i.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "kpi", "table"]);

        assert_eq!(rect(&items[0]), (0, 0, 6, 2));
        assert_eq!(rect(&items[1]), (6, 0, 6, 2));
        assert_eq!(items[2].y, 3);
        let kpi_h = items[2].h;
        assert_eq!(kpi_h, kpi_height(&cards[2]));
        assert_eq!(items[3].y, 3 + kpi_h + 1);
        assert_eq!(rect(&items[3]), (0, 3 + kpi_h + 1, 12, TABLE_HEIGHT));
    }

    #[test]
    fn test_odd_metric_count_still_takes_a_row() {
        let cards = vec![
            card("m1", CardType::Metric),
            card("m2", CardType::Metric),
            card("m3", CardType::Metric),
            card("chart", CardType::Echarts),
        ];
        let items = layout_mobile(&cards, 12);
        assert_eq!(rect(&items[2]), (0, 3, 6, 2));
        assert_eq!(rect(&items[3]), (0, 6, 12, ECHARTS_HEIGHT));
    }

    #[test]
    fn test_kpi_height() {
        let kpi = |n: usize, title: &str| {
            let indicators: Vec<Value> = (0..n).map(|i| json!({"label": i})).collect();
            card("k", CardType::Kpi)
                .with_title(title)
                .with_data(json!({ "indicators": indicators }))
        };
        // 0.5 + 1 + 2 * 1.0 + 0.3
        assert_eq!(kpi_height(&kpi(2, "t")), 4);
        // 0.5 + 3 * 0.8 + 0.3
        assert_eq!(kpi_height(&kpi(3, "  ")), 4);
        assert_eq!(kpi_height(&kpi(0, "")), 2);
        assert_eq!(kpi_height(&kpi(12, "t")), 7);
        // No indicator data assumes two
        assert_eq!(kpi_height(&card("k", CardType::Kpi)), 3);
    }

    #[test]
    fn test_markdown_height() {
        let md = |content: &str| card("md", CardType::Markdown).with_data(json!({ "content": content }));
        assert_eq!(markdown_height(&card("md", CardType::Markdown)), 5);
        assert_eq!(markdown_height(&md("short")), 4);

        // 1.5 + 1.2 + 0.3 + 1 + 1 + 1.5 + 2 = 8.5 lines -> 4 units
        let content = "# Title\n### Sub\n\n- a\n1. b\n```\n".to_string() + &"x".repeat(80);
        assert_eq!(markdown_height(&md(&content)), 6);

        let long = "paragraph\n".repeat(60);
        assert_eq!(markdown_height(&md(&long)), 12);
    }

    #[test]
    fn test_constraints_capped_by_mobile_size() {
        let mut desktop = card("t", CardType::Table);
        desktop.layout.min_w = Some(20);
        desktop.layout.min_h = Some(3);
        desktop.layout.max_h = Some(0);
        let item = &layout_mobile(&[desktop], 12)[0];
        assert_eq!((item.min_w, item.min_h, item.max_w, item.max_h), (12, 3, 12, TABLE_HEIGHT));
    }

    #[test]
    fn test_narrow_grid_keeps_metric_width() {
        let items = layout_mobile(&[card("m", CardType::Metric)], 1);
        assert_eq!(items[0].w, 1);
    }

    #[test]
    fn test_engine_cache_and_identity() {
        let cards = Rc::new(vec![
            card("kpi", CardType::Kpi),
            card("m1", CardType::Metric),
            card("md", CardType::Markdown),
        ]);
        let mut engine = MobileLayoutEngine::new();
        let first = engine.layout(&cards, 12);
        assert_eq!(engine.cached_entries(), 3);
        assert_eq!(first[0].0, 1);

        let again = engine.layout(&cards, 12);
        assert_eq!(first, again);

        // A shallow copy misses the cache but lays out identically
        let copy = Rc::new((*cards).clone());
        let fresh = engine.layout(&copy, 12);
        assert_eq!(first, fresh);

        let expected: Vec<LayoutItem> = layout_mobile(&cards, 12);
        let items: Vec<LayoutItem> = fresh.into_iter().map(|(_, item)| item).collect();
        assert_eq!(items, expected);

        engine.invalidate();
        assert_eq!(engine.cached_entries(), 0);
    }

    #[test]
    fn test_cache_is_dropped_for_new_list() {
        let mut engine = MobileLayoutEngine::new();
        let cards = Rc::new(vec![card("a", CardType::Table)]);
        engine.layout(&cards, 12);

        // Same id and position, but the new list changes the card's type
        let changed = Rc::new(vec![card("a", CardType::Echarts)]);
        let items = engine.layout(&changed, 12);
        assert_eq!(items[0].1.h, ECHARTS_HEIGHT);
    }
}
