//! Dashboard orchestration: card list, load lifecycle and change events

use crate::card::{BaseCard, CardDescriptor, CardLoader, CardType, RenderStatus, RenderStatusChange};
use crate::errors::{ErrorCollector, ErrorRecord};
use crate::events::{now_ms, EventBus, Subscription};
use crate::grid::GridItem;
use crate::services::Services;
use futures::future::{join_all, LocalBoxFuture};
use futures::FutureExt;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CardsChangeKind {
    Cards,
    Layout,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardsChanged {
    pub cards: Rc<Vec<CardDescriptor>>,
    pub old_cards: Rc<Vec<CardDescriptor>>,
    #[serde(rename = "type")]
    pub kind: CardsChangeKind,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutChanged {
    pub layouts: Vec<GridItem>,
    pub timestamp: f64,
}

/// Final status of one card in the render summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRenderInfo {
    pub card_id: String,
    pub card_title: String,
    pub card_type: CardType,
    pub status: RenderStatus,
    pub error: Option<String>,
    pub timestamp: f64,
    pub error_collector_errors: Vec<ErrorRecord>,
    pub error_collector_error_count: usize,
    /// Status reported by the card itself, before the collector cross-check
    pub original_render_status: RenderStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllCardsRendered {
    pub total_cards: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub cards_status: Vec<CardRenderInfo>,
    pub timestamp: f64,
    pub render_duration: f64,
}

#[derive(Debug, Clone)]
struct StatusEntry {
    status: RenderStatus,
    error: Option<String>,
    timestamp: f64,
}

/// Per-card render status, reported once every card has settled
struct RenderTracker {
    cards: RefCell<Rc<Vec<CardDescriptor>>>,
    statuses: RefCell<HashMap<String, StatusEntry>>,
    notified: Cell<bool>,
}

impl RenderTracker {
    fn new(cards: Rc<Vec<CardDescriptor>>) -> Self {
        let tracker = Self {
            cards: RefCell::new(Rc::new(Vec::new())),
            statuses: RefCell::new(HashMap::new()),
            notified: Cell::new(false),
        };
        tracker.reset(cards);
        tracker
    }

    /// Mark every card as loading and re-arm the summary
    fn reset(&self, cards: Rc<Vec<CardDescriptor>>) {
        let now = now_ms();
        *self.statuses.borrow_mut() = cards
            .iter()
            .map(|card| {
                let entry = StatusEntry {
                    status: RenderStatus::Loading,
                    error: None,
                    timestamp: now,
                };
                (card.id.clone(), entry)
            })
            .collect();
        *self.cards.borrow_mut() = cards;
        self.notified.set(false);
    }

    /// Follow a card list change without forgetting settled cards
    fn retain(&self, cards: Rc<Vec<CardDescriptor>>) -> Option<Vec<CardRenderInfo>> {
        self.statuses
            .borrow_mut()
            .retain(|id, _| cards.iter().any(|card| &card.id == id));
        *self.cards.borrow_mut() = cards;
        self.check_complete()
    }

    fn record(&self, change: &RenderStatusChange) -> Option<Vec<CardRenderInfo>> {
        self.statuses.borrow_mut().insert(
            change.card_id.clone(),
            StatusEntry {
                status: change.status,
                error: change.error.clone(),
                timestamp: change.timestamp,
            },
        );
        self.check_complete()
    }

    fn check_complete(&self) -> Option<Vec<CardRenderInfo>> {
        let cards = self.cards.borrow();
        if cards.is_empty() || self.notified.get() {
            return None;
        }
        let statuses = self.statuses.borrow();
        let settled = cards
            .iter()
            .all(|card| statuses.get(&card.id).is_some_and(|entry| entry.status.is_terminal()));
        if !settled {
            return None;
        }
        self.notified.set(true);
        Some(
            cards
                .iter()
                .filter_map(|card| {
                    let entry = statuses.get(&card.id)?;
                    Some(CardRenderInfo {
                        card_id: card.id.clone(),
                        card_title: card.title.clone(),
                        card_type: card.card_type,
                        status: entry.status,
                        error: entry.error.clone(),
                        timestamp: entry.timestamp,
                        error_collector_errors: Vec::new(),
                        error_collector_error_count: 0,
                        original_render_status: entry.status,
                    })
                })
                .collect(),
        )
    }
}

/// Fold collector errors into the per-card statuses and count the outcome
fn summarize(mut cards_status: Vec<CardRenderInfo>, collector: &ErrorCollector, started_at: f64) -> AllCardsRendered {
    let ids: Vec<String> = cards_status.iter().map(|c| c.card_id.clone()).collect();
    let mut stats = collector.card_error_stats(&ids);
    for card in &mut cards_status {
        let errors = stats.card_error_map.shift_remove(&card.card_id).unwrap_or_default();
        if !errors.is_empty() {
            card.status = RenderStatus::Error;
        }
        card.error_collector_error_count = errors.len();
        card.error_collector_errors = errors;
    }
    let error_count = cards_status
        .iter()
        .filter(|c| c.status == RenderStatus::Error)
        .count();
    let timestamp = now_ms();
    AllCardsRendered {
        total_cards: cards_status.len(),
        success_count: cards_status.len() - error_count,
        error_count,
        cards_status,
        timestamp,
        render_duration: timestamp - started_at,
    }
}

/// Cards worth a `cards` change event: length differs, or some card lost its
/// id, type or title
fn cards_differ(old: &[CardDescriptor], new: &[CardDescriptor]) -> bool {
    if old.len() != new.len() {
        return true;
    }
    old.iter().any(|old_card| {
        new.iter()
            .find(|card| card.id == old_card.id)
            .map_or(true, |card| card.card_type != old_card.card_type || card.title != old_card.title)
    })
}

pub struct Dashboard {
    cards: Rc<Vec<CardDescriptor>>,
    mounted: Vec<BaseCard>,
    services: Services,
    tracker: Rc<RenderTracker>,
    render_status: Rc<EventBus<RenderStatusChange>>,
    all_rendered: Rc<EventBus<AllCardsRendered>>,
    cards_changed: EventBus<CardsChanged>,
    layout_changed: EventBus<LayoutChanged>,
    _status_subscription: Subscription,
}

impl Dashboard {
    pub fn new(cards: Vec<CardDescriptor>, services: Services) -> Self {
        let cards = Rc::new(cards);
        let tracker = Rc::new(RenderTracker::new(cards.clone()));
        let render_status = Rc::new(EventBus::new());
        let all_rendered = Rc::new(EventBus::new());
        let started_at = now_ms();

        let subscription = {
            let tracker = tracker.clone();
            let all_rendered = all_rendered.clone();
            let collector = services.collector.clone();
            render_status.subscribe(move |change: &RenderStatusChange| {
                if let Some(statuses) = tracker.record(change) {
                    announce(&all_rendered, summarize(statuses, &collector, started_at));
                }
            })
        };

        Self {
            mounted: cards.iter().cloned().map(BaseCard::new).collect(),
            cards,
            services,
            tracker,
            render_status,
            all_rendered,
            cards_changed: EventBus::new(),
            layout_changed: EventBus::new(),
            _status_subscription: subscription,
        }
    }

    pub fn cards(&self) -> &Rc<Vec<CardDescriptor>> {
        &self.cards
    }

    pub fn card(&self, id: &str) -> Option<&BaseCard> {
        self.mounted.iter().find(|card| card.id() == id)
    }

    pub fn mounted(&self) -> &[BaseCard] {
        &self.mounted
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn render_status(&self) -> &EventBus<RenderStatusChange> {
        &self.render_status
    }

    pub fn all_rendered(&self) -> &EventBus<AllCardsRendered> {
        &self.all_rendered
    }

    pub fn cards_changed(&self) -> &EventBus<CardsChanged> {
        &self.cards_changed
    }

    pub fn layout_changed(&self) -> &EventBus<LayoutChanged> {
        &self.layout_changed
    }

    /// Load every mounted card concurrently
    pub async fn load_all(&mut self) {
        let loaded = self.start_load().await;
        self.finish_load(loaded);
    }

    /// Detach the mounted cards and load them without borrowing the dashboard
    ///
    /// Until the result is handed to [`finish_load`](Self::finish_load) the
    /// detached cards are reported as loading.
    pub fn start_load(&mut self) -> LocalBoxFuture<'static, Vec<BaseCard>> {
        let mut cards = std::mem::take(&mut self.mounted);
        let services = self.services.clone();
        let status = self.render_status.clone();
        async move {
            let services = &services;
            let status: &EventBus<RenderStatusChange> = &status;
            join_all(cards.iter_mut().map(move |card| card.load(services, status))).await;
            cards
        }
        .boxed_local()
    }

    /// Remount loaded cards that are still on the dashboard
    ///
    /// Results are dropped when the card list was replaced during the load.
    pub fn finish_load(&mut self, loaded: Vec<BaseCard>) {
        if !self.mounted.is_empty() {
            return;
        }
        self.mounted = loaded
            .into_iter()
            .filter_map(|mut card| {
                let current = self.cards.iter().find(|d| d.id == card.descriptor.id)?;
                card.descriptor = current.clone();
                Some(card)
            })
            .collect();
    }

    /// Attach a data source to a card; takes effect on the next load
    pub fn set_card_loader(&mut self, card_id: &str, loader: CardLoader) -> bool {
        let Some(index) = self.cards.iter().position(|card| card.id == card_id) else {
            return false;
        };
        let mut cards = (*self.cards).clone();
        cards[index].loader = Some(loader.clone());
        self.cards = Rc::new(cards);
        for card in self.mounted.iter_mut().filter(|card| card.id() == card_id) {
            card.descriptor.loader = Some(loader.clone());
        }
        true
    }

    /// Replace the card list; all cards are remounted and must load again
    pub fn set_cards(&mut self, cards: Vec<CardDescriptor>) {
        let old = self.cards.clone();
        let cards = Rc::new(cards);
        if cards_differ(&old, &cards) {
            self.emit_cards_changed(old, cards.clone(), CardsChangeKind::Cards);
        }
        self.mounted = cards.iter().cloned().map(BaseCard::new).collect();
        self.tracker.reset(cards.clone());
        self.cards = cards;
    }

    /// Current rectangles keyed by card id
    pub fn layouts(&self) -> Vec<GridItem> {
        self.cards
            .iter()
            .map(|card| GridItem {
                i: card.id.clone(),
                rect: card.layout,
            })
            .collect()
    }

    /// Whether any item moves or resizes a known card
    pub fn has_layout_changed(&self, items: &[GridItem]) -> bool {
        self.cards.iter().any(|card| {
            items
                .iter()
                .find(|item| item.i == card.id)
                .is_some_and(|item| !item.rect.same_position(&card.layout))
        })
    }

    /// Apply layout items from the grid; returns `false` when nothing moved
    pub fn update_card_layouts(&mut self, items: &[GridItem]) -> bool {
        if !self.has_layout_changed(items) {
            return false;
        }
        let updated: Vec<CardDescriptor> = self
            .cards
            .iter()
            .map(|card| match items.iter().find(|item| item.i == card.id) {
                Some(item) => CardDescriptor {
                    layout: item.rect,
                    ..card.clone()
                },
                None => card.clone(),
            })
            .collect();
        for card in &mut self.mounted {
            if let Some(item) = items.iter().find(|item| item.i == card.descriptor.id) {
                card.descriptor.layout = item.rect;
            }
        }

        let old = std::mem::replace(&mut self.cards, Rc::new(updated));
        self.emit_cards_changed(old, self.cards.clone(), CardsChangeKind::Layout);
        self.layout_changed.emit(&LayoutChanged {
            layouts: items.to_vec(),
            timestamp: now_ms(),
        });
        true
    }

    /// Remove a card; returns `false` for an unknown id
    pub fn delete_card(&mut self, card_id: &str) -> bool {
        if !self.cards.iter().any(|card| card.id == card_id) {
            return false;
        }
        let remaining: Vec<CardDescriptor> = self
            .cards
            .iter()
            .filter(|card| card.id != card_id)
            .cloned()
            .collect();
        self.mounted.retain(|card| card.id() != card_id);

        let old = std::mem::replace(&mut self.cards, Rc::new(remaining));
        self.emit_cards_changed(old, self.cards.clone(), CardsChangeKind::Delete);
        self.layout_changed.emit(&LayoutChanged {
            layouts: self.layouts(),
            timestamp: now_ms(),
        });

        // The deleted card may have been the last one still loading
        if let Some(statuses) = self.tracker.retain(self.cards.clone()) {
            let summary = summarize(statuses, &self.services.collector, now_ms());
            announce(&self.all_rendered, summary);
        }
        true
    }

    fn emit_cards_changed(&self, old: Rc<Vec<CardDescriptor>>, cards: Rc<Vec<CardDescriptor>>, kind: CardsChangeKind) {
        self.cards_changed.emit(&CardsChanged {
            cards,
            old_cards: old,
            kind,
            timestamp: now_ms(),
        });
    }
}

fn announce(bus: &EventBus<AllCardsRendered>, summary: AllCardsRendered) {
    info!(
        total = summary.total_cards,
        success = summary.success_count,
        failed = summary.error_count,
        "all cards rendered"
    );
    bus.emit(&summary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{CardKind, CardState, GridRect};
    use crate::config::ProjectConfig;
    use crate::data::tests::FakeFetch;
    use crate::maps::{MapError, MapRegistry};
    use futures::executor::block_on;
    use futures::FutureExt;
    use serde_json::{json, Value};

    struct NoopRegistry;

    impl MapRegistry for NoopRegistry {
        fn register_map(&self, _name: &str, _geo_json: &Value) -> Result<(), MapError> {
            Ok(())
        }
    }

    fn services() -> Services {
        let fetch = FakeFetch::with("./unused.csv", "");
        Services::new(&ProjectConfig::default(), Rc::new(fetch), Rc::new(NoopRegistry))
    }

    fn metric(id: &str, x: u32) -> CardDescriptor {
        CardDescriptor::new(id, CardType::Metric, GridRect::new(x, 0, 6, 3)).with_title(id)
    }

    fn loading(result: Result<Value, String>) -> CardLoader {
        CardLoader::new(move |_| {
            let result = result.clone();
            async move { result }.boxed_local()
        })
    }

    fn capture<E: Clone + 'static>(bus: &EventBus<E>) -> (Rc<RefCell<Vec<E>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe(move |e: &E| sink.borrow_mut().push(e.clone()));
        (seen, sub)
    }

    #[test]
    fn test_all_cards_rendered_once() {
        let cards = vec![
            metric("ok", 0).with_loader(loading(Ok(json!({"value": 12, "change": "+3%"})))),
            metric("broken", 6).with_loader(loading(Err("timeout".to_string()))),
            metric("static", 12),
        ];
        let mut dashboard = Dashboard::new(cards, services());
        let (summaries, _sub) = capture(dashboard.all_rendered());

        block_on(dashboard.load_all());
        block_on(dashboard.load_all());

        let summaries = summaries.borrow();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!((summary.total_cards, summary.success_count, summary.error_count), (3, 2, 1));

        let broken = &summary.cards_status[1];
        assert_eq!(broken.status, RenderStatus::Error);
        assert_eq!(broken.error_collector_error_count, 1);
        assert_eq!(broken.error.as_deref(), Some("Data fetch failed: timeout"));
        assert_eq!(summary.cards_status[2].status, RenderStatus::Success);
        assert!(matches!(dashboard.card("ok").unwrap().state(), CardState::Success(Some(_))));
        assert!(matches!(dashboard.card("broken").unwrap().state(), CardState::Error(_)));
    }

    #[test]
    fn test_changes_during_detached_load() {
        let cards = vec![
            metric("a", 0).with_loader(loading(Ok(json!({"label": "A", "value": 1})))),
            metric("b", 6).with_loader(loading(Ok(json!({"label": "B", "value": 2})))),
        ];
        let mut dashboard = Dashboard::new(cards, services());
        let loading_cards = dashboard.start_load();
        assert!(dashboard.card("a").is_none());

        let moved = [GridItem {
            i: "a".into(),
            rect: GridRect::new(0, 5, 6, 3),
        }];
        assert!(dashboard.update_card_layouts(&moved));
        assert!(dashboard.delete_card("b"));

        let loaded = block_on(loading_cards);
        dashboard.finish_load(loaded);
        assert_eq!(dashboard.mounted().len(), 1);
        let a = dashboard.card("a").unwrap();
        assert_eq!(a.descriptor.layout, GridRect::new(0, 5, 6, 3));
        assert!(matches!(a.state(), CardState::Success(Some(_))));
    }

    #[test]
    fn test_results_dropped_when_cards_replaced() {
        let mut dashboard = Dashboard::new(vec![metric("a", 0)], services());
        let loading_cards = dashboard.start_load();
        dashboard.set_cards(vec![metric("z", 0)]);
        dashboard.finish_load(block_on(loading_cards));
        assert!(dashboard.card("a").is_none());
        assert!(matches!(dashboard.card("z").unwrap().state(), CardState::Loading));
    }

    #[test]
    fn test_set_card_loader() {
        let mut dashboard = Dashboard::new(vec![metric("a", 0)], services());
        assert!(!dashboard.set_card_loader("missing", loading(Ok(Value::Null))));
        assert!(dashboard.set_card_loader("a", loading(Ok(json!({"label": "A", "value": 3})))));
        assert!(dashboard.cards()[0].loader.is_some());
        block_on(dashboard.load_all());
        match dashboard.card("a").unwrap().state() {
            CardState::Success(Some(CardKind::Metric(metric))) => assert_eq!(metric.value, json!(3)),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_collector_errors_mark_card_failed() {
        let cards = vec![metric("a", 0).with_loader(loading(Ok(json!({"value": 1}))))];
        let services = services();
        services.collector.collect_echarts_render_error("a", "canvas lost");
        let mut dashboard = Dashboard::new(cards, services);
        let (summaries, _sub) = capture(dashboard.all_rendered());

        block_on(dashboard.load_all());
        let summary = &summaries.borrow()[0];
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.cards_status[0].original_render_status, RenderStatus::Success);
        assert_eq!(summary.cards_status[0].status, RenderStatus::Error);
    }

    #[test]
    fn test_empty_dashboard_never_reports() {
        let mut dashboard = Dashboard::new(Vec::new(), services());
        let (summaries, _sub) = capture(dashboard.all_rendered());
        block_on(dashboard.load_all());
        assert!(summaries.borrow().is_empty());
    }

    #[test]
    fn test_update_card_layouts() {
        let mut dashboard = Dashboard::new(vec![metric("a", 0), metric("b", 6)], services());
        let (changes, _c) = capture(dashboard.cards_changed());
        let (layouts, _l) = capture(dashboard.layout_changed());

        let unchanged = dashboard.layouts();
        assert!(!dashboard.update_card_layouts(&unchanged));
        assert!(changes.borrow().is_empty());

        let moved = vec![
            GridItem {
                i: "b".into(),
                rect: GridRect::new(0, 3, 6, 3),
            },
            GridItem {
                i: "ghost".into(),
                rect: GridRect::new(0, 0, 1, 1),
            },
        ];
        assert!(dashboard.update_card_layouts(&moved));
        assert_eq!(dashboard.cards()[1].layout, GridRect::new(0, 3, 6, 3));
        assert_eq!(dashboard.card("b").unwrap().descriptor.layout, GridRect::new(0, 3, 6, 3));
        assert_eq!(dashboard.cards().len(), 2);

        assert_eq!(changes.borrow()[0].kind, CardsChangeKind::Layout);
        assert_eq!(changes.borrow()[0].old_cards[1].layout, GridRect::new(6, 0, 6, 3));
        assert_eq!(layouts.borrow()[0].layouts.len(), 2);
    }

    #[test]
    fn test_delete_card() {
        let mut dashboard = Dashboard::new(vec![metric("a", 0), metric("b", 6)], services());
        let (changes, _c) = capture(dashboard.cards_changed());

        assert!(!dashboard.delete_card("missing"));
        assert!(dashboard.delete_card("a"));
        assert_eq!(dashboard.cards().len(), 1);
        assert!(dashboard.card("a").is_none());
        assert_eq!(changes.borrow().len(), 1);
        assert_eq!(changes.borrow()[0].kind, CardsChangeKind::Delete);
    }

    #[test]
    fn test_delete_last_pending_card_completes_render() {
        let cards = vec![metric("a", 0), metric("b", 6)];
        let mut dashboard = Dashboard::new(cards, services());
        let (summaries, _sub) = capture(dashboard.all_rendered());

        dashboard.render_status().emit(&RenderStatusChange {
            card_id: "a".into(),
            status: RenderStatus::Success,
            error: None,
            timestamp: 0.0,
        });
        assert!(summaries.borrow().is_empty());

        dashboard.delete_card("b");
        assert_eq!(summaries.borrow().len(), 1);
        assert_eq!(summaries.borrow()[0].total_cards, 1);
    }

    #[test]
    fn test_set_cards_change_detection() {
        let mut dashboard = Dashboard::new(vec![metric("a", 0)], services());
        let (changes, _c) = capture(dashboard.cards_changed());

        // Moving a card is not a content change
        dashboard.set_cards(vec![metric("a", 6)]);
        assert!(changes.borrow().is_empty());

        dashboard.set_cards(vec![metric("a", 6).with_title("Revenue")]);
        dashboard.set_cards(vec![metric("a", 6), metric("b", 0)]);
        let kinds: Vec<CardsChangeKind> = changes.borrow().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![CardsChangeKind::Cards, CardsChangeKind::Cards]);
        assert_eq!(dashboard.mounted().len(), 2);
    }
}
