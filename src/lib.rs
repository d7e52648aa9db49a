//! Dashboard Engine - table virtualization and grid layout core for card dashboards
//!
//! This crate provides the data side of a card dashboard: table filtering,
//! sorting and virtual scrolling, desktop and mobile grid layout, card loading
//! with error collection, and theme variables.

mod card;
mod cell;
mod config;
mod dashboard;
mod data;
mod editor;
mod errors;
mod events;
mod filter;
mod grid;
mod maps;
mod mobile;
mod popup;
mod renderer;
mod services;
mod sort;
mod table;
mod temporal;
mod theme;
mod viewport;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use serde_wasm_bindgen::Serializer;
use std::cell::{Cell as StdCell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, spawn_local, JsFuture};

pub use card::{
    BaseCard, CardDescriptor, CardKind, CardLoader, CardState, CardType, GridRect, RenderStatus, RenderStatusChange,
};
pub use cell::{CellValue, Column, DataType, Formatter, Row, TableData};
pub use config::{DashboardConfig, EditorConfig, MetricIconType, NamedUrl, ProjectConfig};
pub use dashboard::{AllCardsRendered, CardsChangeKind, CardsChanged, Dashboard, LayoutChanged};
pub use data::{BrowserFetch, CsvData, CsvError, CsvManager, Fetch, FetchResponse};
pub use editor::{FilterEditor, RangeField, RangeFields};
pub use errors::{DataError, ErrorCategory, ErrorCollector, ErrorRecord, ErrorReport};
pub use events::{Debounce, EventBus, Subscription};
pub use filter::FilterState;
pub use grid::{dynamic_row_height, is_mobile_device, GridChange, GridContainer, GridItem, LayoutMode, ViewportSize};
pub use maps::{EchartsRegistry, MapError, MapManager, MapRegistry};
pub use mobile::{layout_mobile, LayoutItem, MobileLayoutEngine};
pub use popup::{compute_popup_position, FilterPopup, Position, Rect, Size};
pub use renderer::{render_card, render_table, Element, Node};
pub use services::Services;
pub use sort::{SortDirection, SortState};
pub use table::{HeaderState, TableController, TableView};
pub use theme::{apply_theme, circle_gradient_background, format_css_value, parse_color_to_rgb, theme_variables};
pub use viewport::{compute_range, VirtualScroll, VisibleRange};

/// Initialize the WASM module with panic hooks and console logging
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
    // Already installed when the module is initialized twice
    let _ = wasm_tracing::set_as_global_default();
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    Ok(value.serialize(&Serializer::json_compatible())?)
}

/// Deserialize an optional JS argument, defaulting on `undefined`/`null`
fn from_js_or_default<T: serde::de::DeserializeOwned + Default>(value: JsValue) -> Result<T, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_wasm_bindgen::from_value(value)?)
}

fn now_ms() -> f64 {
    events::now_ms()
}

/// Deliver an event to a JS listener on the next microtask
///
/// Events are emitted while the engine state is borrowed, so listeners calling
/// back into the engine must run after the emitting call returned.
fn call_listener<T: Serialize>(callback: &js_sys::Function, event: &T) {
    let payload = to_js(event).unwrap_or(JsValue::NULL);
    let callback = callback.clone();
    spawn_local(async move {
        if let Err(e) = callback.call1(&JsValue::NULL, &payload) {
            warn!(target: "errors", "listener callback failed: {}", data::js_error_message(&e));
        }
    });
}

fn cell_to_js(value: &CellValue) -> JsValue {
    match value {
        CellValue::Null => JsValue::NULL,
        CellValue::Text(s) => JsValue::from_str(s),
        CellValue::Number(n) => JsValue::from_f64(*n),
    }
}

/// Column formatter backed by a JS function; falls back to the plain display
fn js_formatter(f: js_sys::Function) -> Formatter {
    Formatter::new(move |value| {
        f.call1(&JsValue::NULL, &cell_to_js(value))
            .ok()
            .and_then(|r| r.as_string())
            .unwrap_or_else(|| value.display())
    })
}

/// Virtualized table exposed to JavaScript
#[wasm_bindgen]
pub struct TableEngine {
    table: TableController,
    data: TableData,
    formatters: HashMap<String, js_sys::Function>,
}

impl TableEngine {
    fn with_formatters(&self, mut data: TableData) -> TableData {
        for column in &mut data.columns {
            if let Some(f) = self.formatters.get(&column.data_index) {
                column.formatter = Some(js_formatter(f.clone()));
            }
        }
        data
    }
}

#[wasm_bindgen]
impl TableEngine {
    /// Create a table from a `{columns, data}` payload and an optional dashboard config
    #[wasm_bindgen(constructor)]
    pub fn new(payload: JsValue, config: JsValue) -> Result<TableEngine, JsValue> {
        let payload: Value = serde_wasm_bindgen::from_value(payload)?;
        let config: DashboardConfig = from_js_or_default(config)?;
        let data = TableData::from_payload(&payload);
        let table =
            TableController::new(data.clone(), config.row_height_px()).with_cell_min_width(config.cell_min_width_px());
        Ok(Self {
            table,
            data,
            formatters: HashMap::new(),
        })
    }

    /// Replace the rows; filters and sort carry over
    #[wasm_bindgen]
    pub fn set_data(&mut self, payload: JsValue) -> Result<(), JsValue> {
        let payload: Value = serde_wasm_bindgen::from_value(payload)?;
        self.data = TableData::from_payload(&payload);
        let data = self.with_formatters(self.data.clone());
        self.table.set_data(data);
        Ok(())
    }

    /// Format a column's cells with `formatter(value) -> string`
    #[wasm_bindgen]
    pub fn set_formatter(&mut self, data_index: &str, formatter: js_sys::Function) {
        self.formatters.insert(data_index.to_string(), formatter);
        let data = self.with_formatters(self.data.clone());
        self.table.set_data(data);
    }

    #[wasm_bindgen]
    pub fn set_filter(&mut self, data_index: &str, value: &str) -> bool {
        self.table.set_filter(data_index, value)
    }

    #[wasm_bindgen]
    pub fn clear_filters(&mut self) {
        self.table.clear_filters();
    }

    /// Cycle a column through ascending, descending and unsorted
    #[wasm_bindgen]
    pub fn toggle_sort(&mut self, data_index: &str) -> bool {
        self.table.toggle_sort(data_index)
    }

    #[wasm_bindgen]
    pub fn on_scroll(&mut self, scroll_top: f64, container_height: f64) -> Result<JsValue, JsValue> {
        to_js(&self.table.on_scroll(scroll_top, container_height))
    }

    #[wasm_bindgen]
    pub fn on_container_resize(&mut self, container_height: f64) -> bool {
        self.table.on_container_resize(container_height)
    }

    #[wasm_bindgen]
    pub fn hover_column(&mut self, index: Option<u32>) {
        self.table.hover_column(index.map(|i| i as usize));
    }

    #[wasm_bindgen]
    pub fn total_rows(&self) -> usize {
        self.table.total_rows()
    }

    /// Current frame: headers, rendered rows and scroll geometry
    #[wasm_bindgen]
    pub fn view(&self) -> Result<JsValue, JsValue> {
        to_js(&self.table.view())
    }

    /// Current frame as an element tree
    #[wasm_bindgen]
    pub fn render(&self) -> Result<JsValue, JsValue> {
        to_js(&render_table(&self.table.view()))
    }

    /// Open the filter popup under the trigger's bounding rectangle
    #[wasm_bindgen]
    pub fn open_filter_popup(&mut self, data_index: &str, trigger: JsValue) -> Result<bool, JsValue> {
        let trigger: Rect = serde_wasm_bindgen::from_value(trigger)?;
        let window = web_sys::window().ok_or("no window")?;
        let viewport = Size::new(
            window.inner_width()?.as_f64().unwrap_or_default(),
            window.inner_height()?.as_f64().unwrap_or_default(),
        );
        Ok(self
            .table
            .open_filter_popup(data_index, trigger, viewport, popup::DEFAULT_PADDING))
    }

    #[wasm_bindgen]
    pub fn measure_filter_popup(&mut self, width: f64, height: f64) {
        self.table.popup_measured(Size::new(width, height));
    }

    /// Edit one field of the popup; `field` is `"start"` or `"end"`
    #[wasm_bindgen]
    pub fn set_popup_field(&mut self, field: &str, value: &str) -> Result<(), JsValue> {
        let field = match field {
            "start" => RangeField::Start,
            "end" => RangeField::End,
            other => return Err(JsValue::from_str(&format!("unknown popup field: {}", other))),
        };
        self.table.popup_set_field(field, value);
        Ok(())
    }

    #[wasm_bindgen]
    pub fn apply_popup(&mut self) -> bool {
        self.table.apply_popup(now_ms())
    }

    #[wasm_bindgen]
    pub fn clear_popup(&mut self) -> bool {
        self.table.clear_popup(now_ms())
    }

    #[wasm_bindgen]
    pub fn dismiss_popup(&mut self) {
        self.table.dismiss_popup(now_ms());
    }

    #[wasm_bindgen]
    pub fn popup(&self) -> Result<JsValue, JsValue> {
        to_js(&self.table.popup())
    }

    /// Advance popup timers; `true` when the popup unmounted
    #[wasm_bindgen]
    pub fn tick(&mut self) -> bool {
        self.table.tick(now_ms())
    }
}

/// CSV loader handed to JavaScript card loaders
#[wasm_bindgen]
pub struct CsvSource {
    csv: Rc<CsvManager>,
}

#[wasm_bindgen]
impl CsvSource {
    /// Resolves to `{data, meta, errors, name, url}`
    #[wasm_bindgen]
    pub fn load(&self, name: String) -> js_sys::Promise {
        let csv = self.csv.clone();
        future_to_promise(async move {
            let data = csv.load(&name).await?;
            to_js(&*data)
        })
    }
}

/// Card loader calling `loader(csvSource)` and awaiting the returned payload
fn js_loader(loader: js_sys::Function) -> CardLoader {
    CardLoader::new(move |csv| {
        let loader = loader.clone();
        async move {
            let source = JsValue::from(CsvSource { csv });
            let result = loader
                .call1(&JsValue::NULL, &source)
                .map_err(|e| data::js_error_message(&e))?;
            let resolved = JsFuture::from(js_sys::Promise::resolve(&result))
                .await
                .map_err(|e| data::js_error_message(&e))?;
            serde_wasm_bindgen::from_value::<Value>(resolved).map_err(|e| e.to_string())
        }
        .boxed_local()
    })
}

struct EngineState {
    dashboard: Dashboard,
    grid: GridContainer,
    grid_changed: EventBus<GridChange>,
}

/// Window `resize` listener driving the grid's debounced resize
struct ResizeListener {
    window: web_sys::Window,
    on_resize: Closure<dyn FnMut()>,
    _on_settle: Rc<Closure<dyn FnMut()>>,
    timeout: Rc<StdCell<Option<i32>>>,
}

impl Drop for ResizeListener {
    fn drop(&mut self) {
        let _ = self
            .window
            .remove_event_listener_with_callback("resize", self.on_resize.as_ref().unchecked_ref());
        if let Some(handle) = self.timeout.take() {
            self.window.clear_timeout_with_handle(handle);
        }
    }
}

fn viewport_size(window: &web_sys::Window) -> Result<ViewportSize, JsValue> {
    Ok(ViewportSize::new(
        window.inner_width()?.as_f64().unwrap_or_default(),
        window.inner_height()?.as_f64().unwrap_or_default(),
    ))
}

/// A mounted dashboard exposed to JavaScript
#[wasm_bindgen]
pub struct DashboardEngine {
    state: Rc<RefCell<EngineState>>,
    subscriptions: Vec<Subscription>,
    resize: Option<ResizeListener>,
}

#[wasm_bindgen]
impl DashboardEngine {
    /// Mount `cards` with the given dashboard, editor and project configs
    #[wasm_bindgen(constructor)]
    pub fn new(
        cards: JsValue,
        dashboard_config: JsValue,
        editor_config: JsValue,
        project: JsValue,
    ) -> Result<DashboardEngine, JsValue> {
        let cards: Vec<CardDescriptor> = from_js_or_default(cards)?;
        let dashboard_config: DashboardConfig = from_js_or_default(dashboard_config)?;
        let editor_config: EditorConfig = from_js_or_default(editor_config)?;
        let project: ProjectConfig = from_js_or_default(project)?;

        let window = web_sys::window().ok_or("no window")?;
        let user_agent = window.navigator().user_agent()?;
        let grid = GridContainer::new(
            Rc::new(dashboard_config),
            Rc::new(editor_config),
            &user_agent,
            viewport_size(&window)?,
        );

        let services = Services::browser(&project);
        let maps = services.clone();
        spawn_local(async move {
            maps.apply_project(&project).await;
        });

        Ok(Self {
            state: Rc::new(RefCell::new(EngineState {
                dashboard: Dashboard::new(cards, services),
                grid,
                grid_changed: EventBus::new(),
            })),
            subscriptions: Vec::new(),
            resize: None,
        })
    }

    /// Use `loader(csvSource) -> Promise<payload>` as a card's data source
    #[wasm_bindgen]
    pub fn set_card_loader(&self, card_id: &str, loader: js_sys::Function) -> bool {
        self.state.borrow_mut().dashboard.set_card_loader(card_id, js_loader(loader))
    }

    /// Load every card; resolves once all cards settled
    #[wasm_bindgen]
    pub fn load(&self) -> js_sys::Promise {
        let loading = self.state.borrow_mut().dashboard.start_load();
        let state = self.state.clone();
        future_to_promise(async move {
            let loaded = loading.await;
            state.borrow_mut().dashboard.finish_load(loaded);
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen]
    pub fn set_cards(&self, cards: JsValue) -> Result<(), JsValue> {
        let cards: Vec<CardDescriptor> = serde_wasm_bindgen::from_value(cards)?;
        self.state.borrow_mut().dashboard.set_cards(cards);
        Ok(())
    }

    #[wasm_bindgen]
    pub fn set_configs(&self, dashboard_config: JsValue, editor_config: JsValue) -> Result<(), JsValue> {
        let dashboard_config: DashboardConfig = from_js_or_default(dashboard_config)?;
        let editor_config: EditorConfig = from_js_or_default(editor_config)?;
        self.state
            .borrow_mut()
            .grid
            .set_configs(Rc::new(dashboard_config), Rc::new(editor_config));
        Ok(())
    }

    /// Grid items for the current mode
    #[wasm_bindgen]
    pub fn layout(&self) -> Result<JsValue, JsValue> {
        let mut state = self.state.borrow_mut();
        let cards = state.dashboard.cards().clone();
        to_js(&state.grid.layout(&cards))
    }

    #[wasm_bindgen]
    pub fn is_mobile(&self) -> bool {
        self.state.borrow().grid.is_mobile()
    }

    #[wasm_bindgen]
    pub fn row_height(&self) -> f64 {
        self.state.borrow().grid.row_height()
    }

    #[wasm_bindgen]
    pub fn dashboard_config(&self) -> Result<JsValue, JsValue> {
        to_js(&*self.state.borrow_mut().grid.dashboard_config())
    }

    #[wasm_bindgen]
    pub fn editor_config(&self) -> Result<JsValue, JsValue> {
        to_js(&*self.state.borrow_mut().grid.editor_config())
    }

    /// Element tree for one card in its current load state
    #[wasm_bindgen]
    pub fn render_card(&self, card_id: &str) -> Result<JsValue, JsValue> {
        let mut state = self.state.borrow_mut();
        let config = state.grid.dashboard_config();
        let dashboard = &state.dashboard;
        let descriptor = dashboard
            .cards()
            .iter()
            .find(|card| card.id == card_id)
            .ok_or_else(|| JsValue::from_str(&format!("unknown card: {}", card_id)))?;
        let card_state = dashboard.card(card_id).map_or(&CardState::Loading, BaseCard::state);
        to_js(&render_card(descriptor, card_state, &config, None))
    }

    /// Apply layout items from the grid widget; mobile layouts are derived and never stored
    #[wasm_bindgen]
    pub fn update_layouts(&self, items: JsValue) -> Result<bool, JsValue> {
        let items: Vec<GridItem> = serde_wasm_bindgen::from_value(items)?;
        let mut state = self.state.borrow_mut();
        if state.grid.is_mobile() {
            return Ok(false);
        }
        Ok(state.dashboard.update_card_layouts(&items))
    }

    #[wasm_bindgen]
    pub fn delete_card(&self, card_id: &str) -> bool {
        self.state.borrow_mut().dashboard.delete_card(card_id)
    }

    #[wasm_bindgen]
    pub fn on_render_status(&mut self, callback: js_sys::Function) {
        let sub = self
            .state
            .borrow()
            .dashboard
            .render_status()
            .subscribe(move |e: &RenderStatusChange| call_listener(&callback, e));
        self.subscriptions.push(sub);
    }

    #[wasm_bindgen]
    pub fn on_all_rendered(&mut self, callback: js_sys::Function) {
        let sub = self
            .state
            .borrow()
            .dashboard
            .all_rendered()
            .subscribe(move |e: &AllCardsRendered| call_listener(&callback, e));
        self.subscriptions.push(sub);
    }

    #[wasm_bindgen]
    pub fn on_cards_changed(&mut self, callback: js_sys::Function) {
        let sub = self
            .state
            .borrow()
            .dashboard
            .cards_changed()
            .subscribe(move |e: &CardsChanged| call_listener(&callback, e));
        self.subscriptions.push(sub);
    }

    #[wasm_bindgen]
    pub fn on_layout_changed(&mut self, callback: js_sys::Function) {
        let sub = self
            .state
            .borrow()
            .dashboard
            .layout_changed()
            .subscribe(move |e: &LayoutChanged| call_listener(&callback, e));
        self.subscriptions.push(sub);
    }

    /// Notified when a settled resize switches mode or changes the row height
    #[wasm_bindgen]
    pub fn on_grid_changed(&mut self, callback: js_sys::Function) {
        let sub = self
            .state
            .borrow()
            .grid_changed
            .subscribe(move |e: &GridChange| call_listener(&callback, e));
        self.subscriptions.push(sub);
    }

    #[wasm_bindgen]
    pub fn errors(&self) -> Result<JsValue, JsValue> {
        to_js(&self.state.borrow().dashboard.services().collector.errors())
    }

    #[wasm_bindgen]
    pub fn error_stats(&self) -> Result<JsValue, JsValue> {
        to_js(&self.state.borrow().dashboard.services().collector.stats())
    }

    #[wasm_bindgen]
    pub fn clear_errors(&self) {
        self.state.borrow().dashboard.services().collector.clear_errors();
    }

    /// Write the current mode's theme variables onto the document root
    #[wasm_bindgen]
    pub fn apply_theme(&self) -> Result<(), JsValue> {
        let config = self.state.borrow_mut().grid.dashboard_config();
        apply_theme(&config)
    }

    /// Track window resizes; replaces a previously attached listener
    #[wasm_bindgen]
    pub fn attach_resize_listener(&mut self) -> Result<(), JsValue> {
        self.resize = None;
        let window = web_sys::window().ok_or("no window")?;
        let timeout = Rc::new(StdCell::new(None));

        let on_settle = {
            let state = self.state.clone();
            let timeout = timeout.clone();
            Rc::new(Closure::<dyn FnMut()>::new(move || {
                timeout.set(None);
                let Ok(mut state) = state.try_borrow_mut() else {
                    return;
                };
                let Some(change) = state.grid.tick(now_ms()) else {
                    return;
                };
                if change.mode_changed {
                    let config = state.grid.dashboard_config();
                    if let Err(e) = apply_theme(&config) {
                        warn!(target: "layout", "failed to apply theme: {}", data::js_error_message(&e));
                    }
                }
                state.grid_changed.emit(&change);
            }))
        };

        let on_resize = {
            let state = self.state.clone();
            let window = window.clone();
            let timeout = timeout.clone();
            let on_settle = on_settle.clone();
            Closure::<dyn FnMut()>::new(move || {
                let Ok(size) = viewport_size(&window) else {
                    return;
                };
                if let Ok(mut state) = state.try_borrow_mut() {
                    state.grid.on_resize(size, now_ms());
                }
                if let Some(handle) = timeout.take() {
                    window.clear_timeout_with_handle(handle);
                }
                let callback: &js_sys::Function = (*on_settle).as_ref().unchecked_ref();
                if let Ok(handle) = window.set_timeout_with_callback_and_timeout_and_arguments_0(
                    callback,
                    grid::RESIZE_DEBOUNCE_MS as i32,
                ) {
                    timeout.set(Some(handle));
                }
            })
        };

        window.add_event_listener_with_callback("resize", on_resize.as_ref().unchecked_ref())?;
        self.resize = Some(ResizeListener {
            window,
            on_resize,
            _on_settle: on_settle,
            timeout,
        });
        Ok(())
    }

    /// Remove listeners and stop resize handling; pending timers never fire
    #[wasm_bindgen]
    pub fn detach(&mut self) {
        self.resize = None;
        self.subscriptions.clear();
        self.state.borrow_mut().grid.teardown();
    }
}

impl Drop for DashboardEngine {
    fn drop(&mut self) {
        self.resize = None;
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.grid.teardown();
        }
    }
}

/// Mobile rectangles for a card list, in display order
#[wasm_bindgen(js_name = layoutMobile)]
pub fn layout_mobile_js(cards: JsValue, total_cols: u32) -> Result<JsValue, JsValue> {
    let cards: Vec<CardDescriptor> = serde_wasm_bindgen::from_value(cards)?;
    to_js(&layout_mobile(&cards, total_cols))
}

#[wasm_bindgen(js_name = applyThemeStyles)]
pub fn apply_theme_styles(config: JsValue) -> Result<(), JsValue> {
    let config: DashboardConfig = from_js_or_default(config)?;
    apply_theme(&config)
}

#[wasm_bindgen(js_name = circleGradientBackground)]
pub fn circle_gradient_background_js(icon_color: Option<String>, fallback: Option<String>) -> String {
    circle_gradient_background(icon_color.as_deref(), fallback.as_deref().unwrap_or("#000000"))
}

#[wasm_bindgen(js_name = formatCssValue)]
pub fn format_css_value_js(value: &str) -> String {
    format_css_value(value)
}
