//! Table controller: filter, sort and virtual window state of one table card
//!
//! Every mutation recomputes from the committed state in the fixed order
//! filter, sort, virtualize. Nothing derived is carried across recomputes.

use crate::cell::{Column, Row, TableData};
use crate::editor::RangeField;
use crate::filter::{apply_filters, FilterState};
use crate::popup::{FilterPopup, Rect, Size};
use crate::sort::{sort_indices, SortDirection, SortState};
use crate::viewport::{VirtualScroll, VisibleRange};
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_CELL_MIN_WIDTH: f64 = 80.0;

/// Visibility and highlight of a header control button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ButtonState {
    pub visible: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortIcon {
    Ascending,
    Descending,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderState {
    pub data_index: String,
    pub title: String,
    pub width: f64,
    pub filter_button: ButtonState,
    pub sort_button: ButtonState,
    pub sort_icon: SortIcon,
    pub filtered: bool,
}

/// Everything the renderer needs for one frame of the table
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub headers: Vec<HeaderState>,
    /// Formatted cells of the rendered rows only
    pub rows: Vec<Vec<String>>,
    pub range: VisibleRange,
    pub offset_y: f64,
    pub total_height: f64,
    pub min_width: f64,
    pub total_rows: usize,
    pub is_empty: bool,
}

#[derive(Debug, Clone)]
pub struct TableController {
    columns: Vec<Column>,
    rows: Vec<Row>,
    filters: FilterState,
    sort: SortState,
    scroll: VirtualScroll,
    cell_min_width: f64,
    /// Indices into `rows` after filtering and sorting
    processed: Vec<usize>,
    hovered_column: Option<usize>,
    popup: Option<FilterPopup>,
}

impl TableController {
    pub fn new(data: TableData, row_height: f64) -> Self {
        let mut table = Self {
            columns: data.columns,
            rows: data.data,
            filters: FilterState::new(),
            sort: SortState::default(),
            scroll: VirtualScroll::new(row_height),
            cell_min_width: DEFAULT_CELL_MIN_WIDTH,
            processed: Vec::new(),
            hovered_column: None,
            popup: None,
        };
        table.recompute();
        table
    }

    pub fn with_cell_min_width(mut self, width: f64) -> Self {
        self.cell_min_width = width;
        self
    }

    /// Replace the row set; filter and sort state carry over
    pub fn set_data(&mut self, data: TableData) {
        self.columns = data.columns;
        self.rows = data.data;
        self.recompute();
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn sort_state(&self) -> &SortState {
        &self.sort
    }

    pub fn range(&self) -> VisibleRange {
        self.scroll.range
    }

    pub fn scroll_state(&self) -> &VirtualScroll {
        &self.scroll
    }

    /// Rows surviving the current filters
    pub fn total_rows(&self) -> usize {
        self.processed.len()
    }

    fn column(&self, data_index: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.data_index == data_index)
    }

    /// Set a column filter and scroll back to the top
    ///
    /// Returns `false` for unknown or non-filterable columns.
    pub fn set_filter(&mut self, data_index: &str, value: &str) -> bool {
        if !self.column(data_index).is_some_and(|c| c.filterable) {
            return false;
        }
        self.filters.insert(data_index.to_string(), value.to_string());
        self.recompute();
        self.scroll.reset(self.processed.len());
        debug!(target: "table", column = data_index, value, rows = self.processed.len(), "filter applied");
        true
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
        self.recompute();
        self.scroll.reset(self.processed.len());
    }

    /// Advance the sort cycle for a column; scroll position is kept
    pub fn toggle_sort(&mut self, data_index: &str) -> bool {
        let Some(column) = self.column(data_index).cloned() else {
            return false;
        };
        if !self.sort.toggle(&column) {
            return false;
        }
        self.recompute();
        true
    }

    pub fn on_scroll(&mut self, scroll_top: f64, container_height: f64) -> VisibleRange {
        self.scroll.scroll_to(scroll_top, container_height, self.processed.len())
    }

    /// Measured container height; sub-threshold changes are ignored
    pub fn on_container_resize(&mut self, container_height: f64) -> bool {
        self.scroll.resize(container_height, self.processed.len())
    }

    pub fn set_row_height(&mut self, row_height: f64) {
        self.scroll.row_height = row_height;
        self.scroll.recompute(self.processed.len());
    }

    fn recompute(&mut self) {
        self.processed = apply_filters(&self.rows, &self.filters, &self.columns);
        if let (Some(data_index), Some(direction)) = (&self.sort.column, self.sort.direction) {
            if let Some(column) = self.columns.iter().find(|c| &c.data_index == data_index) {
                sort_indices(&mut self.processed, &self.rows, column, direction);
            }
        }
        self.scroll.recompute(self.processed.len());
    }

    /// Rows in processed order
    pub fn processed_rows(&self) -> impl Iterator<Item = &Row> + '_ {
        self.processed.iter().map(|&i| &self.rows[i])
    }

    /// Rows inside the current virtual window
    pub fn visible_rows(&self) -> impl Iterator<Item = &Row> + '_ {
        let range = self.scroll.range.as_range();
        self.processed[range].iter().map(|&i| &self.rows[i])
    }

    pub fn hover_column(&mut self, index: Option<usize>) {
        self.hovered_column = index;
    }

    pub fn header_states(&self) -> Vec<HeaderState> {
        let popup_column = self.popup.as_ref().map(|p| p.data_index.as_str());
        self.columns
            .iter()
            .enumerate()
            .map(|(index, col)| {
                let hovered = self.hovered_column == Some(index);
                let popup_active = popup_column == Some(col.data_index.as_str());
                let filtered = self.filters.get(&col.data_index).is_some_and(|v| !v.is_empty());
                let sorted = self.sort.is_sorted_by(&col.data_index);
                HeaderState {
                    data_index: col.data_index.clone(),
                    title: col.title.clone(),
                    width: col.width.unwrap_or(self.cell_min_width),
                    filter_button: ButtonState {
                        visible: col.filterable && (hovered || filtered || popup_active),
                        active: filtered || popup_active,
                    },
                    sort_button: ButtonState {
                        visible: col.sortable && (hovered || sorted || popup_active),
                        active: sorted,
                    },
                    sort_icon: match (sorted, self.sort.direction) {
                        (true, Some(SortDirection::Asc)) => SortIcon::Ascending,
                        (true, Some(SortDirection::Desc)) => SortIcon::Descending,
                        _ => SortIcon::Neutral,
                    },
                    filtered,
                }
            })
            .collect()
    }

    pub fn view(&self) -> TableView {
        let rows = self
            .visible_rows()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|col| match row.get(&col.data_index) {
                        Some(value) => col.format(value),
                        None => String::new(),
                    })
                    .collect()
            })
            .collect();
        let total_rows = self.processed.len();
        TableView {
            headers: self.header_states(),
            rows,
            range: self.scroll.range,
            offset_y: self.scroll.offset_y(),
            total_height: self.scroll.total_height(total_rows),
            min_width: self.columns.len() as f64 * self.cell_min_width,
            total_rows,
            is_empty: self.rows.is_empty(),
        }
    }

    /// Open the filter popup for a column, replacing any open one
    pub fn open_filter_popup(&mut self, data_index: &str, trigger: Rect, viewport: Size, padding: f64) -> bool {
        let Some(column) = self.column(data_index).filter(|c| c.filterable) else {
            return false;
        };
        let value = self.filters.get(data_index).map(String::as_str).unwrap_or_default();
        self.popup = Some(FilterPopup::open(column, value, trigger, viewport, padding));
        true
    }

    pub fn popup(&self) -> Option<&FilterPopup> {
        self.popup.as_ref()
    }

    pub fn popup_measured(&mut self, size: Size) {
        if let Some(popup) = &mut self.popup {
            popup.measured(size);
        }
    }

    pub fn popup_set_field(&mut self, field: RangeField, value: &str) {
        if let Some(popup) = &mut self.popup {
            popup.set_field(field, value);
        }
    }

    /// The only path from the popup into the filter state
    pub fn apply_popup(&mut self, now_ms: f64) -> bool {
        let commit = self.popup.as_mut().and_then(|p| {
            let value = p.apply(now_ms)?;
            Some((p.data_index.clone(), value))
        });
        match commit {
            Some((data_index, value)) => self.set_filter(&data_index, &value),
            None => false,
        }
    }

    pub fn clear_popup(&mut self, now_ms: f64) -> bool {
        let commit = self.popup.as_mut().and_then(|p| {
            let value = p.clear(now_ms)?;
            Some((p.data_index.clone(), value))
        });
        match commit {
            Some((data_index, value)) => self.set_filter(&data_index, &value),
            None => false,
        }
    }

    pub fn dismiss_popup(&mut self, now_ms: f64) {
        if let Some(popup) = &mut self.popup {
            popup.dismiss(now_ms);
        }
    }

    /// Drop the popup once its close delay elapsed; `true` when it unmounted
    pub fn tick(&mut self, now_ms: f64) -> bool {
        if self.popup.as_ref().is_some_and(|p| p.tick(now_ms)) {
            self.popup = None;
            return true;
        }
        false
    }
}
