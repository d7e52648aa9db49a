//! Error taxonomy and the dashboard-wide error collector

use crate::events::{now_ms, EventBus, Subscription};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::RefCell;
use tracing::{error, warn};
use wasm_bindgen::JsValue;

/// Card-level failure raised while loading or rendering a card
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("Data fetch failed: {0}")]
    DataLoad(String),
    #[error("Data format error: {0}")]
    DataFormat(String),
    #[error("Render error: {0}")]
    Render(String),
}

impl From<DataError> for JsValue {
    fn from(e: DataError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    DataLoad,
    ComponentRender,
    ConfigDependency,
    Runtime,
    #[default]
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataLoad => "DATA_LOAD",
            Self::ComponentRender => "COMPONENT_RENDER",
            Self::ConfigDependency => "CONFIG_DEPENDENCY",
            Self::Runtime => "RUNTIME",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warning,
}

/// What a caller reports; the collector fills in id, time and defaults
#[derive(Debug, Clone, Default)]
pub struct ErrorReport {
    pub kind: Option<String>,
    pub category: ErrorCategory,
    pub message: Option<String>,
    pub details: Value,
    pub source: Option<String>,
    pub card_id: Option<String>,
}

impl ErrorReport {
    pub fn new(kind: &str, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.to_string()),
            category,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn card(mut self, card_id: &str) -> Self {
        self.card_id = Some(card_id.to_string());
        self
    }
}

/// Non-fatal configuration problem found while preprocessing a card
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigWarning {
    pub kind: String,
    pub category: ErrorCategory,
    pub message: String,
    pub details: Value,
}

impl ConfigWarning {
    pub fn into_report(self, card_id: &str, source: &str) -> ErrorReport {
        ErrorReport::new(&self.kind, self.category, self.message)
            .details(self.details)
            .source(source)
            .card(card_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub id: String,
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: ErrorCategory,
    pub message: String,
    pub details: Value,
    pub source: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total_errors: usize,
    pub total_warnings: usize,
    pub errors_by_type: IndexMap<String, usize>,
    pub warnings_by_type: IndexMap<String, usize>,
    pub errors_by_category: IndexMap<ErrorCategory, usize>,
    pub warnings_by_category: IndexMap<ErrorCategory, usize>,
    pub errors_by_severity: IndexMap<Severity, usize>,
    pub recent_errors: Vec<ErrorRecord>,
    pub recent_warnings: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub total_errors: usize,
    pub total_warnings: usize,
    pub listeners_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardErrorStats {
    pub total_cards: usize,
    pub cards_with_errors: usize,
    pub cards_without_errors: usize,
    pub card_error_map: IndexMap<String, Vec<ErrorRecord>>,
    pub card_error_counts: IndexMap<String, usize>,
    pub total_errors_for_cards: usize,
}

const RECENT_LIMIT: usize = 10;

#[derive(Default)]
struct Records {
    errors: Vec<ErrorRecord>,
    warnings: Vec<ErrorRecord>,
    error_counts: IndexMap<String, usize>,
    warning_counts: IndexMap<String, usize>,
}

/// Collects errors and warnings from every card and collaborator
///
/// One collector is created per dashboard and shared by reference.
#[derive(Default)]
pub struct ErrorCollector {
    records: RefCell<Records>,
    listeners: EventBus<ErrorRecord>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect_error(&self, report: ErrorReport) -> String {
        let record = build_record(report, Severity::Error);
        error!(target: "errors", kind = %record.kind, category = record.category.as_str(), "{}", record.message);
        self.push(record)
    }

    pub fn collect_warning(&self, report: ErrorReport) -> String {
        let record = build_record(report, Severity::Warning);
        warn!(target: "errors", kind = %record.kind, category = record.category.as_str(), "{}", record.message);
        self.push(record)
    }

    fn push(&self, record: ErrorRecord) -> String {
        let id = record.id.clone();
        {
            let mut records = self.records.borrow_mut();
            let Records {
                errors,
                warnings,
                error_counts,
                warning_counts,
            } = &mut *records;
            let (list, counts) = match record.severity {
                Severity::Error => (errors, error_counts),
                Severity::Warning => (warnings, warning_counts),
            };
            *counts.entry(record.kind.clone()).or_insert(0) += 1;
            list.push(record.clone());
        }
        // Borrow released so listeners may query the collector
        self.listeners.emit(&record);
        id
    }

    /// Called with every collected error and warning
    pub fn subscribe(&self, listener: impl Fn(&ErrorRecord) + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.records.borrow().errors.clone()
    }

    pub fn warnings(&self) -> Vec<ErrorRecord> {
        self.records.borrow().warnings.clone()
    }

    pub fn stats(&self) -> ErrorStats {
        let records = self.records.borrow();
        let mut stats = ErrorStats {
            total_errors: records.errors.len(),
            total_warnings: records.warnings.len(),
            errors_by_type: records.error_counts.clone(),
            warnings_by_type: records.warning_counts.clone(),
            recent_errors: tail(&records.errors),
            recent_warnings: tail(&records.warnings),
            ..Default::default()
        };
        for e in &records.errors {
            *stats.errors_by_category.entry(e.category).or_insert(0) += 1;
        }
        for w in &records.warnings {
            *stats.warnings_by_category.entry(w.category).or_insert(0) += 1;
        }
        stats.errors_by_severity.insert(Severity::Error, records.errors.len());
        stats.errors_by_severity.insert(Severity::Warning, records.warnings.len());
        stats
    }

    pub fn errors_by_type(&self, kind: &str) -> Vec<ErrorRecord> {
        self.select(Severity::Error, |r| r.kind == kind)
    }

    pub fn errors_by_category(&self, category: ErrorCategory) -> Vec<ErrorRecord> {
        self.select(Severity::Error, |r| r.category == category)
    }

    /// Errors with `start <= timestamp <= end`
    pub fn errors_by_time_range(&self, start_ms: f64, end_ms: f64) -> Vec<ErrorRecord> {
        self.select(Severity::Error, |r| r.timestamp >= start_ms && r.timestamp <= end_ms)
    }

    pub fn warnings_by_type(&self, kind: &str) -> Vec<ErrorRecord> {
        self.select(Severity::Warning, |r| r.kind == kind)
    }

    pub fn warnings_by_category(&self, category: ErrorCategory) -> Vec<ErrorRecord> {
        self.select(Severity::Warning, |r| r.category == category)
    }

    pub fn warnings_by_time_range(&self, start_ms: f64, end_ms: f64) -> Vec<ErrorRecord> {
        self.select(Severity::Warning, |r| r.timestamp >= start_ms && r.timestamp <= end_ms)
    }

    fn select(&self, severity: Severity, predicate: impl Fn(&ErrorRecord) -> bool) -> Vec<ErrorRecord> {
        let records = self.records.borrow();
        let list = match severity {
            Severity::Error => &records.errors,
            Severity::Warning => &records.warnings,
        };
        list.iter().filter(|r| predicate(r)).cloned().collect()
    }

    pub fn clear_errors(&self) {
        let mut records = self.records.borrow_mut();
        records.errors.clear();
        records.error_counts.clear();
    }

    pub fn clear_errors_by_type(&self, kind: &str) {
        let mut records = self.records.borrow_mut();
        records.errors.retain(|r| r.kind != kind);
        records.error_counts.shift_remove(kind);
    }

    pub fn clear_warnings(&self) {
        let mut records = self.records.borrow_mut();
        records.warnings.clear();
        records.warning_counts.clear();
    }

    pub fn clear_warnings_by_type(&self, kind: &str) {
        let mut records = self.records.borrow_mut();
        records.warnings.retain(|r| r.kind != kind);
        records.warning_counts.shift_remove(kind);
    }

    pub fn status(&self) -> CollectorStatus {
        let records = self.records.borrow();
        CollectorStatus {
            total_errors: records.errors.len(),
            total_warnings: records.warnings.len(),
            listeners_count: self.listeners.listener_count(),
        }
    }

    /// Error counts for the given cards; errors without a card id are ignored
    pub fn card_error_stats(&self, card_ids: &[String]) -> CardErrorStats {
        let mut card_error_map: IndexMap<String, Vec<ErrorRecord>> =
            card_ids.iter().map(|id| (id.clone(), Vec::new())).collect();

        for e in &self.records.borrow().errors {
            if let Some(list) = e.card_id.as_ref().and_then(|id| card_error_map.get_mut(id)) {
                list.push(e.clone());
            }
        }

        let card_error_counts: IndexMap<String, usize> = card_error_map
            .iter()
            .map(|(id, list)| (id.clone(), list.len()))
            .collect();
        let cards_with_errors = card_error_counts.values().filter(|&&n| n > 0).count();
        CardErrorStats {
            total_cards: card_ids.len(),
            cards_with_errors,
            cards_without_errors: card_ids.len() - cards_with_errors,
            total_errors_for_cards: card_error_counts.values().sum(),
            card_error_map,
            card_error_counts,
        }
    }

    // Convenience collectors for the known failure sites

    pub fn collect_csv_load_error(&self, file_name: &str, status: u16, status_text: &str) -> String {
        self.collect_error(
            ErrorReport::new("CSV_LOAD_FAILED", ErrorCategory::DataLoad, format!("HTTP {}: {}", status, status_text))
                .details(json!({ "fileName": file_name, "httpStatus": status, "statusText": status_text }))
                .source("CSVManager"),
        )
    }

    pub fn collect_invalid_file_name(&self, file_name: &str) -> String {
        self.collect_error(
            ErrorReport::new("INVALID_FILE_NAME", ErrorCategory::DataLoad, "Invalid file name")
                .details(json!({ "fileName": file_name }))
                .source("CSVManager"),
        )
    }

    pub fn collect_data_source_not_found(&self, file_name: &str, available: &[String]) -> String {
        self.collect_error(
            ErrorReport::new(
                "DATA_SOURCE_NOT_FOUND",
                ErrorCategory::DataLoad,
                format!("File configuration not found in dataSources: {}", file_name),
            )
            .details(json!({ "fileName": file_name, "availableConfigs": available }))
            .source("CSVManager"),
        )
    }

    pub fn collect_csv_parse_error(&self, file_name: &str, parse_error: &str) -> String {
        self.collect_error(
            ErrorReport::new(
                "CSV_PARSE_FAILED",
                ErrorCategory::DataLoad,
                format!("CSV parsing failed: {}", parse_error),
            )
            .details(json!({ "fileName": file_name, "parseError": parse_error }))
            .source("CSVManager"),
        )
    }

    pub fn collect_data_fetch_error(&self, card_id: &str, message: &str) -> String {
        self.collect_error(
            ErrorReport::new("DATA_FETCH_FAILED", ErrorCategory::DataLoad, format!("Data fetch failed: {}", message))
                .details(json!({ "cardId": card_id, "originalError": message }))
                .source("BaseCard")
                .card(card_id),
        )
    }

    pub fn collect_data_format_error(&self, card_id: &str, code: &str, message: &str) -> String {
        self.collect_error(
            ErrorReport::new("DATA_FORMAT_ERROR", ErrorCategory::DataLoad, format!("Data format error: {}", message))
                .details(json!({ "cardId": card_id, "errorCode": code, "originalError": message }))
                .source("BaseCard")
                .card(card_id),
        )
    }

    pub fn collect_invalid_echarts_config(&self, card_id: &str) -> String {
        self.collect_error(
            ErrorReport::new(
                "INVALID_ECHARTS_CONFIG",
                ErrorCategory::ComponentRender,
                "Invalid ECharts configuration data",
            )
            .source("ChartCard")
            .card(card_id),
        )
    }

    pub fn collect_echarts_render_error(&self, card_id: &str, chart_error: &str) -> String {
        self.collect_error(
            ErrorReport::new(
                "ECHARTS_RENDER_ERROR",
                ErrorCategory::ComponentRender,
                "Error occurred during chart rendering",
            )
            .details(json!({ "chartError": chart_error }))
            .source("ChartCard")
            .card(card_id),
        )
    }

    pub fn collect_map_load_error(&self, map_url: &str, status: u16, status_text: &str) -> String {
        self.collect_error(
            ErrorReport::new(
                "MAP_LOAD_FAILED",
                ErrorCategory::ConfigDependency,
                format!("HTTP {}: {}", status, status_text),
            )
            .details(json!({ "mapUrl": map_url, "httpStatus": status, "statusText": status_text }))
            .source("MapManager"),
        )
    }
}

fn build_record(report: ErrorReport, severity: Severity) -> ErrorRecord {
    let (prefix, default_kind, default_message) = match severity {
        Severity::Error => ("error", "UNKNOWN_ERROR", "Unknown error"),
        Severity::Warning => ("warning", "UNKNOWN_WARNING", "Unknown warning"),
    };
    let timestamp = now_ms().floor();
    ErrorRecord {
        id: generate_id(prefix, timestamp),
        timestamp,
        kind: report.kind.unwrap_or_else(|| default_kind.to_string()),
        category: report.category,
        message: report.message.unwrap_or_else(|| default_message.to_string()),
        details: if report.details.is_null() { json!({}) } else { report.details },
        source: report.source.unwrap_or_else(|| "manual".to_string()),
        severity,
        card_id: report.card_id,
    }
}

fn generate_id(prefix: &str, timestamp: f64) -> String {
    let suffix: String = std::iter::repeat_with(fastrand::alphanumeric).take(9).collect();
    format!("{}_{}_{}", prefix, timestamp as u64, suffix.to_lowercase())
}

fn tail(records: &[ErrorRecord]) -> Vec<ErrorRecord> {
    records[records.len().saturating_sub(RECENT_LIMIT)..].to_vec()
}
