//! CSV data sources: fetch seam, parsing and the coalescing loader

use crate::cell::{CellValue, Row};
use crate::config::NamedUrl;
use crate::errors::ErrorCollector;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{error, info, warn};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

/// Body and status of a completed HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network access used by the CSV and map loaders
pub trait Fetch {
    /// Resolve with the response, or with a message when the request never completed
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<FetchResponse, String>>;
}

/// `window.fetch`
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserFetch;

impl Fetch for BrowserFetch {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<FetchResponse, String>> {
        let url = url.to_string();
        async move { window_fetch(&url).await.map_err(|e| js_error_message(&e)) }.boxed_local()
    }
}

async fn window_fetch(url: &str) -> Result<FetchResponse, JsValue> {
    let window = web_sys::window().ok_or("no window")?;
    let response: web_sys::Response = JsFuture::from(window.fetch_with_str(url)).await?.dyn_into()?;
    let body = JsFuture::from(response.text()?).await?.as_string().unwrap_or_default();
    Ok(FetchResponse {
        status: response.status(),
        status_text: response.status_text(),
        body,
    })
}

pub(crate) fn js_error_message(value: &JsValue) -> String {
    if let Some(s) = value.as_string() {
        return s;
    }
    match value.dyn_ref::<js_sys::Error>() {
        Some(e) => String::from(e.message()),
        None => format!("{:?}", value),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CsvError {
    #[error("Invalid file name")]
    InvalidFileName,
    #[error("File configuration not found in dataSources: {0}")]
    SourceNotFound(String),
    #[error("File loading failed ({name}): HTTP {status}: {status_text}")]
    Http {
        name: String,
        status: u16,
        status_text: String,
    },
    #[error("File loading failed ({name}): CSV parsing failed: {message}")]
    Parse { name: String, message: String },
    #[error("File loading failed ({name}): {message}")]
    Fetch { name: String, message: String },
}

impl From<CsvError> for JsValue {
    fn from(e: CsvError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CsvMeta {
    pub fields: Vec<String>,
    pub delimiter: String,
}

/// Non-fatal problem with one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsvRowError {
    pub code: String,
    pub message: String,
    /// Zero-based data row index
    pub row: usize,
}

/// Parsed CSV file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CsvData {
    pub data: Vec<Row>,
    pub meta: CsvMeta,
    pub errors: Vec<CsvRowError>,
    pub name: String,
    pub url: String,
}

/// Parse CSV text with a header row
///
/// Headers are trimmed and blank lines skipped. Every field stays text. Records
/// with the wrong field count are kept and reported in `errors`.
pub fn parse_csv(text: &str) -> Result<(Vec<Row>, CsvMeta, Vec<CsvRowError>), csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let fields: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(CsvRowError {
                    code: "InvalidRecord".into(),
                    message: e.to_string(),
                    row: index,
                });
                continue;
            }
        };
        if record.iter().all(str::is_empty) && record.len() <= 1 {
            continue;
        }
        if record.len() != fields.len() {
            let code = if record.len() < fields.len() { "TooFewFields" } else { "TooManyFields" };
            errors.push(CsvRowError {
                code: code.into(),
                message: format!("Expected {} fields, but parsed {}", fields.len(), record.len()),
                row: index,
            });
        }
        let row: Row = fields
            .iter()
            .zip(record.iter())
            .map(|(field, value)| (field.clone(), CellValue::Text(value.to_string())))
            .collect();
        rows.push(row);
    }

    let meta = CsvMeta {
        fields,
        delimiter: ",".into(),
    };
    Ok((rows, meta, errors))
}

type LoadResult = Result<Rc<CsvData>, CsvError>;
type PendingLoad = Shared<LocalBoxFuture<'static, LoadResult>>;

/// Loads named CSV sources
///
/// Concurrent loads of one name share a single fetch, and successful results
/// are cached for the lifetime of the manager.
pub struct CsvManager {
    sources: RefCell<Vec<NamedUrl>>,
    fetch: Rc<dyn Fetch>,
    collector: Rc<ErrorCollector>,
    cache: RefCell<HashMap<String, Rc<CsvData>>>,
    loading: RefCell<HashMap<String, PendingLoad>>,
}

impl CsvManager {
    pub fn new(sources: Vec<NamedUrl>, fetch: Rc<dyn Fetch>, collector: Rc<ErrorCollector>) -> Self {
        Self {
            sources: RefCell::new(sources),
            fetch,
            collector,
            cache: RefCell::new(HashMap::new()),
            loading: RefCell::new(HashMap::new()),
        }
    }

    /// Replace the source list; cached files stay cached
    pub fn set_sources(&self, sources: Vec<NamedUrl>) {
        *self.sources.borrow_mut() = sources;
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.borrow().contains_key(name)
    }

    pub fn is_loading(&self, name: &str) -> bool {
        self.loading.borrow().contains_key(name)
    }

    pub async fn load(&self, name: &str) -> LoadResult {
        if name.trim().is_empty() {
            self.collector.collect_invalid_file_name(name);
            return Err(CsvError::InvalidFileName);
        }

        let pending = self.loading.borrow().get(name).cloned();
        if let Some(pending) = pending {
            return pending.await;
        }
        if let Some(data) = self.cache.borrow().get(name) {
            return Ok(data.clone());
        }

        let load = self.start_load(name).boxed_local().shared();
        self.loading.borrow_mut().insert(name.to_string(), load.clone());
        let result = load.await;
        self.loading.borrow_mut().remove(name);

        match &result {
            Ok(data) => {
                info!(target: "csv", name, rows = data.data.len(), "loaded");
                self.cache.borrow_mut().insert(name.to_string(), data.clone());
            }
            Err(e) => error!(target: "csv", name, "{}", e),
        }
        result
    }

    fn start_load(&self, name: &str) -> impl std::future::Future<Output = LoadResult> + 'static {
        let source = self
            .sources
            .borrow()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.url.clone())
            .filter(|url| !url.is_empty());
        let available: Vec<String> = self.sources.borrow().iter().map(|s| s.name.clone()).collect();
        let fetch = self.fetch.clone();
        let collector = self.collector.clone();
        let name = name.to_string();

        async move {
            let Some(url) = source else {
                collector.collect_data_source_not_found(&name, &available);
                return Err(CsvError::SourceNotFound(name));
            };
            info!(target: "csv", name = %name, url = %url, "loading");

            let response = fetch.fetch(&url).await.map_err(|message| CsvError::Fetch {
                name: name.clone(),
                message,
            })?;
            if !response.ok() {
                collector.collect_csv_load_error(&name, response.status, &response.status_text);
                return Err(CsvError::Http {
                    name,
                    status: response.status,
                    status_text: response.status_text,
                });
            }

            let (data, meta, errors) = match parse_csv(&response.body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    let message = e.to_string();
                    collector.collect_csv_parse_error(&name, &message);
                    return Err(CsvError::Parse { name, message });
                }
            };
            if !errors.is_empty() {
                warn!(target: "csv", name = %name, count = errors.len(), "CSV parsing warnings");
            }
            Ok(Rc::new(CsvData {
                data,
                meta,
                errors,
                name,
                url,
            }))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::cell::Cell;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Pending on first poll, so concurrent callers overlap
    pub(crate) struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();
        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    /// In-memory responses keyed by URL; unknown URLs answer 404
    #[derive(Default)]
    pub(crate) struct FakeFetch {
        pub responses: HashMap<String, String>,
        pub calls: Rc<Cell<usize>>,
    }

    impl FakeFetch {
        pub fn with(url: &str, body: &str) -> Self {
            let mut fake = Self::default();
            fake.responses.insert(url.to_string(), body.to_string());
            fake
        }
    }

    impl Fetch for FakeFetch {
        fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<FetchResponse, String>> {
            self.calls.set(self.calls.get() + 1);
            let response = match self.responses.get(url) {
                Some(body) => FetchResponse {
                    status: 200,
                    status_text: "OK".into(),
                    body: body.clone(),
                },
                None => FetchResponse {
                    status: 404,
                    status_text: "Not Found".into(),
                    body: String::new(),
                },
            };
            async move {
                YieldOnce(false).await;
                Ok(response)
            }
            .boxed_local()
        }
    }

    fn sources() -> Vec<NamedUrl> {
        vec![
            NamedUrl {
                name: "sales".into(),
                url: "./sales.csv".into(),
            },
            NamedUrl {
                name: "missing".into(),
                url: "./missing.csv".into(),
            },
        ]
    }

    #[test]
    fn test_parse_csv() {
        let (rows, meta, errors) = parse_csv(" region , amount\nnorth,10\n\nsouth,20,extra\neast\n").unwrap();
        assert_eq!(meta.fields, vec!["region", "amount"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["region"], CellValue::from("north"));
        assert_eq!(rows[0]["amount"], CellValue::from("10"));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code, "TooManyFields");
        assert_eq!(errors[1].code, "TooFewFields");
        assert!(!rows[2].contains_key("amount"));
    }

    #[test]
    fn test_load_caches() {
        let fetch = FakeFetch::with("./sales.csv", "region,amount\nnorth,10\n");
        let calls = fetch.calls.clone();
        let manager = CsvManager::new(sources(), Rc::new(fetch), Rc::new(ErrorCollector::new()));

        let first = block_on(manager.load("sales")).unwrap();
        assert_eq!(first.data.len(), 1);
        assert_eq!(first.url, "./sales.csv");
        assert!(manager.is_cached("sales"));

        let second = block_on(manager.load("sales")).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_concurrent_loads_coalesce() {
        let fetch = FakeFetch::with("./sales.csv", "a\n1\n");
        let calls = fetch.calls.clone();
        let manager = CsvManager::new(sources(), Rc::new(fetch), Rc::new(ErrorCollector::new()));

        let (a, b) = block_on(async { futures::join!(manager.load("sales"), manager.load("sales")) });
        assert!(Rc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(calls.get(), 1);
        assert!(!manager.is_loading("sales"));
    }

    #[test]
    fn test_load_failures_are_collected() {
        let collector = Rc::new(ErrorCollector::new());
        let manager = CsvManager::new(sources(), Rc::new(FakeFetch::default()), collector.clone());

        assert_eq!(block_on(manager.load("")), Err(CsvError::InvalidFileName));
        assert_eq!(
            block_on(manager.load("unknown")),
            Err(CsvError::SourceNotFound("unknown".into()))
        );
        let err = block_on(manager.load("missing")).unwrap_err();
        assert_eq!(err.to_string(), "File loading failed (missing): HTTP 404: Not Found");
        assert!(!manager.is_cached("missing"));

        let kinds: Vec<String> = collector.errors().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["INVALID_FILE_NAME", "DATA_SOURCE_NOT_FOUND", "CSV_LOAD_FAILED"]);
        assert_eq!(collector.errors()[1].details["availableConfigs"][0], "sales");
    }
}
