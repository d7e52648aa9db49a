//! Cell values, rows and column descriptors for table cards

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

/// A raw value inside a table row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "serde_json::Value")]
pub enum CellValue {
    Null,
    Number(f64),
    Text(String),
}

impl From<serde_json::Value> for CellValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Bool(b) => Self::Text(b.to_string()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// String coercion used by text matching (integers print without a fraction)
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Null => Cow::Borrowed(""),
            Self::Text(s) => Cow::Borrowed(s.as_str()),
            Self::Number(n) => Cow::Owned(number_to_string(*n)),
        }
    }

    /// Numeric coercion; blank text is zero, anything unparseable is NaN
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Number(n) => *n,
            Self::Text(s) => coerce_number(s),
        }
    }

    /// Get the display string for this value
    pub fn display(&self) -> String {
        self.as_text().into_owned()
    }
}

impl Default for CellValue {
    fn default() -> Self {
        Self::Null
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Lenient number coercion for filter bounds and text cells
///
/// Follows JavaScript `Number()`: blank is 0, `Infinity` is spelled out and
/// case-sensitive, `0x`/`0o`/`0b` literals are integers, anything else is NaN.
pub fn coerce_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let radix = match trimmed.get(..2) {
        Some("0x" | "0X") => Some(16),
        Some("0o" | "0O") => Some(8),
        Some("0b" | "0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return u64::from_str_radix(&trimmed[2..], radix).map_or(f64::NAN, |n| n as f64);
    }
    let numeric = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if !numeric {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Shortest round-trip rendering of a number, integers without ".0"
pub fn number_to_string(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// One table row: field name to raw value, in source column order
pub type Row = IndexMap<String, CellValue>;

/// Determines filter and sort semantics for a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum DataType {
    #[default]
    String,
    Number,
    Date,
    Time,
}

impl From<String> for DataType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "number" => Self::Number,
            "date" => Self::Date,
            "time" => Self::Time,
            _ => Self::String,
        }
    }
}

/// Display transform applied to a cell before rendering
#[derive(Clone)]
pub struct Formatter(Rc<dyn Fn(&CellValue) -> String>);

impl Formatter {
    pub fn new(f: impl Fn(&CellValue) -> String + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn apply(&self, value: &CellValue) -> String {
        (self.0)(value)
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Formatter(..)")
    }
}

/// Column descriptor of a table card
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub data_index: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip)]
    pub formatter: Option<Formatter>,
}

impl Column {
    pub fn new(data_index: &str, data_type: DataType) -> Self {
        Self {
            data_index: data_index.to_string(),
            title: data_index.to_string(),
            data_type,
            sortable: true,
            filterable: true,
            width: None,
            formatter: None,
        }
    }

    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Render a cell of this column for display
    pub fn format(&self, value: &CellValue) -> String {
        match &self.formatter {
            Some(formatter) => formatter.apply(value),
            None => value.display(),
        }
    }
}

/// Payload of a table card: `{ columns, data }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableData {
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub data: Vec<Row>,
}

impl TableData {
    /// Accepts a card payload; anything without both keys is treated as empty
    pub fn from_payload(value: &serde_json::Value) -> Self {
        let has_shape = value.get("columns").is_some_and(|c| c.is_array())
            && value.get("data").is_some_and(|d| d.is_array());
        if !has_shape {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn column(&self, data_index: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.data_index == data_index)
    }
}
