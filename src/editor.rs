//! Filter editor fields and their filter-value encodings
//!
//! The popup edits a column's filter through typed fields; these codecs turn
//! a stored filter value into fields and back again.

use crate::cell::DataType;
use crate::temporal::{
    date_of_ms, date_start_ms, format_time_of_day, parse_hh_mm, parse_int_prefix,
    parse_yyyy_mm_dd, time_of_day_ms,
};
use serde::{Deserialize, Serialize};

const MS_END_OF_DAY: i64 = 86_399_000;
const MS_END_OF_MINUTE: i64 = 59_000;

/// Start/end pair of a range editor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeFields {
    pub start: String,
    pub end: String,
}

impl RangeFields {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeField {
    Start,
    End,
}

/// Editor content for one column, chosen by data type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilterEditor {
    Text { value: String },
    Number(RangeFields),
    Date(RangeFields),
    Time(RangeFields),
}

impl FilterEditor {
    pub fn for_column(data_type: DataType, value: &str) -> Self {
        match data_type {
            DataType::String => Self::Text {
                value: value.to_string(),
            },
            DataType::Number => Self::Number(parse_number_filter(value)),
            DataType::Date => Self::Date(parse_date_filter(value)),
            DataType::Time => Self::Time(parse_time_filter(value)),
        }
    }

    /// Update one field and return the filter value it encodes
    ///
    /// Text editors ignore `field` and take `value` whole.
    pub fn set_field(&mut self, field: RangeField, value: &str) -> String {
        let fields = match self {
            Self::Text { value: text } => {
                *text = value.to_string();
                return text.clone();
            }
            Self::Number(fields) | Self::Date(fields) | Self::Time(fields) => fields,
        };
        match field {
            RangeField::Start => fields.start = value.to_string(),
            RangeField::End => fields.end = value.to_string(),
        }
        self.filter_value()
    }

    /// Filter value encoded by the current fields
    pub fn filter_value(&self) -> String {
        match self {
            Self::Text { value } => value.clone(),
            Self::Number(fields) => build_number_filter(fields),
            Self::Date(fields) => build_date_filter(fields),
            Self::Time(fields) => build_time_filter(fields),
        }
    }

    /// Fields as shown in the inputs; invalid dates and times show empty
    pub fn display_fields(&self) -> RangeFields {
        match self {
            Self::Text { value } => RangeFields::new(value, ""),
            Self::Number(fields) => fields.clone(),
            Self::Date(fields) => RangeFields::new(display_date(&fields.start), display_date(&fields.end)),
            Self::Time(fields) => RangeFields::new(display_time(&fields.start), display_time(&fields.end)),
        }
    }
}

pub fn parse_number_filter(value: &str) -> RangeFields {
    if value.contains('-') {
        let mut parts = value.split('-');
        let min = parts.next().unwrap_or_default();
        let max = parts.next().unwrap_or_default();
        RangeFields::new(min, max)
    } else {
        RangeFields::new(value, "")
    }
}

pub fn build_number_filter(fields: &RangeFields) -> String {
    match (fields.start.is_empty(), fields.end.is_empty()) {
        (false, false) => format!("{}-{}", fields.start, fields.end),
        (false, true) => fields.start.clone(),
        (true, false) => format!("-{}", fields.end),
        (true, true) => String::new(),
    }
}

/// Split a stored range into fields, rendering epoch bounds with `render`
fn parse_range(value: &str, render: impl Fn(i64) -> Option<String>) -> RangeFields {
    if let Some((start, end)) = value.split_once(',') {
        let end = end.split(',').next().unwrap_or_default();
        let field = |s: &str| parse_int_prefix(s).and_then(&render).unwrap_or_default();
        return RangeFields {
            start: field(start),
            end: field(end),
        };
    }
    if let Some((start, end)) = value.split_once('~') {
        let end = end.split('~').next().unwrap_or_default();
        return RangeFields::new(start, end);
    }
    RangeFields::new(value, "")
}

/// Join epoch bounds, keeping the comma for one-sided ranges
fn build_range(start: Option<i64>, end: Option<i64>) -> String {
    match (start, end) {
        (Some(s), Some(e)) => format!("{},{}", s, e),
        (Some(s), None) => format!("{},", s),
        (None, Some(e)) => format!(",{}", e),
        (None, None) => String::new(),
    }
}

pub fn parse_date_filter(value: &str) -> RangeFields {
    parse_range(value, |ms| date_of_ms(ms).map(|d| d.format("%Y-%m-%d").to_string()))
}

/// Start of the start day through the last second of the end day
pub fn build_date_filter(fields: &RangeFields) -> String {
    let start = parse_yyyy_mm_dd(&fields.start).map(date_start_ms);
    let end = parse_yyyy_mm_dd(&fields.end).map(|d| date_start_ms(d) + MS_END_OF_DAY);
    build_range(start, end)
}

pub fn parse_time_filter(value: &str) -> RangeFields {
    parse_range(value, |ms| Some(format_time_of_day(ms)))
}

/// Start of the start minute through the last second of the end minute
pub fn build_time_filter(fields: &RangeFields) -> String {
    let epoch = |s: &str| parse_hh_mm(s).and_then(|(h, m)| time_of_day_ms(h, m));
    let start = epoch(&fields.start);
    let end = epoch(&fields.end).map(|ms| ms + MS_END_OF_MINUTE);
    build_range(start, end)
}

pub fn display_date(field: &str) -> &str {
    if parse_yyyy_mm_dd(field).is_some() {
        field
    } else {
        ""
    }
}

pub fn display_time(field: &str) -> &str {
    if parse_hh_mm(field).is_some() {
        field
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellValue, Column, Row};
    use crate::filter::matches;

    #[test]
    fn test_number_fields() {
        assert_eq!(parse_number_filter("10-20"), RangeFields::new("10", "20"));
        assert_eq!(parse_number_filter("-20"), RangeFields::new("", "20"));
        assert_eq!(parse_number_filter("15"), RangeFields::new("15", ""));
        assert_eq!(parse_number_filter(""), RangeFields::default());

        assert_eq!(build_number_filter(&RangeFields::new("10", "20")), "10-20");
        assert_eq!(build_number_filter(&RangeFields::new("10", "")), "10");
        assert_eq!(build_number_filter(&RangeFields::new("", "20")), "-20");
        assert_eq!(build_number_filter(&RangeFields::default()), "");
    }

    #[test]
    fn test_date_fields_cover_whole_end_day() {
        let value = build_date_filter(&RangeFields::new("2024-03-01", "2024-03-31"));
        assert_eq!(parse_date_filter(&value), RangeFields::new("2024-03-01", "2024-03-31"));

        let col = Column::new("d", DataType::Date);
        let mut row = Row::new();
        row.insert("d".into(), CellValue::from("2024-03-31 18:00:00"));
        assert!(matches(&row, &col, &value));

        assert!(build_date_filter(&RangeFields::new("", "2024-03-31")).starts_with(','));
        assert!(build_date_filter(&RangeFields::new("2024-03-01", "")).ends_with(','));
        assert_eq!(build_date_filter(&RangeFields::new("2024-02-30", "")), "");
        assert_eq!(parse_date_filter("2024-01-01~"), RangeFields::new("2024-01-01", ""));
    }

    #[test]
    fn test_time_fields() {
        let value = build_time_filter(&RangeFields::new("09:00", "17:30"));
        assert_eq!(value, format!("{},{}", 9 * 3_600_000, (17 * 60 + 30) * 60_000 + 59_000));
        assert_eq!(parse_time_filter(&value), RangeFields::new("09:00", "17:30"));
        assert_eq!(parse_time_filter("x,"), RangeFields::default());
    }

    #[test]
    fn test_editor_state() {
        let mut editor = FilterEditor::for_column(DataType::Number, "");
        assert_eq!(editor.set_field(RangeField::End, "50"), "-50");
        assert_eq!(editor.set_field(RangeField::Start, "5"), "5-50");

        let mut editor = FilterEditor::for_column(DataType::String, "abc");
        assert_eq!(editor.set_field(RangeField::Start, "abcd"), "abcd");

        let editor = FilterEditor::for_column(DataType::Time, "9:00~25:00");
        assert_eq!(editor.display_fields(), RangeFields::default());
    }
}
