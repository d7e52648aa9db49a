//! Column filter predicates
//!
//! Every predicate fails closed: a null cell, an unparseable cell or an
//! unparseable bound rejects the row for that column. An empty filter value
//! accepts every row.

use crate::cell::{coerce_number, number_to_string, CellValue, Column, DataType, Row};
use crate::temporal::{
    extract_time_of_day, format_time_of_day, localized_date, parse_date_ms, parse_date_str,
    parse_hh_mm, parse_int_prefix, time_of_day_ms, TimeOfDay,
};
use indexmap::IndexMap;

/// Active filter values keyed by column `data_index`
pub type FilterState = IndexMap<String, String>;

const LEGACY_DATE_START: &str = "1900-01-01";
const LEGACY_DATE_END: &str = "2100-12-31";
const LEGACY_TIME_START: &str = "00:00";
const LEGACY_TIME_END: &str = "23:59";

/// Test one row against a column's filter value
pub fn matches(row: &Row, column: &Column, filter_value: &str) -> bool {
    if filter_value.is_empty() {
        return true;
    }
    let value = match row.get(&column.data_index) {
        Some(value) if !value.is_null() => value,
        _ => return false,
    };

    match column.data_type {
        DataType::Number => matches_number(value, filter_value),
        DataType::Date => matches_date(value, filter_value),
        DataType::Time => matches_time(value, filter_value),
        DataType::String => matches_text(value, filter_value),
    }
}

/// Case-insensitive substring test
pub fn matches_text(value: &CellValue, filter_value: &str) -> bool {
    value
        .as_text()
        .to_lowercase()
        .contains(&filter_value.to_lowercase())
}

/// `min-max` range (either side open) or substring match on the number's text
pub fn matches_number(value: &CellValue, filter_value: &str) -> bool {
    let number = value.to_number();
    if number.is_nan() {
        return false;
    }

    if filter_value.contains('-') {
        let mut parts = filter_value.split('-');
        let min = bound(parts.next(), f64::NEG_INFINITY);
        let max = bound(parts.next(), f64::INFINITY);
        // NaN bounds compare false on both sides
        number >= min && number <= max
    } else {
        number_to_string(number).contains(filter_value)
    }
}

fn bound(part: Option<&str>, open: f64) -> f64 {
    match part {
        Some(s) if !s.is_empty() => coerce_number(s),
        _ => open,
    }
}

/// Epoch range `start,end`, legacy `start~end` calendar range, or localized substring
pub fn matches_date(value: &CellValue, filter_value: &str) -> bool {
    let Some(cell_ms) = parse_date_ms(value) else {
        return false;
    };

    if let Some(result) = match_epoch_range(cell_ms, filter_value) {
        return result;
    }

    if let Some((start, end)) = filter_value.split_once('~') {
        let end = end.split('~').next().unwrap_or_default();
        let start = parse_date_str(if start.is_empty() { LEGACY_DATE_START } else { start });
        let end = parse_date_str(if end.is_empty() { LEGACY_DATE_END } else { end });
        return match (start, end) {
            (Some(start), Some(end)) => cell_ms >= start && cell_ms <= end,
            _ => false,
        };
    }

    localized_date(cell_ms).is_some_and(|d| d.contains(filter_value))
        || value.as_text().contains(filter_value)
}

/// Epoch range on the normalized time of day, legacy `HH:mm~HH:mm`, or `HH:mm` substring
pub fn matches_time(value: &CellValue, filter_value: &str) -> bool {
    let cell_ms = match extract_time_of_day(value) {
        TimeOfDay::Valid(ms) => ms,
        TimeOfDay::Invalid | TimeOfDay::Missing => return false,
    };

    if let Some(result) = match_epoch_range(cell_ms, filter_value) {
        return result;
    }

    if let Some((start, end)) = filter_value.split_once('~') {
        let end = end.split('~').next().unwrap_or_default();
        let start = legacy_time(start, LEGACY_TIME_START);
        // End bound covers the whole final minute
        let end = legacy_time(end, LEGACY_TIME_END).map(|ms| ms + 59_000);
        return match (start, end) {
            (Some(start), Some(end)) => cell_ms >= start && cell_ms <= end,
            _ => false,
        };
    }

    format_time_of_day(cell_ms).contains(filter_value)
}

fn legacy_time(s: &str, default: &str) -> Option<i64> {
    let s = if s.is_empty() { default } else { s };
    let (h, m) = parse_hh_mm(s)?;
    time_of_day_ms(h, m)
}

/// `Some(result)` when the filter is a comma range with at least one bound
fn match_epoch_range(cell_ms: i64, filter_value: &str) -> Option<bool> {
    let (start, end) = filter_value.split_once(',')?;
    let end = end.split(',').next().unwrap_or_default();
    match (start.is_empty(), end.is_empty()) {
        (true, true) => None,
        (false, true) => Some(parse_int_prefix(start).is_some_and(|s| cell_ms >= s)),
        (true, false) => Some(parse_int_prefix(end).is_some_and(|e| cell_ms <= e)),
        (false, false) => Some(match (parse_int_prefix(start), parse_int_prefix(end)) {
            (Some(s), Some(e)) => cell_ms >= s && cell_ms <= e,
            _ => false,
        }),
    }
}

/// Indices of `rows` passing every active filter (AND across columns)
///
/// Filters on columns that are not in `columns` are ignored.
pub fn apply_filters(rows: &[Row], filters: &FilterState, columns: &[Column]) -> Vec<usize> {
    let active: Vec<(&Column, &str)> = filters
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .filter_map(|(key, value)| {
            columns
                .iter()
                .find(|c| &c.data_index == key)
                .map(|c| (c, value.as_str()))
        })
        .collect();

    rows.iter()
        .enumerate()
        .filter(|(_, row)| active.iter().all(|(column, value)| matches(row, column, value)))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::date_start_ms;
    use chrono::NaiveDate;

    fn row(key: &str, value: CellValue) -> Row {
        let mut row = Row::new();
        row.insert(key.to_string(), value);
        row
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let col = Column::new("n", DataType::Number);
        for value in [CellValue::Null, CellValue::from("x"), CellValue::Number(3.0)] {
            assert!(matches(&row("n", value), &col, ""));
        }
    }

    #[test]
    fn test_null_and_missing_cells_fail_closed() {
        let col = Column::new("s", DataType::String);
        assert!(!matches(&row("s", CellValue::Null), &col, "a"));
        assert!(!matches(&row("other", CellValue::from("a")), &col, "a"));
    }

    #[test]
    fn test_string_filter() {
        let col = Column::new("s", DataType::String);
        assert!(matches(&row("s", CellValue::from("Hello World")), &col, "wOrLd"));
        assert!(!matches(&row("s", CellValue::from("Hello")), &col, "bye"));
        assert!(matches(&row("s", CellValue::Number(42.0)), &col, "4"));
    }

    #[test]
    fn test_number_range_and_substring() {
        let col = Column::new("n", DataType::Number);
        let n = |v: f64| row("n", CellValue::Number(v));
        assert!(matches(&n(15.0), &col, "10-20"));
        assert!(!matches(&n(25.0), &col, "10-20"));
        assert!(matches(&n(10.0), &col, "10-20"));
        assert!(matches(&n(1000.0), &col, "10-"));
        assert!(matches(&n(-50.0), &col, "-20"));
        assert!(!matches(&n(21.0), &col, "-20"));
        assert!(matches(&row("n", CellValue::from("150")), &col, "15"));
        assert!(matches(&n(150.0), &col, "15"));
        assert!(!matches(&n(16.0), &col, "15"));
        assert!(!matches(&row("n", CellValue::from("abc")), &col, "1"));
        assert!(!matches(&n(5.0), &col, "x-10"));
    }

    #[test]
    fn test_date_filters() {
        let col = Column::new("d", DataType::Date);
        let d = row("d", CellValue::from("2024-03-15"));
        let day = |y, m, d| date_start_ms(NaiveDate::from_ymd_opt(y, m, d).unwrap());

        let inside = format!("{},{}", day(2024, 3, 1), day(2024, 3, 31));
        let outside = format!("{},{}", day(2024, 4, 1), day(2024, 4, 30));
        assert!(matches(&d, &col, &inside));
        assert!(!matches(&d, &col, &outside));
        assert!(matches(&d, &col, &format!("{},", day(2024, 3, 15))));
        assert!(!matches(&d, &col, &format!(",{}", day(2024, 3, 14))));
        assert!(!matches(&d, &col, "abc,def"));

        assert!(matches(&d, &col, "2024-03-01~2024-03-31"));
        assert!(matches(&d, &col, "~2024-12-31"));
        assert!(!matches(&d, &col, "2024-04-01~"));

        assert!(matches(&d, &col, "3/15/2024"));
        assert!(matches(&d, &col, "2024-03"));
        assert!(!matches(&row("d", CellValue::from("someday")), &col, "2024"));
    }

    #[test]
    fn test_time_filters() {
        let col = Column::new("t", DataType::Time);
        let t = row("t", CellValue::from("2024-03-15 09:30:00"));
        let at = |h, m| time_of_day_ms(h, m).unwrap();

        assert!(matches(&t, &col, &format!("{},{}", at(9, 0), at(10, 0))));
        assert!(!matches(&t, &col, &format!("{},{}", at(10, 0), at(11, 0))));
        assert!(matches(&t, &col, &format!(",{}", at(9, 30))));

        assert!(matches(&t, &col, "09:00~09:30"));
        assert!(matches(&t, &col, "~"));
        assert!(!matches(&t, &col, "10:00~"));
        assert!(!matches(&t, &col, "9:00~10:00"));

        assert!(matches(&t, &col, "09:3"));
        assert!(!matches(&row("t", CellValue::from("25:99")), &col, "2"));
        assert!(!matches(&row("t", CellValue::from("all day")), &col, "a"));
    }

    #[test]
    fn test_apply_filters_combines_with_and() {
        let columns = vec![Column::new("n", DataType::Number), Column::new("s", DataType::String)];
        let rows: Vec<Row> = serde_json::from_str(
            r#"[{"n":5,"s":"apple"},{"n":15,"s":"banana"},{"n":15,"s":"apricot"},{"n":null,"s":"avocado"}]"#,
        )
        .unwrap();

        let mut filters = FilterState::new();
        filters.insert("n".into(), "10-20".into());
        filters.insert("s".into(), "AP".into());
        filters.insert("unknown".into(), "zzz".into());
        assert_eq!(apply_filters(&rows, &filters, &columns), vec![2]);

        filters.insert("n".into(), String::new());
        assert_eq!(apply_filters(&rows, &filters, &columns), vec![0, 2]);
    }
}
