//! Column sort comparator and the three-state sort cycle

use crate::cell::{CellValue, Column, DataType, Row};
use crate::temporal::{extract_time_of_day, parse_date_ms, TimeOfDay};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

/// Current sort column and direction; both unset means source order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortState {
    pub column: Option<String>,
    pub direction: Option<SortDirection>,
}

impl SortState {
    /// Advance the cycle unsorted -> asc -> desc -> unsorted for `column`
    ///
    /// Clicking a different column starts again at ascending. Returns `false`
    /// when the column is not sortable and nothing changed.
    pub fn toggle(&mut self, column: &Column) -> bool {
        if !column.sortable {
            return false;
        }
        let same = self.column.as_deref() == Some(column.data_index.as_str());
        *self = match (same, self.direction) {
            (true, Some(SortDirection::Asc)) => Self::sorted(&column.data_index, SortDirection::Desc),
            (true, Some(SortDirection::Desc)) => Self::default(),
            _ => Self::sorted(&column.data_index, SortDirection::Asc),
        };
        true
    }

    fn sorted(data_index: &str, direction: SortDirection) -> Self {
        Self {
            column: Some(data_index.to_string()),
            direction: Some(direction),
        }
    }

    pub fn is_sorted_by(&self, data_index: &str) -> bool {
        self.direction.is_some() && self.column.as_deref() == Some(data_index)
    }
}

/// Compare two cells of `column`
///
/// Nulls order before values and the direction flips the whole result, so
/// descending puts nulls last. NaN comparisons collapse to equal.
pub fn compare(a: &CellValue, b: &CellValue, column: &Column, direction: SortDirection) -> Ordering {
    let ordering = match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_values(a, b, column.data_type),
    };
    direction.apply(ordering)
}

fn compare_values(a: &CellValue, b: &CellValue, data_type: DataType) -> Ordering {
    match data_type {
        DataType::Number => compare_f64(a.to_number(), b.to_number()),
        DataType::Date => match (parse_date_ms(a), parse_date_ms(b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => Ordering::Equal,
        },
        DataType::Time => compare_f64(time_sort_key(a), time_sort_key(b)),
        DataType::String => locale_compare(&a.as_text(), &b.as_text()),
    }
}

fn compare_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Unrecognizable times sort as midnight, out-of-range ones do not compare
fn time_sort_key(value: &CellValue) -> f64 {
    match extract_time_of_day(value) {
        TimeOfDay::Valid(ms) => ms as f64,
        TimeOfDay::Invalid => f64::NAN,
        TimeOfDay::Missing => 0.0,
    }
}

/// Case-insensitive collation with lowercase ahead of uppercase on ties
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| b.cmp(a))
}

/// Stable sort of row indices by `column`
pub fn sort_indices(indices: &mut [usize], rows: &[Row], column: &Column, direction: SortDirection) {
    let null = CellValue::Null;
    let cell = |i: usize| rows[i].get(&column.data_index).unwrap_or(&null);
    merge_sort_by(indices, |&a, &b| compare(cell(a), cell(b), column, direction));
}

/// Bottom-up stable merge sort
///
/// NaN ties make the comparator a partial order, which `slice::sort_by` is
/// allowed to reject with a panic. Merging only ever moves an element ahead
/// of its left neighbours on a strict `Less`, so ties keep source order.
fn merge_sort_by<T: Copy>(items: &mut [T], mut compare: impl FnMut(&T, &T) -> Ordering) {
    let len = items.len();
    if len < 2 {
        return;
    }
    let mut buf = items.to_vec();
    let mut width = 1;
    while width < len {
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                if compare(&items[j], &items[i]) == Ordering::Less {
                    buf[k] = items[j];
                    j += 1;
                } else {
                    buf[k] = items[i];
                    i += 1;
                }
                k += 1;
            }
            buf[k..k + (mid - i)].copy_from_slice(&items[i..mid]);
            k += mid - i;
            buf[k..k + (end - j)].copy_from_slice(&items[j..end]);
            start = end;
        }
        items.copy_from_slice(&buf);
        width *= 2;
    }
}
