//! Filter, sort and paginate over an in-memory dataset.
//!
//! Knows nothing about specific datasets: predicates and sort keys name
//! record fields, derived classification labels included once annotated.

use std::cmp::Ordering;

use serde_json::Value;

use crate::models::{value_as_number, MetricRecord};

/// Case-insensitive substring search over a set of fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub query: String,
    pub fields: Vec<String>,
}

impl SearchFilter {
    fn is_active(&self) -> bool {
        !self.query.trim().is_empty()
    }

    fn matches(&self, record: &MetricRecord) -> bool {
        let needle = self.query.trim().to_lowercase();
        self.fields
            .iter()
            .any(|field| record.text(field).to_lowercase().contains(&needle))
    }
}

/// Inclusive numeric bounds; missing values count as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub field: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RangeFilter {
    fn is_active(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    fn matches(&self, record: &MetricRecord) -> bool {
        let value = record.number(&self.field);
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Exact match on a categorical field; `None` means "all".
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryFilter {
    pub field: String,
    pub value: Option<String>,
}

impl CategoryFilter {
    fn matches(&self, record: &MetricRecord) -> bool {
        match &self.value {
            Some(expected) => record.text(&self.field) == *expected,
            None => true,
        }
    }
}

/// Independently toggled predicates, combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    pub search: Option<SearchFilter>,
    pub ranges: Vec<RangeFilter>,
    pub categories: Vec<CategoryFilter>,
}

impl Filters {
    pub fn matches(&self, record: &MetricRecord) -> bool {
        let search_ok = self
            .search
            .as_ref()
            .filter(|s| s.is_active())
            .map_or(true, |s| s.matches(record));
        search_ok
            && self
                .ranges
                .iter()
                .filter(|r| r.is_active())
                .all(|r| r.matches(record))
            && self.categories.iter().all(|c| c.matches(record))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Presentation state consumed by [`run`]. Any filter or sort change sends
/// the view back to page 1; a page index left stale by later data changes
/// is not clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    filters: Filters,
    sort: Option<SortSpec>,
    page_index: usize,
    page_size: usize,
}

impl ViewState {
    pub fn new(page_size: usize) -> Self {
        Self {
            filters: Filters::default(),
            sort: None,
            page_index: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn set_search<I, S>(&mut self, query: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.search = Some(SearchFilter {
            query: query.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self.page_index = 1;
    }

    /// Sets or replaces the range on `field`; both bounds `None` disables it.
    pub fn set_range(&mut self, field: &str, min: Option<f64>, max: Option<f64>) {
        match self.filters.ranges.iter_mut().find(|r| r.field == field) {
            Some(range) => {
                range.min = min;
                range.max = max;
            }
            None => self.filters.ranges.push(RangeFilter {
                field: field.to_string(),
                min,
                max,
            }),
        }
        self.page_index = 1;
    }

    pub fn set_category(&mut self, field: &str, value: Option<String>) {
        match self.filters.categories.iter_mut().find(|c| c.field == field) {
            Some(category) => category.value = value,
            None => self.filters.categories.push(CategoryFilter {
                field: field.to_string(),
                value,
            }),
        }
        self.page_index = 1;
    }

    pub fn clear_filters(&mut self) {
        self.filters = Filters::default();
        self.page_index = 1;
    }

    pub fn set_sort(&mut self, field: &str, direction: SortDirection) {
        self.sort = Some(SortSpec {
            field: field.to_string(),
            direction,
        });
        self.page_index = 1;
    }

    /// Column-header behaviour: the active field flips direction, a new
    /// field starts descending.
    pub fn toggle_sort(&mut self, field: &str) {
        let direction = match &self.sort {
            Some(current) if current.field == field => current.direction.flipped(),
            _ => SortDirection::Desc,
        };
        self.set_sort(field, direction);
    }

    pub fn set_page(&mut self, page_index: usize) {
        self.page_index = page_index;
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.page_index = 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub page: Vec<MetricRecord>,
    pub filtered_count: usize,
    pub total_pages: usize,
}

pub fn filter_records<'a>(records: &'a [MetricRecord], filters: &Filters) -> Vec<&'a MetricRecord> {
    records.iter().filter(|r| filters.matches(r)).collect()
}

/// Sort key ranked by kind: every number sorts before every piece of text.
/// Missing, null and blank-string values count as the number 0, so a column
/// mixing numbers and blanks still orders consistently.
#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Number(f64),
    Text(String),
}

impl SortKey {
    fn of(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => SortKey::Number(0.0),
            Some(Value::String(s)) if s.trim().is_empty() => SortKey::Number(0.0),
            Some(v) => match value_as_number(v) {
                Some(n) => SortKey::Number(n),
                None => match v {
                    Value::String(s) => SortKey::Text(s.to_lowercase()),
                    other => SortKey::Text(other.to_string().to_lowercase()),
                },
            },
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Number(x), SortKey::Number(y)) => x.total_cmp(y),
            (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
            (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
            (SortKey::Text(x), SortKey::Text(y)) => x.cmp(y),
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    SortKey::of(a).compare(&SortKey::of(b))
}

/// Stable sort: records with equal keys keep their relative order in
/// either direction.
pub fn sort_records(rows: &mut [&MetricRecord], sort: &SortSpec) {
    rows.sort_by(|a, b| {
        let ord = compare_values(a.get(&sort.field), b.get(&sort.field));
        match sort.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

/// Filtered and sorted records, unpaged; this is what export consumes.
pub fn filter_and_sort<'a>(records: &'a [MetricRecord], view: &ViewState) -> Vec<&'a MetricRecord> {
    let mut rows = filter_records(records, &view.filters);
    if let Some(sort) = &view.sort {
        sort_records(&mut rows, sort);
    }
    rows
}

pub fn paginate(rows: &[&MetricRecord], page_index: usize, page_size: usize) -> PageResult {
    let page_size = page_size.max(1);
    let filtered_count = rows.len();
    let total_pages = filtered_count.div_ceil(page_size);
    let page = match page_index.checked_sub(1) {
        Some(zero_based) => rows
            .iter()
            .skip(zero_based.saturating_mul(page_size))
            .take(page_size)
            .map(|r| (*r).clone())
            .collect(),
        None => Vec::new(),
    };
    PageResult {
        page,
        filtered_count,
        total_pages,
    }
}

pub fn run(records: &[MetricRecord], view: &ViewState) -> PageResult {
    let rows = filter_and_sort(records, view);
    paginate(&rows, view.page_index, view.page_size)
}
