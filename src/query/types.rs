use std::cmp::Ordering;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::core::types::{doc_id, Document};
use crate::query::filter::{compare_values, Filter};
use crate::query::matcher::Predicate;

/// Sort order for query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// How `find_many` orders its results. The default orders by ascending
/// `_id`, i.e. insertion order across the collection.
pub enum Sort {
    ById,
    ByField { field: String, order: SortOrder },
    Comparator(Box<dyn Fn(&Document, &Document) -> Ordering>),
}

impl Sort {
    pub fn by_field(field: &str, order: SortOrder) -> Self {
        Sort::ByField {
            field: field.to_string(),
            order,
        }
    }

    pub fn apply(&self, docs: &mut [Document]) {
        match self {
            Sort::ById => {
                docs.sort_by_key(|d| doc_id(d).unwrap_or(0));
            }
            Sort::ByField { field, order } => {
                docs.sort_by(|a, b| {
                    let av = a.get(field).unwrap_or(&Value::Null);
                    let bv = b.get(field).unwrap_or(&Value::Null);
                    let ordering = compare_values(av, bv).unwrap_or(Ordering::Equal);
                    match order {
                        SortOrder::Asc => ordering,
                        SortOrder::Desc => ordering.reverse(),
                    }
                });
            }
            Sort::Comparator(cmp) => {
                docs.sort_by(|a, b| cmp(a, b));
            }
        }
    }
}

impl Default for Sort {
    fn default() -> Self {
        Sort::ById
    }
}

impl std::fmt::Debug for Sort {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Sort::ById => write!(f, "ById"),
            Sort::ByField { field, order } => {
                write!(f, "ByField {{ field: {:?}, order: {:?} }}", field, order)
            }
            Sort::Comparator(_) => write!(f, "Comparator(..)"),
        }
    }
}

/// Join rule: replace the reference stored under `field` with the
/// document in `collection` whose `_id` equals it.
#[derive(Debug, Clone)]
pub struct Populate {
    pub field: String,
    pub collection: String,
}

impl Populate {
    pub fn new(field: &str, collection: &str) -> Self {
        Populate {
            field: field.to_string(),
            collection: collection.to_string(),
        }
    }
}

/// Arguments shared by `find` and `find_many`.
#[derive(Default)]
pub struct FindQuery {
    pub index: Option<String>,          // Restrict the scan to one partition
    pub filter: Option<Filter>,
    pub predicate: Option<Predicate>,
    pub sort: Sort,                     // find_many only
    pub populate: Vec<Populate>,
}

impl FindQuery {
    pub fn new() -> Self {
        FindQuery::default()
    }

    pub fn with_filter(filter: Filter) -> Self {
        FindQuery {
            filter: Some(filter),
            ..FindQuery::default()
        }
    }

    pub fn with_filter_value(value: &Value) -> Self {
        Self::with_filter(Filter::from_value(value))
    }
}
