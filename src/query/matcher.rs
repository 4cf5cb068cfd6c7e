use std::cmp::Ordering;
use regex::Regex;
use serde_json::Value;
use crate::core::error::Result;
use crate::core::types::Document;
use crate::query::filter::{compare_values, values_equal, Clause, Filter, FilterOp};

/// User-supplied predicate applied after every field clause.
pub type Predicate = Box<dyn Fn(&Document) -> bool>;

enum CompiledClause {
    Equals(Value),
    Ops(Vec<CompiledOp>),
}

enum CompiledOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    // None when the target was not a sequence; neither operator holds then.
    In(Option<Vec<Value>>),
    Nin(Option<Vec<Value>>),
    Regex(Regex),
}

/// Compiled form of a filter plus an optional user predicate. Regexes
/// are built once here so a scan pays no per-document compilation.
pub struct DocumentMatcher {
    clauses: Vec<(String, CompiledClause)>,
    predicate: Option<Predicate>,
}

impl DocumentMatcher {
    pub fn new(filter: Option<&Filter>, predicate: Option<Predicate>) -> Result<Self> {
        let mut clauses = Vec::new();
        if let Some(filter) = filter {
            for (field, clause) in &filter.clauses {
                clauses.push((field.clone(), compile_clause(clause)?));
            }
        }
        Ok(DocumentMatcher { clauses, predicate })
    }

    /// Everything matches when no filter and no predicate were given.
    pub fn matches(&self, doc: &Document) -> bool {
        for (field, clause) in &self.clauses {
            let value = doc.get(field).unwrap_or(&Value::Null);
            let matched = match clause {
                CompiledClause::Equals(target) => values_equal(value, target),
                CompiledClause::Ops(ops) => ops.iter().all(|op| self.matches_op(value, op)),
            };
            if !matched {
                return false;
            }
        }
        match &self.predicate {
            Some(predicate) => predicate(doc),
            None => true,
        }
    }

    fn matches_op(&self, value: &Value, op: &CompiledOp) -> bool {
        match op {
            CompiledOp::Eq(target) => values_equal(value, target),
            CompiledOp::Ne(target) => !values_equal(value, target),
            CompiledOp::Gt(target) => {
                compare_values(value, target) == Some(Ordering::Greater)
            }
            CompiledOp::Gte(target) => matches!(
                compare_values(value, target),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            CompiledOp::Lt(target) => {
                compare_values(value, target) == Some(Ordering::Less)
            }
            CompiledOp::Lte(target) => matches!(
                compare_values(value, target),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            CompiledOp::In(targets) => targets
                .as_ref()
                .map_or(false, |targets| targets.iter().any(|t| values_equal(value, t))),
            CompiledOp::Nin(targets) => targets
                .as_ref()
                .map_or(false, |targets| !targets.iter().any(|t| values_equal(value, t))),
            CompiledOp::Regex(regex) => match value {
                Value::String(s) => regex.is_match(s),
                _ => false,
            },
        }
    }
}

fn compile_clause(clause: &Clause) -> Result<CompiledClause> {
    match clause {
        Clause::Equals(value) => Ok(CompiledClause::Equals(value.clone())),
        Clause::Ops(ops) => {
            let mut compiled = Vec::with_capacity(ops.len());
            for (op, target) in ops {
                compiled.push(compile_op(*op, target)?);
            }
            Ok(CompiledClause::Ops(compiled))
        }
    }
}

fn compile_op(op: FilterOp, target: &Value) -> Result<CompiledOp> {
    Ok(match op {
        FilterOp::Eq => CompiledOp::Eq(target.clone()),
        FilterOp::Ne => CompiledOp::Ne(target.clone()),
        FilterOp::Gt => CompiledOp::Gt(target.clone()),
        FilterOp::Gte => CompiledOp::Gte(target.clone()),
        FilterOp::Lt => CompiledOp::Lt(target.clone()),
        FilterOp::Lte => CompiledOp::Lte(target.clone()),
        FilterOp::In => CompiledOp::In(sequence_targets(target)),
        FilterOp::Nin => CompiledOp::Nin(sequence_targets(target)),
        FilterOp::Regex => {
            let pattern = match target {
                Value::String(p) => p.as_str(),
                _ => "",
            };
            CompiledOp::Regex(Regex::new(pattern)?)
        }
    })
}

fn sequence_targets(target: &Value) -> Option<Vec<Value>> {
    match target {
        Value::Array(items) => Some(items.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    fn matches(filter: Value, document: Value) -> bool {
        let filter = Filter::from_value(&filter);
        let matcher = DocumentMatcher::new(Some(&filter), None).unwrap();
        matcher.matches(&doc(document))
    }

    #[test]
    fn literal_clause_is_strict_equality() {
        assert!(matches(json!({"name": "Ann"}), json!({"name": "Ann"})));
        assert!(!matches(json!({"name": "Ann"}), json!({"name": "ann"})));
        assert!(!matches(json!({"name": "Ann"}), json!({"age": 3})));
    }

    #[test]
    fn numeric_literals_compare_across_representations() {
        assert!(matches(json!({"age": 24}), json!({"age": 24.0})));
    }

    #[test]
    fn comparison_operators() {
        assert!(matches(json!({"price": {"$gt": 8}}), json!({"price": 10})));
        assert!(!matches(json!({"price": {"$gt": 8}}), json!({"price": 8})));
        assert!(matches(json!({"price": {"$gte": 8}}), json!({"price": 8})));
        assert!(matches(json!({"price": {"$lt": 8}}), json!({"price": 3})));
        assert!(matches(json!({"price": {"$lte": 3}}), json!({"price": 3})));
        assert!(matches(json!({"price": {"$ne": 4}}), json!({"price": 3})));
    }

    #[test]
    fn operators_in_one_object_all_must_hold() {
        let filter = json!({"price": {"$gt": 4, "$lt": 11}});
        assert!(matches(filter.clone(), json!({"price": 10})));
        assert!(!matches(filter, json!({"price": 20})));
    }

    #[test]
    fn in_and_nin_operators() {
        assert!(matches(
            json!({"category": {"$in": ["fruit"]}}),
            json!({"category": "fruit"})
        ));
        assert!(!matches(
            json!({"category": {"$nin": ["fruit"]}}),
            json!({"category": "fruit"})
        ));
        // Both operators require a sequence target to hold at all.
        assert!(!matches(json!({"category": {"$in": "fruit"}}), json!({"category": "fruit"})));
        assert!(!matches(json!({"category": {"$nin": "fruit"}}), json!({"category": "fruit"})));
    }

    #[test]
    fn regex_matches_strings_only() {
        assert!(matches(json!({"name": {"$regex": "^C"}}), json!({"name": "Carrot"})));
        assert!(!matches(json!({"name": {"$regex": "^C"}}), json!({"name": "Apple"})));
        assert!(!matches(json!({"name": {"$regex": "^1"}}), json!({"name": 10})));
    }

    #[test]
    fn unknown_operator_falls_back_to_deep_equality() {
        let filter = json!({"meta": {"$eq": 1, "note": "x"}});
        assert!(matches(filter.clone(), json!({"meta": {"$eq": 1, "note": "x"}})));
        assert!(!matches(filter, json!({"meta": 1})));
    }

    #[test]
    fn user_predicate_narrows_results() {
        let filter = Filter::from_value(&json!({"kind": "a"}));
        let predicate: Predicate =
            Box::new(|d| d.get("n").and_then(Value::as_u64).unwrap_or(0) > 5);
        let matcher = DocumentMatcher::new(Some(&filter), Some(predicate)).unwrap();
        assert!(matcher.matches(&doc(json!({"kind": "a", "n": 9}))));
        assert!(!matcher.matches(&doc(json!({"kind": "a", "n": 2}))));
    }

    #[test]
    fn invalid_regex_is_a_validation_error() {
        let filter = Filter::from_value(&json!({"name": {"$regex": "("}}));
        assert!(DocumentMatcher::new(Some(&filter), None).is_err());
    }
}
