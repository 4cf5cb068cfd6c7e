use serde_json::Value;

/// Field-level comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Regex,
}

impl FilterOp {
    pub fn from_key(key: &str) -> Option<FilterOp> {
        match key {
            "$eq" => Some(FilterOp::Eq),
            "$ne" => Some(FilterOp::Ne),
            "$gt" => Some(FilterOp::Gt),
            "$gte" => Some(FilterOp::Gte),
            "$lt" => Some(FilterOp::Lt),
            "$lte" => Some(FilterOp::Lte),
            "$in" => Some(FilterOp::In),
            "$nin" => Some(FilterOp::Nin),
            "$regex" => Some(FilterOp::Regex),
            _ => None,
        }
    }
}

/// One field clause: a literal to equal, or a conjunction of operators
/// that must all hold.
#[derive(Debug, Clone)]
pub enum Clause {
    Equals(Value),
    Ops(Vec<(FilterOp, Value)>),
}

/// Conjunction of field clauses. A document matches when every clause
/// matches.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub clauses: Vec<(String, Clause)>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn field(mut self, name: &str, clause: Clause) -> Self {
        self.clauses.push((name.to_string(), clause));
        self
    }

    pub fn equals(self, name: &str, value: Value) -> Self {
        self.field(name, Clause::Equals(value))
    }

    pub fn op(self, name: &str, op: FilterOp, target: Value) -> Self {
        self.field(name, Clause::Ops(vec![(op, target)]))
    }

    /// Build from the JSON object shape `{field: literal | {$op: target}}`.
    ///
    /// An object clause containing a key that is not a known operator is
    /// demoted to a literal, matched by deep structural equality against
    /// the whole object. A non-object input yields an empty filter.
    pub fn from_value(value: &Value) -> Self {
        let mut filter = Filter::new();
        let Value::Object(fields) = value else {
            return filter;
        };
        for (field, clause_value) in fields {
            filter.clauses.push((field.clone(), parse_clause(clause_value)));
        }
        filter
    }

    /// Target value usable for a secondary-index point lookup on `field`:
    /// a literal clause, or an operator clause carrying `$eq`.
    pub fn point_lookup_target(&self, field: &str) -> Option<&Value> {
        for (name, clause) in &self.clauses {
            if name != field {
                continue;
            }
            match clause {
                Clause::Equals(v) => return Some(v),
                Clause::Ops(ops) => {
                    return ops
                        .iter()
                        .find(|(op, _)| *op == FilterOp::Eq)
                        .map(|(_, v)| v);
                }
            }
        }
        None
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|(name, _)| name.as_str())
    }
}

fn parse_clause(value: &Value) -> Clause {
    if let Value::Object(entries) = value {
        let mut ops = Vec::with_capacity(entries.len());
        for (key, target) in entries {
            match FilterOp::from_key(key) {
                Some(op) => ops.push((op, target.clone())),
                // Unknown operator key: the whole object becomes a literal.
                None => return Clause::Equals(value.clone()),
            }
        }
        return Clause::Ops(ops);
    }
    Clause::Equals(value.clone())
}

/// Strict equality, with numbers compared by numeric value so that
/// integer and float representations of the same number agree.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Ordering for `$gt`-family operators: numbers numerically, strings
/// lexicographically. Mixed or non-ordered types do not compare.
pub fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
