//! Predicate language for article compliance conditions.
//!
//! Predicates are small boolean expression trees evaluated against the
//! event context. Paths are dotted (`tx.amount`) and resolve through
//! objects and array indices; a path that does not resolve is *undefined*
//! and never an error. A node with a missing operand or no `op` still
//! loads and simply never holds.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Boolean expression tree, tagged by `op` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// True iff the path resolves to a defined value
    Exists {
        #[serde(default)]
        path: String,
    },
    /// Negation; a missing child counts as false
    Not {
        #[serde(default = "missing_node", deserialize_with = "boxed_node")]
        predicate: Box<Predicate>,
    },
    /// True iff every child holds (empty = true)
    All {
        #[serde(default, deserialize_with = "node_list")]
        predicates: Vec<Predicate>,
    },
    /// True iff some child holds (empty = false)
    Any {
        #[serde(default, deserialize_with = "node_list")]
        predicates: Vec<Predicate>,
    },
    Eq(Comparison),
    Neq(Comparison),
    Gt(Comparison),
    Gte(Comparison),
    Lt(Comparison),
    Lte(Comparison),
    In(Comparison),
    Contains(Comparison),
    /// Any op this interpreter does not know; always false
    #[serde(other)]
    Unsupported,
}

/// Operands of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Left operand path; empty never resolves
    #[serde(default)]
    pub path: String,
    /// Right operand literal
    #[serde(
        default,
        deserialize_with = "literal",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    /// Right operand path; takes priority over `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_path: Option<String>,
}

impl Predicate {
    /// Read a node from JSON, treating one without a string `op` as unsupported.
    pub fn from_node(value: Value) -> Result<Self, serde_json::Error> {
        match value.get("op") {
            Some(Value::String(_)) => serde_json::from_value(value),
            _ => Ok(Self::Unsupported),
        }
    }
}

fn missing_node() -> Box<Predicate> {
    Box::new(Predicate::Unsupported)
}

/// Lenient reader for a predicate-valued field.
fn node<'de, D>(deserializer: D) -> Result<Predicate, D::Error>
where
    D: Deserializer<'de>,
{
    Predicate::from_node(Value::deserialize(deserializer)?).map_err(serde::de::Error::custom)
}

fn boxed_node<'de, D>(deserializer: D) -> Result<Box<Predicate>, D::Error>
where
    D: Deserializer<'de>,
{
    node(deserializer).map(Box::new)
}

fn node_list<'de, D>(deserializer: D) -> Result<Vec<Predicate>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<Value>::deserialize(deserializer)?
        .into_iter()
        .map(Predicate::from_node)
        .collect::<Result<_, _>>()
        .map_err(serde::de::Error::custom)
}

/// Lenient reader for an optional predicate; `null` means absent.
pub(crate) fn optional_node<'de, D>(deserializer: D) -> Result<Option<Predicate>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => Predicate::from_node(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Keeps an explicit `null` literal distinct from an absent one.
fn literal<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Comparison {
    /// Comparison against a literal.
    pub fn literal(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            value: Some(value.into()),
            value_path: None,
        }
    }

    /// Comparison against another path.
    pub fn against_path(path: impl Into<String>, value_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: None,
            value_path: Some(value_path.into()),
        }
    }

    fn operands<'a>(&'a self, context: &'a Value) -> (Option<&'a Value>, Option<&'a Value>) {
        let left = lookup(context, &self.path);
        let right = match &self.value_path {
            Some(path) => lookup(context, path),
            None => self.value.as_ref(),
        };
        (left, right)
    }
}

/// Structured record of how a predicate evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Resolved left operand (absent = undefined)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<Value>,
    /// Resolved right operand (absent = undefined)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Value>,
    pub outcome: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Trace>,
}

impl Predicate {
    /// Wire name of the op.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Exists { .. } => "exists",
            Self::Not { .. } => "not",
            Self::All { .. } => "all",
            Self::Any { .. } => "any",
            Self::Eq(_) => "eq",
            Self::Neq(_) => "neq",
            Self::Gt(_) => "gt",
            Self::Gte(_) => "gte",
            Self::Lt(_) => "lt",
            Self::Lte(_) => "lte",
            Self::In(_) => "in",
            Self::Contains(_) => "contains",
            Self::Unsupported => "unsupported",
        }
    }

    /// Evaluate against a context.
    pub fn evaluate(&self, context: &Value) -> bool {
        match self {
            Self::Exists { path } => lookup(context, path).is_some(),
            Self::Not { predicate } => !predicate.evaluate(context),
            Self::All { predicates } => predicates.iter().all(|p| p.evaluate(context)),
            Self::Any { predicates } => predicates.iter().any(|p| p.evaluate(context)),
            Self::Unsupported => false,
            _ => match self.comparison() {
                Some(cmp) => {
                    let (left, right) = cmp.operands(context);
                    self.compare(left, right)
                }
                None => false,
            },
        }
    }

    /// Evaluate against a context, recording every sub-clause.
    ///
    /// Unlike [`Predicate::evaluate`], children of `all`/`any` are always
    /// evaluated in full so the trace is complete. The outcome is identical.
    pub fn trace(&self, context: &Value) -> Trace {
        let mut trace = Trace {
            op: self.op_name().to_string(),
            path: None,
            left: None,
            right: None,
            outcome: false,
            children: Vec::new(),
        };

        match self {
            Self::Exists { path } => {
                let found = lookup(context, path);
                trace.path = Some(path.clone());
                trace.left = found.cloned();
                trace.outcome = found.is_some();
            }
            Self::Not { predicate } => {
                let child = predicate.trace(context);
                trace.outcome = !child.outcome;
                trace.children.push(child);
            }
            Self::All { predicates } => {
                trace.children = predicates.iter().map(|p| p.trace(context)).collect();
                trace.outcome = trace.children.iter().all(|c| c.outcome);
            }
            Self::Any { predicates } => {
                trace.children = predicates.iter().map(|p| p.trace(context)).collect();
                trace.outcome = trace.children.iter().any(|c| c.outcome);
            }
            Self::Unsupported => {}
            _ => {
                if let Some(cmp) = self.comparison() {
                    let (left, right) = cmp.operands(context);
                    trace.path = Some(cmp.path.clone());
                    trace.left = left.cloned();
                    trace.right = right.cloned();
                    trace.outcome = self.compare(left, right);
                }
            }
        }

        trace
    }

    fn comparison(&self) -> Option<&Comparison> {
        match self {
            Self::Eq(c)
            | Self::Neq(c)
            | Self::Gt(c)
            | Self::Gte(c)
            | Self::Lt(c)
            | Self::Lte(c)
            | Self::In(c)
            | Self::Contains(c) => Some(c),
            _ => None,
        }
    }

    fn compare(&self, left: Option<&Value>, right: Option<&Value>) -> bool {
        match self {
            Self::Eq(_) => strict_eq(left, right),
            Self::Neq(_) => !strict_eq(left, right),
            // NaN compares false, so undefined operands never satisfy an ordering
            Self::Gt(_) => to_number(left) > to_number(right),
            Self::Gte(_) => to_number(left) >= to_number(right),
            Self::Lt(_) => to_number(left) < to_number(right),
            Self::Lte(_) => to_number(left) <= to_number(right),
            Self::In(_) => match right {
                Some(Value::Array(items)) => items.iter().any(|item| strict_eq(left, Some(item))),
                _ => false,
            },
            Self::Contains(_) => match left {
                Some(Value::String(haystack)) => match render_scalar(right) {
                    Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
                    None => false,
                },
                Some(Value::Array(items)) => items.iter().any(|item| strict_eq(Some(item), right)),
                _ => false,
            },
            _ => false,
        }
    }
}

/// Resolve a dotted path. Array segments are numeric indices.
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    path.split('.').try_fold(context, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Numeric coercion used by the ordering ops.
///
/// Undefined, objects and unparsable text become NaN; null is 0; booleans
/// are 0/1; blank text is 0.
pub fn to_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Some(Value::Array(_)) | Some(Value::Object(_)) => f64::NAN,
    }
}

/// Type-strict equality. Numbers compare by value regardless of integer or
/// float representation; two undefined operands are equal.
pub fn strict_eq(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(Value::Number(a)), Some(Value::Number(b))) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn render_scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
