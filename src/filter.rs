//! Filter Predicate (§4.1): parses `column=op.value` and evaluates it against a JSON record.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::{HubError, HubResult};

static COLUMN_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
  Eq,
  Neq,
  Gt,
  Gte,
  Lt,
  Lte,
  Like,
  In,
}

impl Op {
  fn parse(s: &str) -> Option<Self> {
    return match s {
      "eq" => Some(Self::Eq),
      "neq" => Some(Self::Neq),
      "gt" => Some(Self::Gt),
      "gte" => Some(Self::Gte),
      "lt" => Some(Self::Lt),
      "lte" => Some(Self::Lte),
      "like" => Some(Self::Like),
      "in" => Some(Self::In),
      _ => None,
    };
  }

  fn as_str(&self) -> &'static str {
    return match self {
      Self::Eq => "eq",
      Self::Neq => "neq",
      Self::Gt => "gt",
      Self::Gte => "gte",
      Self::Lt => "lt",
      Self::Lte => "lte",
      Self::Like => "like",
      Self::In => "in",
    };
  }
}

/// A single parsed value, or (for `in`) a list of values.
#[derive(Clone, Debug, PartialEq)]
enum ScalarValue {
  Integer(i64),
  Float(f64),
  Bool(bool),
  Text(String),
}

impl ScalarValue {
  fn parse_one(raw: &str) -> Self {
    if let Ok(i) = raw.parse::<i64>() {
      return Self::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
      return Self::Float(f);
    }
    return match raw {
      "true" => Self::Bool(true),
      "false" => Self::Bool(false),
      _ => Self::Text(raw.to_string()),
    };
  }
}

#[derive(Clone, Debug, PartialEq)]
enum FilterValue {
  Scalar(ScalarValue),
  List(Vec<ScalarValue>),
}

/// A compiled, thread-safe `column=op.value` predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
  column: String,
  op: Op,
  value: FilterValue,
}

impl Filter {
  /// Parses a filter expression. Returns `HubError::InvalidFilter` for any malformed input,
  /// including unknown operators.
  pub fn parse(expr: &str) -> HubResult<Self> {
    let (column, rest) = expr.split_once('=').ok_or(HubError::InvalidFilter)?;
    if !COLUMN_RE.is_match(column) {
      return Err(HubError::InvalidFilter);
    }

    let (op_str, raw_value) = rest.split_once('.').ok_or(HubError::InvalidFilter)?;
    let op = Op::parse(op_str).ok_or(HubError::InvalidFilter)?;

    if raw_value.is_empty() {
      return Err(HubError::InvalidFilter);
    }

    let value = if op == Op::In {
      FilterValue::List(raw_value.split(',').map(ScalarValue::parse_one).collect())
    } else {
      FilterValue::Scalar(ScalarValue::parse_one(raw_value))
    };

    return Ok(Self {
      column: column.to_string(),
      op,
      value,
    });
  }

  /// Re-serializes the filter back to `column=op.value` form (§8: parse-then-serialize is
  /// idempotent for well-formed input).
  pub fn serialize(&self) -> String {
    let value_str = match &self.value {
      FilterValue::Scalar(v) => scalar_to_string(v),
      FilterValue::List(vs) => vs
        .iter()
        .map(scalar_to_string)
        .collect::<Vec<_>>()
        .join(","),
    };
    return format!("{}={}.{}", self.column, self.op.as_str(), value_str);
  }

  /// Evaluates the predicate against a JSON record. A missing column is not-matching. Type
  /// mismatches are not-matching except for numeric integer/float cross-comparison.
  pub fn matches(&self, record: &JsonValue) -> bool {
    let Some(field) = record.get(&self.column) else {
      return false;
    };

    return match (&self.op, &self.value) {
      (Op::In, FilterValue::List(values)) => values.iter().any(|v| scalar_eq(field, v)),
      (op, FilterValue::Scalar(value)) => eval_scalar(op, field, value),
      _ => false,
    };
  }
}

fn scalar_to_string(v: &ScalarValue) -> String {
  return match v {
    ScalarValue::Integer(i) => i.to_string(),
    ScalarValue::Float(f) => f.to_string(),
    ScalarValue::Bool(b) => b.to_string(),
    ScalarValue::Text(s) => s.clone(),
  };
}

fn as_f64(field: &JsonValue) -> Option<f64> {
  return field.as_f64();
}

fn scalar_eq(field: &JsonValue, value: &ScalarValue) -> bool {
  return match value {
    ScalarValue::Integer(i) => match field {
      JsonValue::Number(_) => as_f64(field) == Some(*i as f64),
      _ => false,
    },
    ScalarValue::Float(f) => match field {
      JsonValue::Number(_) => as_f64(field) == Some(*f),
      _ => false,
    },
    ScalarValue::Bool(b) => field.as_bool() == Some(*b),
    ScalarValue::Text(s) => field.as_str() == Some(s.as_str()),
  };
}

fn eval_scalar(op: &Op, field: &JsonValue, value: &ScalarValue) -> bool {
  if *op == Op::Eq {
    return scalar_eq(field, value);
  }
  if *op == Op::Neq {
    return !scalar_eq(field, value);
  }
  if *op == Op::Like {
    let (Some(text), ScalarValue::Text(pattern)) = (field.as_str(), value) else {
      return false;
    };
    return like_match(text, pattern);
  }

  // Remaining ops (gt/gte/lt/lte) are ordering comparisons: numeric cross-compare, else same-type.
  if let (Some(f), numeric) = (as_f64(field), numeric_of(value)) {
    if let Some(v) = numeric {
      return match op {
        Op::Gt => f > v,
        Op::Gte => f >= v,
        Op::Lt => f < v,
        Op::Lte => f <= v,
        _ => false,
      };
    }
  }

  if let (Some(a), ScalarValue::Text(b)) = (field.as_str(), value) {
    return match op {
      Op::Gt => a > b.as_str(),
      Op::Gte => a >= b.as_str(),
      Op::Lt => a < b.as_str(),
      Op::Lte => a <= b.as_str(),
      _ => false,
    };
  }

  return false;
}

fn numeric_of(value: &ScalarValue) -> Option<f64> {
  return match value {
    ScalarValue::Integer(i) => Some(*i as f64),
    ScalarValue::Float(f) => Some(*f),
    _ => None,
  };
}

/// SQL-style `%` wildcard match (only `%` is recognized, `_` is treated literally per §4.1).
fn like_match(text: &str, pattern: &str) -> bool {
  let segments: Vec<&str> = pattern.split('%').collect();
  if segments.len() == 1 {
    return text == pattern;
  }

  let mut rest = text;
  for (i, segment) in segments.iter().enumerate() {
    if segment.is_empty() {
      continue;
    }
    if i == 0 {
      if !rest.starts_with(segment) {
        return false;
      }
      rest = &rest[segment.len()..];
    } else if i == segments.len() - 1 {
      return rest.ends_with(segment);
    } else {
      match rest.find(segment) {
        Some(idx) => rest = &rest[idx + segment.len()..],
        None => return false,
      }
    }
  }
  return true;
}
