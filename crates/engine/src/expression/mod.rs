//! Expression Evaluator: path references and Choice predicates evaluated
//! against a run's data document.
//!
//! Evaluation is pure. Equality on strings is exact; numbers compare as
//! `f64`, so `1` equals `1.0`. Ordering comparisons require both operands
//! to be numeric.

pub mod path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use path::{merge_into, Path};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("path '{path}' not found in data document")]
    NotFound { path: String },

    #[error("{operand} is not numeric (got {value})")]
    NotNumeric { operand: String, value: Value },

    #[error("cannot write at '{path}': {reason}")]
    NotWritable { path: String, reason: String },

    #[error("malformed path '{path}': {reason}")]
    Malformed { path: String, reason: String },
}

/// One side of a comparison: a path into the document or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Path(Path),
    Value(Value),
}

impl Operand {
    pub fn path(path: Path) -> Self {
        Self::Path(path)
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    fn resolve<'a>(&'a self, data: &'a Value) -> Result<&'a Value, ExpressionError> {
        match self {
            Self::Path(path) => path.select(data),
            Self::Value(value) => Ok(value),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Path(path) => format!("path '{path}'"),
            Self::Value(value) => format!("literal {value}"),
        }
    }
}

/// A boolean condition over the data document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Equals { left: Operand, right: Operand },
    NotEquals { left: Operand, right: Operand },
    GreaterThan { left: Operand, right: Operand },
    GreaterThanEquals { left: Operand, right: Operand },
    LessThan { left: Operand, right: Operand },
    LessThanEquals { left: Operand, right: Operand },
    /// True when the path resolves. Never fails.
    Exists { path: Path },
    And { all: Vec<Predicate> },
    Or { any: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    /// `path == value`.
    pub fn equals(path: Path, value: impl Into<Value>) -> Self {
        Self::Equals { left: Operand::Path(path), right: Operand::value(value) }
    }

    /// `path > value`.
    pub fn greater_than(path: Path, value: impl Into<Value>) -> Self {
        Self::GreaterThan { left: Operand::Path(path), right: Operand::value(value) }
    }

    pub fn exists(path: Path) -> Self {
        Self::Exists { path }
    }
}

/// Evaluate `predicate` against `data`.
pub fn evaluate(predicate: &Predicate, data: &Value) -> Result<bool, ExpressionError> {
    match predicate {
        Predicate::Equals { left, right } => {
            Ok(values_equal(left.resolve(data)?, right.resolve(data)?))
        }
        Predicate::NotEquals { left, right } => {
            Ok(!values_equal(left.resolve(data)?, right.resolve(data)?))
        }
        Predicate::GreaterThan { left, right } => compare(left, right, data, |a, b| a > b),
        Predicate::GreaterThanEquals { left, right } => compare(left, right, data, |a, b| a >= b),
        Predicate::LessThan { left, right } => compare(left, right, data, |a, b| a < b),
        Predicate::LessThanEquals { left, right } => compare(left, right, data, |a, b| a <= b),
        Predicate::Exists { path } => Ok(path.resolve(data).is_some()),
        Predicate::And { all } => {
            for item in all {
                if !evaluate(item, data)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::Or { any } => {
            for item in any {
                if evaluate(item, data)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Predicate::Not { predicate } => Ok(!evaluate(predicate, data)?),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(
    left: &Operand,
    right: &Operand,
    data: &Value,
    op: impl Fn(f64, f64) -> bool,
) -> Result<bool, ExpressionError> {
    let a = numeric(left, left.resolve(data)?)?;
    let b = numeric(right, right.resolve(data)?)?;
    Ok(op(a, b))
}

fn numeric(operand: &Operand, value: &Value) -> Result<f64, ExpressionError> {
    value.as_f64().ok_or_else(|| ExpressionError::NotNumeric {
        operand: operand.describe(),
        value: value.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> Path {
        raw.parse().unwrap()
    }

    #[test]
    fn string_equality_is_exact() {
        let data = json!({ "connection_type": "ivr" });
        assert!(evaluate(&Predicate::equals(path("$.connection_type"), "ivr"), &data).unwrap());
        assert!(!evaluate(&Predicate::equals(path("$.connection_type"), "IVR"), &data).unwrap());
        assert!(!evaluate(&Predicate::equals(path("$.connection_type"), "ivr "), &data).unwrap());
    }

    #[test]
    fn numbers_compare_across_int_and_float() {
        let data = json!({ "call_duration_seconds": 540 });
        assert!(evaluate(&Predicate::equals(path("$.call_duration_seconds"), 540.0), &data).unwrap());
        assert!(!evaluate(&Predicate::greater_than(path("$.call_duration_seconds"), 540), &data).unwrap());

        let data = json!({ "call_duration_seconds": 541.5 });
        assert!(evaluate(&Predicate::greater_than(path("$.call_duration_seconds"), 540), &data).unwrap());
    }

    #[test]
    fn missing_path_is_not_found() {
        let err = evaluate(&Predicate::equals(path("$.connection_type"), "ivr"), &json!({})).unwrap_err();
        assert!(matches!(err, ExpressionError::NotFound { .. }));
    }

    #[test]
    fn ordering_on_non_numeric_fails() {
        let data = json!({ "call_duration_seconds": "long" });
        let err = evaluate(&Predicate::greater_than(path("$.call_duration_seconds"), 540), &data)
            .unwrap_err();
        assert!(matches!(err, ExpressionError::NotNumeric { .. }));
    }

    #[test]
    fn exists_never_fails() {
        let data = json!({ "a": { "b": null } });
        assert!(evaluate(&Predicate::exists(path("$.a.b")), &data).unwrap());
        assert!(!evaluate(&Predicate::exists(path("$.a.c")), &data).unwrap());
    }

    #[test]
    fn path_to_path_comparison() {
        let data = json!({ "elapsed": 30, "budget": 20 });
        let predicate = Predicate::GreaterThan {
            left: Operand::path(path("$.elapsed")),
            right: Operand::path(path("$.budget")),
        };
        assert!(evaluate(&predicate, &data).unwrap());
    }

    #[test]
    fn composites_short_circuit() {
        let data = json!({ "connection_type": "human" });
        // The second operand would fail with NotFound if evaluated.
        let or = Predicate::Or {
            any: vec![
                Predicate::equals(path("$.connection_type"), "human"),
                Predicate::equals(path("$.missing"), 1),
            ],
        };
        assert!(evaluate(&or, &data).unwrap());

        let and = Predicate::And {
            all: vec![
                Predicate::equals(path("$.connection_type"), "ivr"),
                Predicate::equals(path("$.missing"), 1),
            ],
        };
        assert!(!evaluate(&and, &data).unwrap());

        let not = Predicate::Not { predicate: Box::new(Predicate::exists(path("$.missing"))) };
        assert!(evaluate(&not, &data).unwrap());
    }

    #[test]
    fn predicate_wire_format() {
        let predicate: Predicate = serde_json::from_value(json!({
            "op": "greater_than",
            "left": { "path": "$.call_duration_seconds" },
            "right": { "value": 540 }
        }))
        .unwrap();
        assert_eq!(predicate, Predicate::greater_than(path("$.call_duration_seconds"), 540));
    }
}
