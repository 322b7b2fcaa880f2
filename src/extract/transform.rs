//! Field transforms
//!
//! A closed set of named post-processing steps, parsed once when the model
//! is built. Syntax is `name` or `name=argument`; `replace` takes
//! `from=>to`.

use crate::ModelError;
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    /// Collapse runs of whitespace into one space and trim
    Squash,
    /// Parse as a floating point number, ignoring grouping and currency
    Number,
    /// Parse as an integer, truncating any fraction
    Integer,
    Prefix(String),
    Suffix(String),
    Replace { from: String, to: String },
    /// Substitute for a missing, empty or failed value
    Default(String),
}

impl FromStr for Transform {
    type Err = ModelError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match spec.split_once('=') {
            Some((name, arg)) => (name.trim(), Some(arg)),
            None => (spec.trim(), None),
        };

        let transform = match (name, arg) {
            ("trim", None) => Self::Trim,
            ("lowercase", None) => Self::Lowercase,
            ("uppercase", None) => Self::Uppercase,
            ("squash", None) => Self::Squash,
            ("number", None) => Self::Number,
            ("integer", None) => Self::Integer,
            ("prefix", Some(arg)) => Self::Prefix(arg.to_string()),
            ("suffix", Some(arg)) => Self::Suffix(arg.to_string()),
            ("default", Some(arg)) => Self::Default(arg.to_string()),
            ("replace", Some(arg)) => {
                let (from, to) = arg.split_once("=>").ok_or_else(|| {
                    ModelError::InvalidTransform(format!("{} (expected replace=from=>to)", spec))
                })?;
                if from.is_empty() {
                    return Err(ModelError::InvalidTransform(format!(
                        "{} (empty pattern)",
                        spec
                    )));
                }
                Self::Replace {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            }
            _ => return Err(ModelError::InvalidTransform(spec.to_string())),
        };
        Ok(transform)
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trim => write!(f, "trim"),
            Self::Lowercase => write!(f, "lowercase"),
            Self::Uppercase => write!(f, "uppercase"),
            Self::Squash => write!(f, "squash"),
            Self::Number => write!(f, "number"),
            Self::Integer => write!(f, "integer"),
            Self::Prefix(p) => write!(f, "prefix={}", p),
            Self::Suffix(s) => write!(f, "suffix={}", s),
            Self::Replace { from, to } => write!(f, "replace={}=>{}", from, to),
            Self::Default(d) => write!(f, "default={}", d),
        }
    }
}

impl Transform {
    /// Applies the transform; arrays are transformed element-wise
    ///
    /// Returns `None` when the value cannot be transformed.
    pub fn apply(&self, value: Value) -> Option<Value> {
        if let Self::Default(fallback) = self {
            return Some(match value {
                Value::Null => Value::String(fallback.clone()),
                Value::String(s) if s.trim().is_empty() => Value::String(fallback.clone()),
                other => other,
            });
        }

        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.apply(item))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Value::Null => None,
            Value::String(s) => self.apply_str(&s),
            other => self.apply_str(&other.to_string()),
        }
    }

    fn apply_str(&self, s: &str) -> Option<Value> {
        let text = match self {
            Self::Trim => s.trim().to_string(),
            Self::Lowercase => s.to_lowercase(),
            Self::Uppercase => s.to_uppercase(),
            Self::Squash => s.split_whitespace().collect::<Vec<_>>().join(" "),
            Self::Prefix(p) => format!("{}{}", p, s),
            Self::Suffix(x) => format!("{}{}", s, x),
            Self::Replace { from, to } => s.replace(from.as_str(), to),
            Self::Number => {
                let n = parse_number(s)?;
                return Number::from_f64(n).map(Value::Number);
            }
            Self::Integer => {
                let n = parse_number(s)?;
                if !n.is_finite() || n.abs() >= i64::MAX as f64 {
                    return None;
                }
                return Some(Value::from(n.trunc() as i64));
            }
            Self::Default(_) => s.to_string(),
        };
        Some(Value::String(text))
    }
}

/// Runs a transform chain
///
/// When a step fails, the rest of the chain is skipped up to the next
/// `default`, which then supplies the value. `None` means the field failed.
pub fn apply_chain(transforms: &[Transform], value: Value) -> Option<Value> {
    let mut current = Some(value);
    for transform in transforms {
        current = match current {
            Some(v) => transform.apply(v),
            None if matches!(transform, Transform::Default(_)) => transform.apply(Value::Null),
            None => None,
        };
    }
    current
}

/// Parses the first numeric token of `s`, dropping thousands separators
fn parse_number(s: &str) -> Option<f64> {
    let chars: Vec<char> = s.chars().collect();
    let start = (0..chars.len()).find(|&i| {
        chars[i].is_ascii_digit()
            || (matches!(chars[i], '-' | '+' | '.')
                && chars.get(i + 1).map_or(false, |c| c.is_ascii_digit()))
    })?;

    let token: String = chars[start..]
        .iter()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+' | 'e' | 'E'))
        .filter(|c| **c != ',')
        .collect();
    token
        .trim_end_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()
}
