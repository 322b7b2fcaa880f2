//! Emission conditions
//!
//! A condition is a list of `field op operand` predicates evaluated against
//! the parent record; it holds if any predicate holds.

use crate::extract::Record;
use crate::ModelError;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Substring match
    Contains,
}

impl Operator {
    /// Two-character operators must be tried before their one-character prefixes
    const TOKENS: [(&'static str, Operator); 7] = [
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        ("<=", Operator::Le),
        (">=", Operator::Ge),
        ("~=", Operator::Contains),
        ("<", Operator::Lt),
        (">", Operator::Gt),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "~=",
        }
    }
}

/// One `field op operand` comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: Operator,
    pub operand: String,
}

impl Predicate {
    pub fn parse(expr: &str) -> Result<Self, ModelError> {
        let (pos, token, op) = Operator::TOKENS
            .iter()
            .filter_map(|(token, op)| expr.find(token).map(|pos| (pos, *token, *op)))
            .min_by_key(|(pos, token, _)| (*pos, std::cmp::Reverse(token.len())))
            .ok_or_else(|| ModelError::InvalidCondition(format!("{} (no operator)", expr)))?;

        let field = expr[..pos].trim();
        let operand = unquote(expr[pos + token.len()..].trim());

        if field.is_empty() {
            return Err(ModelError::InvalidCondition(format!("{} (missing field)", expr)));
        }

        Ok(Self {
            field: field.to_string(),
            op,
            operand: operand.to_string(),
        })
    }

    /// Evaluates against a record; a missing or null field never matches
    pub fn matches(&self, record: &Record) -> bool {
        match record.get(&self.field) {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => items.iter().any(|item| self.matches_value(item)),
            Some(value) => self.matches_value(value),
        }
    }

    fn matches_value(&self, value: &Value) -> bool {
        let text = match value {
            Value::Null => return false,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let ordering = match (text.trim().parse::<f64>(), self.operand.parse::<f64>()) {
            (Ok(lhs), Ok(rhs)) => match lhs.partial_cmp(&rhs) {
                Some(ordering) => ordering,
                None => return false,
            },
            _ => text.as_str().cmp(self.operand.as_str()),
        };

        match self.op {
            Operator::Eq => ordering.is_eq(),
            Operator::Ne => ordering.is_ne(),
            Operator::Lt => ordering.is_lt(),
            Operator::Le => ordering.is_le(),
            Operator::Gt => ordering.is_gt(),
            Operator::Ge => ordering.is_ge(),
            Operator::Contains => text.contains(&self.operand),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op.as_str(), self.operand)
    }
}

/// OR-combination of predicates
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub any_of: Vec<Predicate>,
}

impl Condition {
    /// Parses a list of predicate expressions
    ///
    /// An empty list yields `None`: no condition, always emit.
    pub fn parse_all<S: AsRef<str>>(exprs: &[S]) -> Result<Option<Self>, ModelError> {
        if exprs.is_empty() {
            return Ok(None);
        }
        let any_of = exprs
            .iter()
            .map(|e| Predicate::parse(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Self { any_of }))
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.any_of.iter().any(|p| p.matches(record))
    }
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
