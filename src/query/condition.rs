//! # Condition Model
//!
//! Backend-neutral filter values. A [`Filter`] is a conjunction of
//! [`Condition`]s; each condition carries a [`LogicalList`] of operands
//! whose link is decided by the operator: `!=` links with AND (the record
//! must differ from every value), everything else links with OR.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{QueryError, QueryResult};

/// Fields holding a set of element symbols. `~` is only valid on these.
pub const MEMBERSHIP_KEYS: &[&str] = &["elements"];

/// Returns true if `key` names a multi-valued membership field
pub fn is_membership_key(key: &str) -> bool {
    MEMBERSHIP_KEYS.contains(&key)
}

/// Comparison operators of the filter language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    /// Contains / any-of, for membership fields
    #[serde(rename = "~")]
    Contains,
}

impl Operator {
    /// Operators ordered longest-first, so `>=` is found before `>`.
    pub const BY_LENGTH: [Operator; 7] = [
        Operator::Ne,
        Operator::Ge,
        Operator::Le,
        Operator::Eq,
        Operator::Gt,
        Operator::Lt,
        Operator::Contains,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Contains => "~",
        }
    }

    /// Range operators compare against a single bound
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le
        )
    }

    /// The link implied for this operator's operand list
    pub fn link(&self) -> Link {
        match self {
            Operator::Ne => Link::And,
            _ => Link::Or,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed operand.
///
/// Untagged so that on the wire it is a plain JSON number or string.
/// Variant order matters for deserialization: an integral JSON number
/// becomes `Int`, any other number `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    /// Classify a raw operand: integer, then finite float, then string.
    pub fn classify(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            return Literal::Int(i);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Literal::Float(f),
            _ => Literal::Str(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Int(i) => Some(*i as f64),
            Literal::Float(f) => Some(*f),
            Literal::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a JSON value for storage in a record
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Literal::Int(i) => serde_json::Value::from(*i),
            Literal::Float(f) => serde_json::Value::from(*f),
            Literal::Str(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{}", i),
            // Debug keeps the trailing ".0" on integral floats
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Str(s) => f.write_str(s),
        }
    }
}

/// How the items of a [`LogicalList`] combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Link {
    And,
    Or,
}

/// Operands linked by AND or OR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalList {
    pub link: Link,
    pub items: Vec<Literal>,
}

impl LogicalList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One filter clause: key, operator and linked operands.
///
/// Construct through [`Condition::new`]; deserialization goes through the
/// same checks, so a condition received over the wire is as valid as one
/// built locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCondition")]
pub struct Condition {
    key: String,
    operator: Operator,
    operand: LogicalList,
}

#[derive(Deserialize)]
struct RawCondition {
    key: String,
    operator: Operator,
    operand: LogicalList,
}

impl TryFrom<RawCondition> for Condition {
    type Error = QueryError;

    fn try_from(raw: RawCondition) -> QueryResult<Self> {
        if raw.operand.link != raw.operator.link() {
            return Err(QueryError::WrongLink(format!(
                "{}{} linked with {:?}",
                raw.key, raw.operator, raw.operand.link
            )));
        }
        Condition::new(raw.key, raw.operator, raw.operand.items)
    }
}

impl Condition {
    /// Create a condition, linking the operands as the operator implies.
    pub fn new(key: impl Into<String>, operator: Operator, items: Vec<Literal>) -> QueryResult<Self> {
        let key = key.into();
        let token = || {
            let values: Vec<String> = items.iter().map(|v| v.to_string()).collect();
            format!("{}{}{}", key, operator, values.join(","))
        };

        if key.is_empty() {
            return Err(QueryError::EmptyKey(token()));
        }
        if items.is_empty() {
            return Err(QueryError::EmptyOperand(token()));
        }
        if operator.is_range() && items.len() > 1 {
            return Err(QueryError::TooManyOperands {
                operator: operator.to_string(),
                token: token(),
            });
        }

        let operand = LogicalList {
            link: operator.link(),
            items,
        };
        Ok(Self {
            key,
            operator,
            operand,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn operand(&self) -> &LogicalList {
        &self.operand
    }

    pub fn link(&self) -> Link {
        self.operand.link
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.operand.items.iter().map(|v| v.to_string()).collect();
        write!(f, "{}{}{}", self.key, self.operator, values.join(","))
    }
}

/// A conjunction of conditions. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }
}

impl From<Vec<Condition>> for Filter {
    fn from(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.conditions.iter().map(|c| c.to_string()).collect();
        f.write_str(&parts.join(" "))
    }
}
