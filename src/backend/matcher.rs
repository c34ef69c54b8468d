//! Record matching for the reference stores
//!
//! Evaluates translated sub-queries (file store) and whole filters (memory
//! store) against records. A missing or null field never matches, for any
//! operator including `!=`.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::Value;

use crate::query::{is_membership_key, Condition, Filter, Literal, Operator, MEMBERSHIP_KEYS};
use crate::translate::{Clause, SubQuery};

use super::{Record, SortKey};

/// Anything a matcher can read fields from
pub trait FieldSource {
    fn field(&self, key: &str) -> Option<Cow<'_, Value>>;
}

impl FieldSource for Record {
    fn field(&self, key: &str) -> Option<Cow<'_, Value>> {
        self.get(key).map(Cow::Borrowed)
    }
}

/// Evaluates filters against records
pub struct RecordMatcher;

impl RecordMatcher {
    /// True if the record matches at least one sub-query
    pub fn matches_any<S: FieldSource + ?Sized>(source: &S, queries: &[SubQuery]) -> bool {
        queries.iter().any(|q| Self::matches_sub_query(source, q))
    }

    /// True if the record matches every clause of the sub-query
    pub fn matches_sub_query<S: FieldSource + ?Sized>(source: &S, query: &SubQuery) -> bool {
        query
            .clauses()
            .iter()
            .all(|clause| Self::matches_clause(source, clause))
    }

    pub fn matches_clause<S: FieldSource + ?Sized>(source: &S, clause: &Clause) -> bool {
        match clause {
            Clause::Compare {
                key,
                operator,
                value,
            } => match source.field(key) {
                Some(actual) => Self::compare_literal(&actual, *operator, value),
                None => false,
            },
            Clause::Member(symbol) => MEMBERSHIP_KEYS
                .iter()
                .any(|key| Self::has_member(source, key, symbol)),
        }
    }

    /// Evaluate a filter directly: OR over operands, AND for `!=`
    pub fn matches_filter<S: FieldSource + ?Sized>(source: &S, filter: &Filter) -> bool {
        filter
            .conditions()
            .iter()
            .all(|c| Self::matches_condition(source, c))
    }

    pub fn matches_condition<S: FieldSource + ?Sized>(source: &S, condition: &Condition) -> bool {
        let items = &condition.operand().items;

        if condition.operator() == Operator::Contains {
            if !is_membership_key(condition.key()) {
                return false;
            }
            return items.iter().any(|item| match item.as_str() {
                Some(symbol) => Self::has_member(source, condition.key(), symbol),
                None => false,
            });
        }

        let actual = match source.field(condition.key()) {
            Some(v) => v,
            None => return false,
        };
        match condition.operator() {
            Operator::Ne => items
                .iter()
                .all(|item| Self::compare_literal(&actual, Operator::Ne, item)),
            op => items
                .iter()
                .any(|item| Self::compare_literal(&actual, op, item)),
        }
    }

    fn has_member<S: FieldSource + ?Sized>(source: &S, key: &str, symbol: &str) -> bool {
        match source.field(key).as_deref() {
            Some(Value::Array(values)) => values.iter().any(|v| v.as_str() == Some(symbol)),
            _ => false,
        }
    }

    /// Compare a stored value against a literal.
    ///
    /// Numbers compare numerically, strings lexicographically. Values of
    /// different types are unequal and unordered.
    fn compare_literal(actual: &Value, operator: Operator, literal: &Literal) -> bool {
        if actual.is_null() {
            return false;
        }
        let ordering = Self::order_against(actual, literal);
        match operator {
            Operator::Eq => ordering == Some(Ordering::Equal),
            Operator::Ne => ordering != Some(Ordering::Equal),
            Operator::Gt => ordering == Some(Ordering::Greater),
            Operator::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            Operator::Lt => ordering == Some(Ordering::Less),
            Operator::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Operator::Contains => false,
        }
    }

    fn order_against(actual: &Value, literal: &Literal) -> Option<Ordering> {
        match (actual, literal) {
            (Value::Number(n), Literal::Int(i)) => match n.as_i64() {
                Some(a) => Some(a.cmp(i)),
                None => n.as_f64()?.partial_cmp(&(*i as f64)),
            },
            (Value::Number(n), Literal::Float(f)) => n.as_f64()?.partial_cmp(f),
            (Value::String(s), Literal::Str(t)) => Some(s.as_str().cmp(t.as_str())),
            _ => None,
        }
    }

    /// Sort rows by the given keys, stable for ties.
    pub fn sort<S: FieldSource>(rows: &mut [S], keys: &[SortKey]) {
        if !keys.is_empty() {
            rows.sort_by(|a, b| Self::compare_by(a, b, keys));
        }
    }

    /// Order two rows by a list of sort keys
    pub fn compare_by<S: FieldSource + ?Sized>(a: &S, b: &S, keys: &[SortKey]) -> Ordering {
        for key in keys {
            let ord = Self::compare_fields(a.field(&key.key).as_deref(), b.field(&key.key).as_deref());
            let ord = if key.is_reverse() { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Total order used for sorting: numbers, then strings, then everything
    /// else; missing values always last
    pub fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => match (a, b) {
                (Value::Number(x), Value::Number(y)) => {
                    match (x.as_i64(), y.as_i64()) {
                        (Some(i), Some(j)) => i.cmp(&j),
                        _ => {
                            let x = x.as_f64().unwrap_or(f64::NAN);
                            let y = y.as_f64().unwrap_or(f64::NAN);
                            x.total_cmp(&y)
                        }
                    }
                }
                (Value::String(x), Value::String(y)) => x.cmp(y),
                _ => Self::rank(a).cmp(&Self::rank(b)),
            },
        }
    }

    fn rank(value: &Value) -> u8 {
        match value {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            Value::Bool(_) => 2,
            Value::Array(_) => 3,
            Value::Object(_) => 4,
            Value::Null => 5,
        }
    }
}
