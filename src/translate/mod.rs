//! Backend filter translation
//!
//! Lowers a [`Filter`] into OR-free sub-queries for stores that can only
//! evaluate conjunctions of single-valued comparisons.
//!
//! ```text
//! a=1,2 b=3,4      -> a=1,b=3 | a=1,b=4 | a=2,b=3 | a=2,b=4
//! id!=10,11,12     -> id!=10,id!=11,id!=12
//! elements~C,H     -> C | H
//! ```
//!
//! Sub-queries may overlap. A caller running several of them must union
//! the rows, de-duplicate by stable id and only then sort and limit.
//! A filter expanding past [`MAX_SUB_QUERIES`] is refused before any
//! sub-query is built.

mod errors;

use std::fmt;

use tracing::debug;

use crate::query::{is_membership_key, Condition, Filter, Link, Literal, Operator};

pub use errors::{TranslationError, TranslationResult};

/// Upper bound on the sub-queries one filter may expand into
pub const MAX_SUB_QUERIES: usize = 10_000;

/// One OR-free clause a store can evaluate directly
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `key<op>value`
    Compare {
        key: String,
        operator: Operator,
        value: Literal,
    },
    /// Bare element symbol: the record's membership set contains it
    Member(String),
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Compare {
                key,
                operator,
                value,
            } => write!(f, "{}{}{}", key, operator, value),
            Clause::Member(symbol) => f.write_str(symbol),
        }
    }
}

/// A conjunction of clauses with no disjunction inside
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubQuery {
    clauses: Vec<Clause>,
}

impl SubQuery {
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl fmt::Display for SubQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.clauses.iter().map(|c| c.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

/// Check the membership rules without expanding anything.
///
/// `~` must target a membership field, a membership field only accepts
/// `~`, and membership operands are element symbols.
pub fn check_membership(filter: &Filter) -> TranslationResult<()> {
    for condition in filter.conditions() {
        let member_key = is_membership_key(condition.key());
        let member_op = condition.operator() == Operator::Contains;

        if member_op && !member_key {
            return Err(TranslationError::MembershipOnScalar(
                condition.key().to_string(),
            ));
        }
        if member_key && !member_op {
            return Err(TranslationError::ScalarOnMembership {
                field: condition.key().to_string(),
                operator: condition.operator().to_string(),
            });
        }
        if member_key {
            if let Some(bad) = condition.operand().items.iter().find(|v| v.as_str().is_none()) {
                return Err(TranslationError::BadSymbol {
                    field: condition.key().to_string(),
                    value: bad.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Expand a filter into the sub-queries whose union it denotes.
///
/// An empty filter yields a single empty sub-query (match everything).
pub fn translate(filter: &Filter) -> TranslationResult<Vec<SubQuery>> {
    check_membership(filter)?;

    let alternatives: Vec<Vec<Vec<Clause>>> = filter.conditions().iter().map(alternatives).collect();

    let count = alternatives
        .iter()
        .fold(1usize, |acc, choices| acc.saturating_mul(choices.len()));
    if count > MAX_SUB_QUERIES {
        return Err(TranslationError::TooManySubQueries {
            count,
            limit: MAX_SUB_QUERIES,
        });
    }

    let mut product: Vec<Vec<Clause>> = vec![Vec::new()];
    for choices in &alternatives {
        let mut next = Vec::with_capacity(product.len() * choices.len());
        for prefix in &product {
            for choice in choices {
                let mut clauses = prefix.clone();
                clauses.extend(choice.iter().cloned());
                next.push(clauses);
            }
        }
        product = next;
    }

    debug!(
        conditions = filter.len(),
        sub_queries = product.len(),
        "expanded filter"
    );

    Ok(product
        .into_iter()
        .map(|clauses| SubQuery { clauses })
        .collect())
}

/// The OR-alternatives for one condition; each alternative is ANDed clauses
fn alternatives(condition: &Condition) -> Vec<Vec<Clause>> {
    let clauses = condition.operand().items.iter().map(|value| clause(condition, value));
    match condition.link() {
        Link::And => vec![clauses.collect()],
        Link::Or => clauses.map(|c| vec![c]).collect(),
    }
}

fn clause(condition: &Condition, value: &Literal) -> Clause {
    if condition.operator() == Operator::Contains {
        // check_membership guarantees a string operand here
        return Clause::Member(value.to_string());
    }
    Clause::Compare {
        key: condition.key().to_string(),
        operator: condition.operator(),
        value: value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compile;

    fn rendered(tokens: &[&str]) -> Vec<String> {
        let filter = compile(tokens).unwrap();
        translate(&filter)
            .unwrap()
            .iter()
            .map(|q| q.to_string())
            .collect()
    }

    #[test]
    fn test_single_range() {
        assert_eq!(rendered(&["energy<0.6"]), vec!["energy<0.6"]);
    }

    #[test]
    fn test_not_equal_stays_in_one_sub_query() {
        assert_eq!(rendered(&["id!=10,11,12"]), vec!["id!=10,id!=11,id!=12"]);
    }

    #[test]
    fn test_cartesian_product() {
        assert_eq!(
            rendered(&["a=1,2", "b=3,4"]),
            vec!["a=1,b=3", "a=1,b=4", "a=2,b=3", "a=2,b=4"]
        );
    }

    #[test]
    fn test_product_size_is_m_times_n() {
        let filter = compile(&["a=1,2,3", "b=4,5", "c<1", "d!=1,2"]).unwrap();
        let queries = translate(&filter).unwrap();
        assert_eq!(queries.len(), 6);
        for q in &queries {
            // one clause each for a, b and c plus two exclusions for d
            assert_eq!(q.clauses().len(), 5);
        }
    }

    #[test]
    fn test_expansion_is_capped() {
        let values = (0..10).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        let tokens: Vec<String> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|key| format!("{}={}", key, values))
            .collect();
        let filter = compile(&tokens).unwrap();
        match translate(&filter) {
            Err(TranslationError::TooManySubQueries { count, limit }) => {
                assert_eq!(count, 100_000);
                assert_eq!(limit, MAX_SUB_QUERIES);
            }
            other => panic!("expected the cap to trip, got {:?}", other.map(|q| q.len())),
        }

        // four of them stay within the cap
        let filter = compile(&tokens[..4]).unwrap();
        assert_eq!(translate(&filter).unwrap().len(), 10_000);
    }

    #[test]
    fn test_membership_emits_bare_symbols() {
        assert_eq!(rendered(&["elements~C,H", "energy<1"]), vec!["C,energy<1", "H,energy<1"]);
    }

    #[test]
    fn test_empty_filter_is_one_empty_query() {
        let queries = translate(&Filter::new()).unwrap();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].is_empty());
    }

    #[test]
    fn test_membership_operator_on_scalar_field() {
        let filter = Filter::new().and(
            Condition::new("energy", Operator::Contains, vec![Literal::Int(1)]).unwrap(),
        );
        assert_eq!(
            translate(&filter).unwrap_err(),
            TranslationError::MembershipOnScalar("energy".into())
        );
    }

    #[test]
    fn test_scalar_operator_on_membership_field() {
        let filter = compile(&["elements=C"]).unwrap();
        assert!(matches!(
            translate(&filter),
            Err(TranslationError::ScalarOnMembership { .. })
        ));
    }

    #[test]
    fn test_numeric_symbol_rejected() {
        let filter = compile(&["elements~6"]).unwrap();
        assert!(matches!(
            translate(&filter),
            Err(TranslationError::BadSymbol { .. })
        ));
    }
}
