//! # Query Compiler
//!
//! Turns user-typed filter tokens into a [`Filter`].
//!
//! ```text
//! energy<0.6          -> energy < [0.6]
//! id!=10,11,12        -> id != AND[10, 11, 12]
//! elements~C,H        -> elements ~ OR["C", "H"]
//! 'a=1 b=2'           -> split on whitespace first: a = [1], b = [2]
//! ```

use super::condition::{is_membership_key, Condition, Filter, Literal, Operator};
use super::errors::{QueryError, QueryResult};

/// Compile raw command-line arguments into a filter.
///
/// Each argument may hold several whitespace-separated tokens. The first
/// bad token aborts the whole compilation.
pub fn compile<S: AsRef<str>>(args: &[S]) -> QueryResult<Filter> {
    let mut filter = Filter::new();
    for arg in args {
        for token in split_tokens(arg.as_ref())? {
            filter.push(compile_token(&token)?);
        }
    }
    Ok(filter)
}

/// Compile a single `key<op>v1,v2,...` token
pub fn compile_token(token: &str) -> QueryResult<Condition> {
    let (key, operator, rest) = split_operator(token)
        .ok_or_else(|| QueryError::NoOperator(token.to_string()))?;

    if key.is_empty() {
        return Err(QueryError::EmptyKey(token.to_string()));
    }
    if operator == Operator::Contains && !is_membership_key(key) {
        return Err(QueryError::MembershipOnScalar(token.to_string()));
    }

    let mut operands = Vec::new();
    for raw in rest.split(',') {
        if raw.is_empty() {
            return Err(QueryError::EmptyOperand(token.to_string()));
        }
        operands.push(Literal::classify(raw));
    }

    Condition::new(key, operator, operands).map_err(|e| match e {
        QueryError::TooManyOperands { operator, .. } => QueryError::TooManyOperands {
            operator,
            token: token.to_string(),
        },
        other => other,
    })
}

/// Find the longest operator in `token` and split at its first occurrence
fn split_operator(token: &str) -> Option<(&str, Operator, &str)> {
    Operator::BY_LENGTH.iter().find_map(|op| {
        token
            .find(op.as_str())
            .map(|pos| (&token[..pos], *op, &token[pos + op.as_str().len()..]))
    })
}

/// Split on whitespace outside single or double quotes, dropping the quotes
fn split_tokens(arg: &str) -> QueryResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in arg.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote.is_some() {
        return Err(QueryError::UnbalancedQuotes(arg.to_string()));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Link;

    #[test]
    fn test_single_range_token() {
        let filter = compile(&["energy<0.6"]).unwrap();
        assert_eq!(filter.len(), 1);
        let c = &filter.conditions()[0];
        assert_eq!(c.key(), "energy");
        assert_eq!(c.operator(), Operator::Lt);
        assert_eq!(c.operand().items, vec![Literal::Float(0.6)]);
    }

    #[test]
    fn test_longest_operator_wins() {
        let c = compile_token("energy>=1").unwrap();
        assert_eq!(c.operator(), Operator::Ge);
        assert_eq!(c.operand().items, vec![Literal::Int(1)]);

        let c = compile_token("energy<=1").unwrap();
        assert_eq!(c.operator(), Operator::Le);

        let c = compile_token("id!=3").unwrap();
        assert_eq!(c.operator(), Operator::Ne);
        assert_eq!(c.key(), "id");
    }

    #[test]
    fn test_not_equal_is_conjunction() {
        let c = compile_token("id!=10,11,12").unwrap();
        assert_eq!(c.link(), Link::And);
        assert_eq!(
            c.operand().items,
            vec![Literal::Int(10), Literal::Int(11), Literal::Int(12)]
        );
    }

    #[test]
    fn test_equal_is_disjunction() {
        let c = compile_token("a=1,x,2.5").unwrap();
        assert_eq!(c.link(), Link::Or);
        assert_eq!(
            c.operand().items,
            vec![Literal::Int(1), Literal::Str("x".into()), Literal::Float(2.5)]
        );
    }

    #[test]
    fn test_membership() {
        let c = compile_token("elements~C,H").unwrap();
        assert_eq!(c.operator(), Operator::Contains);
        assert_eq!(c.link(), Link::Or);
    }

    #[test]
    fn test_membership_on_scalar_rejected() {
        let err = compile(&["energy~1"]).unwrap_err();
        assert_eq!(err, QueryError::MembershipOnScalar("energy~1".into()));
    }

    #[test]
    fn test_whitespace_split() {
        let filter = compile(&["energy<0.6 id>4", "elements~C"]).unwrap();
        let keys: Vec<&str> = filter.conditions().iter().map(|c| c.key()).collect();
        assert_eq!(keys, vec!["energy", "id", "elements"]);
    }

    #[test]
    fn test_quoted_group_kept_together() {
        let filter = compile(&["name=\"John Smith\" id=1"]).unwrap();
        assert_eq!(filter.len(), 2);
        assert_eq!(
            filter.conditions()[0].operand().items,
            vec![Literal::Str("John Smith".into())]
        );
    }

    #[test]
    fn test_no_operator_aborts_everything() {
        let err = compile(&["energy<0.6", "garbage"]).unwrap_err();
        assert_eq!(err, QueryError::NoOperator("garbage".into()));
    }

    #[test]
    fn test_empty_operand() {
        assert_eq!(
            compile_token("id=1,,2").unwrap_err(),
            QueryError::EmptyOperand("id=1,,2".into())
        );
        assert_eq!(
            compile_token("id=").unwrap_err(),
            QueryError::EmptyOperand("id=".into())
        );
    }

    #[test]
    fn test_empty_key() {
        assert_eq!(
            compile_token("=5").unwrap_err(),
            QueryError::EmptyKey("=5".into())
        );
    }

    #[test]
    fn test_range_with_list_names_token() {
        let err = compile_token("e>1,2").unwrap_err();
        assert_eq!(
            err,
            QueryError::TooManyOperands {
                operator: ">".into(),
                token: "e>1,2".into()
            }
        );
    }

    #[test]
    fn test_unbalanced_quotes() {
        assert!(matches!(
            compile(&["name=\"abc"]),
            Err(QueryError::UnbalancedQuotes(_))
        ));
    }

    #[test]
    fn test_empty_input_is_empty_filter() {
        let empty: [&str; 0] = [];
        assert!(compile(&empty).unwrap().is_empty());
        assert!(compile(&["   "]).unwrap().is_empty());
    }
}
