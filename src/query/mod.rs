//! Query language for abcd
//!
//! Operators: `=`, `!=`, `>`, `>=`, `<`, `<=`, `~`.
//!
//! A token such as `id=1,2` selects records whose id is 1 OR 2, while
//! `id!=1,2` selects records whose id is neither 1 NOR 2. The `!=` list
//! is a conjunction of exclusions; every other list is a disjunction.

mod compiler;
mod condition;
mod errors;

pub use compiler::{compile, compile_token};
pub use condition::{
    is_membership_key, Condition, Filter, Link, Literal, LogicalList, Operator, MEMBERSHIP_KEYS,
};
pub use errors::{QueryError, QueryResult};
