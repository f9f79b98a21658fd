//! Splices a predicate into a query's `WHERE` clause without otherwise
//! disturbing its shape — the mechanical half of the apply-cache rewrite,
//! kept separate from the cache-lookup logic in `lib.rs`.

use sqlparser::ast::{BinaryOperator, Expr, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::ApplyError;
use partition_cache::CacheValue;

/// Render an `IN (...)` predicate for a set of cached partition values, or
/// `false` for an empty (but present) intersection — the unsatisfiable
/// rewrite spec.md §4.3 calls for.
pub fn in_list_predicate(partition_key: &str, value: &CacheValue) -> Result<String, ApplyError> {
    let members = crate::values_to_in_list(value);
    if members.is_empty() {
        return Ok("false".to_string());
    }
    Ok(format!(
        "{} in ({})",
        partition_key.to_lowercase(),
        members.join(", ")
    ))
}

/// Parse `sql`, AND `predicate` into its `WHERE` clause (or set it, if the
/// query has none), and render the result back to text.
pub fn splice_predicate(sql: &str, predicate: &str) -> Result<String, ApplyError> {
    let dialect = GenericDialect {};
    let mut statements =
        Parser::parse_sql(&dialect, sql).map_err(|e| ApplyError::Parse(e.to_string()))?;
    if statements.len() != 1 {
        return Err(ApplyError::UnsupportedQueryShape);
    }
    let statement = statements.remove(0);
    let mut query = match statement {
        Statement::Query(q) => q,
        _ => return Err(ApplyError::UnsupportedQueryShape),
    };

    let select = match query.body.as_mut() {
        SetExpr::Select(s) => s,
        _ => return Err(ApplyError::UnsupportedQueryShape),
    };

    let pred_expr = Parser::new(&dialect)
        .try_with_sql(predicate)
        .map_err(|e| ApplyError::Parse(e.to_string()))?
        .parse_expr()
        .map_err(|e| ApplyError::Parse(e.to_string()))?;

    select.selection = Some(match select.selection.take() {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(existing),
            op: BinaryOperator::And,
            right: Box::new(pred_expr),
        },
        None => pred_expr,
    });

    Ok(query.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn splice_into_existing_where() {
        let sql = "select * from customer where mktsegment = 'BUILDING'";
        let out = splice_predicate(sql, "region_id in (1, 3, 7)").unwrap();
        assert!(out.to_lowercase().contains("mktsegment"));
        assert!(out.to_lowercase().contains("region_id in (1, 3, 7)"));
        assert!(out.to_lowercase().contains(" and "));
    }

    #[test]
    fn splice_into_missing_where() {
        let sql = "select * from customer";
        let out = splice_predicate(sql, "region_id in (1)").unwrap();
        assert!(out.to_lowercase().contains("where"));
    }

    #[test]
    fn in_list_predicate_empty_is_false() {
        let value = CacheValue::IntSet(BTreeSet::new());
        assert_eq!(in_list_predicate("region_id", &value).unwrap(), "false");
    }

    #[test]
    fn non_select_rejected() {
        let err = splice_predicate("insert into t values (1)", "x = 1").unwrap_err();
        assert!(matches!(err, ApplyError::UnsupportedQueryShape));
    }
}
