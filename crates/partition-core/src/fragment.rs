//! Phases A–F: parse a query, derive its fragments, canonicalize and hash
//! each one.

use std::collections::BTreeSet;

use sqlparser::ast::{
    Expr, Join, JoinConstraint, JoinOperator, SetExpr, Statement, TableFactor, TableWithJoins,
    Value,
};
use sqlparser::dialect::{Dialect, GenericDialect};
use sqlparser::parser::Parser;

use crate::distance::{format_distance, snap_distance};
use crate::error::QueryProcessorError;
use crate::graph::JoinGraph;
use crate::hash::fragment_hash;
use crate::options::QueryProcessorOptions;
use crate::render::{collect_aliases, find_partition_key_alias, is_trivially_true, render_expr};

/// A single canonical fragment derived from a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Canonical, fully rendered `SELECT DISTINCT ...` text.
    pub sql: String,
    /// Lowercase hex digest of `sql`.
    pub hash: String,
    /// Number of table aliases this fragment's `FROM` list covers.
    pub alias_count: usize,
    /// `true` when the options declared a geometry column, meaning this
    /// fragment's predicates may include a spatial `within buffer(...)`
    /// rewrite alongside the declared partition key.
    pub is_geometry: bool,
}

struct TableRef {
    table_name: String,
    alias: String,
}

struct Predicate {
    text: String,
    aliases: BTreeSet<String>,
}

/// Parse `sql`, derive every fragment reachable from `partition_key` under
/// `options`, and return them deduplicated by hash and ordered by
/// ascending alias count then canonical text.
pub fn generate_fragments(
    sql: &str,
    partition_key: &str,
    options: &QueryProcessorOptions,
) -> Result<Vec<Fragment>, QueryProcessorError> {
    let dialect: Box<dyn Dialect> = Box::new(GenericDialect {});
    let statements = Parser::parse_sql(dialect.as_ref(), sql)
        .map_err(|e| QueryProcessorError::ParseError(e.to_string()))?;

    let statement = statements
        .into_iter()
        .next()
        .ok_or_else(|| QueryProcessorError::ParseError("empty statement list".to_string()))?;

    let query = match statement {
        Statement::Query(q) => q,
        other => {
            return Err(QueryProcessorError::ParseError(format!(
                "expected a SELECT query, found: {}",
                other
            )))
        }
    };

    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s.as_ref(),
        other => {
            return Err(QueryProcessorError::ParseError(format!(
                "expected a simple SELECT body, found: {}",
                other
            )))
        }
    };

    let mut tables: Vec<TableRef> = Vec::new();
    let mut raw_conjuncts: Vec<Expr> = Vec::new();

    for twj in &select.from {
        extract_table_with_joins(twj, &mut tables, &mut raw_conjuncts);
    }

    if let Some(selection) = &select.selection {
        crate::render::split_conjuncts(selection, &mut raw_conjuncts);
    }

    let alias_set: BTreeSet<String> = tables.iter().map(|t| t.alias.clone()).collect();
    let single_alias = if alias_set.len() == 1 {
        alias_set.iter().next().map(|s| s.as_str())
    } else {
        None
    };

    let anchor = raw_conjuncts
        .iter()
        .find_map(|e| find_partition_key_alias(e, partition_key))
        .or_else(|| {
            if alias_set.len() == 1 {
                alias_set.iter().next().cloned()
            } else {
                None
            }
        });

    let mut predicates: Vec<Predicate> = Vec::new();
    for expr in &raw_conjuncts {
        if is_trivially_true(expr) {
            continue;
        }
        if let Some((lhs, rhs, distance)) = match_distance_predicate(expr) {
            let mut aliases = BTreeSet::new();
            if let Some(a) = alias_prefix(&lhs) {
                aliases.insert(a);
            }
            if let Some(a) = alias_prefix(&rhs) {
                aliases.insert(a);
            }
            let snapped = format_distance(snap_distance(distance, options.distance_snap_unit));
            predicates.push(Predicate {
                text: format!("{} within buffer({}, {})", lhs, rhs, snapped),
                aliases,
            });
            continue;
        }

        let aliases = collect_aliases(expr, single_alias);
        if aliases.len() == 2 && options.skip_partition_key_joins {
            if let Some((a, b)) = two_aliases(&aliases) {
                if is_partition_key_equi_join(expr, partition_key, &a, &b) {
                    continue;
                }
            }
        }
        predicates.push(Predicate {
            text: render_expr(expr),
            aliases,
        });
    }

    let mut graph = JoinGraph::new();
    for alias in &alias_set {
        graph.add_vertex(alias);
    }
    for p in &predicates {
        if p.aliases.len() == 2 {
            if let Some((a, b)) = two_aliases(&p.aliases) {
                graph.add_edge(&a, &b);
            }
        }
    }

    let candidates: Vec<BTreeSet<String>> = if options.follow_graph {
        graph.connected_subgraphs(options.min_component_size)
    } else {
        match anchor {
            Some(a) => {
                let component = graph.component_of(&a);
                if component.len() >= options.min_component_size {
                    vec![component]
                } else {
                    vec![]
                }
            }
            None => {
                if options.warn_no_partition_key {
                    tracing::warn!(
                        partition_key,
                        "no fragment reaches the declared partition key; returning empty fragment list"
                    );
                    return Ok(vec![]);
                } else {
                    return Err(QueryProcessorError::NoPartitionKey(
                        partition_key.to_string(),
                    ));
                }
            }
        }
    };

    let mut fragments: Vec<Fragment> = Vec::new();
    for s in &candidates {
        let mut from_items: Vec<String> = tables
            .iter()
            .filter(|t| s.contains(&t.alias))
            .map(|t| {
                if t.table_name == t.alias {
                    t.table_name.clone()
                } else {
                    format!("{} {}", t.table_name, t.alias)
                }
            })
            .collect();
        from_items.sort();
        if from_items.is_empty() {
            continue;
        }

        let mut included: Vec<String> = predicates
            .iter()
            .filter(|p| match p.aliases.len() {
                0 => true,
                1 => {
                    options.keep_all_attributes
                        && p.aliases.iter().next().map(|a| s.contains(a)).unwrap_or(false)
                }
                _ => p.aliases.is_subset(s),
            })
            .map(|p| p.text.clone())
            .collect();
        included.sort();
        included.dedup();

        let where_clause = if included.is_empty() {
            String::new()
        } else {
            format!(" where {}", included.join(" and "))
        };

        let rendered_sql = format!(
            "select distinct {} from {}{}",
            partition_key.to_lowercase(),
            from_items.join(", "),
            where_clause
        );
        let hash = fragment_hash(&rendered_sql);

        fragments.push(Fragment {
            sql: rendered_sql,
            hash,
            alias_count: s.len(),
            is_geometry: options.geometry_column.is_some(),
        });
    }

    let mut seen = BTreeSet::new();
    fragments.retain(|f| seen.insert(f.hash.clone()));
    fragments.sort_by(|a, b| a.alias_count.cmp(&b.alias_count).then_with(|| a.sql.cmp(&b.sql)));

    Ok(fragments)
}

fn two_aliases(set: &BTreeSet<String>) -> Option<(String, String)> {
    let mut it = set.iter();
    let a = it.next()?.clone();
    let b = it.next()?.clone();
    Some((a, b))
}

fn extract_table_with_joins(
    twj: &TableWithJoins,
    tables: &mut Vec<TableRef>,
    conjuncts: &mut Vec<Expr>,
) {
    if let Some(t) = table_factor_ref(&twj.relation) {
        tables.push(t);
    }
    for join in &twj.joins {
        extract_join(join, tables, conjuncts);
    }
}

fn extract_join(join: &Join, tables: &mut Vec<TableRef>, conjuncts: &mut Vec<Expr>) {
    if let Some(t) = table_factor_ref(&join.relation) {
        tables.push(t);
    }
    if let Some(on_expr) = join_on_expr(&join.join_operator) {
        crate::render::split_conjuncts(on_expr, conjuncts);
    }
}

fn join_on_expr(op: &JoinOperator) -> Option<&Expr> {
    let constraint = match op {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c) => Some(c),
        _ => None,
    }?;
    match constraint {
        JoinConstraint::On(e) => Some(e),
        _ => None,
    }
}

fn table_factor_ref(tf: &TableFactor) -> Option<TableRef> {
    match tf {
        TableFactor::Table { name, alias, .. } => {
            let table_name = name.to_string().to_lowercase();
            let alias_name = alias
                .as_ref()
                .map(|a| a.name.value.to_lowercase())
                .unwrap_or_else(|| table_name.clone());
            Some(TableRef {
                table_name,
                alias: alias_name,
            })
        }
        TableFactor::Derived { alias, .. } => alias.as_ref().map(|a| TableRef {
            table_name: a.name.value.to_lowercase(),
            alias: a.name.value.to_lowercase(),
        }),
        _ => None,
    }
}

/// Detect `distance(x, y) < d` or `d > distance(x, y)`, returning the two
/// argument texts (lowercased) and the literal distance.
fn match_distance_predicate(expr: &Expr) -> Option<(String, String, f64)> {
    if let Expr::BinaryOp { left, op, right } = expr {
        use sqlparser::ast::BinaryOperator::{Gt, Lt};
        match op {
            Lt => try_extract_distance(left, right),
            Gt => try_extract_distance(right, left),
            _ => None,
        }
    } else {
        None
    }
}

fn try_extract_distance(fn_side: &Expr, literal_side: &Expr) -> Option<(String, String, f64)> {
    let fn_text = fn_side.to_string();
    let lower = fn_text.to_lowercase();
    if !lower.starts_with("distance(") {
        return None;
    }
    let distance = match literal_side {
        Expr::Value(Value::Number(n, _)) => n.parse::<f64>().ok()?,
        _ => return None,
    };
    let open = lower.find('(')?;
    let close = lower.rfind(')')?;
    if close <= open {
        return None;
    }
    let inner = &fn_text[open + 1..close];
    let parts = split_top_level_commas(inner);
    if parts.len() != 2 {
        return None;
    }
    Some((
        parts[0].trim().to_lowercase(),
        parts[1].trim().to_lowercase(),
        distance,
    ))
}

fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

fn alias_prefix(qualified: &str) -> Option<String> {
    qualified.split('.').next().map(|s| s.to_string())
}

/// `true` when `expr` is an equality join on the partition key across
/// `a` and `b` — e.g. `a.region_id = b.region_id` — which conveys no
/// constraint beyond partition alignment.
fn is_partition_key_equi_join(expr: &Expr, partition_key: &str, a: &str, b: &str) -> bool {
    let key = partition_key.to_lowercase();
    if let Expr::BinaryOp {
        left,
        op: sqlparser::ast::BinaryOperator::Eq,
        right,
    } = expr
    {
        let left_match = matches_qualified(left, a, &key) || matches_qualified(left, b, &key);
        let right_match = matches_qualified(right, a, &key) || matches_qualified(right, b, &key);
        return left_match && right_match;
    }
    false
}

fn matches_qualified(expr: &Expr, alias: &str, column: &str) -> bool {
    if let Expr::CompoundIdentifier(parts) = expr {
        if parts.len() >= 2 {
            return parts[0].value.to_lowercase() == alias
                && parts.last().unwrap().value.to_lowercase() == column;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> QueryProcessorOptions {
        QueryProcessorOptions::default()
    }

    #[test]
    fn single_table_no_where_yields_one_fragment() {
        let fragments =
            generate_fragments("select * from customer", "region_id", &opts()).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].sql, "select distinct region_id from customer");
    }

    #[test]
    fn single_table_with_unrelated_predicate_still_anchors() {
        let fragments = generate_fragments(
            "select * from customer c where c.mktsegment = 'BUILDING'",
            "region_id",
            &opts(),
        )
        .unwrap();
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].sql.contains("mktsegment"));
    }

    #[test]
    fn join_without_follow_graph_yields_anchor_component_only() {
        let sql = "select * from customer c, orders o where c.id = o.cust_id and c.region_id = 1";
        let fragments = generate_fragments(sql, "region_id", &opts()).unwrap();
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].sql.contains("customer"));
        assert!(fragments[0].sql.contains("orders"));
    }

    #[test]
    fn follow_graph_enumerates_all_connected_subsets() {
        let mut options = opts();
        options.follow_graph = true;
        let sql = "select * from customer c, orders o where c.id = o.cust_id";
        let fragments = generate_fragments(sql, "region_id", &options).unwrap();
        // {c} {o} {c,o} -- exactly 3 connected subsets of a 2-vertex path.
        assert_eq!(fragments.len(), 3);
    }

    #[test]
    fn no_anchor_without_follow_graph_warns_and_returns_empty() {
        let sql = "select * from customer c, orders o where c.id = o.cust_id";
        let fragments = generate_fragments(sql, "region_id", &opts()).unwrap();
        assert!(fragments.is_empty());
    }

    #[test]
    fn no_anchor_strict_mode_errors() {
        let mut options = opts();
        options.warn_no_partition_key = false;
        let sql = "select * from customer c, orders o where c.id = o.cust_id";
        let err = generate_fragments(sql, "region_id", &options).unwrap_err();
        assert!(matches!(err, QueryProcessorError::NoPartitionKey(_)));
    }

    #[test]
    fn commutative_equality_operands_hash_identically() {
        let sql1 = "select * from customer c where c.id = 1 and c.region_id = c.region_id";
        let sql2 = "select * from customer c where 1 = c.id";
        let f1 = generate_fragments(sql1, "region_id", &opts()).unwrap();
        let f2 = generate_fragments(sql2, "region_id", &opts()).unwrap();
        assert_eq!(f1[0].hash, f2[0].hash);
    }

    #[test]
    fn whitespace_insensitive() {
        let sql1 = "select * from customer c where c.id=1";
        let sql2 = "select   *   from   customer   c   where   c.id = 1";
        let f1 = generate_fragments(sql1, "region_id", &opts()).unwrap();
        let f2 = generate_fragments(sql2, "region_id", &opts()).unwrap();
        assert_eq!(f1[0].hash, f2[0].hash);
    }

    #[test]
    fn join_on_form_and_comma_join_form_hash_identically() {
        let explicit_join =
            "select * from customer c join orders o on c.id = o.cust_id where c.region_id = 1";
        let comma_join =
            "select * from customer c, orders o where c.id = o.cust_id and c.region_id = 1";
        let f1 = generate_fragments(explicit_join, "region_id", &opts()).unwrap();
        let f2 = generate_fragments(comma_join, "region_id", &opts()).unwrap();
        assert_eq!(f1[0].hash, f2[0].hash);
    }

    #[test]
    fn snap_equivalent_distances_hash_identically() {
        let mut options = opts();
        options.distance_snap_unit = 50.0;
        let sql1 = "select * from poi p where distance(p.geom, p.geom) < 101";
        let sql2 = "select * from poi p where distance(p.geom, p.geom) < 150";
        let f1 = generate_fragments(sql1, "region_id", &options).unwrap();
        let f2 = generate_fragments(sql2, "region_id", &options).unwrap();
        assert_eq!(f1[0].hash, f2[0].hash);
        assert!(f1[0].sql.contains("within buffer"));
    }

    #[test]
    fn skip_partition_key_joins_drops_redundant_predicate() {
        let mut options = opts();
        options.skip_partition_key_joins = true;
        options.follow_graph = true;
        let sql = "select * from a, b where a.region_id = b.region_id";
        let fragments = generate_fragments(sql, "region_id", &options).unwrap();
        // the equi-join predicate conveys no constraint once dropped, so
        // {a,b} no longer has a connecting edge in the join graph.
        assert!(fragments.iter().all(|f| f.alias_count == 1));
    }

    #[test]
    fn dedup_by_hash() {
        let sql = "select * from customer c where c.id = 1 or c.id = 1";
        let fragments = generate_fragments(sql, "region_id", &opts()).unwrap();
        assert_eq!(fragments.len(), 1);
    }

    #[test]
    fn unparseable_sql_is_parse_error() {
        let err = generate_fragments("not valid sql at all (((", "region_id", &opts())
            .unwrap_err();
        assert!(matches!(err, QueryProcessorError::ParseError(_)));
    }
}
