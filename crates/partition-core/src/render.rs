//! Fixed-format canonical rendering of SQL expressions.
//!
//! Only the constructs the canonicalizer needs tight control over —
//! identifiers, literals, and binary/unary operators — are rendered by hand
//! with lowercase keywords and commutative-operand ordering. Everything
//! else (function calls, `BETWEEN`, `LIKE`, subqueries, casts, ...) falls
//! back to sqlparser's own `Display`, lowercased, and is treated as opaque:
//! we never attempt to semantically simplify a predicate we don't fully
//! understand.

use std::collections::BTreeSet;

use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value};

/// Render an expression in canonical form.
pub fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Nested(inner) => render_expr(inner),
        Expr::BinaryOp { left, op, right } => {
            let lhs = render_expr(left);
            let rhs = render_expr(right);
            let op_str = render_binop(op);
            if is_commutative(op) && rhs < lhs {
                format!("{} {} {}", rhs, op_str, lhs)
            } else {
                format!("{} {} {}", lhs, op_str, rhs)
            }
        }
        Expr::UnaryOp { op, expr } => format!("{} {}", render_unop(op), render_expr(expr)),
        Expr::Identifier(ident) => ident.value.to_lowercase(),
        Expr::CompoundIdentifier(parts) => parts
            .iter()
            .map(|p| p.value.to_lowercase())
            .collect::<Vec<_>>()
            .join("."),
        Expr::Value(v) => render_value(v),
        other => other.to_string().to_lowercase(),
    }
}

fn is_commutative(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::And
            | BinaryOperator::Or
            | BinaryOperator::Plus
            | BinaryOperator::Multiply
    )
}

fn render_binop(op: &BinaryOperator) -> String {
    match op {
        BinaryOperator::Eq => "=".to_string(),
        BinaryOperator::NotEq => "<>".to_string(),
        BinaryOperator::Lt => "<".to_string(),
        BinaryOperator::LtEq => "<=".to_string(),
        BinaryOperator::Gt => ">".to_string(),
        BinaryOperator::GtEq => ">=".to_string(),
        BinaryOperator::And => "and".to_string(),
        BinaryOperator::Or => "or".to_string(),
        BinaryOperator::Plus => "+".to_string(),
        BinaryOperator::Minus => "-".to_string(),
        BinaryOperator::Multiply => "*".to_string(),
        BinaryOperator::Divide => "/".to_string(),
        BinaryOperator::Modulo => "%".to_string(),
        BinaryOperator::StringConcat => "||".to_string(),
        other => other.to_string().to_lowercase(),
    }
}

fn render_unop(op: &UnaryOperator) -> String {
    match op {
        UnaryOperator::Not => "not".to_string(),
        UnaryOperator::Minus => "-".to_string(),
        UnaryOperator::Plus => "+".to_string(),
        other => other.to_string().to_lowercase(),
    }
}

fn render_value(v: &Value) -> String {
    match v {
        Value::Number(n, _) => n.clone(),
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
            format!("'{}'", s.replace('\'', "''"))
        }
        Value::Boolean(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string().to_lowercase(),
    }
}

/// Recursively flatten a conjunction (`AND`-chain) into its leaf conjuncts.
pub fn split_conjuncts(expr: &Expr, out: &mut Vec<Expr>) {
    if let Expr::BinaryOp {
        left,
        op: BinaryOperator::And,
        right,
    } = expr
    {
        split_conjuncts(left, out);
        split_conjuncts(right, out);
    } else if let Expr::Nested(inner) = expr {
        split_conjuncts(inner, out);
    } else {
        out.push(expr.clone());
    }
}

/// `true` for always-true equalities between syntactically identical
/// operands, e.g. `1 = 1` or `a.x = a.x`, which are dropped during
/// constant folding rather than kept as fragment predicates.
pub fn is_trivially_true(expr: &Expr) -> bool {
    if let Expr::BinaryOp {
        left,
        op: BinaryOperator::Eq,
        right,
    } = expr
    {
        return render_expr(left) == render_expr(right);
    }
    false
}

/// Table aliases referenced by an expression, via qualified
/// (`alias.column`) references. `single_alias`, when given, is attributed
/// to bare (unqualified) identifiers — sound for single-table queries,
/// where every column necessarily belongs to that one alias.
pub fn collect_aliases(expr: &Expr, single_alias: Option<&str>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    walk_aliases(expr, single_alias, &mut out);
    out
}

fn walk_aliases(expr: &Expr, single_alias: Option<&str>, out: &mut BTreeSet<String>) {
    match expr {
        Expr::CompoundIdentifier(parts) if !parts.is_empty() => {
            out.insert(parts[0].value.to_lowercase());
        }
        Expr::Identifier(_) => {
            if let Some(a) = single_alias {
                out.insert(a.to_lowercase());
            }
        }
        Expr::Nested(inner) | Expr::UnaryOp { expr: inner, .. } => {
            walk_aliases(inner, single_alias, out)
        }
        Expr::BinaryOp { left, right, .. } => {
            walk_aliases(left, single_alias, out);
            walk_aliases(right, single_alias, out);
        }
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => walk_aliases(inner, single_alias, out),
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_aliases(expr, single_alias, out);
            walk_aliases(low, single_alias, out);
            walk_aliases(high, single_alias, out);
        }
        Expr::InList { expr, list, .. } => {
            walk_aliases(expr, single_alias, out);
            for e in list {
                walk_aliases(e, single_alias, out);
            }
        }
        Expr::Like { expr, pattern, .. } => {
            walk_aliases(expr, single_alias, out);
            walk_aliases(pattern, single_alias, out);
        }
        _ => {
            // Opaque node (function call, cast, subquery, ...): best-effort
            // scan its textual form for `alias.` prefixes so it still
            // counts toward the right fragment's alias set.
            let text = expr.to_string().to_lowercase();
            for (alias, _) in find_qualified_refs(&text) {
                out.insert(alias);
            }
        }
    }
}

/// Extremely small scanner for `ident.ident` occurrences in rendered SQL
/// text, used only as a fallback for AST nodes we don't walk by hand.
fn find_qualified_refs(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let bytes: Vec<char> = text.chars().collect();
    let is_ident_char = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == '.' {
            let mut start = i;
            while start > 0 && is_ident_char(bytes[start - 1]) {
                start -= 1;
            }
            let mut end = i + 1;
            while end < bytes.len() && is_ident_char(bytes[end]) {
                end += 1;
            }
            if start < i && end > i + 1 {
                let alias: String = bytes[start..i].iter().collect();
                let col: String = bytes[i + 1..end].iter().collect();
                out.push((alias, col));
            }
            i = end;
        } else {
            i += 1;
        }
    }
    out
}

/// Find the table alias from which `partition_key` is reachable as a
/// qualified reference (`alias.partition_key`) anywhere inside `expr`.
pub fn find_partition_key_alias(expr: &Expr, partition_key: &str) -> Option<String> {
    let key = partition_key.to_lowercase();
    match expr {
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            if parts.last().unwrap().value.to_lowercase() == key {
                Some(parts[0].value.to_lowercase())
            } else {
                None
            }
        }
        Expr::Nested(inner) | Expr::UnaryOp { expr: inner, .. } => {
            find_partition_key_alias(inner, partition_key)
        }
        Expr::BinaryOp { left, right, .. } => find_partition_key_alias(left, partition_key)
            .or_else(|| find_partition_key_alias(right, partition_key)),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => {
            find_partition_key_alias(inner, partition_key)
        }
        Expr::Between { expr, .. } => find_partition_key_alias(expr, partition_key),
        Expr::InList { expr, .. } => find_partition_key_alias(expr, partition_key),
        Expr::Like { expr, .. } => find_partition_key_alias(expr, partition_key),
        _ => {
            let text = expr.to_string().to_lowercase();
            find_qualified_refs(&text)
                .into_iter()
                .find(|(_, col)| *col == key)
                .map(|(alias, _)| alias)
        }
    }
}
