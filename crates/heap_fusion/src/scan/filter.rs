//! Translation of DataFusion filter expressions into host scan keys.
//!
//! Only conjunctions of `column <op> literal` comparisons and null tests are
//! translated. Untranslatable conjuncts are left to DataFusion, which
//! re-applies every pushed filter because pushdown is reported as inexact.

use datafusion::logical_expr::{Expr, Operator};
use heap_store::{ScanKey, ScanStrategy, TupleDesc};

use crate::convert::scalar_to_datum;

/// Translates `expr` against the live columns of `desc`.
///
/// Returns `None` when no conjunct of `expr` can be evaluated by the host.
pub fn translate_filter(expr: &Expr, desc: &TupleDesc) -> Option<Vec<ScanKey>> {
    let mut keys = Vec::new();
    collect_scan_keys(expr, desc, &mut keys);
    (!keys.is_empty()).then_some(keys)
}

fn collect_scan_keys(expr: &Expr, desc: &TupleDesc, out: &mut Vec<ScanKey>) {
    match expr {
        Expr::BinaryExpr(binary) if binary.op == Operator::And => {
            collect_scan_keys(binary.left.as_ref(), desc, out);
            collect_scan_keys(binary.right.as_ref(), desc, out);
        }
        Expr::BinaryExpr(binary) => {
            // Decision: `literal <op> column` is flipped into `column <op'> literal`.
            let (column, strategy, literal) = match (
                column_name(binary.left.as_ref()),
                binary.right.as_ref(),
            ) {
                (Some(column), Expr::Literal(value, _)) => (column, strategy_for(binary.op), value),
                _ => match (column_name(binary.right.as_ref()), binary.left.as_ref()) {
                    (Some(column), Expr::Literal(value, _)) => {
                        (column, strategy_for(reverse_comparison(binary.op)), value)
                    }
                    _ => return,
                },
            };
            let (Some(strategy), Some(attnum)) = (strategy, desc.find_live(column)) else {
                return;
            };
            // Decision: a literal that does not convert to the column type stays
            // with DataFusion.
            let Some(argument) = scalar_to_datum(literal, desc.attrs[attnum].type_oid) else {
                return;
            };
            out.push(ScanKey::compare(attnum, strategy, argument));
        }
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => {
            let Some(attnum) = column_name(inner.as_ref()).and_then(|name| desc.find_live(name))
            else {
                return;
            };
            out.push(ScanKey::null_test(attnum, matches!(expr, Expr::IsNull(_))));
        }
        _ => {}
    }
}

/// Unqualified column name of a bare column reference.
fn column_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Column(column) => Some(column.name.as_str()),
        _ => None,
    }
}

/// Host strategy for a comparison operator; `<>` and the rest have none.
fn strategy_for(op: Operator) -> Option<ScanStrategy> {
    match op {
        Operator::Eq => Some(ScanStrategy::Equal),
        Operator::Lt => Some(ScanStrategy::Less),
        Operator::LtEq => Some(ScanStrategy::LessEqual),
        Operator::Gt => Some(ScanStrategy::Greater),
        Operator::GtEq => Some(ScanStrategy::GreaterEqual),
        _ => None,
    }
}

fn reverse_comparison(op: Operator) -> Operator {
    match op {
        Operator::Lt => Operator::Gt,
        Operator::LtEq => Operator::GtEq,
        Operator::Gt => Operator::Lt,
        Operator::GtEq => Operator::LtEq,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::prelude::{col, lit};
    use heap_store::{Attribute, Datum, TypeOid};

    fn desc() -> TupleDesc {
        let mut dropped = Attribute::new("gone", TypeOid::INT4);
        dropped.dropped = true;
        TupleDesc::new(vec![
            Attribute::new("a", TypeOid::INT4),
            dropped,
            Attribute::new("b", TypeOid::TEXT),
        ])
    }

    #[test]
    fn conjunction_translates_each_supported_side() {
        let expr = col("a").gt_eq(lit(2i32)).and(col("b").eq(lit("x")));
        let keys = translate_filter(&expr, &desc()).expect("keys");
        assert_eq!(
            keys,
            vec![
                ScanKey::compare(0, ScanStrategy::GreaterEqual, Datum::Int32(2)),
                ScanKey::compare(2, ScanStrategy::Equal, Datum::Text("x".into())),
            ]
        );
    }

    #[test]
    fn literal_on_the_left_flips_the_operator() {
        let expr = lit(5i32).gt(col("a"));
        let keys = translate_filter(&expr, &desc()).expect("keys");
        assert_eq!(keys, vec![ScanKey::compare(0, ScanStrategy::Less, Datum::Int32(5))]);
    }

    #[test]
    fn unsupported_shapes_are_not_pushed() {
        assert!(translate_filter(&col("a").not_eq(lit(1i32)), &desc()).is_none());
        assert!(translate_filter(&col("a").eq(lit(1i32)).or(col("a").eq(lit(2i32))), &desc()).is_none());
        assert!(translate_filter(&col("gone").eq(lit(1i32)), &desc()).is_none());
        assert!(translate_filter(&col("a").eq(lit("x")), &desc()).is_none());
    }

    #[test]
    fn null_tests_are_pushed() {
        let keys = translate_filter(&col("b").is_null(), &desc()).expect("keys");
        assert_eq!(keys, vec![ScanKey::null_test(2, true)]);
    }
}
