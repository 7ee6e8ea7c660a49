//! ORDER BY conversion
//!
//! Sort terms push down natively while they remain bare root-entity columns;
//! the first term that cannot be pushed stops the native prefix and every
//! term from there on is compiled to a local selector. Selectors are compiled
//! for the native prefix too: the local re-sort needs them to recognize runs
//! of rows the store already ordered.

use super::bindings::as_column;
use super::{ColumnSource, QueryBuilder, SortKey};
use crate::error::{Error, Result};
use crate::fetch::Node;
use sqlparser::ast::{Expr, OrderByExpr, Value as AstValue};

impl<'a> QueryBuilder<'a> {
    pub(crate) fn convert_order_by(&mut self, terms: &[OrderByExpr]) -> Result<()> {
        // Aggregate queries never sort natively: the store orders source
        // rows, not groups.
        let mut pushdown = self.grouping.is_none();

        for term in terms {
            if term.nulls_first.is_some() {
                return Err(Error::unsupported("NULLS FIRST/LAST", &term.expr));
            }
            if term.with_fill.is_some() {
                return Err(Error::unsupported("WITH FILL", &term.expr));
            }
            let descending = term.asc == Some(false);

            if pushdown {
                match self.try_push_order(&term.expr, descending)? {
                    Some(selector) => {
                        self.post_sort.push(SortKey {
                            natively_satisfied: true,
                            selector,
                            descending,
                        });
                        continue;
                    }
                    None => pushdown = false,
                }
            }

            let selector = self.order_selector(&term.expr)?;
            self.post_sort.push(SortKey {
                natively_satisfied: false,
                selector,
                descending,
            });
        }
        Ok(())
    }

    /// Pushes one term natively if it is a bare column of the root entity.
    /// Returns the run-boundary selector on success.
    fn try_push_order(
        &mut self,
        expr: &Expr,
        descending: bool,
    ) -> Result<Option<super::ScalarFn>> {
        let Some((qualifier, column)) = as_column(expr) else {
            return Ok(None);
        };
        let Some((node, canonical)) = self.bindings.resolve_opt(qualifier, column)? else {
            return Ok(None);
        };
        if node != self.tree.root() {
            return Ok(None);
        }
        let index = self.attach_column(node, &canonical);
        self.tree.add_child(
            node,
            Node::Order {
                attribute: canonical,
                descending,
            },
        );
        Ok(Some(row_selector(index)))
    }

    /// Resolves one term to a local selector: an ordinal into the select
    /// list, an output alias, or a full expression.
    fn order_selector(&mut self, expr: &Expr) -> Result<super::ScalarFn> {
        if let Expr::Value(AstValue::Number(text, _)) = expr {
            let ordinal: usize = text
                .parse()
                .map_err(|_| Error::InvalidValue(format!("bad ORDER BY ordinal {}", text)))?;
            let column = self
                .output
                .get(ordinal.wrapping_sub(1))
                .ok_or_else(|| {
                    Error::InvalidValue(format!("ORDER BY ordinal {} out of range", ordinal))
                })?;
            return Ok(self.source_selector(&column.source));
        }

        if let Expr::Identifier(ident) = expr {
            let found = self
                .output
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&ident.value))
                .map(|c| match &c.source {
                    ColumnSource::Row(index) => ColumnSource::Row(*index),
                    ColumnSource::Calculated(index) => ColumnSource::Calculated(*index),
                });
            if let Some(source) = found {
                return Ok(self.source_selector(&source));
            }
        }

        self.compile_scalar(expr)
    }

    fn source_selector(&self, source: &ColumnSource) -> super::ScalarFn {
        match source {
            ColumnSource::Row(index) => row_selector(*index),
            ColumnSource::Calculated(index) => self.calculated[*index].1.clone(),
        }
    }
}

fn row_selector(index: usize) -> super::ScalarFn {
    use crate::types::Value;
    std::sync::Arc::new(move |row| Ok(row.get(index).cloned().unwrap_or(Value::Null)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bindings::TableBinding;
    use crate::types::{
        ColumnSchema, ColumnType, MetadataProvider, StaticMetadata, TableSchema, Value,
    };
    use sqlparser::dialect::MsSqlDialect;
    use sqlparser::parser::Parser;

    fn metadata() -> StaticMetadata {
        StaticMetadata::new().with_table(TableSchema::new(
            "account",
            "accountid",
            vec![
                ColumnSchema::new("accountid", ColumnType::Uuid),
                ColumnSchema::new("name", ColumnType::String),
                ColumnSchema::new("revenue", ColumnType::Integer),
            ],
        ))
    }

    fn builder(meta: &StaticMetadata) -> QueryBuilder<'_> {
        let mut b = QueryBuilder::new(meta, "account");
        let root = b.tree.root();
        b.bindings.push(TableBinding {
            alias: "account".into(),
            schema: meta.table_schema("account").unwrap(),
            node: root,
        });
        b
    }

    fn parse_order(sql: &str) -> Vec<OrderByExpr> {
        let full = format!("SELECT 1 FROM t ORDER BY {}", sql);
        let statements = Parser::parse_sql(&MsSqlDialect {}, &full).unwrap();
        match statements.into_iter().next() {
            Some(sqlparser::ast::Statement::Query(q)) => q.order_by.unwrap().exprs,
            _ => panic!("expected a query"),
        }
    }

    #[test]
    fn bare_columns_push_down_natively() {
        let meta = metadata();
        let mut b = builder(&meta);
        b.convert_order_by(&parse_order("name, revenue DESC")).unwrap();
        assert_eq!(b.post_sort.len(), 2);
        assert!(b.post_sort.iter().all(|k| k.natively_satisfied));
        assert!(b.post_sort[1].descending);
        let orders: Vec<_> = b
            .tree
            .children(b.tree.root())
            .iter()
            .filter(|&&c| matches!(b.tree.node(c), Node::Order { .. }))
            .collect();
        assert_eq!(orders.len(), 2);
    }

    #[test]
    fn expression_term_stops_the_native_prefix() {
        let meta = metadata();
        let mut b = builder(&meta);
        b.convert_order_by(&parse_order("name, LEN(name)")).unwrap();
        assert!(b.post_sort[0].natively_satisfied);
        assert!(!b.post_sort[1].natively_satisfied);
        // The first term still ends up a native order node.
        let orders = b
            .tree
            .children(b.tree.root())
            .iter()
            .filter(|&&c| matches!(b.tree.node(c), Node::Order { .. }))
            .count();
        assert_eq!(orders, 1);
    }

    #[test]
    fn explicit_nulls_first_is_rejected() {
        let meta = metadata();
        let mut b = builder(&meta);
        let err = b
            .convert_order_by(&parse_order("name NULLS FIRST"))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedConstruct { .. }));
    }

    #[test]
    fn selector_reads_the_attached_column() {
        let meta = metadata();
        let mut b = builder(&meta);
        b.convert_order_by(&parse_order("revenue")).unwrap();
        let key = &b.post_sort[0];
        assert_eq!((key.selector)(&vec![Value::I64(5)]).unwrap(), Value::I64(5));
    }
}
