//! Expression tree transformer.
//!
//! A post-order rebuild over every expression variant. Subquery sites are
//! offered to the [`MatcherRegistry`]: a recognized subquery is replaced by
//! `<join_alias>.<column>` and recorded, anything else is kept as a subquery
//! with its own interior rewritten.
//!
//! A recognized subquery nested inside another query is only replaced when
//! its correlation qualifiers are not bound by that query's own `FROM`, since
//! the replacement is joined onto the outermost select.

use std::collections::BTreeMap;

use tracing::trace;

use crate::ast::{
    CaseBranch, Cte, Expr, Function, Ident, Join, OrderByExpr, Query, Select, SelectItem,
    TableFactor, TableWithJoins, WindowSpec,
};
use crate::descriptor::{Correlation, ExtractedSubquery, GeneratedCte, SubqueryId};
use crate::matcher::MatcherRegistry;

/// Result of transforming a single expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformation {
    pub expr: Expr,
    pub extracted: BTreeMap<SubqueryId, ExtractedSubquery>,
}

impl Transformation {
    /// The generated CTEs in traversal order, one per replaced subquery.
    pub fn generated_ctes(&self) -> Vec<GeneratedCte> {
        self.extracted.values().map(|e| e.cte.clone()).collect()
    }
}

/// Transform one expression tree with a fresh transformer.
pub fn transform(root: Expr, registry: &MatcherRegistry) -> Transformation {
    let mut transformer = ExpressionTransformer::new(registry);
    let expr = transformer.transform(root);
    Transformation {
        expr,
        extracted: transformer.finish(),
    }
}

enum SiteOutcome {
    Replaced(Expr),
    Kept(Box<Query>),
}

/// Accumulates extractions over any number of roots belonging to one query,
/// so subquery ids stay unique across them.
pub struct ExpressionTransformer<'r> {
    registry: &'r MatcherRegistry,
    next_id: usize,
    extracted: BTreeMap<SubqueryId, ExtractedSubquery>,
    /// Relation names of the queries entered below the root.
    scopes: Vec<Vec<Ident>>,
}

impl<'r> ExpressionTransformer<'r> {
    pub fn new(registry: &'r MatcherRegistry) -> Self {
        Self {
            registry,
            next_id: 0,
            extracted: BTreeMap::new(),
            scopes: Vec::new(),
        }
    }

    pub fn extracted(&self) -> &BTreeMap<SubqueryId, ExtractedSubquery> {
        &self.extracted
    }

    pub fn finish(self) -> BTreeMap<SubqueryId, ExtractedSubquery> {
        self.extracted
    }

    pub fn transform(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Literal(_) | Expr::Column(_) | Expr::Wildcard | Expr::QualifiedWildcard(_) => {
                expr
            }
            Expr::Function(func) => Expr::Function(self.function(func)),
            Expr::Unary { op, expr } => Expr::Unary {
                op,
                expr: self.boxed(expr),
            },
            Expr::Arithmetic { left, op, right } => Expr::Arithmetic {
                left: self.boxed(left),
                op,
                right: self.boxed(right),
            },
            Expr::Comparison { left, op, right } => Expr::Comparison {
                left: self.boxed(left),
                op,
                right: self.boxed(right),
            },
            Expr::And { left, right } => Expr::And {
                left: self.boxed(left),
                right: self.boxed(right),
            },
            Expr::Or { left, right } => Expr::Or {
                left: self.boxed(left),
                right: self.boxed(right),
            },
            Expr::Not(expr) => Expr::Not(self.boxed(expr)),
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => Expr::Between {
                expr: self.boxed(expr),
                negated,
                low: self.boxed(low),
                high: self.boxed(high),
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: self.boxed(expr),
                list: self.all(list),
                negated,
            },
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let expr = self.boxed(expr);
                match self.subquery_site(subquery) {
                    SiteOutcome::Replaced(column) => Expr::InList {
                        expr,
                        list: vec![column],
                        negated,
                    },
                    SiteOutcome::Kept(subquery) => Expr::InSubquery {
                        expr,
                        subquery,
                        negated,
                    },
                }
            }
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: self.boxed(expr),
                negated,
            },
            Expr::Cast {
                expr,
                data_type,
                style,
            } => Expr::Cast {
                expr: self.boxed(expr),
                data_type,
                style,
            },
            Expr::Case {
                operand,
                branches,
                else_result,
            } => Expr::Case {
                operand: operand.map(|e| self.boxed(e)),
                branches: branches
                    .into_iter()
                    .map(|branch| CaseBranch {
                        condition: self.transform(branch.condition),
                        result: self.transform(branch.result),
                    })
                    .collect(),
                else_result: else_result.map(|e| self.boxed(e)),
            },
            Expr::Extract { field, expr } => Expr::Extract {
                field,
                expr: self.boxed(expr),
            },
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => Expr::Like {
                expr: self.boxed(expr),
                pattern: self.boxed(pattern),
                negated,
                case_insensitive,
            },
            Expr::Exists { subquery, negated } => Expr::Exists {
                subquery: Box::new(self.transform_query(*subquery)),
                negated,
            },
            Expr::Subquery(subquery) => match self.subquery_site(subquery) {
                SiteOutcome::Replaced(column) => column,
                SiteOutcome::Kept(subquery) => Expr::Subquery(subquery),
            },
            Expr::Nested(expr) => Expr::Nested(self.boxed(expr)),
        }
    }

    /// Rewrites every expression inside `query` without treating the query
    /// itself as a subquery site.
    pub fn transform_query(&mut self, query: Query) -> Query {
        let Query {
            with,
            body,
            order_by,
            limit,
            offset,
        } = query;

        let names = body.relation_names().into_iter().cloned().collect();
        self.scopes.push(names);
        let query = Query {
            with: with.map(|ctes| {
                ctes.into_iter()
                    .map(|cte| Cte {
                        name: cte.name,
                        query: self.transform_query(cte.query),
                    })
                    .collect()
            }),
            body: self.select(body),
            order_by: self.order_by(order_by),
            limit: limit.map(|e| self.transform(e)),
            offset: offset.map(|e| self.transform(e)),
        };
        self.scopes.pop();
        query
    }

    /// Whether a qualifier of the correlation is bound by an enclosing query
    /// below the root.
    fn is_shadowed(&self, correlation: &Correlation) -> bool {
        let qualifiers = [correlation.outer.table.as_ref(), correlation.inner_table.as_ref()];
        self.scopes.iter().flatten().any(|name| {
            qualifiers
                .iter()
                .flatten()
                .any(|qualifier| name.same_as(qualifier))
        })
    }

    fn subquery_site(&mut self, subquery: Box<Query>) -> SiteOutcome {
        let id = SubqueryId(self.next_id);
        self.next_id += 1;

        match self.registry.find(&subquery) {
            Some(found) if self.is_shadowed(&found.correlation) => {
                trace!(%id, name = %found.name, "correlation bound by an enclosing query");
                SiteOutcome::Kept(Box::new(self.transform_query(*subquery)))
            }
            Some(found) => {
                let replacement = found.replacement();
                let cte = found.to_generated_cte();
                trace!(%id, name = %cte.name, "replacing subquery");
                self.extracted.insert(
                    id,
                    ExtractedSubquery {
                        subquery: *subquery,
                        found,
                        cte,
                    },
                );
                SiteOutcome::Replaced(replacement)
            }
            None => SiteOutcome::Kept(Box::new(self.transform_query(*subquery))),
        }
    }

    fn select(&mut self, select: Select) -> Select {
        let Select {
            distinct,
            projection,
            from,
            selection,
            group_by,
            having,
        } = select;

        Select {
            distinct,
            projection: projection
                .into_iter()
                .map(|item| match item {
                    SelectItem::Expr { expr, alias } => SelectItem::Expr {
                        expr: self.transform(expr),
                        alias,
                    },
                    other => other,
                })
                .collect(),
            from: from
                .into_iter()
                .map(|table| TableWithJoins {
                    relation: self.table_factor(table.relation),
                    joins: table
                        .joins
                        .into_iter()
                        .map(|join| Join {
                            kind: join.kind,
                            relation: self.table_factor(join.relation),
                            on: self.transform(join.on),
                        })
                        .collect(),
                })
                .collect(),
            selection: selection.map(|e| self.transform(e)),
            group_by: self.all(group_by),
            having: having.map(|e| self.transform(e)),
        }
    }

    fn table_factor(&mut self, factor: TableFactor) -> TableFactor {
        match factor {
            TableFactor::Table { .. } => factor,
            TableFactor::Derived { subquery, alias } => TableFactor::Derived {
                subquery: Box::new(self.transform_query(*subquery)),
                alias,
            },
        }
    }

    fn function(&mut self, func: Function) -> Function {
        let Function {
            name,
            args,
            distinct,
            over,
        } = func;

        Function {
            name,
            args: args.map(|args| self.all(args)),
            distinct,
            over: over.map(|over| WindowSpec {
                partition_by: self.all(over.partition_by),
                order_by: self.order_by(over.order_by),
            }),
        }
    }

    fn order_by(&mut self, order_by: Vec<OrderByExpr>) -> Vec<OrderByExpr> {
        order_by
            .into_iter()
            .map(|o| OrderByExpr {
                expr: self.transform(o.expr),
                ..o
            })
            .collect()
    }

    fn boxed(&mut self, expr: Box<Expr>) -> Box<Expr> {
        Box::new(self.transform(*expr))
    }

    fn all(&mut self, exprs: Vec<Expr>) -> Vec<Expr> {
        exprs.into_iter().map(|e| self.transform(e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_query;
    use pretty_assertions::assert_eq;

    /// The first projected expression of `select <expr> from t`.
    fn expr(sql_expr: &str) -> Expr {
        let query = parse_query(&format!("select {} from analytics_enrollment_x as subax", sql_expr)).unwrap();
        match query.body.projection.into_iter().next() {
            Some(SelectItem::Expr { expr, .. }) => expr,
            other => panic!("unexpected projection {:?}", other),
        }
    }

    const LAST_SCHED: &str = "(select scheduleddate from analytics_event_x \
        where analytics_event_x.enrollment = subax.enrollment \
        and scheduleddate is not null order by occurreddate desc limit 1)";

    #[test]
    fn test_tree_without_subqueries_is_unchanged() {
        let registry = MatcherRegistry::new();
        for source in [
            "coalesce(a, b, 0) + 1",
            "case when a > 1 then 'x' else 'y' end",
            "a between 1 and 2 and not (b in (1, 2) or c is not null)",
            "cast(a as date)::text",
            "current_date",
            "now()",
            "extract(year from a) - -1",
            "a ilike 'x%'",
            "row_number() over (partition by a order by b desc)",
        ] {
            let input = expr(source);
            let output = transform(input.clone(), &registry);
            assert_eq!(output.expr, input, "{}", source);
            assert!(output.extracted.is_empty());
        }
    }

    #[test]
    fn test_function_without_argument_list_stays_absent() {
        let registry = MatcherRegistry::new();
        let output = transform(expr("current_date"), &registry);
        let Expr::Function(func) = output.expr else {
            panic!("expected function");
        };
        assert_eq!(func.args, None);
    }

    #[test]
    fn test_scalar_subquery_is_replaced() {
        let registry = MatcherRegistry::new();
        let output = transform(expr(&format!("{} is not null", LAST_SCHED)), &registry);
        assert_eq!(output.expr.to_string(), "ls.scheduleddate is not null");
        assert_eq!(output.extracted.len(), 1);
        let (id, extracted) = output.extracted.iter().next().unwrap();
        assert_eq!(*id, SubqueryId(0));
        assert_eq!(extracted.cte.name, "last_sched");
        assert_eq!(output.generated_ctes()[0].join_alias, "ls");
    }

    #[test]
    fn test_identical_subqueries_get_distinct_ids() {
        let registry = MatcherRegistry::new();
        let output = transform(expr(&format!("{} > {}", LAST_SCHED, LAST_SCHED)), &registry);
        assert_eq!(output.expr.to_string(), "ls.scheduleddate > ls.scheduleddate");
        let ids: Vec<_> = output.extracted.keys().copied().collect();
        assert_eq!(ids, vec![SubqueryId(0), SubqueryId(1)]);
        let ctes = output.generated_ctes();
        assert_eq!(ctes[0], ctes[1]);
    }

    #[test]
    fn test_in_subquery_is_eligible() {
        let registry = MatcherRegistry::new();
        let source = format!("a in {}", LAST_SCHED);
        let output = transform(expr(&source), &registry);
        assert_eq!(output.expr.to_string(), "a in (ls.scheduleddate)");
        assert!(matches!(output.expr, Expr::InList { negated: false, .. }));
    }

    #[test]
    fn test_unmatched_subquery_is_kept_and_interior_rewritten() {
        let registry = MatcherRegistry::new();
        let source = format!(
            "(select max(v) from other_table as o where o.d < {})",
            LAST_SCHED
        );
        let output = transform(expr(&source), &registry);
        assert_eq!(
            output.expr.to_string(),
            "(select max(v) from other_table as o where o.d < ls.scheduleddate)"
        );
        assert!(matches!(output.expr, Expr::Subquery(_)));
        assert_eq!(output.extracted.keys().next(), Some(&SubqueryId(1)));
    }

    #[test]
    fn test_unmatched_subquery_round_trips() {
        let registry = MatcherRegistry::new();
        let input = expr("(select max(v) from other_table as o where o.k = subax.k)");
        let output = transform(input.clone(), &registry);
        assert_eq!(output.expr, input);
        assert!(output.extracted.is_empty());
    }

    #[test]
    fn test_subquery_bound_by_enclosing_alias_is_kept() {
        let registry = MatcherRegistry::new();
        for source in [
            format!(
                "exists (select 1 from analytics_enrollment_y as subax where {} is not null)",
                LAST_SCHED
            ),
            format!(
                "(select max(v) from other_table as subax where subax.d < {})",
                LAST_SCHED
            ),
        ] {
            let input = expr(&source);
            let output = transform(input.clone(), &registry);
            assert_eq!(output.expr, input, "{}", source);
            assert!(output.extracted.is_empty(), "{}", source);
        }
    }

    #[test]
    fn test_scopes_are_left_on_exit() {
        let registry = MatcherRegistry::new();
        let source = format!(
            "exists (select 1 from analytics_enrollment_y as subax) and {} is not null",
            LAST_SCHED
        );
        let output = transform(expr(&source), &registry);
        assert_eq!(output.extracted.len(), 1);
        assert!(output.expr.to_string().ends_with("ls.scheduleddate is not null"));
    }

    #[test]
    fn test_operand_positions_are_preserved() {
        let registry = MatcherRegistry::new();
        let output = transform(expr(&format!("1 = 1 or {} < 2", LAST_SCHED)), &registry);
        let Expr::Or { left, right } = output.expr else {
            panic!("expected OR");
        };
        assert_eq!(left.to_string(), "1 = 1");
        assert_eq!(right.to_string(), "ls.scheduleddate < 2");
    }

    #[test]
    fn test_transformer_accumulates_over_roots() {
        let registry = MatcherRegistry::new();
        let mut transformer = ExpressionTransformer::new(&registry);
        transformer.transform(expr(LAST_SCHED));
        transformer.transform(expr(LAST_SCHED));
        assert_eq!(transformer.extracted().len(), 2);
        let extracted = transformer.finish();
        assert!(extracted.contains_key(&SubqueryId(1)));
    }
}
