//! Whole-statement optimizer: transforms each select, joins the hoisted CTEs
//! back in and injects them.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ast::{
    ColumnRef, Expr, Ident, Join, JoinKind, ObjectName, OrderByExpr, Query, Select, SelectItem,
    TableFactor, TableWithJoins,
};
use crate::descriptor::GeneratedCte;
use crate::error::HoistResult;
use crate::injector::CteInjector;
use crate::lower::parse_query;
use crate::matcher::MatcherRegistry;
use crate::transformer::ExpressionTransformer;

/// Result of optimizing one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Optimized {
    pub query: Query,
    /// Distinct CTEs that were hoisted, in the order they were injected.
    pub ctes: Vec<GeneratedCte>,
    /// Number of selects (main body or CTE bodies) that were rewritten.
    pub rewritten_selects: usize,
}

pub struct CteOptimizationPipeline {
    registry: MatcherRegistry,
    injector: CteInjector,
}

impl Default for CteOptimizationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl CteOptimizationPipeline {
    pub fn new() -> Self {
        Self::with_registry(MatcherRegistry::new())
    }

    pub fn with_registry(registry: MatcherRegistry) -> Self {
        Self {
            registry,
            injector: CteInjector::new(),
        }
    }

    pub fn registry(&self) -> &MatcherRegistry {
        &self.registry
    }

    /// Parse, optimize and render one statement.
    pub fn optimize(&self, sql: &str) -> HoistResult<String> {
        let query = parse_query(sql)?;
        Ok(self.optimize_query(query)?.query.to_string())
    }

    pub fn optimize_query(&self, mut query: Query) -> HoistResult<Optimized> {
        let existing: Vec<Ident> = query.ctes().iter().map(|c| c.name.clone()).collect();
        let mut hoisted: Vec<GeneratedCte> = Vec::new();
        let mut rewritten_selects = 0;

        if let Some(ctes) = query.with.as_mut() {
            for cte in ctes.iter_mut() {
                let label = cte.name.to_string();
                if self.rewrite_select(&mut cte.query, &existing, &mut hoisted, &label) {
                    rewritten_selects += 1;
                }
            }
        }
        if self.rewrite_select(&mut query, &existing, &mut hoisted, "main") {
            rewritten_selects += 1;
        }

        let added = self.injector.inject(&mut query, &hoisted)?;
        info!(ctes = added, selects = rewritten_selects, "optimized statement");

        Ok(Optimized {
            query,
            ctes: hoisted,
            rewritten_selects,
        })
    }

    /// Rewrites one select in place. Returns false, leaving the query as it
    /// was, when nothing matched or the rewrite could not be made safe.
    fn rewrite_select(
        &self,
        query: &mut Query,
        existing: &[Ident],
        hoisted: &mut Vec<GeneratedCte>,
        label: &str,
    ) -> bool {
        let mut transformer = ExpressionTransformer::new(&self.registry);
        let mut select = query.body.clone();
        select.projection = select
            .projection
            .into_iter()
            .map(|item| match item {
                SelectItem::Expr { expr, alias } => SelectItem::Expr {
                    expr: transformer.transform(expr),
                    alias,
                },
                other => other,
            })
            .collect();
        select.selection = select.selection.map(|e| transformer.transform(e));
        select.having = select.having.map(|e| transformer.transform(e));

        let extracted = transformer.finish();
        if extracted.is_empty() {
            return false;
        }

        let relations = select.relation_names();
        let mut ctes: Vec<GeneratedCte> = Vec::new();
        for extraction in extracted.into_values() {
            if let Some(inner) = &extraction.found.correlation.inner_table
                && relations.iter().any(|r| r.same_as(inner))
            {
                let reason = format!(
                    "'{}' correlates {} with this select's own {}",
                    extraction.cte.name, extraction.found.correlation.outer, inner
                );
                return reject(label, &reason);
            }
            match ctes.iter().find(|c| c.name == extraction.cte.name) {
                Some(seen) if *seen != extraction.cte => {
                    let reason = format!("'{}' generated twice with different shapes", seen.name);
                    return reject(label, &reason);
                }
                Some(_) => {}
                None => ctes.push(extraction.cte),
            }
        }

        if let Err(reason) = check_ctes(&select, &ctes, existing, hoisted) {
            return reject(label, &reason);
        }

        let mut order_by = query.order_by.clone();
        if let Err(reason) = qualify_collisions(&mut select, &mut order_by, &ctes) {
            return reject(label, &reason);
        }

        for cte in &ctes {
            let Some(entry) = binding_entry(&select, &cte.correlation.outer) else {
                return reject(label, "outer column is not in scope");
            };
            select.from[entry].joins.push(cte_join(cte));
        }

        debug!(select = label, ctes = ctes.len(), "rewrote select");
        query.body = select;
        query.order_by = order_by;
        for cte in ctes {
            if !hoisted.iter().any(|h| h.name == cte.name) {
                hoisted.push(cte);
            }
        }
        true
    }
}

fn reject(label: &str, reason: &str) -> bool {
    warn!(select = label, reason, "keeping select unchanged");
    false
}

fn check_ctes(
    select: &Select,
    ctes: &[GeneratedCte],
    existing: &[Ident],
    hoisted: &[GeneratedCte],
) -> Result<(), String> {
    let relations = select.relation_names();

    for (i, cte) in ctes.iter().enumerate() {
        let in_scope = cte
            .correlation
            .outer
            .table
            .as_ref()
            .is_some_and(|q| relations.iter().any(|r| r.same_as(q)));
        if !in_scope {
            return Err(format!(
                "'{}' correlates on {}, which is not a relation of this select",
                cte.name, cte.correlation.outer
            ));
        }
        if existing.iter().any(|e| e.same_as(&cte.name_ident())) {
            return Err(format!("the statement already defines a CTE named '{}'", cte.name));
        }
        if hoisted.iter().any(|h| h.name == cte.name && h.body != cte.body) {
            return Err(format!("'{}' was already hoisted with a different body", cte.name));
        }
        let alias = cte.alias_ident();
        if relations.iter().any(|r| r.same_as(&alias)) {
            return Err(format!("join alias '{}' is already used", cte.join_alias));
        }
        if ctes[..i].iter().any(|other| other.alias_ident().same_as(&alias)) {
            return Err(format!("join alias '{}' is shared by two CTEs", cte.join_alias));
        }
    }
    Ok(())
}

/// Index of the `FROM` entry whose relations include the outer column's
/// qualifier.
fn binding_entry(select: &Select, outer: &ColumnRef) -> Option<usize> {
    let qualifier = outer.table.as_ref()?;
    select.from.iter().position(|entry| {
        std::iter::once(&entry.relation)
            .chain(entry.joins.iter().map(|join| &join.relation))
            .filter_map(TableFactor::reference_name)
            .any(|name| name.same_as(qualifier))
    })
}

/// `left join <cte> as <alias> on <outer> = <alias>.<key>`
fn cte_join(cte: &GeneratedCte) -> Join {
    let alias = cte.alias_ident();
    Join {
        kind: JoinKind::Left,
        relation: TableFactor::Table {
            name: ObjectName(vec![cte.name_ident()]),
            alias: Some(alias.clone()),
        },
        on: Expr::eq(
            Expr::Column(cte.correlation.outer.clone()),
            Expr::Column(ColumnRef::qualified(alias, cte.correlation.key_column.clone())),
        ),
    }
}

/// Qualifies unqualified references to names the joined CTEs also expose.
fn qualify_collisions(
    select: &mut Select,
    order_by: &mut [OrderByExpr],
    ctes: &[GeneratedCte],
) -> Result<(), String> {
    let exposed: Vec<&Ident> = ctes.iter().flat_map(|c| c.output_columns()).collect();
    let output_aliases: Vec<Ident> = select
        .projection
        .iter()
        .filter_map(|item| match item {
            SelectItem::Expr {
                alias: Some(alias), ..
            } => Some(alias.clone()),
            _ => None,
        })
        .collect();

    let collides = |column: &ColumnRef| -> bool {
        column.table.is_none() && exposed.iter().any(|name| name.same_as(&column.name))
    };

    let mut found = false;
    visit_select_columns(select, &mut |column| found |= collides(&*column));
    for item in order_by.iter_mut() {
        if is_output_alias(&item.expr, &output_aliases) {
            continue;
        }
        item.expr.for_each_column_mut(&mut |column| found |= collides(&*column));
    }
    if !found {
        return Ok(());
    }

    let qualifier = match select.from.as_slice() {
        [TableWithJoins { relation, joins }] if joins.is_empty() => relation.reference_name().cloned(),
        _ => None,
    }
    .ok_or_else(|| "ambiguous column reference after adding joins".to_string())?;

    let mut qualify = |column: &mut ColumnRef| {
        if collides(&*column) {
            column.table = Some(qualifier.clone());
        }
    };
    visit_select_columns(select, &mut qualify);
    for item in order_by.iter_mut() {
        if !is_output_alias(&item.expr, &output_aliases) {
            item.expr.for_each_column_mut(&mut qualify);
        }
    }
    Ok(())
}

fn is_output_alias(expr: &Expr, aliases: &[Ident]) -> bool {
    matches!(expr, Expr::Column(ColumnRef { table: None, name }) if aliases.iter().any(|a| a.same_as(name)))
}

fn visit_select_columns(select: &mut Select, f: &mut dyn FnMut(&mut ColumnRef)) {
    for item in &mut select.projection {
        if let SelectItem::Expr { expr, .. } = item {
            expr.for_each_column_mut(f);
        }
    }
    if let Some(selection) = &mut select.selection {
        selection.for_each_column_mut(f);
    }
    for expr in &mut select.group_by {
        expr.for_each_column_mut(f);
    }
    if let Some(having) = &mut select.having {
        having.for_each_column_mut(f);
    }
}
