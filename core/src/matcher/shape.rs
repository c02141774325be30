//! Structural checks shared by every idiom.

use crate::ast::{
    ColumnRef, ComparisonOp, Expr, Function, Ident, Literal, ObjectName, Query, SelectItem,
    TableFactor,
};
use crate::descriptor::Correlation;

/// Event-level analytics tables all share this prefix.
pub const EVENT_TABLE_PREFIX: &str = "analytics_event";
/// Column holding the program stage of an event row.
pub const PROGRAM_STAGE_COLUMN: &str = "ps";
pub const ENROLLMENT_COLUMN: &str = "enrollment";
pub const OCCURRED_DATE_COLUMN: &str = "occurreddate";

/// A subquery reduced to the parts the idioms look at: one unaliased
/// projection over one plain table, and the `WHERE` conjuncts.
pub(crate) struct Candidate<'a> {
    pub query: &'a Query,
    pub table: &'a ObjectName,
    pub alias: Option<&'a Ident>,
    pub projection: &'a Expr,
    pub conjuncts: Vec<&'a Expr>,
}

impl<'a> Candidate<'a> {
    pub fn of(query: &'a Query) -> Option<Self> {
        if query.with.is_some() {
            return None;
        }
        let select = &query.body;
        if select.distinct || !select.group_by.is_empty() || select.having.is_some() {
            return None;
        }

        let [SelectItem::Expr {
            expr: projection,
            alias: None,
        }] = select.projection.as_slice()
        else {
            return None;
        };

        let [from] = select.from.as_slice() else {
            return None;
        };
        if !from.joins.is_empty() {
            return None;
        }
        let TableFactor::Table { name, alias } = &from.relation else {
            return None;
        };

        Some(Self {
            query,
            table: name,
            alias: alias.as_ref(),
            projection,
            conjuncts: select.selection.as_ref().map(conjuncts).unwrap_or_default(),
        })
    }

    pub fn table_starts_with(&self, prefix: &str) -> bool {
        self.table
            .base()
            .is_some_and(|name| name.folded().starts_with(prefix))
    }

    pub fn table_is(&self, name: &str) -> bool {
        self.table.base().is_some_and(|base| base.matches(name))
    }

    /// Whether a column qualifier refers to this subquery's own table.
    pub fn is_local(&self, qualifier: Option<&Ident>) -> bool {
        match qualifier {
            None => true,
            Some(q) => {
                self.alias.is_some_and(|alias| alias.same_as(q))
                    || self.table.base().is_some_and(|base| base.same_as(q))
            }
        }
    }

    /// The expression as a column of this subquery's table.
    pub fn local_column<'e>(&self, expr: &'e Expr) -> Option<&'e ColumnRef> {
        expr.as_column()
            .filter(|column| self.is_local(column.table.as_ref()))
    }

    pub fn has_no_ordering(&self) -> bool {
        self.query.order_by.is_empty() && self.query.limit.is_none() && self.query.offset.is_none()
    }

    /// `ORDER BY <date_column> DESC LIMIT 1`
    pub fn is_latest_first(&self, date_column: &str) -> bool {
        let [order] = self.query.order_by.as_slice() else {
            return false;
        };
        let orders_by_date = self
            .local_column(&order.expr)
            .is_some_and(|column| column.name.matches(date_column));

        orders_by_date
            && order.is_descending()
            && order.nulls_first.is_none()
            && self.query.offset.is_none()
            && matches!(
                self.query.limit.as_ref().and_then(Expr::as_literal),
                Some(Literal::Integer(1))
            )
    }

    /// Recognizes the correlation predicate `<inner_key> = <qualifier>.<outer_key>`.
    ///
    /// The inner side is unqualified or qualified by this subquery's table.
    /// When neither side is, the left operand is taken as the inner one and
    /// its qualifier is kept so the caller can check it against its scope.
    pub fn correlation(
        &self,
        conjunct: &Expr,
        inner_key: &str,
        outer_key: &str,
    ) -> Option<Correlation> {
        let (left, right) = equality(conjunct)?;
        let left = left.as_column()?;
        let right = right.as_column()?;

        let left_local = self.is_local(left.table.as_ref());
        let right_local = self.is_local(right.table.as_ref());
        let (inner, outer) = match (left_local, right_local) {
            (true, true) => return None,
            (true, false) | (false, false) => (left, right),
            (false, true) => (right, left),
        };

        if !inner.name.matches(inner_key) || !outer.name.matches(outer_key) {
            return None;
        }
        Some(Correlation {
            outer: outer.clone(),
            key_column: Ident::new(inner_key),
            inner_table: if left_local || right_local {
                None
            } else {
                inner.table.clone()
            },
        })
    }

    /// `<column> IS NOT NULL` on a local column named like `column`.
    pub fn is_not_null_on(&self, conjunct: &Expr, column: &Ident) -> bool {
        match conjunct.unnested() {
            Expr::IsNull {
                expr,
                negated: true,
            } => self
                .local_column(expr)
                .is_some_and(|c| c.name.same_as(column)),
            _ => false,
        }
    }

    /// `<column> = <literal>` (either operand order) on a local column.
    pub fn column_equals_literal<'e>(
        &self,
        conjunct: &'e Expr,
    ) -> Option<(&'e ColumnRef, &'e Literal)> {
        let (left, right) = equality(conjunct)?;
        if let (Some(column), Some(literal)) = (self.local_column(left), right.as_literal()) {
            return Some((column, literal));
        }
        if let (Some(column), Some(literal)) = (self.local_column(right), left.as_literal()) {
            return Some((column, literal));
        }
        None
    }

    /// `ps = '<stage>'`
    pub fn program_stage<'e>(&self, conjunct: &'e Expr) -> Option<&'e Literal> {
        self.column_equals_literal(conjunct)
            .filter(|(column, literal)| {
                column.name.matches(PROGRAM_STAGE_COLUMN) && matches!(literal, Literal::String(_))
            })
            .map(|(_, literal)| literal)
    }

    /// A plain call `<name>(<local column>)`, returning the column.
    pub fn single_column_call(&self, expr: &'a Expr, name: &str) -> Option<&'a ColumnRef> {
        let Expr::Function(Function {
            name: func_name,
            args: Some(args),
            distinct: false,
            over: None,
        }) = expr.unnested()
        else {
            return None;
        };
        let [func_name] = func_name.0.as_slice() else {
            return None;
        };
        if !func_name.matches(name) {
            return None;
        }
        let [arg] = args.as_slice() else {
            return None;
        };
        self.local_column(arg)
    }
}

/// Splits a predicate into its top-level `AND` operands, looking through
/// parentheses.
pub(crate) fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    let mut stack = vec![expr];
    while let Some(expr) = stack.pop() {
        match expr.unnested() {
            Expr::And { left, right } => {
                stack.push(right);
                stack.push(left);
            }
            other => out.push(other),
        }
    }
    out
}

fn equality(expr: &Expr) -> Option<(&Expr, &Expr)> {
    match expr.unnested() {
        Expr::Comparison {
            left,
            op: ComparisonOp::Eq,
            right,
        } => Some((left.as_ref(), right.as_ref())),
        _ => None,
    }
}

/// Stores `value` in an empty slot. A second value for the same slot means the
/// conjunct is duplicated, which no idiom accepts.
pub(crate) fn fill<T>(slot: &mut Option<T>, value: T) -> Option<()> {
    if slot.is_some() {
        return None;
    }
    *slot = Some(value);
    Some(())
}

/// Lower-cased ASCII alphanumeric residue of `text`, for use inside
/// generated names.
pub(crate) fn clean_suffix(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
