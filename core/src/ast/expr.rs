use crate::ast::{
    ArithmeticOp, CastStyle, ColumnRef, ComparisonOp, Literal, ObjectName, OrderByExpr, Query,
    UnaryOp,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A SQL expression.
///
/// The set of variants is closed: every pass over the tree matches on all of
/// them, so a new node kind cannot be skipped silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Column(ColumnRef),
    Function(Function),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Arithmetic {
        left: Box<Expr>,
        op: ArithmeticOp,
        right: Box<Expr>,
    },
    Comparison {
        left: Box<Expr>,
        op: ComparisonOp,
        right: Box<Expr>,
    },
    And {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Or {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Between {
        expr: Box<Expr>,
        negated: bool,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<Query>,
        negated: bool,
    },
    /// `IS NULL`, or `IS NOT NULL` when negated
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Cast {
        expr: Box<Expr>,
        data_type: String,
        style: CastStyle,
    },
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<CaseBranch>,
        else_result: Option<Box<Expr>>,
    },
    Extract {
        field: String,
        expr: Box<Expr>,
    },
    /// `LIKE`, or `ILIKE` when case-insensitive
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        case_insensitive: bool,
    },
    Exists {
        subquery: Box<Query>,
        negated: bool,
    },
    /// Scalar subquery
    Subquery(Box<Query>),
    /// Explicit parentheses from the source text
    Nested(Box<Expr>),
    /// `*` as a function argument
    Wildcard,
    /// `t.*` as a function argument
    QualifiedWildcard(ObjectName),
}

/// A function call. `args: None` is `now`-style with no parentheses at all,
/// `Some(vec![])` is `now()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: ObjectName,
    pub args: Option<Vec<Expr>>,
    pub distinct: bool,
    pub over: Option<WindowSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseBranch {
    pub condition: Expr,
    pub result: Expr,
}

impl Expr {
    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::Comparison {
            left: Box::new(left),
            op: ComparisonOp::Eq,
            right: Box::new(right),
        }
    }

    /// Strips any number of explicit parentheses.
    pub fn unnested(&self) -> &Expr {
        let mut expr = self;
        while let Expr::Nested(inner) = expr {
            expr = inner;
        }
        expr
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self.unnested() {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self.unnested() {
            Expr::Literal(l) => Some(l),
            _ => None,
        }
    }

    /// Visits every column reference of this expression, leaving subquery
    /// bodies alone since their columns resolve in another scope.
    pub fn for_each_column_mut(&mut self, f: &mut dyn FnMut(&mut ColumnRef)) {
        match self {
            Expr::Column(c) => f(c),
            Expr::Literal(_)
            | Expr::Wildcard
            | Expr::QualifiedWildcard(_)
            | Expr::Exists { .. }
            | Expr::Subquery(_) => {}
            Expr::Function(func) => {
                for arg in func.args.iter_mut().flatten() {
                    arg.for_each_column_mut(f);
                }
                if let Some(over) = &mut func.over {
                    for e in &mut over.partition_by {
                        e.for_each_column_mut(f);
                    }
                    for o in &mut over.order_by {
                        o.expr.for_each_column_mut(f);
                    }
                }
            }
            Expr::Unary { expr, .. }
            | Expr::Not(expr)
            | Expr::Nested(expr)
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Extract { expr, .. }
            | Expr::InSubquery { expr, .. } => expr.for_each_column_mut(f),
            Expr::Arithmetic { left, right, .. }
            | Expr::Comparison { left, right, .. }
            | Expr::And { left, right }
            | Expr::Or { left, right } => {
                left.for_each_column_mut(f);
                right.for_each_column_mut(f);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.for_each_column_mut(f);
                low.for_each_column_mut(f);
                high.for_each_column_mut(f);
            }
            Expr::InList { expr, list, .. } => {
                expr.for_each_column_mut(f);
                for e in list {
                    e.for_each_column_mut(f);
                }
            }
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                if let Some(op) = operand {
                    op.for_each_column_mut(f);
                }
                for branch in branches {
                    branch.condition.for_each_column_mut(f);
                    branch.result.for_each_column_mut(f);
                }
                if let Some(e) = else_result {
                    e.for_each_column_mut(f);
                }
            }
            Expr::Like { expr, pattern, .. } => {
                expr.for_each_column_mut(f);
                pattern.for_each_column_mut(f);
            }
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

pub(crate) fn comma_separated<T: fmt::Display>(items: &[T]) -> CommaSeparated<'_, T> {
    CommaSeparated(items)
}

pub(crate) struct CommaSeparated<'a, T>(&'a [T]);

impl<T: fmt::Display> fmt::Display for CommaSeparated<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_list(f, self.0)
    }
}

fn not(negated: bool) -> &'static str {
    if negated { "not " } else { "" }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(l) => write!(f, "{}", l),
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Function(func) => write!(f, "{}", func),
            Expr::Unary { op, expr } => {
                let operand = expr.to_string();
                // `--` would start a line comment.
                if *op == UnaryOp::Minus && operand.starts_with('-') {
                    write!(f, "{} {}", op, operand)
                } else {
                    write!(f, "{}{}", op, operand)
                }
            }
            Expr::Arithmetic { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expr::Comparison { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expr::And { left, right } => write!(f, "{} and {}", left, right),
            Expr::Or { left, right } => write!(f, "{} or {}", left, right),
            Expr::Not(expr) => write!(f, "not {}", expr),
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => write!(f, "{} {}between {} and {}", expr, not(*negated), low, high),
            Expr::InList {
                expr,
                list,
                negated,
            } => write!(f, "{} {}in ({})", expr, not(*negated), comma_separated(list)),
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => write!(f, "{} {}in ({})", expr, not(*negated), subquery),
            Expr::IsNull { expr, negated } => write!(f, "{} is {}null", expr, not(*negated)),
            Expr::Cast {
                expr,
                data_type,
                style,
            } => match style {
                CastStyle::Function => write!(f, "cast({} as {})", expr, data_type),
                CastStyle::DoubleColon => write!(f, "{}::{}", expr, data_type),
            },
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                write!(f, "case")?;
                if let Some(op) = operand {
                    write!(f, " {}", op)?;
                }
                for branch in branches {
                    write!(f, " when {} then {}", branch.condition, branch.result)?;
                }
                if let Some(e) = else_result {
                    write!(f, " else {}", e)?;
                }
                write!(f, " end")
            }
            Expr::Extract { field, expr } => write!(f, "extract({} from {})", field, expr),
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let op = if *case_insensitive { "ilike" } else { "like" };
                write!(f, "{} {}{} {}", expr, not(*negated), op, pattern)
            }
            Expr::Exists { subquery, negated } => write!(f, "{}exists ({})", not(*negated), subquery),
            Expr::Subquery(q) => write!(f, "({})", q),
            Expr::Nested(expr) => write!(f, "({})", expr),
            Expr::Wildcard => write!(f, "*"),
            Expr::QualifiedWildcard(name) => write!(f, "{}.*", name),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(args) = &self.args {
            let distinct = if self.distinct { "distinct " } else { "" };
            write!(f, "({}{})", distinct, comma_separated(args))?;
        }
        if let Some(over) = &self.over {
            write!(f, " over ({})", over)?;
        }
        Ok(())
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        if !self.partition_by.is_empty() {
            write!(f, "partition by {}", comma_separated(&self.partition_by))?;
            sep = " ";
        }
        if !self.order_by.is_empty() {
            write!(f, "{}order by {}", sep, comma_separated(&self.order_by))?;
        }
        Ok(())
    }
}
