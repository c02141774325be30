//! The statement and expression model the rewrite passes operate on.

pub mod expr;
pub mod operators;
pub mod query;
pub mod values;

pub use expr::{CaseBranch, Expr, Function, WindowSpec};
pub use operators::{ArithmeticOp, CastStyle, ComparisonOp, JoinKind, UnaryOp};
pub use query::{Cte, Join, OrderByExpr, Query, Select, SelectItem, TableFactor, TableWithJoins};
pub use values::{ColumnRef, Ident, Literal, ObjectName};
