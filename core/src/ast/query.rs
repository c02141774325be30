use crate::ast::expr::comma_separated;
use crate::ast::{Expr, Ident, JoinKind, ObjectName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `SELECT` statement with its optional `WITH` clause.
///
/// `with: None` means the statement has no `WITH` clause. `Some(vec![])` is a
/// present but empty clause; both render without the keyword.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Query {
    pub with: Option<Vec<Cte>>,
    pub body: Select,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

impl Query {
    pub fn from_select(body: Select) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    pub fn ctes(&self) -> &[Cte] {
        self.with.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cte {
    pub name: Ident,
    pub query: Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Select {
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    pub from: Vec<TableWithJoins>,
    pub selection: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
}

impl Select {
    /// Names every relation of the `FROM` clause can be referenced by.
    pub fn relation_names(&self) -> Vec<&Ident> {
        self.from
            .iter()
            .flat_map(|entry| {
                std::iter::once(&entry.relation)
                    .chain(entry.joins.iter().map(|join| &join.relation))
                    .filter_map(TableFactor::reference_name)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectItem {
    Expr { expr: Expr, alias: Option<Ident> },
    Wildcard,
    QualifiedWildcard(ObjectName),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableWithJoins {
    pub relation: TableFactor,
    pub joins: Vec<Join>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableFactor {
    Table {
        name: ObjectName,
        alias: Option<Ident>,
    },
    Derived {
        subquery: Box<Query>,
        alias: Option<Ident>,
    },
}

impl TableFactor {
    /// The name other clauses use to qualify this relation's columns: the
    /// alias, or the bare table name for an unaliased table.
    pub fn reference_name(&self) -> Option<&Ident> {
        match self {
            TableFactor::Table { name, alias } => alias.as_ref().or_else(|| name.base()),
            TableFactor::Derived { alias, .. } => alias.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub relation: TableFactor,
    pub on: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByExpr {
    pub expr: Expr,
    /// `Some(true)` for an explicit `ASC`, `Some(false)` for `DESC`.
    pub asc: Option<bool>,
    pub nulls_first: Option<bool>,
}

impl OrderByExpr {
    pub fn is_descending(&self) -> bool {
        self.asc == Some(false)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctes = self.ctes();
        if !ctes.is_empty() {
            write!(f, "with {} ", comma_separated(ctes))?;
        }
        write!(f, "{}", self.body)?;
        if !self.order_by.is_empty() {
            write!(f, " order by {}", comma_separated(&self.order_by))?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " limit {}", limit)?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " offset {}", offset)?;
        }
        Ok(())
    }
}

impl fmt::Display for Cte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} as ({})", self.name, self.query)
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "select ")?;
        if self.distinct {
            write!(f, "distinct ")?;
        }
        write!(f, "{}", comma_separated(&self.projection))?;
        if !self.from.is_empty() {
            write!(f, " from {}", comma_separated(&self.from))?;
        }
        if let Some(selection) = &self.selection {
            write!(f, " where {}", selection)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " group by {}", comma_separated(&self.group_by))?;
        }
        if let Some(having) = &self.having {
            write!(f, " having {}", having)?;
        }
        Ok(())
    }
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectItem::Expr { expr, alias: None } => write!(f, "{}", expr),
            SelectItem::Expr {
                expr,
                alias: Some(alias),
            } => write!(f, "{} as {}", expr, alias),
            SelectItem::Wildcard => write!(f, "*"),
            SelectItem::QualifiedWildcard(name) => write!(f, "{}.*", name),
        }
    }
}

impl fmt::Display for TableWithJoins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relation)?;
        for join in &self.joins {
            write!(f, " {}", join)?;
        }
        Ok(())
    }
}

impl fmt::Display for TableFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alias = match self {
            TableFactor::Table { name, alias } => {
                write!(f, "{}", name)?;
                alias
            }
            TableFactor::Derived { subquery, alias } => {
                write!(f, "({})", subquery)?;
                alias
            }
        };
        if let Some(alias) = alias {
            write!(f, " as {}", alias)?;
        }
        Ok(())
    }
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.kind, self.relation, self.on)
    }
}

impl fmt::Display for OrderByExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        match self.asc {
            Some(true) => write!(f, " asc")?,
            Some(false) => write!(f, " desc")?,
            None => {}
        }
        match self.nulls_first {
            Some(true) => write!(f, " nulls first")?,
            Some(false) => write!(f, " nulls last")?,
            None => {}
        }
        Ok(())
    }
}
