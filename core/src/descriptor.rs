//! Value types passed from the matchers to the transformer and the injector.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::ast::{ColumnRef, Expr, Ident, Query};

/// How a hoisted CTE joins back to the query the subquery came from:
/// `<outer> = <join_alias>.<key_column>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correlation {
    /// The enclosing query's column the subquery was correlated on.
    pub outer: ColumnRef,
    /// The CTE's key column.
    pub key_column: Ident,
    /// Qualifier of the subquery's side of the predicate, set only when it
    /// names neither the subquery's table nor its alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_table: Option<Ident>,
}

/// A recognized subquery idiom.
///
/// `name` is derived only from `metadata`, so two subqueries that captured the
/// same values collapse into one CTE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundSubSelect {
    pub name: String,
    /// The CTE column that replaces the subquery's projected value.
    pub column_reference: Ident,
    pub join_alias: String,
    pub correlation: Correlation,
    /// Literals captured from the subquery. Optional predicates that were not
    /// present have no key at all.
    pub metadata: BTreeMap<String, String>,
    pub cte_body: String,
}

impl FoundSubSelect {
    pub fn to_generated_cte(&self) -> GeneratedCte {
        GeneratedCte {
            name: self.name.clone(),
            body: self.cte_body.clone(),
            join_alias: self.join_alias.clone(),
            column_reference: self.column_reference.clone(),
            // The CTE is joined on its own key column.
            correlation: Correlation {
                inner_table: None,
                ..self.correlation.clone()
            },
        }
    }

    /// `<join_alias>.<column_reference>`, the expression that stands in for
    /// the subquery.
    pub fn replacement(&self) -> Expr {
        Expr::Column(ColumnRef::qualified(
            sql_ident(&self.join_alias),
            self.column_reference.clone(),
        ))
    }
}

/// A CTE ready to be placed in a `WITH` clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCte {
    pub name: String,
    /// A complete `SELECT` returning one row per correlation key.
    pub body: String,
    /// Alias the enclosing query joins this CTE under. The injector does not
    /// use it.
    pub join_alias: String,
    pub column_reference: Ident,
    pub correlation: Correlation,
}

impl GeneratedCte {
    pub fn name_ident(&self) -> Ident {
        sql_ident(&self.name)
    }

    pub fn alias_ident(&self) -> Ident {
        sql_ident(&self.join_alias)
    }

    /// Columns the CTE exposes to the enclosing query.
    pub fn output_columns(&self) -> [&Ident; 2] {
        [&self.correlation.key_column, &self.column_reference]
    }
}

/// Identity of one subquery site, assigned in traversal order. Two
/// textually identical subqueries at different positions get different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubqueryId(pub usize);

impl fmt::Display for SubqueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One subquery the transformer replaced, with what replaced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSubquery {
    pub subquery: Query,
    pub found: FoundSubSelect,
    pub cte: GeneratedCte,
}

/// Generated names are plain identifiers unless they contain characters that
/// need quoting.
pub(crate) fn sql_ident(name: &str) -> Ident {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        Ident::new(name)
    } else {
        Ident::quoted(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found() -> FoundSubSelect {
        FoundSubSelect {
            name: "last_sched".to_string(),
            column_reference: Ident::new("scheduleddate"),
            join_alias: "ls".to_string(),
            correlation: Correlation {
                outer: ColumnRef::qualified(Ident::new("subax"), Ident::new("enrollment")),
                key_column: Ident::new("enrollment"),
                inner_table: None,
            },
            metadata: BTreeMap::new(),
            cte_body: "select enrollment, scheduleddate from t".to_string(),
        }
    }

    #[test]
    fn test_generated_cte_carries_descriptor_fields() {
        let cte = found().to_generated_cte();
        assert_eq!(cte.name, "last_sched");
        assert_eq!(cte.join_alias, "ls");
        assert_eq!(cte.body, "select enrollment, scheduleddate from t");
        assert_eq!(cte.output_columns()[0], &Ident::new("enrollment"));
    }

    #[test]
    fn test_replacement_is_qualified_by_join_alias() {
        assert_eq!(found().replacement().to_string(), "ls.scheduleddate");
    }

    #[test]
    fn test_sql_ident_quotes_mixed_case() {
        assert_eq!(sql_ident("de_count_x1").to_string(), "de_count_x1");
        assert_eq!(sql_ident("de_count_X1").to_string(), "\"de_count_X1\"");
        assert_eq!(sql_ident("1abc").to_string(), "\"1abc\"");
    }
}
