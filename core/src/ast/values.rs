//! Leaf values of the expression tree: identifiers, names, literals and
//! column references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An SQL identifier. Quoted identifiers keep their exact spelling, unquoted
/// ones fold to lower case when compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ident {
    pub value: String,
    pub quoted: bool,
}

impl Ident {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            quoted: false,
        }
    }

    pub fn quoted(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            quoted: true,
        }
    }

    /// The name the database resolves this identifier to.
    pub fn folded(&self) -> String {
        if self.quoted {
            self.value.clone()
        } else {
            self.value.to_lowercase()
        }
    }

    /// Whether this identifier resolves to the unquoted name `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.folded() == name.to_lowercase()
    }

    /// Whether both identifiers resolve to the same name.
    pub fn same_as(&self, other: &Ident) -> bool {
        self.folded() == other.folded()
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quoted {
            write!(f, "\"{}\"", self.value.replace('"', "\"\""))
        } else {
            write!(f, "{}", self.value)
        }
    }
}

/// A possibly schema-qualified table or function name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectName(pub Vec<Ident>);

impl ObjectName {
    pub fn simple(name: impl Into<String>) -> Self {
        Self(vec![Ident::new(name)])
    }

    /// The unqualified part (`events` in `analytics.events`).
    pub fn base(&self) -> Option<&Ident> {
        self.0.last()
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    String(String),
    Integer(i64),
    /// Non-integral or out-of-range numbers keep their source spelling.
    Decimal(String),
    Boolean(bool),
    Null,
}

impl Literal {
    /// The literal's value without SQL quoting (`'P1'` becomes `P1`).
    pub fn as_text(&self) -> String {
        match self {
            Literal::String(s) | Literal::Decimal(s) => s.clone(),
            Literal::Integer(n) => n.to_string(),
            Literal::Boolean(b) => b.to_string(),
            Literal::Null => "null".to_string(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Integer(n) => write!(f, "{}", n),
            Literal::Decimal(s) => write!(f, "{}", s),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "null"),
        }
    }
}

/// `[table.]column`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<Ident>,
    pub name: Ident,
}

impl ColumnRef {
    pub fn new(name: Ident) -> Self {
        Self { table: None, name }
    }

    pub fn qualified(table: Ident, name: Ident) -> Self {
        Self {
            table: Some(table),
            name,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_folding() {
        assert!(Ident::new("Enrollment").matches("enrollment"));
        assert!(!Ident::quoted("Enrollment").matches("enrollment"));
        assert!(Ident::quoted("enrollment").same_as(&Ident::new("ENROLLMENT")));
    }

    #[test]
    fn test_ident_display_escapes_quotes() {
        assert_eq!(Ident::quoted("a\"b").to_string(), "\"a\"\"b\"");
        assert_eq!(Ident::new("ps").to_string(), "ps");
    }

    #[test]
    fn test_literal_display() {
        assert_eq!(Literal::String("it's".into()).to_string(), "'it''s'");
        assert_eq!(Literal::Integer(12345).to_string(), "12345");
        assert_eq!(Literal::Decimal("123.45".into()).to_string(), "123.45");
        assert_eq!(Literal::String("P1".into()).as_text(), "P1");
    }
}
