//! Pattern matcher library.
//!
//! Each matcher recognizes one correlated-subquery idiom produced by the
//! analytics SQL templates. Matchers are stateless and never fail: a subquery
//! they do not recognize is simply `None`.
//!
//! The default registry tries, in order: `last_sched`, `last_created`,
//! `last_value`, `de_count`, `relationship_count_agg`, `relationship_count`.
//! The first match wins.

pub mod data_element_count;
pub mod last_event;
pub mod relationship_count;
pub(crate) mod shape;

pub use data_element_count::DataElementCountMatcher;
pub use last_event::{LastCreatedMatcher, LastScheduledMatcher, LastValueMatcher};
pub use relationship_count::{AggregatedRelationshipCountMatcher, RelationshipCountMatcher};

use tracing::debug;

use crate::ast::Query;
use crate::descriptor::FoundSubSelect;

/// One recognizable subquery idiom.
pub trait SubselectMatcher: Send + Sync {
    /// Stable identifier, used in configuration and diagnostics.
    fn id(&self) -> &'static str;

    /// Matchers with higher priority are tried first.
    fn priority(&self) -> u32 {
        100
    }

    fn find(&self, subquery: &Query) -> Option<FoundSubSelect>;
}

/// Ordered set of matchers consulted at every subquery site.
pub struct MatcherRegistry {
    matchers: Vec<Box<dyn SubselectMatcher>>,
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MatcherRegistry {
    /// Registry with every built-in idiom.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        // Registration order is the tie-break between equal priorities
        registry.register(Box::new(LastScheduledMatcher));
        registry.register(Box::new(LastCreatedMatcher));
        registry.register(Box::new(LastValueMatcher));
        registry.register(Box::new(DataElementCountMatcher));
        registry.register(Box::new(AggregatedRelationshipCountMatcher));
        registry.register(Box::new(RelationshipCountMatcher));

        registry
    }

    pub fn empty() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    /// Built-in idioms except the ones named in `disabled`.
    pub fn without<S: AsRef<str>>(disabled: &[S]) -> Self {
        let mut registry = Self::new();
        registry
            .matchers
            .retain(|m| !disabled.iter().any(|id| id.as_ref() == m.id()));
        registry
    }

    pub fn register(&mut self, matcher: Box<dyn SubselectMatcher>) {
        self.matchers.push(matcher);
        // Stable sort keeps registration order among equal priorities
        self.matchers.sort_by_key(|m| std::cmp::Reverse(m.priority()));
    }

    /// Runs the matchers in order and returns the first match.
    pub fn find(&self, subquery: &Query) -> Option<FoundSubSelect> {
        for matcher in &self.matchers {
            if let Some(found) = matcher.find(subquery) {
                debug!(matcher = matcher.id(), name = %found.name, "recognized subquery");
                return Some(found);
            }
        }
        None
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ident;
    use crate::descriptor::Correlation;
    use crate::lower::parse_query;
    use std::collections::BTreeMap;

    struct Always(&'static str, u32);

    impl SubselectMatcher for Always {
        fn id(&self) -> &'static str {
            self.0
        }

        fn priority(&self) -> u32 {
            self.1
        }

        fn find(&self, _subquery: &Query) -> Option<FoundSubSelect> {
            Some(FoundSubSelect {
                name: self.0.to_string(),
                column_reference: Ident::new("v"),
                join_alias: "a".to_string(),
                correlation: Correlation {
                    outer: crate::ast::ColumnRef::qualified(Ident::new("o"), Ident::new("k")),
                    key_column: Ident::new("k"),
                    inner_table: None,
                },
                metadata: BTreeMap::new(),
                cte_body: "select k, v from t".to_string(),
            })
        }
    }

    #[test]
    fn test_default_order() {
        assert_eq!(
            MatcherRegistry::new().ids(),
            vec![
                "last_sched",
                "last_created",
                "last_value",
                "de_count",
                "relationship_count_agg",
                "relationship_count",
            ]
        );
    }

    #[test]
    fn test_priority_then_registration_order() {
        let mut registry = MatcherRegistry::empty();
        registry.register(Box::new(Always("first", 100)));
        registry.register(Box::new(Always("second", 100)));
        registry.register(Box::new(Always("urgent", 200)));
        assert_eq!(registry.ids(), vec!["urgent", "first", "second"]);

        let query = parse_query("select 1").unwrap();
        assert_eq!(registry.find(&query).unwrap().name, "urgent");
    }

    #[test]
    fn test_without_removes_ids() {
        let registry = MatcherRegistry::without(&["de_count", "last_value"]);
        assert_eq!(registry.len(), 4);
        assert!(!registry.ids().contains(&"de_count"));
        assert!(MatcherRegistry::empty().is_empty());
    }

    #[test]
    fn test_unrelated_subquery_matches_nothing() {
        let query = parse_query("select max(a) from t where t.k = o.k").unwrap();
        assert!(MatcherRegistry::new().find(&query).is_none());
    }
}
