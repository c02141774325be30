//! Relationship counts of a tracked entity, summed over all relationship
//! types or read for a single one.

use std::collections::BTreeMap;

use crate::ast::{Ident, Literal, ObjectName, Query};
use crate::descriptor::{Correlation, FoundSubSelect};
use crate::matcher::SubselectMatcher;
use crate::matcher::shape::{Candidate, clean_suffix, fill};

const RELATIONSHIP_TABLE: &str = "analytics_rs_relationship";
const RELATIONSHIP_COUNT_COLUMN: &str = "relationship_count";
const RELATIONSHIP_TYPE_COLUMN: &str = "relationshiptypeuid";
const TRACKED_ENTITY_ID_COLUMN: &str = "trackedentityid";
const OUTER_TRACKED_ENTITY_COLUMN: &str = "trackedentity";

struct RelationshipLookup<'a> {
    table: &'a ObjectName,
    correlation: Correlation,
    relationship_type: Option<&'a Literal>,
}

/// Shared shape; `aggregated` selects `sum(relationship_count)` over the bare
/// column.
fn relationship_lookup(query: &Query, aggregated: bool) -> Option<RelationshipLookup<'_>> {
    let candidate = Candidate::of(query)?;
    if !candidate.table_is(RELATIONSHIP_TABLE) || !candidate.has_no_ordering() {
        return None;
    }

    let projected = if aggregated {
        candidate.single_column_call(candidate.projection, "sum")?
    } else {
        candidate.local_column(candidate.projection)?
    };
    if !projected.name.matches(RELATIONSHIP_COUNT_COLUMN) {
        return None;
    }

    let mut correlation = None;
    let mut relationship_type = None;
    for conjunct in candidate.conjuncts.iter().copied() {
        if let Some(found) = candidate.correlation(
            conjunct,
            TRACKED_ENTITY_ID_COLUMN,
            OUTER_TRACKED_ENTITY_COLUMN,
        ) {
            fill(&mut correlation, found)?;
        } else if let Some((column, literal @ Literal::String(_))) =
            candidate.column_equals_literal(conjunct)
            && column.name.matches(RELATIONSHIP_TYPE_COLUMN)
        {
            fill(&mut relationship_type, literal)?;
        } else {
            return None;
        }
    }

    Some(RelationshipLookup {
        table: candidate.table,
        correlation: correlation?,
        relationship_type,
    })
}

fn type_filter(relationship_type: Option<&Literal>) -> String {
    relationship_type
        .map(|uid| format!(" where relationshiptypeuid = {}", uid))
        .unwrap_or_default()
}

fn metadata(aggregated: bool, relationship_type: Option<&Literal>) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("isAggregated".to_string(), aggregated.to_string());
    if let Some(uid) = relationship_type {
        metadata.insert("relationshipTypeUid".to_string(), uid.as_text());
    }
    metadata
}

/// `select sum(relationship_count) from analytics_rs_relationship
/// where trackedentityid = subax.trackedentity [and relationshiptypeuid = '<uid>']`
pub struct AggregatedRelationshipCountMatcher;

impl SubselectMatcher for AggregatedRelationshipCountMatcher {
    fn id(&self) -> &'static str {
        "relationship_count_agg"
    }

    fn find(&self, subquery: &Query) -> Option<FoundSubSelect> {
        let lookup = relationship_lookup(subquery, true)?;

        let (name, join_alias) = match lookup.relationship_type {
            None => ("relationship_count_agg".to_string(), "rlc".to_string()),
            Some(uid) => {
                let suffix = clean_suffix(&uid.as_text());
                if suffix.is_empty() {
                    return None;
                }
                (
                    format!("relationship_count_agg_{}", suffix),
                    format!("rlca_{}", suffix),
                )
            }
        };

        Some(FoundSubSelect {
            name,
            column_reference: Ident::new(RELATIONSHIP_COUNT_COLUMN),
            join_alias,
            metadata: metadata(true, lookup.relationship_type),
            cte_body: format!(
                "select trackedentityid, sum(relationship_count) as relationship_count \
                 from {}{} group by trackedentityid",
                lookup.table,
                type_filter(lookup.relationship_type)
            ),
            correlation: lookup.correlation,
        })
    }
}

/// `select relationship_count from analytics_rs_relationship
/// where trackedentityid = subax.trackedentity and relationshiptypeuid = '<uid>'`
pub struct RelationshipCountMatcher;

impl SubselectMatcher for RelationshipCountMatcher {
    fn id(&self) -> &'static str {
        "relationship_count"
    }

    fn find(&self, subquery: &Query) -> Option<FoundSubSelect> {
        let lookup = relationship_lookup(subquery, false)?;
        let uid = lookup.relationship_type?;
        let suffix = clean_suffix(&uid.as_text());
        if suffix.is_empty() {
            return None;
        }

        Some(FoundSubSelect {
            name: format!("relationship_count_{}", suffix),
            column_reference: Ident::new(RELATIONSHIP_COUNT_COLUMN),
            join_alias: format!("rlc_{}", suffix),
            metadata: metadata(false, Some(uid)),
            cte_body: format!(
                "select trackedentityid, relationship_count from {}{}",
                lookup.table,
                type_filter(Some(uid))
            ),
            correlation: lookup.correlation,
        })
    }
}
