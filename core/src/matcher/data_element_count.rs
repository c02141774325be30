//! Count of one data element value within an enrollment:
//!
//! ```sql
//! (select count("X") from analytics_event_<program>
//!   where analytics_event_<program>.enrollment = subax.enrollment
//!     and "X" is not null and "X" = 1 and ps = 'P1')
//! ```

use std::collections::BTreeMap;

use crate::ast::{Ident, Literal, ObjectName, Query};
use crate::descriptor::FoundSubSelect;
use crate::matcher::SubselectMatcher;
use crate::matcher::shape::{Candidate, ENROLLMENT_COLUMN, EVENT_TABLE_PREFIX, clean_suffix, fill};

pub struct DataElementCountMatcher;

impl SubselectMatcher for DataElementCountMatcher {
    fn id(&self) -> &'static str {
        "de_count"
    }

    fn find(&self, subquery: &Query) -> Option<FoundSubSelect> {
        let candidate = Candidate::of(subquery)?;
        if !candidate.table_starts_with(EVENT_TABLE_PREFIX) || !candidate.has_no_ordering() {
            return None;
        }
        let data_element = &candidate
            .single_column_call(candidate.projection, "count")?
            .name;

        let mut correlation = None;
        let mut not_null = None;
        let mut value = None;
        let mut stage = None;
        for conjunct in candidate.conjuncts.iter().copied() {
            if let Some(found) =
                candidate.correlation(conjunct, ENROLLMENT_COLUMN, ENROLLMENT_COLUMN)
            {
                fill(&mut correlation, found)?;
            } else if candidate.is_not_null_on(conjunct, data_element) {
                fill(&mut not_null, ())?;
            } else if let Some((column, literal)) = candidate.column_equals_literal(conjunct)
                && column.name.same_as(data_element)
                && is_value_literal(literal)
            {
                fill(&mut value, literal)?;
            } else if let Some(literal) = candidate.program_stage(conjunct) {
                fill(&mut stage, literal)?;
            } else {
                return None;
            }
        }
        let correlation = correlation?;
        let value = value?;
        not_null?;

        if clean_suffix(&data_element.value).is_empty() {
            return None;
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("dataElementId".to_string(), data_element.value.clone());
        metadata.insert("value".to_string(), value.as_text());
        if let Some(stage) = stage {
            metadata.insert("programStageId".to_string(), stage.as_text());
        }

        Some(FoundSubSelect {
            name: format!("de_count_{}", data_element.value),
            column_reference: Ident::new("count"),
            join_alias: format!("dec_{}", clean_suffix(&data_element.value)),
            correlation,
            metadata,
            cte_body: count_body(candidate.table, data_element, value, stage),
        })
    }
}

fn is_value_literal(literal: &Literal) -> bool {
    matches!(
        literal,
        Literal::String(_) | Literal::Integer(_) | Literal::Decimal(_)
    )
}

fn count_body(
    table: &ObjectName,
    data_element: &Ident,
    value: &Literal,
    stage: Option<&Literal>,
) -> String {
    let stage = stage
        .map(|stage| format!(" and ps = {}", stage))
        .unwrap_or_default();
    format!(
        "select enrollment, count({de}) as count from {table} \
         where {de} is not null and {de} = {value}{stage} group by enrollment",
        de = data_element,
    )
}
