//! "Most recent event value for an enrollment" idioms:
//!
//! ```sql
//! (select scheduleddate from analytics_event_<program>
//!   where analytics_event_<program>.enrollment = subax.enrollment
//!     and scheduleddate is not null
//!   order by occurreddate desc limit 1)
//! ```

use std::collections::BTreeMap;

use tracing::trace;

use crate::ast::{Ident, Literal, ObjectName, Query};
use crate::descriptor::{Correlation, FoundSubSelect};
use crate::matcher::SubselectMatcher;
use crate::matcher::shape::{
    Candidate, ENROLLMENT_COLUMN, EVENT_TABLE_PREFIX, OCCURRED_DATE_COLUMN, clean_suffix, fill,
};

const SCHEDULED_DATE_COLUMN: &str = "scheduleddate";
const CREATED_COLUMN: &str = "created";
/// Row number column of the generated CTE body.
const ROW_NUMBER_COLUMN: &str = "rn";

/// What every latest-event subquery captures.
struct LatestEvent<'a> {
    table: &'a ObjectName,
    column: &'a Ident,
    correlation: Correlation,
    stage: Option<&'a Literal>,
}

fn latest_event(query: &Query) -> Option<LatestEvent<'_>> {
    let candidate = Candidate::of(query)?;
    if !candidate.table_starts_with(EVENT_TABLE_PREFIX)
        || !candidate.is_latest_first(OCCURRED_DATE_COLUMN)
    {
        return None;
    }
    let column = &candidate.local_column(candidate.projection)?.name;

    let mut correlation = None;
    let mut not_null = None;
    let mut stage = None;
    for conjunct in candidate.conjuncts.iter().copied() {
        if let Some(found) = candidate.correlation(conjunct, ENROLLMENT_COLUMN, ENROLLMENT_COLUMN) {
            fill(&mut correlation, found)?;
        } else if candidate.is_not_null_on(conjunct, column) {
            fill(&mut not_null, ())?;
        } else if let Some(literal) = candidate.program_stage(conjunct) {
            fill(&mut stage, literal)?;
        } else {
            trace!(conjunct = %conjunct, "unrecognized predicate in latest-event subquery");
            return None;
        }
    }
    not_null?;

    Some(LatestEvent {
        table: candidate.table,
        column,
        correlation: correlation?,
        stage,
    })
}

/// `select enrollment, <col> from (... row_number() ...) as t where rn = 1`
fn latest_event_body(event: &LatestEvent<'_>) -> String {
    let column = event.column;
    let stage = event
        .stage
        .map(|stage| format!(" and ps = {}", stage))
        .unwrap_or_default();
    format!(
        "select enrollment, {column} from (select enrollment, {column}, \
         row_number() over (partition by enrollment order by occurreddate desc) as rn \
         from {table} where {column} is not null{stage}) as t where rn = 1",
        table = event.table,
    )
}

fn found(
    event: LatestEvent<'_>,
    name: String,
    join_alias: String,
    metadata: BTreeMap<String, String>,
) -> FoundSubSelect {
    FoundSubSelect {
        cte_body: latest_event_body(&event),
        name,
        column_reference: event.column.clone(),
        join_alias,
        correlation: event.correlation,
        metadata,
    }
}

/// Latest `scheduleddate` of an enrollment. Named `last_sched`, joined as `ls`.
pub struct LastScheduledMatcher;

impl SubselectMatcher for LastScheduledMatcher {
    fn id(&self) -> &'static str {
        "last_sched"
    }

    fn find(&self, subquery: &Query) -> Option<FoundSubSelect> {
        let event = latest_event(subquery)?;
        if !event.column.matches(SCHEDULED_DATE_COLUMN) || event.stage.is_some() {
            return None;
        }
        Some(found(event, "last_sched".into(), "ls".into(), BTreeMap::new()))
    }
}

/// Latest `created` of an enrollment. Named `last_created`, joined as `lc`.
pub struct LastCreatedMatcher;

impl SubselectMatcher for LastCreatedMatcher {
    fn id(&self) -> &'static str {
        "last_created"
    }

    fn find(&self, subquery: &Query) -> Option<FoundSubSelect> {
        let event = latest_event(subquery)?;
        if !event.column.matches(CREATED_COLUMN) || event.stage.is_some() {
            return None;
        }
        Some(found(event, "last_created".into(), "lc".into(), BTreeMap::new()))
    }
}

/// Latest value of any other event column, optionally within one program
/// stage.
pub struct LastValueMatcher;

impl SubselectMatcher for LastValueMatcher {
    fn id(&self) -> &'static str {
        "last_value"
    }

    fn find(&self, subquery: &Query) -> Option<FoundSubSelect> {
        let event = latest_event(subquery)?;
        // The body already projects `enrollment` and `rn` under those names.
        if [SCHEDULED_DATE_COLUMN, CREATED_COLUMN, ENROLLMENT_COLUMN, ROW_NUMBER_COLUMN]
            .iter()
            .any(|name| event.column.matches(name))
        {
            return None;
        }

        let mut suffix = clean_suffix(&event.column.value);
        if suffix.is_empty() {
            return None;
        }
        let mut metadata = BTreeMap::new();
        metadata.insert("dataElementId".to_string(), event.column.value.clone());
        if let Some(stage) = event.stage {
            let stage_suffix = clean_suffix(&stage.as_text());
            if stage_suffix.is_empty() {
                return None;
            }
            suffix = format!("{}_{}", suffix, stage_suffix);
            metadata.insert("programStageId".to_string(), stage.as_text());
        }

        Some(found(
            event,
            format!("last_value_{}", suffix),
            format!("lv_{}", suffix),
            metadata,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::parse_query;

    const LAST_SCHED: &str = "select scheduleddate from analytics_event_ur1edk5oe2n \
        where analytics_event_ur1edk5oe2n.enrollment = subax.enrollment \
        and scheduleddate is not null order by occurreddate desc limit 1";

    #[test]
    fn test_last_sched() {
        let query = parse_query(LAST_SCHED).unwrap();
        let found = LastScheduledMatcher.find(&query).unwrap();
        assert_eq!(found.name, "last_sched");
        assert_eq!(found.join_alias, "ls");
        assert_eq!(found.column_reference, Ident::new("scheduleddate"));
        assert_eq!(found.correlation.outer.to_string(), "subax.enrollment");
        assert_eq!(
            found.cte_body,
            "select enrollment, scheduleddate from (select enrollment, scheduleddate, \
             row_number() over (partition by enrollment order by occurreddate desc) as rn \
             from analytics_event_ur1edk5oe2n where scheduleddate is not null) as t where rn = 1"
        );
        assert!(found.metadata.is_empty());
        assert!(LastCreatedMatcher.find(&query).is_none());
        assert!(LastValueMatcher.find(&query).is_none());
    }

    #[test]
    fn test_last_created_any_predicate_order() {
        let query = parse_query(
            "select created from analytics_event_abc where created is not null \
             and analytics_event_abc.enrollment = subax.enrollment \
             order by occurreddate desc limit 1",
        )
        .unwrap();
        let found = LastCreatedMatcher.find(&query).unwrap();
        assert_eq!(found.name, "last_created");
        assert_eq!(found.join_alias, "lc");
    }

    #[test]
    fn test_last_value_with_stage() {
        let query = parse_query(
            r#"select "fWIAEtYVEGk" from analytics_event_ur1edk5oe2n
               where analytics_event_ur1edk5oe2n.enrollment = subax.enrollment
               and "fWIAEtYVEGk" is not null and ps = 'A03MvHHogjR'
               order by occurreddate desc limit 1"#,
        )
        .unwrap();
        let found = LastValueMatcher.find(&query).unwrap();
        assert_eq!(found.name, "last_value_fwiaetyvegk_a03mvhhogjr");
        assert_eq!(found.join_alias, "lv_fwiaetyvegk_a03mvhhogjr");
        assert_eq!(found.column_reference, Ident::quoted("fWIAEtYVEGk"));
        assert_eq!(found.metadata["dataElementId"], "fWIAEtYVEGk");
        assert_eq!(found.metadata["programStageId"], "A03MvHHogjR");
        assert!(found.cte_body.contains(r#"where "fWIAEtYVEGk" is not null and ps = 'A03MvHHogjR'"#));
    }

    #[test]
    fn test_last_value_skips_body_column_names() {
        for column in ["rn", "enrollment", "RN"] {
            let sql = format!(
                "select {column} from analytics_event_x \
                 where analytics_event_x.enrollment = subax.enrollment \
                 and {column} is not null order by occurreddate desc limit 1"
            );
            let query = parse_query(&sql).unwrap();
            assert!(LastValueMatcher.find(&query).is_none(), "{}", sql);
        }
    }

    #[test]
    fn test_shape_deviations_do_not_match() {
        for sql in [
            // ascending order
            "select scheduleddate from analytics_event_x where analytics_event_x.enrollment = subax.enrollment and scheduleddate is not null order by occurreddate asc limit 1",
            // limit other than one
            "select scheduleddate from analytics_event_x where analytics_event_x.enrollment = subax.enrollment and scheduleddate is not null order by occurreddate desc limit 2",
            // missing null check
            "select scheduleddate from analytics_event_x where analytics_event_x.enrollment = subax.enrollment order by occurreddate desc limit 1",
            // extra predicate
            "select scheduleddate from analytics_event_x where analytics_event_x.enrollment = subax.enrollment and scheduleddate is not null and ou = 'x' order by occurreddate desc limit 1",
            // not correlated
            "select scheduleddate from analytics_event_x where scheduleddate is not null order by occurreddate desc limit 1",
            // other table family
            "select scheduleddate from analytics_enrollment_x where analytics_enrollment_x.enrollment = subax.enrollment and scheduleddate is not null order by occurreddate desc limit 1",
        ] {
            let query = parse_query(sql).unwrap();
            assert!(LastScheduledMatcher.find(&query).is_none(), "{}", sql);
        }
    }
}
