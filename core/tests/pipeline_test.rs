use pretty_assertions::assert_eq;
use sqlhoist_core::prelude::*;
use sqlhoist_core::{CteInjector, GeneratedCte, transform};

fn last_event(column: &str, table: &str) -> String {
    format!(
        "(select {column} from {table} where {table}.enrollment = subax.enrollment \
         and {column} is not null order by occurreddate desc limit 1)"
    )
}

fn where_expr(sql: &str) -> Expr {
    parse_query(sql)
        .unwrap()
        .body
        .selection
        .expect("query has a where clause")
}

#[test]
fn test_last_created_in_program_indicator_cte() {
    let sql = format!(
        "with pi_inputcte as (select subax.enrollment from analytics_enrollment_ur1edk5oe2n as subax \
         where {} is not null) select * from pi_inputcte",
        last_event("created", "analytics_event_ur1edk5oe2n")
    );
    let out = CteOptimizationPipeline::new().optimize(&sql).unwrap();
    assert_eq!(
        out,
        "with last_created as (select enrollment, created from (select enrollment, created, \
         row_number() over (partition by enrollment order by occurreddate desc) as rn \
         from analytics_event_ur1edk5oe2n where created is not null) as t where rn = 1), \
         pi_inputcte as (select subax.enrollment from analytics_enrollment_ur1edk5oe2n as subax \
         left join last_created as lc on subax.enrollment = lc.enrollment \
         where lc.created is not null) select * from pi_inputcte"
    );
}

#[test]
fn test_two_idioms_in_one_cte() {
    let sql = format!(
        "with pi_inputcte as (select subax.enrollment from analytics_enrollment_x as subax \
         where {} > {}) select * from pi_inputcte",
        last_event("scheduleddate", "analytics_event_x"),
        last_event("created", "analytics_event_x"),
    );
    let optimized = CteOptimizationPipeline::new()
        .optimize_query(parse_query(&sql).unwrap())
        .unwrap();

    let names: Vec<String> = optimized
        .query
        .ctes()
        .iter()
        .map(|c| c.name.to_string())
        .collect();
    assert_eq!(names, vec!["last_sched", "last_created", "pi_inputcte"]);
    assert_eq!(optimized.rewritten_selects, 1);

    let pi = optimized.query.ctes()[2].query.to_string();
    assert_eq!(
        pi,
        "select subax.enrollment from analytics_enrollment_x as subax \
         left join last_sched as ls on subax.enrollment = ls.enrollment \
         left join last_created as lc on subax.enrollment = lc.enrollment \
         where ls.scheduleddate > lc.created"
    );
}

#[test]
fn test_aggregated_relationship_count() {
    let sql = "select subax.trackedentity from analytics_enrollment_x as subax \
               where (select sum(relationship_count) from analytics_rs_relationship arr \
               where arr.trackedentityid = subax.trackedentity) > 1";
    let optimized = CteOptimizationPipeline::new()
        .optimize_query(parse_query(sql).unwrap())
        .unwrap();
    assert_eq!(optimized.ctes.len(), 1);
    assert_eq!(optimized.ctes[0].name, "relationship_count_agg");
    assert_eq!(
        optimized.query.body.to_string(),
        "select subax.trackedentity from analytics_enrollment_x as subax \
         left join relationship_count_agg as rlc on subax.trackedentity = rlc.trackedentityid \
         where rlc.relationship_count > 1"
    );
}

#[test]
fn test_data_element_count_end_to_end() {
    let sql = "select subax.enrollment from analytics_enrollment_t as subax \
               where (select count(\"X\") from analytics_event_t \
               where analytics_event_t.enrollment = subax.enrollment \
               and \"X\" is not null and \"X\" = 1 and ps = 'P1') > 0";
    let optimized = CteOptimizationPipeline::new()
        .optimize_query(parse_query(sql).unwrap())
        .unwrap();

    let cte = &optimized.ctes[0];
    assert_eq!(cte.name, "de_count_X");
    assert_eq!(cte.join_alias, "dec_x");
    assert_eq!(optimized.query.ctes()[0].name.to_string(), "\"de_count_X\"");

    let body = optimized.query.body.to_string();
    assert!(
        body.contains("left join \"de_count_X\" as dec_x on subax.enrollment = dec_x.enrollment"),
        "{}",
        body
    );
    assert!(body.ends_with("where dec_x.count > 0"), "{}", body);
}

#[test]
fn test_predicate_order_does_not_change_descriptor() {
    let predicates = [
        "analytics_event_t.enrollment = subax.enrollment",
        "\"X\" is not null",
        "\"X\" = 1",
        "ps = 'P1'",
    ];
    let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];

    let registry = MatcherRegistry::new();
    let found: Vec<_> = orders
        .iter()
        .map(|order| {
            let conjuncts: Vec<&str> = order.iter().map(|&i| predicates[i]).collect();
            let subquery = parse_query(&format!(
                "select count(\"X\") from analytics_event_t where {}",
                conjuncts.join(" and ")
            ))
            .unwrap();
            registry.find(&subquery).expect("data element count matches")
        })
        .collect();

    for other in &found[1..] {
        assert_eq!(other, &found[0]);
    }
    assert_eq!(found[0].metadata["dataElementId"], "X");
    assert_eq!(found[0].metadata["value"], "1");
    assert_eq!(found[0].metadata["programStageId"], "P1");
}

#[test]
fn test_same_metadata_yields_one_with_entry() {
    let count = "(select count(\"X\") from analytics_event_t \
                 where analytics_event_t.enrollment = subax.enrollment \
                 and \"X\" is not null and \"X\" = 1)";
    let reordered = "(select count(\"X\") from analytics_event_t \
                     where \"X\" = 1 and \"X\" is not null \
                     and subax.enrollment = analytics_event_t.enrollment)";
    let sql = format!(
        "select subax.enrollment from analytics_enrollment_t as subax where {} + {} > 2",
        count, reordered
    );
    let optimized = CteOptimizationPipeline::new()
        .optimize_query(parse_query(&sql).unwrap())
        .unwrap();

    assert_eq!(optimized.query.ctes().len(), 1);
    assert_eq!(optimized.query.body.from[0].joins.len(), 1);
    assert!(
        optimized
            .query
            .body
            .to_string()
            .ends_with("where dec_x.count + dec_x.count > 2")
    );
}

#[test]
fn test_wrong_table_is_left_alone() {
    let sql = "select subax.enrollment from analytics_enrollment_t as subax \
               where (select count(\"X\") from wrong_table \
               where wrong_table.enrollment = subax.enrollment \
               and \"X\" is not null and \"X\" = 1 and ps = 'P1') > 0";
    let input = where_expr(sql);
    let output = transform(input.clone(), &MatcherRegistry::new());
    assert_eq!(output.expr, input);
    assert!(output.extracted.is_empty());

    let rendered = CteOptimizationPipeline::new().optimize(sql).unwrap();
    assert_eq!(rendered, parse_query(sql).unwrap().to_string());
}

#[test]
fn test_injection_keeps_existing_ctes_after_new_ones() {
    let mut query = parse_query(
        "with a as (select 1 as x), b as (select 2 as x) select * from a, b",
    )
    .unwrap();
    let existing = query.ctes().to_vec();

    let subquery = parse_query(
        "select scheduleddate from analytics_event_x \
         where analytics_event_x.enrollment = subax.enrollment \
         and scheduleddate is not null order by occurreddate desc limit 1",
    )
    .unwrap();
    let found = MatcherRegistry::new().find(&subquery).unwrap();
    let generated: Vec<GeneratedCte> = vec![found.to_generated_cte()];

    let added = CteInjector::new().inject(&mut query, &generated).unwrap();
    assert_eq!(added, 1);
    assert_eq!(query.ctes().len(), existing.len() + 1);
    assert_eq!(query.ctes()[0].name.to_string(), "last_sched");
    assert_eq!(&query.ctes()[1..], existing.as_slice());
}

#[test]
fn test_disabled_idiom_is_not_hoisted() {
    let sql = format!(
        "select subax.enrollment from analytics_enrollment_x as subax where {} is not null",
        last_event("created", "analytics_event_x")
    );
    let pipeline = CteOptimizationPipeline::with_registry(MatcherRegistry::without(&["last_created"]));
    let optimized = pipeline.optimize_query(parse_query(&sql).unwrap()).unwrap();
    assert!(optimized.ctes.is_empty());
    assert_eq!(optimized.rewritten_selects, 0);
}

#[test]
fn test_parse_errors_surface_with_code() {
    let err = CteOptimizationPipeline::new()
        .optimize("select * from")
        .unwrap_err();
    assert_eq!(err.code(), "HOIST-001");

    let err = CteOptimizationPipeline::new()
        .optimize("select 1 union select 2")
        .unwrap_err();
    assert_eq!(err.code(), "HOIST-002");
}
