use std::path::Path;

use pretty_assertions::assert_eq;
use sqlhoist::prelude::*;

const LAST_SCHED_QUERY: &str = "select subax.enrollment from analytics_enrollment_x as subax \
    where (select scheduleddate from analytics_event_x \
    where analytics_event_x.enrollment = subax.enrollment \
    and scheduleddate is not null order by occurreddate desc limit 1) is not null";

#[test]
fn test_optimize_reports_generated_ctes() {
    let engine = Engine::new(&Config::default()).unwrap();
    let report = engine.optimize(LAST_SCHED_QUERY).unwrap();
    assert_eq!(report.rewritten_selects, 1);
    assert_eq!(report.fallback, None);
    assert_eq!(report.ctes.len(), 1);
    assert_eq!(report.ctes[0].name, "last_sched");
    assert!(report.sql.starts_with("with last_sched as ("));
    assert!(report.sql.ends_with(
        "left join last_sched as ls on subax.enrollment = ls.enrollment \
         where ls.scheduleddate is not null"
    ));
}

#[test]
fn test_json_output_lists_ctes() {
    let engine = Engine::new(&Config::default()).unwrap();
    let report = engine.optimize(LAST_SCHED_QUERY).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&render(&report, OutputFormat::Json).unwrap()).unwrap();
    assert_eq!(json["rewritten_selects"], 1);
    assert_eq!(json["ctes"][0]["name"], "last_sched");
    assert_eq!(json["ctes"][0]["join_alias"], "ls");
    assert!(json.get("fallback").is_none());
}

#[test]
fn test_fallback_passes_input_through() {
    let engine = Engine::new(&Config::default()).unwrap();
    let report = engine.optimize("  select 1 union select 2\n").unwrap();
    assert_eq!(report.sql, "select 1 union select 2");
    assert!(report.ctes.is_empty());
    assert!(report.fallback.unwrap().contains("Unsupported"));
}

#[test]
fn test_errors_surface_without_fallback() {
    let config = Config::from_toml(
        "[optimizer]\nfallback_on_error = false\n",
        Path::new("strict.toml"),
    )
    .unwrap();
    let engine = Engine::new(&config).unwrap();
    let err = engine.optimize("select * from").unwrap_err();
    assert!(matches!(err, CliError::Hoist(_)));
    assert!(err.to_string().starts_with("[HOIST-001]"));
}

#[test]
fn test_disabled_pattern_from_config() {
    let config = Config::from_toml(
        "[optimizer]\ndisabled_patterns = [\"last_sched\"]\n\n[output]\nformat = \"json\"\n",
        Path::new("sqlhoist.toml"),
    )
    .unwrap();
    assert_eq!(config.output.format, OutputFormat::Json);

    let engine = Engine::new(&config).unwrap();
    assert_eq!(engine.pattern_ids()[0], "last_created");
    let report = engine.optimize(LAST_SCHED_QUERY).unwrap();
    assert_eq!(report.rewritten_selects, 0);
    assert!(report.ctes.is_empty());
}

#[test]
fn test_explain_lists_recognized_subqueries() {
    let engine = Engine::new(&Config::default()).unwrap();
    let recognized = engine.explain(LAST_SCHED_QUERY).unwrap();
    assert_eq!(recognized.len(), 1);
    assert_eq!(recognized[0].found.name, "last_sched");
    assert_eq!(recognized[0].found.join_alias, "ls");
    assert_eq!(recognized[0].found.correlation.outer.to_string(), "subax.enrollment");

    assert!(engine.explain("select 1").unwrap().is_empty());
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/sqlhoist.toml"))).unwrap_err();
    assert!(matches!(err, CliError::ConfigRead { .. }));
}
