//! Drives the core pipeline the way the configuration asks for.

use serde::Serialize;
use tracing::warn;

use sqlhoist_core::{
    CteOptimizationPipeline, ExpressionTransformer, FoundSubSelect, GeneratedCte, HoistError,
    MatcherRegistry, SubqueryId, parse_query,
};

use crate::config::{Config, OutputFormat};
use crate::error::{CliError, CliResult};

/// What happened to one statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub sql: String,
    pub ctes: Vec<GeneratedCte>,
    pub rewritten_selects: usize,
    /// Set when the input was passed through because optimization failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// One subquery the registry recognizes, for `explain`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognized {
    pub id: SubqueryId,
    #[serde(flatten)]
    pub found: FoundSubSelect,
}

pub struct Engine {
    pipeline: CteOptimizationPipeline,
    fallback_on_error: bool,
}

impl Engine {
    pub fn new(config: &Config) -> CliResult<Self> {
        let known = MatcherRegistry::new().ids();
        if let Some(unknown) = config
            .optimizer
            .disabled_patterns
            .iter()
            .find(|id| !known.contains(&id.as_str()))
        {
            return Err(CliError::UnknownPattern(unknown.clone()));
        }

        let registry = MatcherRegistry::without(&config.optimizer.disabled_patterns);
        Ok(Self {
            pipeline: CteOptimizationPipeline::with_registry(registry),
            fallback_on_error: config.optimizer.fallback_on_error,
        })
    }

    pub fn pattern_ids(&self) -> Vec<&'static str> {
        self.pipeline.registry().ids()
    }

    pub fn optimize(&self, sql: &str) -> CliResult<Report> {
        let result = parse_query(sql).and_then(|query| self.pipeline.optimize_query(query));
        match result {
            Ok(optimized) => Ok(Report {
                sql: optimized.query.to_string(),
                ctes: optimized.ctes,
                rewritten_selects: optimized.rewritten_selects,
                fallback: None,
            }),
            Err(err) if self.fallback_on_error => {
                warn!(code = err.code(), error = %err, "passing statement through unchanged");
                Ok(Report {
                    sql: sql.trim().to_string(),
                    ctes: Vec::new(),
                    rewritten_selects: 0,
                    fallback: Some(err.to_string()),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Every recognized subquery of the statement, in traversal order. The
    /// statement itself is not rewritten.
    pub fn explain(&self, sql: &str) -> Result<Vec<Recognized>, HoistError> {
        let query = parse_query(sql)?;
        let mut transformer = ExpressionTransformer::new(self.pipeline.registry());
        transformer.transform_query(query);
        Ok(transformer
            .finish()
            .into_iter()
            .map(|(id, extracted)| Recognized {
                id,
                found: extracted.found,
            })
            .collect())
    }
}

pub fn render(report: &Report, format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Sql => Ok(report.sql.clone()),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
    }
}
