//! Hoists recognized correlated analytics subqueries into shared CTEs.
//!
//! Each recognized subquery is replaced by a column of a `LEFT JOIN`ed CTE,
//! and CTEs that compute the same thing are emitted once.
//!
//! ```ignore
//! use sqlhoist_core::CteOptimizationPipeline;
//! let sql = CteOptimizationPipeline::new().optimize(
//!     "select subax.enrollment from analytics_enrollment_x as subax where \
//!      (select created from analytics_event_x where analytics_event_x.enrollment = subax.enrollment \
//!       and created is not null order by occurreddate desc limit 1) is not null",
//! )?;
//! ```

pub mod ast;
pub mod descriptor;
pub mod error;
pub mod injector;
pub mod lower;
pub mod matcher;
pub mod pipeline;
pub mod transformer;

pub use descriptor::{Correlation, ExtractedSubquery, FoundSubSelect, GeneratedCte, SubqueryId};
pub use error::{HoistError, HoistResult};
pub use injector::CteInjector;
pub use lower::parse_query;
pub use matcher::{MatcherRegistry, SubselectMatcher};
pub use pipeline::{CteOptimizationPipeline, Optimized};
pub use transformer::{ExpressionTransformer, Transformation, transform};

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::error::*;
    pub use crate::lower::parse_query;
    pub use crate::matcher::{MatcherRegistry, SubselectMatcher};
    pub use crate::pipeline::{CteOptimizationPipeline, Optimized};
}
