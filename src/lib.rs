//! # sqlhoist
//!
//! Command-line front end for [`sqlhoist_core`]: reads one generated
//! analytics statement, hoists the correlated subqueries it recognizes into
//! shared CTEs and prints the result.
//!
//! ```rust,ignore
//! use sqlhoist::prelude::*;
//!
//! let engine = Engine::new(&Config::load(None)?)?;
//! let report = engine.optimize("select subax.enrollment from analytics_enrollment_x as subax")?;
//! println!("{}", render(&report, OutputFormat::Sql)?);
//! ```

pub mod config;
pub mod engine;
pub mod error;

pub mod prelude {
    pub use crate::config::{Config, OutputFormat};
    pub use crate::engine::{Engine, Recognized, Report, render};
    pub use crate::error::*;
}
