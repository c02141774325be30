//! Splices generated CTEs into a statement's `WITH` clause.

use tracing::{debug, warn};

use crate::ast::{Cte, Query};
use crate::descriptor::GeneratedCte;
use crate::error::{HoistError, HoistResult};
use crate::lower::parse_query;

/// Places generated CTEs ahead of the statement's own CTEs, one entry per
/// name.
#[derive(Debug, Clone, Copy, Default)]
pub struct CteInjector;

impl CteInjector {
    pub fn new() -> Self {
        Self
    }

    /// Adds `generated` to `query`'s `WITH` clause and returns how many
    /// entries were added.
    ///
    /// Every body is parsed before the statement is touched, so a malformed
    /// body leaves `query` as it was. A statement without a `WITH` clause
    /// always comes out with one, possibly empty.
    pub fn inject(&self, query: &mut Query, generated: &[GeneratedCte]) -> HoistResult<usize> {
        let mut fresh: Vec<Cte> = Vec::with_capacity(generated.len());
        for cte in generated {
            let name = cte.name_ident();
            if fresh.iter().any(|c| c.name.same_as(&name)) {
                debug!(name = %cte.name, "CTE already queued");
                continue;
            }
            let body = parse_query(&cte.body).map_err(|e| HoistError::MalformedCte {
                name: cte.name.clone(),
                reason: e.to_string(),
            })?;
            fresh.push(Cte { name, query: body });
        }

        let existing = query.with.take().unwrap_or_default();
        fresh.retain(|cte| {
            let taken = existing.iter().any(|e| e.name.same_as(&cte.name));
            if taken {
                warn!(name = %cte.name, "statement already defines a CTE with this name, skipping");
            }
            !taken
        });

        let added = fresh.len();
        fresh.extend(existing);
        query.with = Some(fresh);
        Ok(added)
    }
}
