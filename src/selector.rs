//! Decides which database pages are candidates for a scan.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::config::ScanStrategy;
use crate::notion::{DatabaseQuery, Page};

/// Max pages requested per run.
pub const BATCH_SIZE: u32 = 20;

/// Extra minute added to the recency window so consecutive runs overlap
/// instead of leaving a gap at the boundary.
const WINDOW_SLACK_MINUTES: i64 = 1;

pub struct ScanSelector<'a> {
    strategy: &'a ScanStrategy,
}

impl<'a> ScanSelector<'a> {
    pub fn new(strategy: &'a ScanStrategy) -> Self {
        Self { strategy }
    }

    /// Whether pages selected by this strategy carry a flag to clear afterwards.
    pub fn flag_property(&self) -> Option<&str> {
        match self.strategy {
            ScanStrategy::ExplicitFlag { property } => Some(property.as_str()),
            ScanStrategy::RecencyWindow { .. } => None,
        }
    }

    /// Oldest creation time still inside the window, if windowed.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.strategy {
            ScanStrategy::RecencyWindow { window_minutes } => Some(
                now - Duration::minutes(i64::from(*window_minutes) + WINDOW_SLACK_MINUTES),
            ),
            ScanStrategy::ExplicitFlag { .. } => None,
        }
    }

    pub fn query(&self, now: DateTime<Utc>) -> DatabaseQuery {
        let filter = match self.strategy {
            ScanStrategy::ExplicitFlag { property } => json!({
                "property": property,
                "checkbox": { "equals": true },
            }),
            ScanStrategy::RecencyWindow { .. } => {
                let cutoff = self.cutoff(now).unwrap_or(now);
                json!({
                    "timestamp": "created_time",
                    "created_time": { "after": cutoff.to_rfc3339() },
                })
            }
        };

        DatabaseQuery {
            page_size: BATCH_SIZE,
            filter: Some(filter),
        }
    }

    /// Client-side check mirroring the query filter. Pages without a parsable
    /// creation time are kept; the server already filtered them.
    pub fn admits(&self, page: &Page, now: DateTime<Utc>) -> bool {
        let Some(cutoff) = self.cutoff(now) else {
            return true;
        };
        match page
            .created_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        {
            Some(created) => created.with_timezone(&Utc) > cutoff,
            None => true,
        }
    }
}
