//! Filtered reads across partitions

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::entry::AuditEvent;
use crate::audit::logger::AuditLogger;
use crate::error::AuditResult;

pub const DEFAULT_QUERY_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            actor: None,
            action: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        self.actor.as_deref().map_or(true, |actor| event.actor == actor)
            && self.action.as_deref().map_or(true, |action| event.action == action)
    }

    fn covers(&self, date: NaiveDate) -> bool {
        self.start_date.map_or(true, |start| date >= start)
            && self.end_date.map_or(true, |end| date <= end)
    }
}

impl AuditLogger {
    /// Events matching the query, oldest partition first
    pub fn query(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEvent>> {
        let mut found = Vec::new();
        if query.limit == 0 {
            return Ok(found);
        }

        for partition in self.partitions()? {
            if !query.covers(partition.date()) {
                continue;
            }

            for event in self.read_partition(&partition)? {
                if query.matches(&event) {
                    found.push(event);
                    if found.len() >= query.limit {
                        debug!("Audit query hit limit of {}", query.limit);
                        return Ok(found);
                    }
                }
            }
        }

        Ok(found)
    }
}
