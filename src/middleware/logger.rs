//! Structured before/after logging of dispatches.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{Middleware, Next};
use crate::action::{Dispatch, Outcome};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::history::{snapshot_to_value, Snapshot};

/// Logger options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Prev and next state in one event instead of one event each.
    pub collapsed: bool,
    /// Attach a wall-clock timestamp to the dispatch event.
    pub timestamps: bool,
    /// Log the before/after state of every domain that changed.
    pub diff: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            collapsed: true,
            timestamps: true,
            diff: false,
        }
    }
}

type LogFilter = Arc<dyn Fn(&Dispatch) -> bool + Send + Sync>;

/// Logs each dispatch with its duration and state changes via `tracing`.
#[derive(Clone, Default)]
pub struct LoggerMiddleware {
    config: LoggerConfig,
    filter: Option<LogFilter>,
}

impl LoggerMiddleware {
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            filter: None,
        }
    }

    /// Only log items for which `filter` returns true.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Dispatch) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    fn log_dispatch(&self, label: &str, before: &Snapshot, after: &Snapshot, elapsed_us: u64) {
        let changed = changed_domains(before, after);
        let at = self.config.timestamps.then(|| Utc::now().to_rfc3339());

        if self.config.collapsed {
            info!(action = %label, elapsed_us, changed = ?changed, at = ?at, "dispatch");
            debug!(
                action = %label,
                prev = %snapshot_to_value(before),
                next = %snapshot_to_value(after),
                "state"
            );
        } else {
            info!(action = %label, elapsed_us, at = ?at, "dispatch");
            debug!(state = %snapshot_to_value(before), "prev state");
            debug!(state = %snapshot_to_value(after), "next state");
        }

        if self.config.diff {
            for domain in changed {
                debug!(
                    domain,
                    before = ?before.get(domain),
                    after = ?after.get(domain),
                    "diff"
                );
            }
        }
    }
}

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: &Dispatcher, item: Dispatch, next: Next<'_>) -> Result<Outcome> {
        if let Some(filter) = &self.filter {
            if !filter(&item) {
                return next.run(item);
            }
        }

        let label = item.label().to_string();
        let before = ctx.snapshot();
        let started = Instant::now();
        let result = next.run(item);
        let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

        match &result {
            Ok(_) => self.log_dispatch(&label, &before, &ctx.snapshot(), elapsed_us),
            Err(err) => warn!(action = %label, elapsed_us, error = %err, "dispatch failed"),
        }
        result
    }
}

/// Domains whose state was replaced between two snapshots.
pub(crate) fn changed_domains<'a>(before: &'a Snapshot, after: &'a Snapshot) -> Vec<&'a str> {
    after
        .iter()
        .filter(|(domain, state)| {
            before
                .get(domain.as_str())
                .map_or(true, |prior| !Arc::ptr_eq(prior, state))
        })
        .map(|(domain, _)| domain.as_str())
        .collect()
}
