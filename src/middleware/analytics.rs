//! Sampled, de-identified action tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::{Middleware, Next};
use crate::action::{Dispatch, Outcome};
use crate::dispatcher::Dispatcher;
use crate::error::Result;

/// Analytics options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Probability in `[0, 1]` that a dispatch is tracked.
    pub sample_rate: f64,
    /// Action types never tracked.
    pub exclude: Vec<String>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            exclude: Vec::new(),
        }
    }
}

/// What the tracker receives. Carries no payload or meta fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    #[serde(rename = "type")]
    pub action_type: String,
    pub group: String,
    pub timestamp: DateTime<Utc>,
}

type Tracker = Arc<dyn Fn(&AnalyticsEvent) + Send + Sync>;

/// Forwards a sample of successfully dispatched actions to a tracker.
pub struct AnalyticsMiddleware {
    sample_rate: f64,
    exclude: HashSet<String>,
    tracker: Tracker,
}

impl AnalyticsMiddleware {
    pub fn new<F>(config: AnalyticsConfig, tracker: F) -> Self
    where
        F: Fn(&AnalyticsEvent) + Send + Sync + 'static,
    {
        Self {
            sample_rate: clamp_rate(config.sample_rate),
            exclude: config.exclude.into_iter().collect(),
            tracker: Arc::new(tracker),
        }
    }

    fn sampled(&self) -> bool {
        self.sample_rate >= 1.0 || rand::random::<f64>() < self.sample_rate
    }
}

/// Clamp to `[0, 1]`; NaN disables tracking.
fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

impl Middleware for AnalyticsMiddleware {
    fn handle(&self, _ctx: &Dispatcher, item: Dispatch, next: Next<'_>) -> Result<Outcome> {
        let event = item
            .as_action()
            .filter(|action| !self.exclude.contains(&action.kind))
            .filter(|_| self.sampled())
            .map(|action| AnalyticsEvent {
                action_type: action.kind.clone(),
                group: action.group(),
                timestamp: Utc::now(),
            });

        let outcome = next.run(item)?;
        if let Some(event) = event {
            (self.tracker)(&event);
        }
        Ok(outcome)
    }
}
