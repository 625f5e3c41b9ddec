//! Failure containment for the rest of the chain.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use super::{Middleware, Next};
use crate::action::{Action, Dispatch, Outcome};
use crate::dispatcher::Dispatcher;
use crate::error::Result;

/// Error boundary options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBoundaryConfig {
    /// Return the original error after reporting it.
    pub rethrow: bool,
    /// Also dispatch a toast notification action.
    pub notify: bool,
    /// Type of the synthetic system-error action.
    pub error_type: String,
    /// Type of the toast notification action.
    pub toast_type: String,
}

impl Default for ErrorBoundaryConfig {
    fn default() -> Self {
        Self {
            rethrow: false,
            notify: true,
            error_type: "SYSTEM_ERROR".to_string(),
            toast_type: "UI_SHOW_TOAST".to_string(),
        }
    }
}

/// Converts failures further down the chain into actions.
///
/// On error it dispatches a system-error action (and a toast when
/// `notify` is set), then swallows the failure with [`Outcome::Swallowed`]
/// unless `rethrow` is set. Failures of its own synthetic actions are
/// logged but not reported again.
#[derive(Debug, Clone, Default)]
pub struct ErrorBoundaryMiddleware {
    config: ErrorBoundaryConfig,
}

impl ErrorBoundaryMiddleware {
    pub fn new(config: ErrorBoundaryConfig) -> Self {
        Self { config }
    }

    fn is_own(&self, label: &str) -> bool {
        label == self.config.error_type || label == self.config.toast_type
    }

    fn report(&self, ctx: &Dispatcher, label: &str, message: &str, validation: bool) {
        let system_error = Action::new(self.config.error_type.as_str()).with_payload(json!({
            "message": message,
            "actionType": label,
            "validation": validation,
        }));
        if let Err(err) = ctx.dispatch(system_error) {
            warn!(error = %err, "failed to dispatch system error");
        }

        if self.config.notify {
            let toast = Action::new(self.config.toast_type.as_str()).with_payload(json!({
                "type": "error",
                "message": message,
            }));
            if let Err(err) = ctx.dispatch(toast) {
                warn!(error = %err, "failed to dispatch error toast");
            }
        }
    }
}

impl Middleware for ErrorBoundaryMiddleware {
    fn handle(&self, ctx: &Dispatcher, item: Dispatch, next: Next<'_>) -> Result<Outcome> {
        let label = item.label().to_string();
        match next.run(item) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(action = %label, error = %err, "dispatch failed");
                if !self.is_own(&label) {
                    self.report(ctx, &label, &err.to_string(), err.is_validation());
                }
                if self.config.rethrow {
                    Err(err)
                } else {
                    Ok(Outcome::Swallowed)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use crate::middleware::middleware_fn;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_is_own() {
        let boundary = ErrorBoundaryMiddleware::new(ErrorBoundaryConfig {
            error_type: "APP_ERROR".to_string(),
            ..ErrorBoundaryConfig::default()
        });
        assert!(boundary.is_own("APP_ERROR"));
        assert!(boundary.is_own("UI_SHOW_TOAST"));
        assert!(!boundary.is_own("SYSTEM_ERROR"));
        assert!(!boundary.is_own("POST_CREATE"));
    }

    #[test]
    fn test_failing_reports_are_not_reported_again() {
        let dispatcher = Dispatcher::new();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&attempts);
        dispatcher
            .use_middleware(ErrorBoundaryMiddleware::default())
            .use_middleware(middleware_fn(move |_ctx, item, _next| {
                seen.lock().push(item.label().to_string());
                Err(StateError::TaskFailed("backend down".to_string()))
            }));

        let outcome = dispatcher.dispatch(Action::new("POST_CREATE")).unwrap();

        assert!(outcome.is_swallowed());
        assert_eq!(
            *attempts.lock(),
            vec!["POST_CREATE", "SYSTEM_ERROR", "UI_SHOW_TOAST"]
        );
    }

    #[test]
    fn test_notify_off_skips_toast() {
        let dispatcher = Dispatcher::new();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&attempts);
        dispatcher
            .use_middleware(ErrorBoundaryMiddleware::new(ErrorBoundaryConfig {
                notify: false,
                ..ErrorBoundaryConfig::default()
            }))
            .use_middleware(middleware_fn(move |_ctx, item, next| {
                seen.lock().push(item.label().to_string());
                if item.label() == "POST_CREATE" {
                    return Err(StateError::structural("rejected"));
                }
                next.run(item)
            }));

        dispatcher.dispatch(Action::new("POST_CREATE")).unwrap();

        assert_eq!(*attempts.lock(), vec!["POST_CREATE", "SYSTEM_ERROR"]);
        assert_eq!(dispatcher.history_len(), 1);
    }
}
