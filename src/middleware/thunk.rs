//! Resolution of thunks and deferred tasks.

use tokio::runtime::Handle;
use tracing::debug;

use super::{Middleware, Next};
use crate::action::{Dispatch, Outcome, Task};
use crate::dispatcher::Dispatcher;
use crate::error::{Result, StateError};

/// Runs [`Task`]s instead of forwarding them.
///
/// Thunks are called immediately with the dispatcher and their outcome is
/// returned. Deferred futures are spawned on the runtime; once resolved,
/// their action is dispatched as a new, independent call. Plain actions
/// pass through.
#[derive(Debug, Clone, Default)]
pub struct ThunkMiddleware {
    runtime: Option<Handle>,
}

impl ThunkMiddleware {
    /// Spawn deferred tasks on the runtime current at dispatch time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn deferred tasks on a specific runtime.
    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
        }
    }

    fn runtime(&self) -> Result<Handle> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| StateError::NoRuntime),
        }
    }
}

impl Middleware for ThunkMiddleware {
    fn handle(&self, ctx: &Dispatcher, item: Dispatch, next: Next<'_>) -> Result<Outcome> {
        match item {
            Dispatch::Task(Task::Thunk(thunk)) => thunk(ctx),
            Dispatch::Task(Task::Deferred(future)) => {
                let runtime = self.runtime()?;
                let dispatcher = ctx.clone();
                let handle = runtime.spawn(async move {
                    let action = future.await?;
                    debug!(action = %action.kind, "deferred task resolved");
                    dispatcher.dispatch(action)
                });
                Ok(Outcome::Scheduled(handle))
            }
            action => next.run(action),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;

    fn dispatcher() -> Dispatcher {
        let dispatcher = Dispatcher::new();
        dispatcher.use_middleware(ThunkMiddleware::new());
        dispatcher
    }

    #[test]
    fn test_actions_pass_through() {
        let outcome = dispatcher().dispatch(Action::new("UI_OPEN")).unwrap();
        assert_eq!(outcome.action().unwrap().kind, "UI_OPEN");
    }

    #[test]
    fn test_thunk_gets_the_dispatcher() {
        let dispatcher = dispatcher();
        dispatcher
            .dispatch(Task::thunk(|ctx| ctx.dispatch(Action::new("UI_OPEN"))))
            .unwrap();
        assert_eq!(dispatcher.history_len(), 1);
    }

    #[test]
    fn test_deferred_needs_a_runtime() {
        let err = dispatcher()
            .dispatch(Task::deferred(async { Ok(Action::new("UI_OPEN")) }))
            .unwrap_err();
        assert!(matches!(err, StateError::NoRuntime));
    }

    #[tokio::test]
    async fn test_deferred_uses_current_runtime() {
        let dispatcher = dispatcher();
        let outcome = dispatcher
            .dispatch(Task::deferred(async { Ok(Action::new("UI_OPEN")) }))
            .unwrap();

        let settled = outcome.settle().await.unwrap();

        assert_eq!(settled.action().unwrap().kind, "UI_OPEN");
        assert_eq!(dispatcher.history_len(), 1);
    }

    #[test]
    fn test_explicit_handle() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let middleware = ThunkMiddleware::with_handle(runtime.handle().clone());
        assert!(middleware.runtime().is_ok());
        assert!(ThunkMiddleware::new().runtime().is_err());
    }
}
