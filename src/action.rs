//! Actions and the items that flow through the dispatch pipeline.
//!
//! An [`Action`] is a typed, immutable description of a state change. What
//! callers hand to the dispatcher is a [`Dispatch`]: either an action, or a
//! [`Task`] that produces actions later (a synchronous thunk, or a deferred
//! future resolved on the async runtime).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;
use crate::error::{Result, StateError};

/// Metadata attached to every action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied fields, flattened next to `timestamp`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            extra: Map::new(),
        }
    }
}

impl Default for Meta {
    fn default() -> Self {
        Self::now()
    }
}

/// A described intent to change state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Identifies the intent, e.g. `POST_CREATE`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque to the engine; interpreted only by reducers.
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub meta: Meta,
}

impl Action {
    /// Create an action with a `null` payload, timestamped now.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Value::Null,
            meta: Meta::now(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.extra.insert(key.into(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.meta.timestamp = timestamp;
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.meta.timestamp
    }

    /// Coarse group derived from the namespace prefix of the type.
    ///
    /// `POST_CREATE` → `post`, `auth/login` → `auth`.
    pub fn group(&self) -> String {
        group_of(&self.kind)
    }

    /// Check the action's shape.
    pub fn validate(&self) -> Result<()> {
        if self.kind.trim().is_empty() {
            return Err(StateError::structural("action type must be a non-empty string"));
        }
        Ok(())
    }
}

/// Namespace prefix of an action type, lower-cased.
pub fn group_of(kind: &str) -> String {
    kind.split(['_', '/', ':', '.'])
        .next()
        .unwrap_or(kind)
        .to_lowercase()
}

impl TryFrom<Value> for Action {
    type Error = StateError;

    /// Parse untyped input, rejecting anything that is not an object with a
    /// non-empty string `type`.
    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(map) = &value else {
            return Err(StateError::structural(format!(
                "action must be an object, got {}",
                value
            )));
        };
        match map.get("type") {
            None => return Err(StateError::structural("action is missing a 'type'")),
            Some(Value::String(_)) => {}
            Some(other) => {
                return Err(StateError::structural(format!(
                    "action 'type' must be a string, got {}",
                    other
                )))
            }
        }

        let action: Action = serde_json::from_value(value)
            .map_err(|e| StateError::structural(format!("malformed action: {}", e)))?;
        action.validate()?;
        Ok(action)
    }
}

/// Synchronous thunk: runs with access to the dispatcher.
pub type ThunkFn = Box<dyn FnOnce(&Dispatcher) -> Result<Outcome> + Send>;

/// Asynchronous work that resolves to an action to dispatch.
pub type DeferredFuture = Pin<Box<dyn Future<Output = Result<Action>> + Send>>;

/// Work dispatched in place of a plain action.
pub enum Task {
    /// Invoked immediately with the dispatcher; its outcome is returned.
    Thunk(ThunkFn),
    /// Spawned on the runtime; the resolved action is dispatched on completion.
    Deferred(DeferredFuture),
}

impl Task {
    pub fn thunk<F>(f: F) -> Self
    where
        F: FnOnce(&Dispatcher) -> Result<Outcome> + Send + 'static,
    {
        Task::Thunk(Box::new(f))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Action>> + Send + 'static,
    {
        Task::Deferred(Box::pin(future))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Thunk(_) => f.write_str("Task::Thunk"),
            Task::Deferred(_) => f.write_str("Task::Deferred"),
        }
    }
}

/// An item accepted by [`Dispatcher::dispatch`].
#[derive(Debug)]
pub enum Dispatch {
    Action(Action),
    Task(Task),
}

impl Dispatch {
    /// Type name used in logs.
    pub fn label(&self) -> &str {
        match self {
            Dispatch::Action(action) => &action.kind,
            Dispatch::Task(Task::Thunk(_)) => "<thunk>",
            Dispatch::Task(Task::Deferred(_)) => "<deferred>",
        }
    }

    pub fn as_action(&self) -> Option<&Action> {
        match self {
            Dispatch::Action(action) => Some(action),
            Dispatch::Task(_) => None,
        }
    }
}

impl From<Action> for Dispatch {
    fn from(action: Action) -> Self {
        Dispatch::Action(action)
    }
}

impl From<Task> for Dispatch {
    fn from(task: Task) -> Self {
        Dispatch::Task(task)
    }
}

/// Result of a dispatch call.
#[derive(Debug)]
pub enum Outcome {
    /// The action reached the reducers; it is returned unchanged.
    Dispatched(Action),
    /// A deferred task was spawned; the handle yields the outcome of
    /// dispatching its resolved action.
    Scheduled(JoinHandle<Result<Outcome>>),
    /// A thunk returned a plain value.
    Returned(Value),
    /// A failure was contained by the error boundary.
    Swallowed,
}

impl Outcome {
    pub fn action(&self) -> Option<&Action> {
        match self {
            Outcome::Dispatched(action) => Some(action),
            _ => None,
        }
    }

    pub fn is_swallowed(&self) -> bool {
        matches!(self, Outcome::Swallowed)
    }

    /// Wait for a scheduled task; other outcomes are returned as they are.
    pub async fn settle(self) -> Result<Outcome> {
        match self {
            Outcome::Scheduled(handle) => handle
                .await
                .map_err(|e| StateError::TaskFailed(e.to_string()))?,
            other => Ok(other),
        }
    }
}
