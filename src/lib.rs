//! # keyed-state
//!
//! Reactive state engine for client applications: independently owned
//! keyed stores driven by a middleware-pipelined action dispatcher.
//!
//! - **Keyed stores**: JSON trees addressed by dot paths (`user.name`), with
//!   exact and wildcard listeners, batch updates and bounded history
//! - **Reducers**: pure `(state, action) -> state` functions, one per domain,
//!   composable with [`combine_reducers`]
//! - **Middleware**: logging, thunks/deferred tasks, validation, error
//!   containment and sampled analytics, composed as an onion
//! - **Time travel**: rewind, step, export and import by replaying
//!   recorded actions
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use keyed_state::{merge, reducer_fn, Action, Dispatcher, KeyedStore};
//!
//! fn main() -> keyed_state::Result<()> {
//!     let dispatcher = Dispatcher::new();
//!     let auth = Arc::new(KeyedStore::new("auth", json!({"user": null})));
//!
//!     dispatcher.register_store("auth", Arc::clone(&auth));
//!     dispatcher.register_reducer(
//!         "auth",
//!         reducer_fn(json!({"user": null}), |state, action| match action.kind.as_str() {
//!             "AUTH_LOGIN" => merge(state, json!({"user": action.payload["user"].clone()})),
//!             _ => Arc::clone(state),
//!         }),
//!     );
//!
//!     dispatcher.dispatch(Action::new("AUTH_LOGIN").with_payload(json!({"user": {"id": "1"}})))?;
//!     assert_eq!(auth.get("user.id")?, Some(json!("1")));
//!     Ok(())
//! }
//! ```
//!
//! ## Subscriptions
//!
//! ```rust
//! use serde_json::json;
//! use keyed_state::KeyedStore;
//!
//! fn main() -> keyed_state::Result<()> {
//!     let feed = KeyedStore::new("feed", json!({}));
//!
//!     // Wildcard listeners receive the current value of their subtree.
//!     let sub = feed.subscribe("post.*", |post| {
//!         println!("post is now {:?}", post);
//!         Ok(())
//!     })?;
//!
//!     feed.batch_update([("post.upvotes", json!(3)), ("post.downvotes", json!(1))])?;
//!     sub.unsubscribe();
//!     Ok(())
//! }
//! ```
//!
//! ## Time Travel
//!
//! ```rust,no_run
//! use keyed_state::Dispatcher;
//!
//! fn inspect(dispatcher: &Dispatcher) -> keyed_state::Result<()> {
//!     dispatcher.rewind_to(0)?;
//!     dispatcher.forward()?;
//!
//!     let exported = dispatcher.export_state().to_json()?;
//!     let restored = keyed_state::ExportedState::from_json(&exported)?;
//!     dispatcher.import_state(restored)
//! }
//! ```

pub mod action;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod middleware;
pub mod path;
pub mod reducer;
pub mod store;
pub mod watch;

// Re-export main types
pub use action::{Action, Dispatch, Meta, Outcome, Task};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{ListenerError, Result, StateError};
pub use history::{ExportedState, HistoryEntry, HistoryFilter, Snapshot};
pub use middleware::{
    middleware_fn, AnalyticsConfig, AnalyticsEvent, AnalyticsMiddleware, ErrorBoundaryConfig,
    ErrorBoundaryMiddleware, LoggerConfig, LoggerMiddleware, Middleware, Next, ThunkMiddleware,
    ValidationMiddleware,
};
pub use path::{Path, Pattern, MAX_PATH_LENGTH};
pub use reducer::{combine_reducers, merge, reducer_fn, CombinedReducer, Reducer};
pub use store::{KeyedStore, StateStore, StoreConfig, StoreHistoryEntry, Subscription};
pub use watch::{ChangeKind, WatchEvent, WatchStream};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::action::{Action, Dispatch, Outcome, Task};
    pub use crate::dispatcher::{Dispatcher, DispatcherConfig};
    pub use crate::error::{Result, StateError};
    pub use crate::history::HistoryFilter;
    pub use crate::middleware::{Middleware, Next};
    pub use crate::reducer::{combine_reducers, merge, reducer_fn, Reducer};
    pub use crate::store::{KeyedStore, StateStore};
}

/// Install a `tracing` subscriber filtered by the `KEYED_STATE_LOG`
/// environment variable (default `info`).
///
/// Call once at startup. Does nothing if a global subscriber is already set.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_env("KEYED_STATE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    install_subscriber(filter);
}

/// Install a `tracing` subscriber with a fixed filter directive.
pub fn init_logging_with_level(level: &str) {
    install_subscriber(tracing_subscriber::EnvFilter::new(level));
}

fn install_subscriber(filter: tracing_subscriber::EnvFilter) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
