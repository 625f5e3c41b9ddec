//! Shared fixtures: a small social-feed domain (auth, feed, ui, system).

#![allow(dead_code)]

use std::sync::Arc;

use keyed_state::{merge, reducer_fn, Action, Dispatcher, DispatcherConfig, KeyedStore, Reducer};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Reducers
// ---------------------------------------------------------------------------

pub fn auth_initial() -> Value {
    json!({"isAuthenticated": false, "user": null})
}

pub fn auth_reducer() -> impl Reducer {
    reducer_fn(auth_initial(), |state, action| match action.kind.as_str() {
        "AUTH_LOGIN" => merge(
            state,
            json!({"isAuthenticated": true, "user": action.payload["user"].clone()}),
        ),
        "AUTH_LOGOUT" => merge(state, json!({"isAuthenticated": false, "user": null})),
        _ => Arc::clone(state),
    })
}

pub fn feed_initial() -> Value {
    json!({"posts": []})
}

pub fn feed_reducer() -> impl Reducer {
    reducer_fn(feed_initial(), |state, action| match action.kind.as_str() {
        "POST_CREATE" => {
            let mut posts = state["posts"].as_array().cloned().unwrap_or_default();
            posts.push(action.payload["post"].clone());
            merge(state, json!({"posts": posts}))
        }
        _ => Arc::clone(state),
    })
}

pub fn ui_reducer() -> impl Reducer {
    reducer_fn(json!({"toasts": []}), |state, action| match action.kind.as_str() {
        "UI_SHOW_TOAST" => {
            let mut toasts = state["toasts"].as_array().cloned().unwrap_or_default();
            toasts.push(action.payload.clone());
            merge(state, json!({"toasts": toasts}))
        }
        _ => Arc::clone(state),
    })
}

pub fn system_reducer() -> impl Reducer {
    reducer_fn(json!({"lastError": null}), |state, action| match action.kind.as_str() {
        "SYSTEM_ERROR" => merge(state, json!({"lastError": action.payload.clone()})),
        _ => Arc::clone(state),
    })
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct App {
    pub dispatcher: Dispatcher,
    pub auth: Arc<KeyedStore>,
    pub feed: Arc<KeyedStore>,
}

/// Dispatcher with the `auth` and `feed` domains registered.
pub fn app() -> App {
    app_with(DispatcherConfig::default())
}

pub fn app_with(config: DispatcherConfig) -> App {
    let dispatcher = Dispatcher::with_config(config);
    let auth = Arc::new(KeyedStore::new("auth", auth_initial()));
    let feed = Arc::new(KeyedStore::new("feed", feed_initial()));

    dispatcher
        .register_store("auth", Arc::clone(&auth))
        .register_reducer("auth", auth_reducer())
        .register_store("feed", Arc::clone(&feed))
        .register_reducer("feed", feed_reducer());

    App {
        dispatcher,
        auth,
        feed,
    }
}

/// Adds `ui` and `system` domains that record toasts and system errors.
pub fn with_error_domains(app: &App) -> (Arc<KeyedStore>, Arc<KeyedStore>) {
    let ui = Arc::new(KeyedStore::new("ui", json!({"toasts": []})));
    let system = Arc::new(KeyedStore::new("system", json!({"lastError": null})));
    app.dispatcher
        .register_store("ui", Arc::clone(&ui))
        .register_reducer("ui", ui_reducer())
        .register_store("system", Arc::clone(&system))
        .register_reducer("system", system_reducer());
    (ui, system)
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

pub fn login(id: &str) -> Action {
    Action::new("AUTH_LOGIN").with_payload(json!({"user": {"id": id}}))
}

pub fn logout() -> Action {
    Action::new("AUTH_LOGOUT")
}

pub fn create_post(id: &str) -> Action {
    Action::new("POST_CREATE").with_payload(json!({"post": {"id": id}}))
}

pub fn kinds(entries: &[keyed_state::HistoryEntry]) -> Vec<String> {
    entries.iter().map(|e| e.action.kind.clone()).collect()
}
