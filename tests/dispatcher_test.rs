//! Integration tests for dispatch, history and time travel across domains.

mod common;

use std::sync::Arc;

use common::{app, app_with, create_post, kinds, login, logout};
use keyed_state::{
    combine_reducers, Action, Dispatcher, DispatcherConfig, ExportedState, HistoryFilter,
    KeyedStore, Reducer, StateError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn login_post_logout_then_rewind() {
    let app = app();
    let d = &app.dispatcher;

    d.dispatch(login("1")).unwrap();
    d.dispatch(create_post("p1")).unwrap();
    d.dispatch(logout()).unwrap();

    assert_eq!(
        d.get_state(),
        json!({
            "auth": {"isAuthenticated": false, "user": null},
            "feed": {"posts": [{"id": "p1"}]}
        })
    );

    d.rewind_to(0).unwrap();

    assert_eq!(
        d.get_state(),
        json!({
            "auth": {"isAuthenticated": true, "user": {"id": "1"}},
            "feed": {"posts": []}
        })
    );
    assert_eq!(d.current_index(), Some(0));
    assert_eq!(d.history_len(), 3);
}

#[test]
fn missing_type_is_structural_and_leaves_state() {
    let app = app();
    let before = app.dispatcher.get_state();

    let err = app
        .dispatcher
        .dispatch_value(json!({"payload": {"post": {"id": "p1"}}}))
        .unwrap_err();

    assert!(matches!(err, StateError::Structural(_)));
    assert_eq!(app.dispatcher.get_state(), before);
    assert_eq!(app.dispatcher.history_len(), 0);
}

#[test]
fn dispatch_value_accepts_well_formed_json() {
    let app = app();
    app.dispatcher
        .dispatch_value(json!({"type": "POST_CREATE", "payload": {"post": {"id": "p9"}}}))
        .unwrap();
    assert_eq!(app.feed.get("posts.0.id").unwrap(), Some(json!("p9")));
}

// ---------------------------------------------------------------------------
// Reference stability
// ---------------------------------------------------------------------------

#[test]
fn unrelated_action_leaves_store_reference_identical() {
    let app = app();
    app.dispatcher.dispatch(login("1")).unwrap();
    let feed_before = app.feed.get_state();
    let auth_before = app.auth.get_state();

    app.dispatcher.dispatch(create_post("p1")).unwrap();

    assert!(Arc::ptr_eq(&auth_before, &app.auth.get_state()));
    assert!(!Arc::ptr_eq(&feed_before, &app.feed.get_state()));
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[test]
fn history_keeps_most_recent_entries() {
    let app = app_with(DispatcherConfig::default().with_history_limit(5));
    for i in 0..8 {
        app.dispatcher.dispatch(create_post(&format!("p{i}"))).unwrap();
    }

    let history = app.dispatcher.get_history(&HistoryFilter::new());
    assert_eq!(history.len(), 5);
    let ids: Vec<Value> = history
        .iter()
        .map(|e| e.action.payload["post"]["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("p3"), json!("p4"), json!("p5"), json!("p6"), json!("p7")]);
    assert_eq!(app.dispatcher.current_index(), Some(4));
}

#[test]
fn history_filters() {
    let app = app();
    let d = &app.dispatcher;
    d.dispatch(login("1")).unwrap();
    let after_login = chrono::Utc::now();
    d.dispatch(create_post("p1")).unwrap();
    d.dispatch(create_post("p2")).unwrap();
    d.dispatch(logout()).unwrap();

    let posts = d.get_history(&HistoryFilter::new().action_type("POST_CREATE"));
    assert_eq!(kinds(&posts), vec!["POST_CREATE", "POST_CREATE"]);

    let auth = d.get_history(&HistoryFilter::new().group("auth"));
    assert_eq!(kinds(&auth), vec!["AUTH_LOGIN", "AUTH_LOGOUT"]);

    let recent = d.get_history(&HistoryFilter::new().since(after_login).limit(2));
    assert_eq!(kinds(&recent), vec!["POST_CREATE", "AUTH_LOGOUT"]);
}

// ---------------------------------------------------------------------------
// Time travel
// ---------------------------------------------------------------------------

#[test]
fn rewind_and_forward_round_trip() {
    let app = app();
    let d = &app.dispatcher;
    d.dispatch(login("1")).unwrap();
    d.dispatch(create_post("p1")).unwrap();
    d.dispatch(logout()).unwrap();
    let s3 = d.get_state();

    d.rewind_to(1).unwrap();
    assert_eq!(
        d.get_state(),
        json!({
            "auth": {"isAuthenticated": true, "user": {"id": "1"}},
            "feed": {"posts": [{"id": "p1"}]}
        })
    );

    assert!(d.forward().unwrap());
    assert_eq!(d.get_state(), s3);
    assert_eq!(d.current_index(), Some(2));
    assert!(!d.forward().unwrap());
}

#[test]
fn rewind_out_of_range_is_index_error() {
    let app = app();
    app.dispatcher.dispatch(login("1")).unwrap();

    let err = app.dispatcher.rewind_to(3).unwrap_err();
    assert!(matches!(err, StateError::IndexOutOfRange { index: 3, len: 1 }));
    assert_eq!(app.dispatcher.current_index(), Some(0));
}

#[test]
fn rewind_notifies_store_listeners() {
    let app = app();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    app.auth
        .subscribe("isAuthenticated", move |value| {
            sink.lock().push(value.cloned());
            Ok(())
        })
        .unwrap();

    app.dispatcher.dispatch(login("1")).unwrap();
    app.dispatcher.dispatch(logout()).unwrap();
    app.dispatcher.rewind_to(0).unwrap();

    // Rewinding seeds `auth` from the first entry's snapshot (still logged
    // out, so no change), then replays the login.
    assert_eq!(
        *seen.lock(),
        vec![Some(json!(true)), Some(json!(false)), Some(json!(true))]
    );
}

#[test]
fn new_dispatch_after_rewind_starts_a_branch() {
    let app = app();
    let d = &app.dispatcher;
    d.dispatch(login("1")).unwrap();
    d.dispatch(create_post("p1")).unwrap();
    d.rewind_to(0).unwrap();

    d.dispatch(create_post("p2")).unwrap();

    let history = d.get_history(&HistoryFilter::new());
    assert_eq!(kinds(&history), vec!["AUTH_LOGIN", "POST_CREATE"]);
    assert_eq!(history[1].action.payload["post"]["id"], json!("p2"));
    assert_eq!(d.current_index(), Some(1));
    assert_eq!(app.feed.get("posts").unwrap(), Some(json!([{"id": "p2"}])));

    let live = d.get_state();
    d.rewind_to(1).unwrap();
    assert_eq!(d.get_state(), live);
}

#[test]
fn rewind_to_current_after_eviction_keeps_live_state() {
    let app = app_with(DispatcherConfig::default().with_history_limit(2));
    let d = &app.dispatcher;
    d.dispatch(login("1")).unwrap();
    d.dispatch(create_post("p1")).unwrap();
    d.dispatch(create_post("p2")).unwrap();
    let live = d.get_state();

    d.rewind_to(d.current_index().unwrap()).unwrap();

    assert_eq!(d.get_state(), live);
    assert_eq!(app.auth.get("isAuthenticated").unwrap(), Some(json!(true)));

    d.rewind_to(0).unwrap();
    assert_eq!(app.feed.get("posts").unwrap(), Some(json!([{"id": "p1"}])));
    assert_eq!(app.auth.get("user.id").unwrap(), Some(json!("1")));
}

#[test]
fn import_after_eviction_reproduces_live_state() {
    let source = app_with(DispatcherConfig::default().with_history_limit(2));
    source.dispatcher.dispatch(login("1")).unwrap();
    source.dispatcher.dispatch(create_post("p1")).unwrap();
    source.dispatcher.dispatch(create_post("p2")).unwrap();

    let target = app();
    target
        .dispatcher
        .import_state(source.dispatcher.export_state())
        .unwrap();

    assert_eq!(target.dispatcher.get_state(), source.dispatcher.get_state());
    assert_eq!(target.dispatcher.history_len(), 2);
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

#[test]
fn export_import_reproduces_history() {
    let app = app();
    let d = &app.dispatcher;
    d.dispatch(login("1")).unwrap();
    d.dispatch(create_post("p1")).unwrap();
    d.dispatch(logout()).unwrap();
    let state = d.get_state();
    let exported = d.export_state();
    let original = kinds(&exported.history);

    d.import_state(exported).unwrap();

    let history = d.get_history(&HistoryFilter::new());
    assert_eq!(kinds(&history), original);
    assert_eq!(d.get_state(), state);
    assert_eq!(d.current_index(), Some(2));
}

#[test]
fn import_into_fresh_dispatcher_from_json() {
    let source = app();
    source.dispatcher.dispatch(login("1")).unwrap();
    source.dispatcher.dispatch(create_post("p1")).unwrap();
    let json = source.dispatcher.export_state().to_json().unwrap();

    let target = app();
    target.dispatcher.dispatch(create_post("stale")).unwrap();
    target
        .dispatcher
        .import_state(ExportedState::from_json(&json).unwrap())
        .unwrap();

    assert_eq!(target.dispatcher.get_state(), source.dispatcher.get_state());
    assert_eq!(target.dispatcher.history_len(), 2);
}

#[test]
fn import_honours_exported_cursor() {
    let app = app();
    let d = &app.dispatcher;
    d.dispatch(login("1")).unwrap();
    d.dispatch(create_post("p1")).unwrap();
    d.dispatch(logout()).unwrap();
    d.rewind_to(0).unwrap();
    let rewound = d.get_state();

    let exported = d.export_state();
    assert_eq!(exported.current_index, Some(0));
    d.import_state(exported).unwrap();

    assert_eq!(d.current_index(), Some(0));
    assert_eq!(d.history_len(), 3);
    assert_eq!(d.get_state(), rewound);
}

// ---------------------------------------------------------------------------
// Stores and reducers
// ---------------------------------------------------------------------------

#[test]
fn store_listeners_fire_on_commit() {
    let app = app();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    app.feed
        .subscribe("posts", move |posts| {
            sink.lock().push(posts.cloned());
            Ok(())
        })
        .unwrap();

    app.dispatcher.dispatch(login("1")).unwrap();
    app.dispatcher.dispatch(create_post("p1")).unwrap();

    assert_eq!(*seen.lock(), vec![Some(json!([{"id": "p1"}]))]);
}

#[test]
fn combined_reducer_drives_one_store() {
    let dispatcher = Dispatcher::new();
    let session: Arc<dyn Reducer> = Arc::new(common::auth_reducer());
    let feed: Arc<dyn Reducer> = Arc::new(common::feed_reducer());
    let combined = combine_reducers([("session", session), ("feed", feed)]);
    let store = Arc::new(KeyedStore::new("app", combined.initial_state().as_ref().clone()));
    dispatcher
        .register_store("app", Arc::clone(&store))
        .register_reducer("app", combined);

    let before = store.get_state();
    dispatcher.dispatch(Action::new("UI_NOOP")).unwrap();
    assert!(Arc::ptr_eq(&before, &store.get_state()));

    dispatcher.dispatch(login("7")).unwrap();
    assert_eq!(store.get("session.user.id").unwrap(), Some(json!("7")));
    assert_eq!(store.get("feed.posts").unwrap(), Some(json!([])));
}

#[test]
fn reset_store_uses_reducer_initial_state() {
    let app = app();
    app.dispatcher.dispatch(create_post("p1")).unwrap();
    app.feed.reset();
    assert!(app.feed.is_empty());

    app.dispatcher.dispatch(login("1")).unwrap();

    assert_eq!(*app.feed.get_state(), json!({"posts": []}));
}
