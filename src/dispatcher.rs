//! The dispatcher: middleware chain, domain registries, history, time travel.
//!
//! Dispatch runs to completion: middleware → reducers → store commits →
//! listener notifications, all before `dispatch` returns. A re-entrant lock
//! serializes dispatches from different threads while still allowing a stage
//! or a thunk to dispatch from inside a running dispatch.

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::action::{Action, Dispatch, Outcome};
use crate::error::{Result, StateError};
use crate::history::{
    snapshot_to_value, ExportedState, HistoryEntry, HistoryFilter, HistoryLog, Snapshot,
};
use crate::middleware::{Middleware, Next};
use crate::reducer::Reducer;
use crate::store::StateStore;

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum number of recorded history entries.
    pub history_limit: usize,
    /// Check action shape and warn about unregistered types at the terminal step.
    pub validate_actions: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            validate_actions: true,
        }
    }
}

impl DispatcherConfig {
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub fn with_validation(mut self, validate_actions: bool) -> Self {
        self.validate_actions = validate_actions;
        self
    }
}

#[derive(Default)]
struct Domain {
    reducer: Option<Arc<dyn Reducer>>,
    store: Option<Arc<dyn StateStore>>,
}

struct Inner {
    config: DispatcherConfig,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    domains: RwLock<BTreeMap<String, Domain>>,
    known_types: RwLock<HashSet<String>>,
    history: Mutex<HistoryLog>,
    replaying: AtomicBool,
    dispatch_lock: ReentrantMutex<()>,
}

/// Clears the replay flag when dropped, restoring the previous value.
struct ReplayGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> ReplayGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        let previous = flag.swap(true, Ordering::SeqCst);
        Self { flag, previous }
    }
}

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

/// Orchestrates actions across independently owned domain stores.
///
/// Cheap to clone; clones share the same registries and history. Construct
/// one per application instance and hand it to consumers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                history: Mutex::new(HistoryLog::new(config.history_limit)),
                config,
                middleware: RwLock::new(Vec::new()),
                domains: RwLock::new(BTreeMap::new()),
                known_types: RwLock::new(HashSet::new()),
                replaying: AtomicBool::new(false),
                dispatch_lock: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Append a middleware stage. Earlier stages wrap later ones.
    pub fn use_middleware<M: Middleware + 'static>(&self, middleware: M) -> &Self {
        self.inner.middleware.write().push(Arc::new(middleware));
        self
    }

    pub fn middleware_count(&self) -> usize {
        self.inner.middleware.read().len()
    }

    /// Pair `reducer` with `domain`. Replaces any previous reducer.
    pub fn register_reducer<R: Reducer + 'static>(&self, domain: impl Into<String>, reducer: R) -> &Self {
        let domain = domain.into();
        let reducer: Arc<dyn Reducer> = Arc::new(reducer);
        debug!(domain = %domain, "reducer registered");
        self.inner
            .domains
            .write()
            .entry(domain)
            .or_default()
            .reducer = Some(reducer);
        self
    }

    /// Pair `store` with `domain`. Replaces any previous store.
    pub fn register_store<S: StateStore + 'static>(&self, domain: impl Into<String>, store: Arc<S>) -> &Self {
        let domain = domain.into();
        let store: Arc<dyn StateStore> = store;
        debug!(domain = %domain, store = store.name(), "store registered");
        self.inner
            .domains
            .write()
            .entry(domain)
            .or_default()
            .store = Some(store);
        self
    }

    /// Declare known action types. Unknown types are logged, not rejected.
    pub fn register_action_types<I, S>(&self, types: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .known_types
            .write()
            .extend(types.into_iter().map(Into::into));
        self
    }

    /// Registered domain names, in dispatch order.
    pub fn domains(&self) -> Vec<String> {
        self.inner.domains.read().keys().cloned().collect()
    }

    pub fn store(&self, domain: &str) -> Option<Arc<dyn StateStore>> {
        self.inner.domains.read().get(domain)?.store.clone()
    }

    /// Run `item` through the middleware chain and the reducers.
    pub fn dispatch(&self, item: impl Into<Dispatch>) -> Result<Outcome> {
        let item = item.into();
        let _running = self.inner.dispatch_lock.lock();
        let chain = self.inner.middleware.read().clone();
        Next::new(self, &chain).run(item)
    }

    /// Parse untyped input as an action, then dispatch it.
    pub fn dispatch_value(&self, value: Value) -> Result<Outcome> {
        let action = Action::try_from(value)?;
        self.dispatch(action)
    }

    /// Terminal step of the chain.
    pub(crate) fn commit(&self, item: Dispatch) -> Result<Outcome> {
        let action = match item {
            Dispatch::Action(action) => action,
            Dispatch::Task(task) => {
                return Err(StateError::Structural(format!(
                    "{:?} reached the reducers; install ThunkMiddleware to run tasks",
                    task
                )))
            }
        };

        if self.inner.config.validate_actions {
            action.validate()?;
            self.warn_if_unknown(&action);
        }

        let before = self.snapshot();
        let mut changes = Vec::new();
        for (domain, reducer, store) in self.participants() {
            let empty = store.is_empty();
            let current = if empty {
                reducer.initial_state()
            } else {
                store.get_state()
            };
            let next = reducer.reduce(&current, &action);
            if empty || !Arc::ptr_eq(&current, &next) {
                changes.push((domain, store, next));
            }
        }

        // All or nothing: a failed commit rolls back the domains already
        // written and leaves no history entry behind.
        let mut committed: Vec<(String, Arc<dyn StateStore>)> = Vec::with_capacity(changes.len());
        for (domain, store, next) in changes {
            if let Err(err) = store.replace(next) {
                warn!(domain = %domain, action = %action.kind, error = %err, "commit failed");
                self.roll_back(&before, committed);
                return Err(err);
            }
            debug!(domain = %domain, action = %action.kind, "state committed");
            committed.push((domain, store));
        }

        if !self.is_replaying() {
            let entry = HistoryEntry {
                action: action.clone(),
                timestamp: Utc::now(),
                state: before,
            };
            self.inner.history.lock().push(entry);
        }

        Ok(Outcome::Dispatched(action))
    }

    fn roll_back(&self, before: &Snapshot, committed: Vec<(String, Arc<dyn StateStore>)>) {
        for (domain, store) in committed {
            if let Err(err) = restore(store.as_ref(), before.get(&domain)) {
                warn!(domain = %domain, error = %err, "rollback failed");
            }
        }
    }

    fn warn_if_unknown(&self, action: &Action) {
        let known = self.inner.known_types.read();
        if !known.is_empty() && !known.contains(&action.kind) {
            warn!(action = %action.kind, "unregistered action type");
        }
    }

    /// Domains that have both a reducer and a store.
    fn participants(&self) -> Vec<(String, Arc<dyn Reducer>, Arc<dyn StateStore>)> {
        self.inner
            .domains
            .read()
            .iter()
            .filter_map(|(name, domain)| {
                Some((name.clone(), domain.reducer.clone()?, domain.store.clone()?))
            })
            .collect()
    }

    fn stores(&self) -> Vec<(String, Arc<dyn StateStore>)> {
        self.inner
            .domains
            .read()
            .iter()
            .filter_map(|(name, domain)| Some((name.clone(), domain.store.clone()?)))
            .collect()
    }

    /// Each registered store's current tree, keyed by domain.
    pub fn snapshot(&self) -> Snapshot {
        self.stores()
            .into_iter()
            .map(|(name, store)| (name, store.get_state()))
            .collect()
    }

    /// Aggregate state as one JSON object keyed by domain.
    pub fn get_state(&self) -> Value {
        snapshot_to_value(&self.snapshot())
    }

    pub fn get_history(&self, filter: &HistoryFilter) -> Vec<HistoryEntry> {
        filter.apply(self.inner.history.lock().entries())
    }

    pub fn history_len(&self) -> usize {
        self.inner.history.lock().len()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    /// Index of the history entry the stores currently reflect.
    pub fn current_index(&self) -> Option<usize> {
        self.inner.history.lock().cursor()
    }

    pub fn is_replaying(&self) -> bool {
        self.inner.replaying.load(Ordering::SeqCst)
    }

    /// Dispatch `actions` in order without recording them.
    ///
    /// The replay flag is cleared even if a dispatch fails midway.
    pub fn replay_actions<I>(&self, actions: I) -> Result<()>
    where
        I: IntoIterator<Item = Action>,
    {
        let _running = self.inner.dispatch_lock.lock();
        let _replay = ReplayGuard::enter(&self.inner.replaying);
        for action in actions {
            self.dispatch(action)?;
        }
        Ok(())
    }

    /// Put every store back to its tree in `base`. Domains missing from
    /// `base` (or empty there) are reset.
    fn seed_stores(&self, base: &Snapshot) -> Result<()> {
        for (domain, store) in self.stores() {
            restore(store.as_ref(), base.get(&domain))?;
        }
        Ok(())
    }

    /// Rebuild the state as it was right after history entry `index`.
    ///
    /// Stores are seeded from the snapshot of the oldest retained entry,
    /// so evicted entries do not change the result.
    pub fn rewind_to(&self, index: usize) -> Result<()> {
        let _running = self.inner.dispatch_lock.lock();
        let (base, actions) = {
            let history = self.inner.history.lock();
            let first = match history.first() {
                Some(first) if index < history.len() => first,
                _ => {
                    return Err(StateError::IndexOutOfRange {
                        index,
                        len: history.len(),
                    })
                }
            };
            (first.state.clone(), history.actions_through(index))
        };

        self.seed_stores(&base)?;
        self.replay_actions(actions)?;
        self.inner.history.lock().set_cursor(Some(index));
        debug!(index, "rewound");
        Ok(())
    }

    /// Step one entry forward. Returns false at the newest entry.
    pub fn forward(&self) -> Result<bool> {
        let (cursor, len) = self.cursor_and_len();
        match cursor {
            Some(current) if current + 1 < len => {
                self.rewind_to(current + 1)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Step one entry back. Returns false at the oldest entry.
    pub fn backward(&self) -> Result<bool> {
        let (cursor, _) = self.cursor_and_len();
        match cursor {
            Some(current) if current > 0 => {
                self.rewind_to(current - 1)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn cursor_and_len(&self) -> (Option<usize>, usize) {
        let history = self.inner.history.lock();
        (history.cursor(), history.len())
    }

    pub fn export_state(&self) -> ExportedState {
        let _running = self.inner.dispatch_lock.lock();
        let history = self.inner.history.lock();
        ExportedState {
            state: self.snapshot(),
            history: history.entries().cloned().collect(),
            current_index: history.cursor(),
            timestamp: Utc::now(),
        }
    }

    /// Replace history and state by re-dispatching the exported actions.
    ///
    /// Stores are seeded from the oldest exported entry's snapshot (or the
    /// exported state when there is no history), then the actions are
    /// replayed. Replaying keeps any state derived inside reducers
    /// consistent. If the exported cursor is behind the newest entry, the
    /// stores are rewound to it.
    pub fn import_state(&self, exported: ExportedState) -> Result<()> {
        let _running = self.inner.dispatch_lock.lock();
        self.clear_history();
        let base = exported
            .history
            .first()
            .map_or(&exported.state, |entry| &entry.state);
        self.seed_stores(base)?;

        let count = exported.history.len();
        for entry in exported.history {
            self.dispatch(entry.action)?;
        }

        let len = self.history_len();
        match exported.current_index.filter(|index| *index < len) {
            Some(index) if index + 1 < len => self.rewind_to(index)?,
            Some(index) => self.inner.history.lock().set_cursor(Some(index)),
            None => self.inner.history.lock().set_cursor(len.checked_sub(1)),
        }
        info!(actions = count, cursor = ?self.current_index(), "state imported");
        Ok(())
    }
}

fn restore(store: &dyn StateStore, state: Option<&Arc<Value>>) -> Result<()> {
    match state {
        Some(state) if !state.is_null() => store.replace(Arc::clone(state)),
        _ => {
            store.reset();
            Ok(())
        }
    }
}
