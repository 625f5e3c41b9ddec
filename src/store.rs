//! Keyed stores: observable JSON trees addressed by dot-separated paths.
//!
//! - Path reads and writes with lazily created intermediate objects
//! - Per-path and wildcard (subtree) listeners, notified synchronously
//! - Atomic multi-path batch updates with coalesced notification
//! - Bounded write history (ring buffer)
//! - Watch streams for asynchronous consumers

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

use crate::error::{ListenerError, Result, StateError};
use crate::path::{Path, Pattern};
use crate::watch::{ChangeKind, WatchEvent, WatchSender, WatchStream};

/// Callback invoked with the current value at the listener's path.
pub type Listener =
    Arc<dyn Fn(Option<&Value>) -> std::result::Result<(), ListenerError> + Send + Sync>;

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of retained history entries.
    pub max_history: usize,
    /// Buffer size of the watch channel.
    pub watch_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            watch_capacity: 1024,
        }
    }
}

/// One recorded write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHistoryEntry {
    pub kind: ChangeKind,
    /// Path written, `None` for whole-tree operations.
    pub path: Option<String>,
    pub value: Option<Arc<Value>>,
    pub prior_value: Option<Arc<Value>>,
    pub timestamp: DateTime<Utc>,
}

/// The store operations the dispatcher relies on.
///
/// [`KeyedStore`] is the provided implementation. Other containers can
/// participate in dispatch by implementing the required methods; they then
/// receive reducer commits as a batch of top-level keys.
pub trait StateStore: Send + Sync {
    /// Name of the store, used in logs and watch events.
    fn name(&self) -> &str;

    /// The full state tree.
    fn get_state(&self) -> Arc<Value>;

    /// Apply several writes, then notify once per affected listener.
    fn batch_update(&self, updates: Vec<(String, Value)>) -> Result<()>;

    /// Clear the state and notify every listener.
    fn reset(&self);

    /// True if the store holds no state (fresh after `reset`).
    fn is_empty(&self) -> bool {
        self.get_state().is_null()
    }

    /// Replace the whole tree.
    ///
    /// Falls back to a batch update of every top-level key, which cannot
    /// remove keys absent from `tree`.
    fn replace(&self, tree: Arc<Value>) -> Result<()> {
        match tree.as_ref() {
            Value::Object(map) => self.batch_update(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            other => Err(StateError::structural(format!(
                "store '{}' can only take object state, got {}",
                self.name(),
                other
            ))),
        }
    }
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    by_pattern: BTreeMap<Pattern, Vec<(u64, Listener)>>,
}

/// Handle returned by [`KeyedStore::subscribe`].
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] on teardown.
pub struct Subscription {
    pattern: Pattern,
    id: u64,
    table: Weak<RwLock<ListenerTable>>,
}

impl Subscription {
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Remove this listener. Other listeners on the same pattern stay.
    pub fn unsubscribe(self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.write();
        if let Some(listeners) = table.by_pattern.get_mut(&self.pattern) {
            listeners.retain(|(id, _)| *id != self.id);
            if listeners.is_empty() {
                table.by_pattern.remove(&self.pattern);
            }
        }
    }
}

struct StoreData {
    state: Arc<Value>,
    history: VecDeque<StoreHistoryEntry>,
}

/// An observable state tree owned by one domain.
pub struct KeyedStore {
    name: String,
    config: StoreConfig,
    data: RwLock<StoreData>,
    listeners: Arc<RwLock<ListenerTable>>,
    watcher: WatchSender,
}

impl KeyedStore {
    /// Create a store holding `initial`.
    pub fn new(name: impl Into<String>, initial: Value) -> Self {
        Self::with_config(name, initial, StoreConfig::default())
    }

    pub fn with_config(name: impl Into<String>, initial: Value, config: StoreConfig) -> Self {
        Self {
            name: name.into(),
            watcher: WatchSender::new(config.watch_capacity.max(1)),
            config,
            data: RwLock::new(StoreData {
                state: Arc::new(initial),
                history: VecDeque::new(),
            }),
            listeners: Arc::new(RwLock::new(ListenerTable::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full state tree.
    pub fn get_state(&self) -> Arc<Value> {
        Arc::clone(&self.data.read().state)
    }

    /// Read the value at `path`; `None` if any segment is missing.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        let path = Path::parse(path)?;
        Ok(path.resolve(&self.data.read().state).cloned())
    }

    /// True if the store holds no state.
    pub fn is_empty(&self) -> bool {
        self.data.read().state.is_null()
    }

    /// Write `value` at `path` and notify listeners.
    ///
    /// Exact listeners on `path` receive the new value. Wildcard listeners
    /// on each ancestor receive the current value of that ancestor.
    pub fn set(&self, path: &str, value: Value) -> Result<()> {
        let path = Path::parse(path)?;

        let prior = {
            let mut data = self.data.write();
            let prior = path.assign(Arc::make_mut(&mut data.state), value.clone())?;
            self.record(&mut data, ChangeKind::Set, Some(&path), Some(&value), prior.as_ref());
            prior
        };
        trace!(store = %self.name, path = %path, "set");

        self.emit(WatchEvent::new(
            &self.name,
            &path,
            ChangeKind::Set,
            prior,
            Some(value),
        ));
        self.notify(affected_patterns(&path));
        Ok(())
    }

    /// Apply every write, then notify each affected pattern exactly once.
    ///
    /// Paths are validated and the writes applied to a working copy first,
    /// so a failing entry leaves the store untouched.
    pub fn batch_update<I, K>(&self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let updates = updates
            .into_iter()
            .map(|(path, value)| Ok((Path::parse(path.as_ref())?, value)))
            .collect::<Result<Vec<_>>>()?;
        if updates.is_empty() {
            return Ok(());
        }

        let mut events = Vec::with_capacity(updates.len());
        {
            let mut data = self.data.write();
            let mut tree = (*data.state).clone();
            let mut priors = Vec::with_capacity(updates.len());
            for (path, value) in &updates {
                priors.push(path.assign(&mut tree, value.clone())?);
            }
            data.state = Arc::new(tree);

            for ((path, value), prior) in updates.iter().zip(priors) {
                self.record(&mut data, ChangeKind::Batch, Some(path), Some(value), prior.as_ref());
                events.push(WatchEvent::new(
                    &self.name,
                    path,
                    ChangeKind::Batch,
                    prior,
                    Some(value.clone()),
                ));
            }
        }
        trace!(store = %self.name, writes = updates.len(), "batch update");

        for event in events {
            self.emit(event);
        }
        let patterns: BTreeSet<Pattern> = updates
            .iter()
            .flat_map(|(path, _)| affected_patterns(path))
            .collect();
        self.notify(patterns);
        Ok(())
    }

    /// Replace the whole tree, notifying listeners whose value changed.
    pub fn replace(&self, tree: Arc<Value>) -> Result<()> {
        let prior = {
            let mut data = self.data.write();
            let prior = std::mem::replace(&mut data.state, Arc::clone(&tree));
            self.record_arcs(
                &mut data,
                ChangeKind::Replace,
                None,
                Some(Arc::clone(&tree)),
                Some(Arc::clone(&prior)),
            );
            prior
        };
        trace!(store = %self.name, "replace");

        if self.watcher.receiver_count() > 0 {
            self.watcher.send(WatchEvent::new(
                &self.name,
                &Path::root(),
                ChangeKind::Replace,
                Some((*prior).clone()),
                Some((*tree).clone()),
            ));
        }

        let changed: Vec<Pattern> = self
            .listeners
            .read()
            .by_pattern
            .keys()
            .filter(|pattern| {
                pattern.base().resolve(&prior) != pattern.base().resolve(&tree)
            })
            .cloned()
            .collect();
        self.notify(changed);
        Ok(())
    }

    /// Clear the state and notify every registered listener.
    pub fn reset(&self) {
        let prior = {
            let mut data = self.data.write();
            let prior = std::mem::replace(&mut data.state, Arc::new(Value::Null));
            self.record_arcs(&mut data, ChangeKind::Reset, None, None, Some(Arc::clone(&prior)));
            prior
        };
        trace!(store = %self.name, "reset");

        if self.watcher.receiver_count() > 0 {
            self.watcher.send(WatchEvent::new(
                &self.name,
                &Path::root(),
                ChangeKind::Reset,
                Some((*prior).clone()),
                None,
            ));
        }

        let all: Vec<Pattern> = self.listeners.read().by_pattern.keys().cloned().collect();
        self.notify(all);
    }

    /// Register `listener` for an exact path (`user.name`) or a subtree
    /// (`user.*`, `*`).
    pub fn subscribe<F>(&self, pattern: &str, listener: F) -> Result<Subscription>
    where
        F: Fn(Option<&Value>) -> std::result::Result<(), ListenerError> + Send + Sync + 'static,
    {
        let pattern = Pattern::parse(pattern)?;
        let mut table = self.listeners.write();
        table.next_id += 1;
        let id = table.next_id;
        let listener: Listener = Arc::new(listener);
        table
            .by_pattern
            .entry(pattern.clone())
            .or_default()
            .push((id, listener));

        Ok(Subscription {
            pattern,
            id,
            table: Arc::downgrade(&self.listeners),
        })
    }

    /// Number of registered listeners across all patterns.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().by_pattern.values().map(Vec::len).sum()
    }

    /// Async stream of changes matching `pattern`.
    pub fn watch(&self, pattern: &str) -> Result<WatchStream> {
        Ok(self.watcher.subscribe(Pattern::parse(pattern)?))
    }

    /// The most recent `limit` history entries, oldest first.
    pub fn get_history(&self, limit: usize) -> Vec<StoreHistoryEntry> {
        let data = self.data.read();
        let skip = data.history.len().saturating_sub(limit);
        data.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.data.read().history.len()
    }

    fn record(
        &self,
        data: &mut StoreData,
        kind: ChangeKind,
        path: Option<&Path>,
        value: Option<&Value>,
        prior: Option<&Value>,
    ) {
        let entry = StoreHistoryEntry {
            kind,
            path: path.map(Path::to_string),
            value: value.map(|v| Arc::new(v.clone())),
            prior_value: prior.map(|v| Arc::new(v.clone())),
            timestamp: Utc::now(),
        };
        self.push_history(data, entry);
    }

    fn record_arcs(
        &self,
        data: &mut StoreData,
        kind: ChangeKind,
        path: Option<&Path>,
        value: Option<Arc<Value>>,
        prior: Option<Arc<Value>>,
    ) {
        let entry = StoreHistoryEntry {
            kind,
            path: path.map(Path::to_string),
            value,
            prior_value: prior,
            timestamp: Utc::now(),
        };
        self.push_history(data, entry);
    }

    fn push_history(&self, data: &mut StoreData, entry: StoreHistoryEntry) {
        if self.config.max_history == 0 {
            return;
        }
        while data.history.len() >= self.config.max_history {
            data.history.pop_front();
        }
        data.history.push_back(entry);
    }

    fn emit(&self, event: WatchEvent) {
        if self.watcher.receiver_count() > 0 {
            self.watcher.send(event);
        }
    }

    /// Invoke the listeners of each pattern with the value at its base path.
    ///
    /// No lock is held while callbacks run, so they may read or write the store.
    fn notify(&self, patterns: impl IntoIterator<Item = Pattern>) {
        let targets: Vec<(Pattern, Vec<Listener>)> = {
            let table = self.listeners.read();
            patterns
                .into_iter()
                .filter_map(|pattern| {
                    let listeners = table.by_pattern.get(&pattern)?;
                    let listeners = listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
                    Some((pattern, listeners))
                })
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let state = self.get_state();
        for (pattern, listeners) in targets {
            let value = pattern.base().resolve(&state);
            for listener in listeners {
                match catch_unwind(AssertUnwindSafe(|| (*listener)(value))) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(store = %self.name, pattern = %pattern, error = %err, "listener failed");
                    }
                    Err(_) => {
                        warn!(store = %self.name, pattern = %pattern, "listener panicked");
                    }
                }
            }
        }
    }
}

/// The exact pattern for `path` plus a wildcard pattern for each ancestor.
fn affected_patterns(path: &Path) -> impl Iterator<Item = Pattern> + '_ {
    std::iter::once(Pattern::Exact(path.clone())).chain(path.ancestors().map(Pattern::Subtree))
}

impl StateStore for KeyedStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_state(&self) -> Arc<Value> {
        KeyedStore::get_state(self)
    }

    fn batch_update(&self, updates: Vec<(String, Value)>) -> Result<()> {
        KeyedStore::batch_update(self, updates)
    }

    fn reset(&self) {
        KeyedStore::reset(self)
    }

    fn is_empty(&self) -> bool {
        KeyedStore::is_empty(self)
    }

    fn replace(&self, tree: Arc<Value>) -> Result<()> {
        KeyedStore::replace(self, tree)
    }
}
