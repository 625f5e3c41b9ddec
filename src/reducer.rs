//! Pure reducers and the reducer combinator.
//!
//! A reducer maps `(state, action)` to the next state. When no case matches
//! it returns the *same* `Arc`, which lets the dispatcher skip the store
//! commit entirely (`Arc::ptr_eq`).

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::action::Action;

/// Pure state transition for one domain. No I/O, no side effects.
pub trait Reducer: Send + Sync {
    /// State used when the paired store is empty (fresh after a reset).
    fn initial_state(&self) -> Arc<Value>;

    /// Compute the next state. Return `Arc::clone(state)` for unrelated actions.
    fn reduce(&self, state: &Arc<Value>, action: &Action) -> Arc<Value>;
}

impl<R: Reducer + ?Sized> Reducer for Arc<R> {
    fn initial_state(&self) -> Arc<Value> {
        (**self).initial_state()
    }

    fn reduce(&self, state: &Arc<Value>, action: &Action) -> Arc<Value> {
        (**self).reduce(state, action)
    }
}

/// Reducer built from an initial state and a closure.
pub struct FnReducer<F> {
    initial: Arc<Value>,
    reduce: F,
}

/// Build a reducer from a closure.
pub fn reducer_fn<F>(initial: Value, reduce: F) -> FnReducer<F>
where
    F: Fn(&Arc<Value>, &Action) -> Arc<Value> + Send + Sync,
{
    FnReducer {
        initial: Arc::new(initial),
        reduce,
    }
}

impl<F> Reducer for FnReducer<F>
where
    F: Fn(&Arc<Value>, &Action) -> Arc<Value> + Send + Sync,
{
    fn initial_state(&self) -> Arc<Value> {
        Arc::clone(&self.initial)
    }

    fn reduce(&self, state: &Arc<Value>, action: &Action) -> Arc<Value> {
        (self.reduce)(state, action)
    }
}

/// Parent reducer mapping named children over named sub-trees.
pub struct CombinedReducer {
    children: Vec<(String, Arc<dyn Reducer>)>,
    initial: Arc<Value>,
}

/// Combine child reducers, each owning the sub-tree under its name.
pub fn combine_reducers<I, K>(children: I) -> CombinedReducer
where
    I: IntoIterator<Item = (K, Arc<dyn Reducer>)>,
    K: Into<String>,
{
    let children: Vec<(String, Arc<dyn Reducer>)> = children
        .into_iter()
        .map(|(name, reducer)| (name.into(), reducer))
        .collect();
    let initial = children
        .iter()
        .map(|(name, reducer)| (name.clone(), (*reducer.initial_state()).clone()))
        .collect::<Map<_, _>>();

    CombinedReducer {
        children,
        initial: Arc::new(Value::Object(initial)),
    }
}

impl CombinedReducer {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(name, _)| name.as_str())
    }
}

impl Reducer for CombinedReducer {
    fn initial_state(&self) -> Arc<Value> {
        Arc::clone(&self.initial)
    }

    /// Returns a new aggregate only when some child produced a new state
    /// (or a child's sub-tree was missing and got its initial state).
    fn reduce(&self, state: &Arc<Value>, action: &Action) -> Arc<Value> {
        let mut changed = Vec::new();
        for (name, child) in &self.children {
            let (current, present) = match state.get(name) {
                Some(sub) => (Arc::new(sub.clone()), true),
                None => (child.initial_state(), false),
            };
            let next = child.reduce(&current, action);
            if !present || !Arc::ptr_eq(&next, &current) {
                changed.push((name.clone(), next));
            }
        }

        if changed.is_empty() {
            return Arc::clone(state);
        }

        let mut map = match state.as_ref() {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for (name, next) in changed {
            map.insert(name, Arc::try_unwrap(next).unwrap_or_else(|arc| (*arc).clone()));
        }
        Arc::new(Value::Object(map))
    }
}

/// Shallow merge of `patch` into an object state, returning a new tree.
///
/// Non-object states are treated as empty.
pub fn merge(state: &Value, patch: Value) -> Arc<Value> {
    let mut map = match state {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(fields) = patch {
        map.extend(fields);
    }
    Arc::new(Value::Object(map))
}
