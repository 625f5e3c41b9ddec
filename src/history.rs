//! Dispatcher-level action history.
//!
//! Every dispatched action (outside replay) is recorded together with the
//! aggregate state it was applied to. The log is bounded; the oldest entries
//! are evicted first. A cursor tracks the entry the stores currently reflect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::action::{group_of, Action};
use crate::error::Result;

/// Aggregate state: each domain's full tree, keyed by domain name.
pub type Snapshot = BTreeMap<String, Arc<Value>>;

/// Render a snapshot as one JSON object.
pub fn snapshot_to_value(snapshot: &Snapshot) -> Value {
    Value::Object(
        snapshot
            .iter()
            .map(|(domain, state)| (domain.clone(), (**state).clone()))
            .collect::<Map<_, _>>(),
    )
}

/// One recorded dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: Action,
    pub timestamp: DateTime<Utc>,
    /// Aggregate state the action was applied to.
    pub state: Snapshot,
}

/// Conjunctive filter over history entries.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Exact action type.
    pub action_type: Option<String>,
    /// Group derived from the type prefix (see [`Action::group`]).
    pub group: Option<String>,
    /// Minimum entry timestamp, inclusive.
    pub since: Option<DateTime<Utc>>,
    /// Keep only the last `limit` matching entries.
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(action_type) = &self.action_type {
            if &entry.action.kind != action_type {
                return false;
            }
        }
        if let Some(group) = &self.group {
            if entry.action.group() != group_of(group) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        true
    }

    /// Apply the filter, preserving order (oldest first).
    pub fn apply<'a>(&self, entries: impl IntoIterator<Item = &'a HistoryEntry>) -> Vec<HistoryEntry> {
        let mut matched: Vec<HistoryEntry> = entries
            .into_iter()
            .filter(|entry| self.matches(entry))
            .cloned()
            .collect();
        if let Some(limit) = self.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }
}

/// Bounded log with a time-travel cursor.
#[derive(Debug)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
    cursor: Option<usize>,
}

impl HistoryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
            cursor: None,
        }
    }

    /// Append, evicting the oldest entries beyond the limit. The cursor
    /// moves to the new entry.
    ///
    /// Entries after the cursor (left behind by a rewind) are discarded
    /// first, so the log always describes the live branch.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.limit == 0 {
            return;
        }
        if let Some(cursor) = self.cursor {
            self.entries.truncate(cursor + 1);
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        self.cursor = Some(self.entries.len() - 1);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: Option<usize>) {
        self.cursor = cursor;
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Oldest retained entry; its snapshot is the base for replay.
    pub fn first(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    /// Actions of entries `0..=index`, oldest first.
    pub fn actions_through(&self, index: usize) -> Vec<Action> {
        self.entries
            .iter()
            .take(index + 1)
            .map(|entry| entry.action.clone())
            .collect()
    }
}

/// Serializable dump of the dispatcher for dev tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedState {
    pub state: Snapshot,
    pub history: Vec<HistoryEntry>,
    pub current_index: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

impl ExportedState {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
