//! Versioned task context and the typed [`ContextPatch`] used to evolve it.
//!
//! A [`TaskContext`] is never mutated in place. Every change produces a new context via
//! [`TaskContext::evolve`], which also marks it dirty so the driver knows to persist it.

use crate::state::TaskState;
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use smol_str::{SmolStr, format_smolstr};
use std::collections::BTreeMap;

/// Current schema version of a serialised [`TaskContext`].
pub const CONTEXT_VERSION: u32 = 1;

/// Open string keyed metadata. Values may themselves be nested string keyed maps.
pub type Metadata = BTreeMap<SmolStr, Value>;

/// Unique identifier of a task, stable for the lifetime of the task.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct TaskId(pub SmolStr);

impl TaskId {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    /// Generate a [`TaskId`] of the form `"{task_name}_{unix_millis}"`.
    pub fn generate(task_name: &str, time: DateTime<Utc>) -> Self {
        Self(format_smolstr!("{}_{}", task_name, time.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Failure captured from a state handler.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskFailure {
    pub message: String,
    /// State the task was in when the handler failed.
    pub state: String,
    pub time: DateTime<Utc>,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>, state: impl ToString) -> Self {
        Self {
            message: message.into(),
            state: state.to_string(),
            time: Utc::now(),
        }
    }
}

/// Versioned record of a task's identity, state, failure and metadata.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(bound(deserialize = "P: DeserializeOwned"))]
pub struct TaskContext<P> {
    version: u32,
    #[serde(default)]
    task_id: TaskId,
    task_name: SmolStr,
    state: TaskState<P>,
    #[serde(default)]
    error: Option<TaskFailure>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    resume_state: Option<TaskState<P>>,
    #[serde(default)]
    revision: u64,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    dirty: bool,
}

impl<P> TaskContext<P>
where
    P: Clone,
{
    /// Construct a new [`TaskContext`] in [`TaskState::Idle`].
    ///
    /// A [`TaskId`] is generated from the current time and `task_name` if none is provided.
    pub fn new(task_name: impl Into<SmolStr>, task_id: Option<TaskId>) -> Self {
        let task_name = task_name.into();
        let now = Utc::now();
        let task_id = task_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| TaskId::generate(&task_name, now));

        Self {
            version: CONTEXT_VERSION,
            task_id,
            task_name,
            state: TaskState::Idle,
            error: None,
            metadata: Metadata::new(),
            resume_state: None,
            revision: 0,
            updated_at: now,
            dirty: true,
        }
    }

    /// Return a new context equal to this one except for the fields named in `patch`.
    ///
    /// Always marks the returned context dirty.
    pub fn evolve(&self, patch: ContextPatch<P>) -> Self {
        let ContextPatch {
            state,
            error,
            metadata,
            edits,
            resume_state,
        } = patch;

        let mut next = self.clone();

        if let Some(state) = state {
            next.state = state;
        }
        if let Some(error) = error {
            next.error = error;
        }
        if let Some(metadata) = metadata {
            next.metadata = metadata;
        }
        for edit in edits {
            match edit {
                MetadataEdit::Set(key, value) => set_entry(&mut next.metadata, &key, value),
                MetadataEdit::Remove(key) => remove_entry(&mut next.metadata, &key),
            }
        }
        if let Some(resume_state) = resume_state {
            next.resume_state = resume_state;
        }

        next.revision += 1;
        next.updated_at = Utc::now();
        next.dirty = true;
        next
    }

    /// Shorthand for evolving a single (optionally dotted) metadata entry.
    pub fn with_map_entry(&self, key: impl Into<SmolStr>, value: impl Into<Value>) -> Self {
        self.evolve(ContextPatch::new().metadata_entry(key, value))
    }

    /// Fill in a [`TaskId`] if the record was persisted without one.
    pub(crate) fn with_task_id(mut self) -> Self {
        if self.task_id.is_empty() {
            self.task_id = TaskId::generate(&self.task_name, self.updated_at);
            self.dirty = true;
        }
        self
    }
}

impl<P> TaskContext<P> {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn task_name(&self) -> &str {
        self.task_name.as_str()
    }

    pub fn state(&self) -> &TaskState<P> {
        &self.state
    }

    pub fn error(&self) -> Option<&TaskFailure> {
        self.error.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn resume_state(&self) -> Option<&TaskState<P>> {
        self.resume_state.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Determines if the context changed since it was last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.dirty = false;
    }

    /// Look up a metadata entry.
    ///
    /// An exact key match wins, otherwise a dotted key is resolved through nested maps.
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.metadata.get(key) {
            return Some(value);
        }

        let segments = split_path(key)?;
        let (first, rest) = segments.split_first()?;
        rest.iter()
            .try_fold(self.metadata.get(*first)?, |value, segment| {
                value.as_object()?.get(*segment)
            })
    }

    /// Deserialise a metadata entry into `T`, returning `Ok(None)` if the entry is absent.
    pub fn decode_metadata<T>(&self, key: &str) -> Result<Option<T>, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        self.metadata_value(key)
            .map(|value| T::deserialize(value))
            .transpose()
    }
}

/// Typed set of field updates applied by [`TaskContext::evolve`].
///
/// Metadata entries accept the dotted convention: `metadata_entry("transfer.withdrawal_id", v)`
/// updates `metadata["transfer"]["withdrawal_id"]` and preserves sibling keys. A malformed
/// dotted key (empty segment, leading or trailing dot), or one that would descend into a
/// non-map value, is stored as a flat key instead.
#[derive(Clone, Debug)]
pub struct ContextPatch<P> {
    state: Option<TaskState<P>>,
    error: Option<Option<TaskFailure>>,
    metadata: Option<Metadata>,
    edits: Vec<MetadataEdit>,
    resume_state: Option<Option<TaskState<P>>>,
}

#[derive(Clone, Debug)]
enum MetadataEdit {
    Set(SmolStr, Value),
    Remove(SmolStr),
}

impl<P> Default for ContextPatch<P> {
    fn default() -> Self {
        Self {
            state: None,
            error: None,
            metadata: None,
            edits: Vec::new(),
            resume_state: None,
        }
    }
}

impl<P> ContextPatch<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(self, state: TaskState<P>) -> Self {
        Self {
            state: Some(state),
            ..self
        }
    }

    pub fn error(self, error: TaskFailure) -> Self {
        Self {
            error: Some(Some(error)),
            ..self
        }
    }

    pub fn clear_error(self) -> Self {
        Self {
            error: Some(None),
            ..self
        }
    }

    /// Replace the whole metadata map. Entry edits in the same patch apply afterwards.
    pub fn metadata(self, metadata: Metadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..self
        }
    }

    pub fn metadata_entry(mut self, key: impl Into<SmolStr>, value: impl Into<Value>) -> Self {
        self.edits.push(MetadataEdit::Set(key.into(), value.into()));
        self
    }

    pub fn remove_metadata(mut self, key: impl Into<SmolStr>) -> Self {
        self.edits.push(MetadataEdit::Remove(key.into()));
        self
    }

    pub fn resume_state(self, resume_state: Option<TaskState<P>>) -> Self {
        Self {
            resume_state: Some(resume_state),
            ..self
        }
    }
}

/// Split a dotted key into segments, or `None` if it is flat or malformed.
fn split_path(key: &str) -> Option<Vec<&str>> {
    if !key.contains('.') {
        return None;
    }

    let segments = key.split('.').collect::<Vec<_>>();
    if segments.iter().any(|segment| segment.is_empty()) {
        return None;
    }

    Some(segments)
}

/// Determines if every existing container along `segments` (excluding the last) is a map.
fn is_nested_writable(metadata: &Metadata, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let Some((_, parents)) = rest.split_last() else {
        return false;
    };

    let Some(mut current) = metadata.get(*first) else {
        return true;
    };
    for segment in parents {
        let Value::Object(map) = current else {
            return false;
        };
        match map.get(*segment) {
            Some(next) => current = next,
            None => return true,
        }
    }

    current.is_object()
}

fn set_entry(metadata: &mut Metadata, key: &SmolStr, value: Value) {
    let segments = match split_path(key) {
        Some(segments) if is_nested_writable(metadata, &segments) => segments,
        _ => {
            metadata.insert(key.clone(), value);
            return;
        }
    };

    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let Some((first, parents)) = parents.split_first() else {
        return;
    };

    let mut current = metadata
        .entry(SmolStr::new(first))
        .or_insert_with(|| Value::Object(Map::new()));
    for segment in parents {
        let Value::Object(map) = current else {
            return;
        };
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}

fn remove_entry(metadata: &mut Metadata, key: &SmolStr) {
    if metadata.remove(key).is_some() {
        return;
    }

    let Some(segments) = split_path(key) else {
        return;
    };
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let Some((first, parents)) = parents.split_first() else {
        return;
    };

    let Some(mut current) = metadata.get_mut(*first) else {
        return;
    };
    for segment in parents {
        let Some(next) = current.as_object_mut().and_then(|map| map.get_mut(*segment)) else {
            return;
        };
        current = next;
    }

    if let Value::Object(map) = current {
        map.remove(*last);
    }
}
