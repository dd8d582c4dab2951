//! Persistence of serialised task contexts, keyed by [`TaskId`].

use crate::{context::TaskId, error::TaskError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Storage for opaque serialised task contexts.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn save(&self, task_id: &TaskId, payload: String) -> Result<(), TaskError>;

    async fn load(&self, task_id: &TaskId) -> Result<Option<String>, TaskError>;

    async fn remove(&self, task_id: &TaskId) -> Result<(), TaskError>;

    /// All stored (non quarantined) task ids.
    async fn list(&self) -> Result<Vec<TaskId>, TaskError>;

    /// Move a payload that cannot be restored out of the recoverable set.
    async fn quarantine(&self, task_id: &TaskId) -> Result<(), TaskError>;
}

/// In-memory [`ContextStore`], useful for paper trading and tests.
#[derive(Debug, Default)]
pub struct InMemoryContextStore {
    inner: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    contexts: BTreeMap<TaskId, String>,
    quarantined: BTreeMap<TaskId, String>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quarantined payloads, keyed by task id.
    pub fn quarantined(&self) -> BTreeMap<TaskId, String> {
        self.inner.lock().quarantined.clone()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn save(&self, task_id: &TaskId, payload: String) -> Result<(), TaskError> {
        self.inner.lock().contexts.insert(task_id.clone(), payload);
        Ok(())
    }

    async fn load(&self, task_id: &TaskId) -> Result<Option<String>, TaskError> {
        Ok(self.inner.lock().contexts.get(task_id).cloned())
    }

    async fn remove(&self, task_id: &TaskId) -> Result<(), TaskError> {
        self.inner.lock().contexts.remove(task_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TaskId>, TaskError> {
        Ok(self.inner.lock().contexts.keys().cloned().collect())
    }

    async fn quarantine(&self, task_id: &TaskId) -> Result<(), TaskError> {
        let mut inner = self.inner.lock();
        match inner.contexts.remove(task_id) {
            Some(payload) => {
                inner.quarantined.insert(task_id.clone(), payload);
                Ok(())
            }
            None => Err(TaskError::Store(format!("no stored context for {task_id}"))),
        }
    }
}

/// [`ContextStore`] writing one `{task_id}.json` file per task into a directory.
///
/// Task ids are used verbatim as file names, so only ids made of alphanumerics, `-` and `_`
/// are accepted. Quarantined payloads are moved into a `quarantine/` sub-directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    const QUARANTINE_DIR: &'static str = "quarantine";

    /// Create a store rooted at `dir`, creating the directory if required.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, TaskError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(dir.join(Self::QUARANTINE_DIR)).await?;
        debug!(?dir, "JsonFileStore initialised");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, task_id: &TaskId) -> Result<PathBuf, TaskError> {
        Ok(self.dir.join(file_name(task_id)?))
    }
}

/// File name of a task's context. Ids that are not valid file stems are rejected rather
/// than rewritten, so distinct ids never share a file.
fn file_name(task_id: &TaskId) -> Result<String, TaskError> {
    let valid = !task_id.is_empty()
        && task_id
            .as_str()
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(format!("{task_id}.json"))
    } else {
        Err(TaskError::Store(format!(
            "task id {task_id:?} is not a valid context file name"
        )))
    }
}

#[async_trait]
impl ContextStore for JsonFileStore {
    async fn save(&self, task_id: &TaskId, payload: String) -> Result<(), TaskError> {
        let path = self.path(task_id)?;
        let staging = path.with_extension("json.tmp");

        // Readers only ever observe complete payloads
        tokio::fs::write(&staging, payload).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!(%task_id, ?path, "Task context saved");
        Ok(())
    }

    async fn load(&self, task_id: &TaskId) -> Result<Option<String>, TaskError> {
        match tokio::fs::read_to_string(self.path(task_id)?).await {
            Ok(payload) => Ok(Some(payload)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn remove(&self, task_id: &TaskId) -> Result<(), TaskError> {
        match tokio::fs::remove_file(self.path(task_id)?).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn list(&self) -> Result<Vec<TaskId>, TaskError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut task_ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(stem) => task_ids.push(TaskId::new(stem)),
                None => warn!(?path, "Skipping context file with non UTF-8 name"),
            }
        }

        task_ids.sort();
        Ok(task_ids)
    }

    async fn quarantine(&self, task_id: &TaskId) -> Result<(), TaskError> {
        let from = self.path(task_id)?;
        let to = self
            .dir
            .join(Self::QUARANTINE_DIR)
            .join(file_name(task_id)?);
        tokio::fs::rename(&from, &to).await?;
        warn!(%task_id, ?to, "Task context quarantined");
        Ok(())
    }
}
