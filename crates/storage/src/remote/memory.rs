use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::{FileHandle, FileStore, PushStore, RemoteError, Subscription};

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_prefix(short: &[&str], long: &[&str]) -> bool {
    short.len() <= long.len() && short.iter().zip(long).all(|(a, b)| a == b)
}

//
// ─── PUSH STORE ────────────────────────────────────────────────────────────────
//

struct Listener {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<Option<Value>>,
}

struct PushState {
    root: Value,
    listeners: Vec<Listener>,
    available: bool,
    writes: usize,
}

/// In-process JSON tree with live listeners, for tests and offline use.
///
/// Writes notify listeners on the written path, its ancestors and its
/// descendants. Empty objects are pruned, so a path whose children were all
/// deleted reads as absent.
#[derive(Clone)]
pub struct InMemoryPushStore {
    state: Arc<Mutex<PushState>>,
}

impl Default for InMemoryPushStore {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(PushState {
                root: Value::Object(Map::new()),
                listeners: Vec::new(),
                available: true,
                writes: 0,
            })),
        }
    }
}

impl InMemoryPushStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.available = available;
        }
    }

    /// Number of successful writes and deletes so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.state.lock().map(|s| s.writes).unwrap_or_default()
    }

    /// Current value at `path`, bypassing availability.
    #[must_use]
    pub fn value_at(&self, path: &str) -> Option<Value> {
        let state = self.state.lock().ok()?;
        lookup(&state.root, &segments(path)).cloned()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PushState>, RemoteError> {
        let state = self
            .state
            .lock()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        if state.available {
            Ok(state)
        } else {
            Err(RemoteError::Unavailable("offline".into()))
        }
    }

    fn commit(state: &mut PushState, path: &[&str], value: Option<Value>) {
        match value {
            Some(value) if !value.is_null() => insert(&mut state.root, path, value),
            _ => {
                remove(&mut state.root, path);
            }
        }
        state.writes += 1;

        let PushState {
            root, listeners, ..
        } = state;
        listeners.retain(|listener| {
            let watched: Vec<&str> = listener.path.iter().map(String::as_str).collect();
            if !is_prefix(&watched, path) && !is_prefix(path, &watched) {
                return !listener.tx.is_closed();
            }
            listener.tx.send(lookup(root, &watched).cloned()).is_ok()
        });
    }
}

fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for segment in path {
        node = node.as_object()?.get(*segment)?;
    }
    match node {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other),
    }
}

fn insert(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else { return };
        node = map
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert((*last).to_owned(), value);
    }
}

/// Remove the value at `path`. Returns true if `node` is now empty.
fn remove(node: &mut Value, path: &[&str]) -> bool {
    let Some((first, rest)) = path.split_first() else {
        *node = Value::Object(Map::new());
        return true;
    };
    let Value::Object(map) = node else {
        return false;
    };
    let child_empty = if rest.is_empty() {
        true
    } else {
        map.get_mut(*first).is_some_and(|child| remove(child, rest))
    };
    if child_empty {
        map.remove(*first);
    }
    map.is_empty()
}

#[async_trait]
impl PushStore for InMemoryPushStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        let state = self.lock()?;
        Ok(lookup(&state.root, &segments(path)).cloned())
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::commit(&mut state, &segments(path), Some(value));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::commit(&mut state, &segments(path), None);
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, RemoteError> {
        let mut state = self.lock()?;
        let watched = segments(path);
        let (tx, rx) = mpsc::unbounded_channel();
        // initial snapshot; the receiver is alive so this cannot fail
        let _ = tx.send(lookup(&state.root, &watched).cloned());
        state.listeners.push(Listener {
            path: watched.iter().map(|s| (*s).to_owned()).collect(),
            tx,
        });
        Ok(Subscription::new(path, rx))
    }
}

//
// ─── FILE STORE ────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct FileState {
    files: HashMap<String, Option<Value>>,
    offline: bool,
    uploads: usize,
}

/// In-process file store keyed by file name.
#[derive(Clone, Default)]
pub struct InMemoryFileStore {
    state: Arc<Mutex<FileState>>,
}

impl InMemoryFileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = !available;
        }
    }

    /// Plant file contents as if another device had uploaded them.
    pub fn put(&self, name: &str, value: Value) {
        if let Ok(mut state) = self.state.lock() {
            state.files.insert(name.to_owned(), Some(value));
        }
    }

    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Value> {
        let state = self.state.lock().ok()?;
        state.files.get(name).cloned().flatten()
    }

    #[must_use]
    pub fn uploads(&self) -> usize {
        self.state.lock().map(|s| s.uploads).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, FileState>, RemoteError> {
        let state = self
            .state
            .lock()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        if state.offline {
            Err(RemoteError::Unavailable("offline".into()))
        } else {
            Ok(state)
        }
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn find_or_create(&self, name: &str) -> Result<FileHandle, RemoteError> {
        let mut state = self.lock()?;
        state.files.entry(name.to_owned()).or_default();
        Ok(FileHandle {
            id: name.to_owned(),
            name: name.to_owned(),
        })
    }

    async fn download(&self, file: &FileHandle) -> Result<Option<Value>, RemoteError> {
        let state = self.lock()?;
        Ok(state.files.get(&file.id).cloned().flatten())
    }

    async fn upload(&self, file: &FileHandle, value: &Value) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        state.files.insert(file.id.clone(), Some(value.clone()));
        state.uploads += 1;
        Ok(())
    }
}
