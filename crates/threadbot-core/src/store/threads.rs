//! `ThreadStore`: in-memory table guarded by a mutex, persisted as one JSON file.
//!
//! Every mutation runs under the table lock and rewrites the whole file before
//! the lock is released, so concurrent first contacts cannot lose each other's
//! entries. The rewrite goes to a temporary sibling first and is renamed into
//! place, which keeps the previous table intact if the process dies mid-write.
//!
//! Thread creation happens outside the table lock, behind a per-user creation
//! lock: lookups and other users' first contacts never wait on a slow create.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::StoreError;

/// Default backing file name, relative to the working directory.
pub const DEFAULT_STORE_FILE: &str = "user_threads_data.json";

type Table = BTreeMap<String, String>;

/// Outcome of [`ThreadStore::get_or_create`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreadLookup {
    /// The user already had a thread.
    Existing(String),
    /// A thread was created for the user during this call.
    Created(String),
}

impl ThreadLookup {
    pub fn thread_id(&self) -> &str {
        match self {
            ThreadLookup::Existing(id) | ThreadLookup::Created(id) => id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, ThreadLookup::Created(_))
    }
}

/// Durable mapping from chat user id to assistant thread id.
pub struct ThreadStore {
    /// Path of the JSON backing file.
    path: PathBuf,
    /// In-memory table. Lock held across read-check-insert-persist.
    table: Mutex<Table>,
    /// Creation locks for users whose first contact is in flight.
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ThreadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ThreadStore {
    /// Create an empty, unloaded store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: Mutex::new(Table::new()),
            creating: Mutex::new(HashMap::new()),
        }
    }

    /// Create a store and load it from disk in one step.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(path);
        store.load().await?;
        Ok(store)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ─────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────

    /// Replace the in-memory table with the contents of the backing file.
    ///
    /// A missing file yields an empty table. A file that does not parse as a
    /// flat string → string object is [`StoreError::Corrupt`]; the caller is
    /// expected to treat that as fatal rather than start over empty.
    ///
    /// Returns the number of entries loaded.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no thread store found, starting empty");
                self.table.lock().await.clear();
                return Ok(0);
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let loaded: Table = serde_json::from_str(&data).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let count = loaded.len();
        *self.table.lock().await = loaded;
        info!(path = %self.path.display(), threads = count, "loaded thread store");
        Ok(count)
    }

    /// Write the full table to the backing file.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let table = self.table.lock().await;
        self.write_table(&table).await
    }

    // ─────────────────────────────────────────
    // Queries and mutations
    // ─────────────────────────────────────────

    /// Thread id for `user_id`, if one has been assigned.
    pub async fn get(&self, user_id: &str) -> Option<String> {
        self.table.lock().await.get(user_id).cloned()
    }

    /// Record a new association and persist it.
    ///
    /// Thread ids are immutable once assigned: a second `put` for the same
    /// user is rejected with [`StoreError::AlreadyMapped`] and changes nothing.
    ///
    /// If the write fails the entry stays in memory, so the user keeps their
    /// thread for the lifetime of the process, and the I/O error is returned.
    pub async fn put(&self, user_id: &str, thread_id: &str) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        if let Some(existing) = table.get(user_id) {
            return Err(StoreError::AlreadyMapped {
                user_id: user_id.to_string(),
                existing: existing.clone(),
            });
        }

        table.insert(user_id.to_string(), thread_id.to_string());
        debug!(user = %user_id, thread = %thread_id, "thread mapping added");
        self.write_table(&table).await
    }

    /// Return the user's thread, creating one with `create` if absent.
    ///
    /// `create` runs at most once per user even when several first messages
    /// race: callers for the same user queue on a creation lock and find the
    /// mapping once the first one finishes. The table lock is not held while
    /// `create` runs, so other users are never delayed by it. A failed
    /// `create` leaves the table untouched and its error is returned as-is.
    ///
    /// A failed write is logged and otherwise ignored: the new thread is still
    /// returned and kept in memory.
    pub async fn get_or_create<F, Fut, E>(&self, user_id: &str, create: F) -> Result<ThreadLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if let Some(existing) = self.get(user_id).await {
            debug!(user = %user_id, thread = %existing, "using existing thread");
            return Ok(ThreadLookup::Existing(existing));
        }

        let gate = self.creation_lock(user_id).await;
        let result = {
            let _creating = gate.lock().await;
            self.create_once(user_id, create).await
        };
        self.release_creation_lock(user_id, gate).await;
        result
    }

    /// Second half of [`get_or_create`](Self::get_or_create). Callers hold
    /// the user's creation lock.
    async fn create_once<F, Fut, E>(&self, user_id: &str, create: F) -> Result<ThreadLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        // Another caller may have finished creating while we queued
        if let Some(existing) = self.get(user_id).await {
            debug!(user = %user_id, thread = %existing, "thread created by concurrent message");
            return Ok(ThreadLookup::Existing(existing));
        }

        let thread_id = create().await?;

        let mut table = self.table.lock().await;
        if let Some(existing) = table.get(user_id) {
            // Only `put` can get here first
            warn!(
                user = %user_id,
                thread = %existing,
                discarded = %thread_id,
                "user was mapped while creating a thread, keeping existing mapping"
            );
            return Ok(ThreadLookup::Existing(existing.clone()));
        }

        table.insert(user_id.to_string(), thread_id.clone());
        info!(user = %user_id, thread = %thread_id, "thread created for user");

        if let Err(e) = self.write_table(&table).await {
            error!(
                user = %user_id,
                error = %e,
                "failed to persist new thread mapping; it will be lost on restart"
            );
        }

        Ok(ThreadLookup::Created(thread_id))
    }

    async fn creation_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut creating = self.creating.lock().await;
        creating.entry(user_id.to_string()).or_default().clone()
    }

    /// Drop the user's creation lock unless another caller holds a handle.
    async fn release_creation_lock(&self, user_id: &str, gate: Arc<Mutex<()>>) {
        let mut creating = self.creating.lock().await;
        // One handle in the map, one here
        if Arc::strong_count(&gate) <= 2 {
            creating.remove(user_id);
        }
    }

    /// Number of stored mappings.
    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }

    /// Snapshot of all mappings, sorted by user id.
    pub async fn entries(&self) -> Vec<(String, String)> {
        self.table
            .lock()
            .await
            .iter()
            .map(|(user, thread)| (user.clone(), thread.clone()))
            .collect()
    }

    /// Serialize `table` to a temporary sibling file and rename it over the
    /// backing file. Callers must hold the table lock.
    async fn write_table(&self, table: &Table) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }

        let json = serde_json::to_string_pretty(table)?;
        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        tokio::fs::write(&temp_path, json).await.map_err(io_err)?;
        if let Err(source) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_err(source));
        }

        debug!(path = %self.path.display(), threads = table.len(), "saved thread store");
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::{oneshot, Barrier};

    fn store_in(dir: &tempfile::TempDir) -> ThreadStore {
        ThreadStore::new(dir.path().join(DEFAULT_STORE_FILE))
    }

    #[tokio::test]
    async fn test_load_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.load().await.unwrap(), 0);
        assert!(store.is_empty().await);
        assert!(store.get("42").await.is_none());
        // Loading alone never creates the file
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_get_unknown_user_is_none() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.put("1", "thread_a").await.unwrap();

        assert!(store.get("2").await.is_none());
        // No implicit creation
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_is_stable_after_put() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.put("42", "thread_abc").await.unwrap();

        assert_eq!(store.get("42").await.as_deref(), Some("thread_abc"));
        assert_eq!(store.get("42").await.as_deref(), Some("thread_abc"));
    }

    #[tokio::test]
    async fn test_put_existing_user_is_rejected() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.put("42", "thread_first").await.unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        let err = store.put("42", "thread_second").await.unwrap_err();
        match err {
            StoreError::AlreadyMapped { user_id, existing } => {
                assert_eq!(user_id, "42");
                assert_eq!(existing, "thread_first");
            }
            other => panic!("expected AlreadyMapped, got {other:?}"),
        }

        assert_eq!(store.get("42").await.as_deref(), Some("thread_first"));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_put_persists_immediately() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.put("42", "thread_abc").await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({ "42": "thread_abc" }));
    }

    #[tokio::test]
    async fn test_persist_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        {
            let store = store_in(&dir);
            store.put("100", "thread_x").await.unwrap();
            store.put("200", "thread_y").await.unwrap();
            store.put("300", "thread_z").await.unwrap();
            store.persist().await.unwrap();
        }

        let reopened = ThreadStore::open(dir.path().join(DEFAULT_STORE_FILE))
            .await
            .unwrap();
        assert_eq!(
            reopened.entries().await,
            vec![
                ("100".to_string(), "thread_x".to_string()),
                ("200".to_string(), "thread_y".to_string()),
                ("300".to_string(), "thread_z".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_reads_existing_file_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STORE_FILE);
        std::fs::write(
            &path,
            "{\n    \"183920471234\": \"thread_abc123\",\n    \"559102938475\": \"thread_def456\"\n}",
        )
        .unwrap();

        let store = ThreadStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 2);
        assert_eq!(
            store.get("559102938475").await.as_deref(),
            Some("thread_def456")
        );
    }

    #[tokio::test]
    async fn test_load_corrupt_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STORE_FILE);
        std::fs::write(&path, "not json {{{").unwrap();

        let err = ThreadStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(err.to_string().contains("corrupt"));
    }

    #[tokio::test]
    async fn test_load_wrong_shape_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STORE_FILE);
        std::fs::write(&path, r#"{"42": 17}"#).unwrap();

        let err = ThreadStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_load_empty_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STORE_FILE);
        std::fs::write(&path, "").unwrap();

        assert!(matches!(
            ThreadStore::open(&path).await.unwrap_err(),
            StoreError::Corrupt { .. }
        ));
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.put("1", "t1").await.unwrap();
        store.put("2", "t2").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![DEFAULT_STORE_FILE.to_string()]);
    }

    #[tokio::test]
    async fn test_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let store = ThreadStore::new(dir.path().join("nested/data/threads.json"));
        store.put("1", "t1").await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_entry_in_memory() {
        let dir = tempdir().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = ThreadStore::new(blocker.join("threads.json"));

        let err = store.put("42", "thread_abc").await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(store.get("42").await.as_deref(), Some("thread_abc"));
    }

    #[tokio::test]
    async fn test_get_or_create_first_contact_then_reuse() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let calls = AtomicUsize::new(0);

        let create = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("thread_new".to_string())
        };

        let first = store.get_or_create("42", create).await.unwrap();
        assert_eq!(first, ThreadLookup::Created("thread_new".into()));
        assert!(first.is_new());

        let second = store
            .get_or_create("42", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("thread_other".to_string())
            })
            .await
            .unwrap();
        assert_eq!(second, ThreadLookup::Existing("thread_new".into()));
        assert_eq!(second.thread_id(), "thread_new");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let reopened = ThreadStore::open(store.path()).await.unwrap();
        assert_eq!(reopened.get("42").await.as_deref(), Some("thread_new"));
    }

    #[tokio::test]
    async fn test_get_or_create_failure_leaves_table_untouched() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let result = store
            .get_or_create("42", || async { Err::<String, _>("provider down") })
            .await;
        assert_eq!(result.unwrap_err(), "provider down");
        assert!(store.get("42").await.is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_concurrent_first_contact_two_users() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let spawn_user = |user: &'static str| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .get_or_create(user, || async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(format!("thread_{user}"))
                    })
                    .await
                    .unwrap()
            })
        };

        let (a, b) = tokio::join!(spawn_user("alice"), spawn_user("bob"));
        assert_ne!(a.unwrap().thread_id(), b.unwrap().thread_id());

        assert_eq!(store.len().await, 2);
        let reopened = ThreadStore::open(store.path()).await.unwrap();
        assert_eq!(reopened.get("alice").await.as_deref(), Some("thread_alice"));
        assert_eq!(reopened.get("bob").await.as_deref(), Some("thread_bob"));
    }

    #[tokio::test]
    async fn test_concurrent_first_contact_same_user_creates_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store_in(&dir));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                store
                    .get_or_create("42", || async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, String>(format!("thread_{n}"))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().thread_id().to_string());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| id == "thread_0"));
    }

    #[tokio::test]
    async fn test_lookup_does_not_wait_for_thread_creation() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store_in(&dir));
        store.put("old", "thread_old").await.unwrap();

        let (entered_tx, entered_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let creator = store.clone();
        let newcomer = tokio::spawn(async move {
            creator
                .get_or_create("new", || async move {
                    let _ = entered_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, String>("thread_new".to_string())
                })
                .await
                .unwrap()
        });
        entered_rx.await.unwrap();

        // "new" is mid-creation; known users and reads still go through
        let old = tokio::time::timeout(
            Duration::from_secs(1),
            store.get_or_create("old", || async { Err::<String, _>("unexpected create") }),
        )
        .await
        .expect("lookup blocked behind another user's creation")
        .unwrap();
        assert_eq!(old, ThreadLookup::Existing("thread_old".into()));
        assert_eq!(store.len().await, 1);

        release_tx.send(()).unwrap();
        assert_eq!(newcomer.await.unwrap(), ThreadLookup::Created("thread_new".into()));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_first_contacts_of_different_users_overlap() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store_in(&dir));
        // Each create only finishes once both are running
        let both_creating = Arc::new(Barrier::new(2));

        let spawn_user = |user: &'static str| {
            let store = store.clone();
            let both_creating = both_creating.clone();
            tokio::spawn(async move {
                store
                    .get_or_create(user, || async move {
                        both_creating.wait().await;
                        Ok::<_, String>(format!("thread_{user}"))
                    })
                    .await
            })
        };

        let (a, b) = tokio::time::timeout(
            Duration::from_secs(1),
            async { tokio::join!(spawn_user("alice"), spawn_user("bob")) },
        )
        .await
        .expect("thread creations were serialized across users");

        assert!(a.unwrap().unwrap().is_new());
        assert!(b.unwrap().unwrap().is_new());
        let reopened = ThreadStore::open(store.path()).await.unwrap();
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn test_put_during_creation_keeps_first_mapping() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store_in(&dir));

        let racing = store.clone();
        let lookup = store
            .get_or_create("42", || async move {
                racing.put("42", "thread_put").await.unwrap();
                Ok::<_, String>("thread_created".to_string())
            })
            .await
            .unwrap();

        assert_eq!(lookup, ThreadLookup::Existing("thread_put".into()));
        assert_eq!(store.get("42").await.as_deref(), Some("thread_put"));
    }

    #[tokio::test]
    async fn test_creation_locks_are_released() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store
            .get_or_create("1", || async { Ok::<_, String>("thread_1".to_string()) })
            .await
            .unwrap();
        let _ = store
            .get_or_create("2", || async { Err::<String, _>("provider down") })
            .await;

        assert!(store.creating.lock().await.is_empty());
    }
}
