//! Session registry with durable per-session records.
//!
//! A `SessionRecord` is the whole persisted execution state of one session:
//! plan, pending checkpoint, resolved decisions, stage outcomes and the
//! final report. The orchestrator holds no other state between stage
//! transitions, so a process restart only needs `SessionRegistry::open`.

use crate::plan::TaskPlan;
use crate::store::write_atomic;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use scoutflow_core::{
    ActionOutcome, Checkpoint, Error, Report, Result, SessionId, SessionState, SessionStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

/// What happened when a stage ran, for reporting and inspection.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StageOutcome {
    pub attempts: u32,
    pub degraded: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub summaries: Vec<String>,
    #[serde(default)]
    pub skipped: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub owner: Option<String>,
    pub status: SessionStatus,
    pub criteria: Value,
    pub plan: TaskPlan,
    pub pending_checkpoint: Option<Checkpoint>,
    /// Monotonic; feeds checkpoint ids so superseded ones never repeat.
    #[serde(default)]
    pub checkpoint_seq: u32,
    #[serde(default)]
    pub action_outcomes: BTreeMap<String, ActionOutcome>,
    #[serde(default)]
    pub stage_outcomes: BTreeMap<String, StageOutcome>,
    pub report: Option<Report>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: SessionId, owner: Option<String>, criteria: Value, plan: TaskPlan) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            owner,
            status: SessionStatus::Running,
            criteria,
            plan,
            pending_checkpoint: None,
            checkpoint_seq: 0,
            action_outcomes: BTreeMap::new(),
            stage_outcomes: BTreeMap::new(),
            report: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Read model served to callers.
    pub fn state(&self) -> SessionState {
        SessionState {
            session_id: self.session_id.clone(),
            status: self.status,
            plan: self.plan.stages().to_vec(),
            progress: self.plan.progress(),
            pending_checkpoint: self.pending_checkpoint.clone(),
            report: self.report.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>>;
    async fn save(&self, record: &SessionRecord) -> Result<()>;
}

/// `{root}/{session_id}/session.json`, replaced atomically on every save.
pub struct FsSessionStore {
    root: PathBuf,
}

impl FsSessionStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn record_path(&self, id: &SessionId) -> Result<PathBuf> {
        id.validate()?;
        Ok(self.root.join(id.as_str()).join("session.json"))
    }
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        match tokio::fs::read(self.record_path(id)?).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(&record.session_id)?, &bytes).await
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    records: DashMap<SessionId, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn save(&self, record: &SessionRecord) -> Result<()> {
        self.records.insert(record.session_id.clone(), record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Live handles
// ---------------------------------------------------------------------------

pub struct SessionHandle {
    pub id: SessionId,
    record: RwLock<SessionRecord>,
    store: Arc<dyn SessionStore>,
    run_lock: Mutex<()>,
}

impl SessionHandle {
    fn new(record: SessionRecord, store: Arc<dyn SessionStore>) -> Self {
        Self {
            id: record.session_id.clone(),
            record: RwLock::new(record),
            store,
            run_lock: Mutex::new(()),
        }
    }

    /// Last published record. Never observes a half-applied transition.
    pub async fn snapshot(&self) -> SessionRecord {
        self.record.read().await.clone()
    }

    /// Apply `f` to a copy of the record, persist the copy, then publish it.
    /// If `f` or the save fails the published record is untouched.
    pub async fn transition<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SessionRecord) -> Result<T>,
    {
        let mut guard = self.record.write().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        next.updated_at = Utc::now();
        self.store.save(&next).await?;
        *guard = next;
        debug!(session = %self.id, status = %guard.status, "session record published");
        Ok(out)
    }

    /// Serialises pipeline drives for this session.
    pub async fn lock_run(&self) -> MutexGuard<'_, ()> {
        self.run_lock.lock().await
    }
}

pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    store: Arc<dyn SessionStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStore::new()))
    }

    /// Register and persist a new session. Fails with `SessionExists` if
    /// the id is live or already persisted.
    pub async fn create(&self, record: SessionRecord) -> Result<Arc<SessionHandle>> {
        let id = record.session_id.clone();
        id.validate()?;
        if self.sessions.contains_key(&id) || self.store.load(&id).await?.is_some() {
            return Err(Error::SessionExists(id.to_string()));
        }
        let handle = Arc::new(SessionHandle::new(record.clone(), self.store.clone()));
        match self.sessions.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::SessionExists(id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(handle.clone());
            }
        }
        if let Err(e) = self.store.save(&record).await {
            self.sessions.remove(&id);
            return Err(e);
        }
        info!(session = %id, "session created");
        Ok(handle)
    }

    /// Live handle, reloading the persisted record after a restart.
    pub async fn open(&self, id: &SessionId) -> Result<Arc<SessionHandle>> {
        if let Some(h) = self.get(id) {
            return Ok(h);
        }
        id.validate()?;
        let record = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        info!(session = %id, status = %record.status, "session reloaded from store");
        let handle = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(SessionHandle::new(record, self.store.clone())))
            .clone();
        Ok(handle)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(id).map(|h| h.clone())
    }

    pub fn list(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop the live handle; the persisted record stays.
    pub fn evict(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(id).map(|(_, h)| h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> SessionRecord {
        SessionRecord::new(SessionId::new(id), Some("u".into()), json!({"location": "Austin"}), TaskPlan::default())
    }

    #[tokio::test]
    async fn create_then_duplicate_fails() {
        let reg = SessionRegistry::in_memory();
        reg.create(record("u-1")).await.unwrap();
        assert!(matches!(reg.create(record("u-1")).await, Err(Error::SessionExists(_))));
        assert_eq!(reg.list().len(), 1);
    }

    #[tokio::test]
    async fn open_missing_is_not_found() {
        let reg = SessionRegistry::in_memory();
        assert!(matches!(reg.open(&SessionId::new("u-9")).await, Err(Error::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn transition_persists_and_publishes() {
        let store = Arc::new(MemorySessionStore::new());
        let reg = SessionRegistry::new(store.clone());
        let h = reg.create(record("u-1")).await.unwrap();
        h.transition(|r| r.plan.advance("search")).await.unwrap();

        let persisted = store.load(&h.id).await.unwrap().unwrap();
        assert_eq!(persisted.plan.current().unwrap().name, "search");
        assert_eq!(h.snapshot().await.plan.current().unwrap().name, "search");
    }

    #[tokio::test]
    async fn failed_transition_leaves_record_untouched() {
        let store = Arc::new(MemorySessionStore::new());
        let reg = SessionRegistry::new(store.clone());
        let h = reg.create(record("u-1")).await.unwrap();
        let before = h.snapshot().await;

        let err = h
            .transition(|r| {
                r.status = SessionStatus::Terminated;
                r.plan.advance("compile")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutOfOrderTransition { .. }));
        assert_eq!(h.snapshot().await, before);
        assert_eq!(store.load(&h.id).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn fs_store_survives_registry_restart() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let reg = SessionRegistry::new(Arc::new(FsSessionStore::new(tmp.path())));
            let h = reg.create(record("u-1")).await.unwrap();
            h.transition(|r| r.plan.advance("search")).await.unwrap();
        }
        assert!(tmp.path().join("u-1/session.json").exists());

        let reg = SessionRegistry::new(Arc::new(FsSessionStore::new(tmp.path())));
        assert!(reg.get(&SessionId::new("u-1")).is_none());
        let h = reg.open(&SessionId::new("u-1")).await.unwrap();
        let snap = h.snapshot().await;
        assert_eq!(snap.plan.current().unwrap().name, "search");
        assert_eq!(snap.owner.as_deref(), Some("u"));
        assert!(matches!(reg.create(record("u-1")).await, Err(Error::SessionExists(_))));
    }

    #[tokio::test]
    async fn traversal_ids_never_reach_the_fs_store() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("sessions");
        let reg = SessionRegistry::new(Arc::new(FsSessionStore::new(&root)));

        let created = reg.create(record("u-../../escaped")).await;
        assert!(matches!(created, Err(Error::InvalidSessionId(_))));
        assert!(reg.get(&SessionId::new("u-../../escaped")).is_none());
        assert!(matches!(
            reg.open(&SessionId::new("u-../x")).await,
            Err(Error::InvalidSessionId(_))
        ));
        assert!(!tmp.path().join("escaped").exists());
    }

    #[tokio::test]
    async fn evict_keeps_persisted_record() {
        let reg = SessionRegistry::in_memory();
        reg.create(record("u-1")).await.unwrap();
        assert!(reg.evict(&SessionId::new("u-1")).is_some());
        assert!(reg.get(&SessionId::new("u-1")).is_none());
        assert!(reg.open(&SessionId::new("u-1")).await.is_ok());
    }

    #[test]
    fn state_view_mirrors_record() {
        let r = record("u-1");
        let state = r.state();
        assert_eq!(state.status, SessionStatus::Running);
        assert_eq!(state.plan.len(), 4);
        assert_eq!(state.progress.total, 4);
        assert!(state.pending_checkpoint.is_none());
    }
}
