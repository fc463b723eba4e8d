//! Artifact store: the shared namespace every worker writes into.
//!
//! Documents live at `{session}/{collection}/{entity_id}.json`. The
//! orchestrator and the report compiler only ever see what was persisted
//! here; worker summaries are advisory.

use async_trait::async_trait;
use dashmap::DashMap;
use scoutflow_core::{Artifact, ArtifactPath, Error, Result, SessionId, TranscriptEntry};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Reserved location of the completion marker.
pub const COMPLETION_COLLECTION: &str = "_control";
pub const COMPLETION_ENTITY: &str = "completion";

pub fn completion_marker_path() -> ArtifactPath {
    ArtifactPath {
        collection: COMPLETION_COLLECTION.into(),
        entity_id: COMPLETION_ENTITY.into(),
    }
}

/// Pluggable artifact backend. Each `put` replaces one key atomically;
/// concurrent writers to the same key resolve last-writer-wins.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, session: &SessionId, artifact: &Artifact) -> Result<()>;

    async fn get(&self, session: &SessionId, path: &ArtifactPath) -> Result<Option<Artifact>>;

    /// All artifacts of a session (optionally one collection), sorted by path.
    async fn list(&self, session: &SessionId, collection: Option<&str>) -> Result<Vec<Artifact>>;

    async fn append_transcript(&self, session: &SessionId, entry: &TranscriptEntry) -> Result<()>;

    async fn transcript(&self, session: &SessionId) -> Result<Vec<TranscriptEntry>>;

    /// Physical location of a session namespace, for humans.
    fn location(&self, session: &SessionId) -> String;
}

/// A store handle bound to one session namespace.
#[derive(Clone)]
pub struct SessionArtifacts {
    store: Arc<dyn ArtifactStore>,
    session: SessionId,
}

impl SessionArtifacts {
    pub fn new(store: Arc<dyn ArtifactStore>, session: SessionId) -> Self {
        Self { store, session }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub async fn put(&self, collection: &str, entity_id: &str, payload: Value) -> Result<ArtifactPath> {
        let path = ArtifactPath::new(collection, entity_id)?;
        self.store
            .put(&self.session, &Artifact::new(path.clone(), payload))
            .await?;
        Ok(path)
    }

    pub async fn get(&self, collection: &str, entity_id: &str) -> Result<Option<Value>> {
        let path = ArtifactPath::new(collection, entity_id)?;
        Ok(self.store.get(&self.session, &path).await?.map(|a| a.payload))
    }

    pub async fn list(&self, collection: &str) -> Result<Vec<Artifact>> {
        self.store.list(&self.session, Some(collection)).await
    }

    pub async fn note(&self, source: &str, text: impl Into<String>) -> Result<()> {
        self.store
            .append_transcript(&self.session, &TranscriptEntry::new(source, text))
            .await
    }
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Local filesystem store: `{root}/{session}/{collection}/{entity_id}.json`,
/// plus `{root}/{session}/transcript.jsonl`.
pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Every path below the root goes through here.
    fn session_dir(&self, session: &SessionId) -> Result<PathBuf> {
        session.validate()?;
        Ok(self.root.join(session.as_str()))
    }

    fn artifact_file(&self, session: &SessionId, path: &ArtifactPath) -> Result<PathBuf> {
        Ok(self
            .session_dir(session)?
            .join(&path.collection)
            .join(format!("{}.json", path.entity_id)))
    }

    fn transcript_file(&self, session: &SessionId) -> Result<PathBuf> {
        Ok(self.session_dir(session)?.join("transcript.jsonl"))
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so
/// readers see either the old or the new document.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("no parent dir for {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl ArtifactStore for LocalFsStore {
    async fn put(&self, session: &SessionId, artifact: &Artifact) -> Result<()> {
        let file = self.artifact_file(session, &artifact.path)?;
        let bytes = serde_json::to_vec_pretty(&artifact.payload)?;
        write_atomic(&file, &bytes).await?;
        debug!(session = %session, path = %artifact.path, bytes = bytes.len(), "artifact written");
        Ok(())
    }

    async fn get(&self, session: &SessionId, path: &ArtifactPath) -> Result<Option<Artifact>> {
        let file = self.artifact_file(session, path)?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => {
                let payload = serde_json::from_slice(&bytes)?;
                Ok(Some(Artifact::new(path.clone(), payload)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, session: &SessionId, collection: Option<&str>) -> Result<Vec<Artifact>> {
        let dir = self.session_dir(session)?;
        let collection = collection.map(String::from);
        let files = tokio::task::spawn_blocking(move || collect_artifact_files(&dir, collection.as_deref()))
            .await
            .map_err(|e| Error::Internal(format!("artifact scan failed: {}", e)))?;

        let mut artifacts = Vec::with_capacity(files.len());
        for (path, file) in files {
            let bytes = match tokio::fs::read(&file).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(session = %session, file = %file.display(), error = %e, "skipping unreadable artifact");
                    continue;
                }
            };
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(payload) => artifacts.push(Artifact::new(path, payload)),
                Err(e) => {
                    warn!(session = %session, file = %file.display(), error = %e, "skipping malformed artifact");
                }
            }
        }
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(artifacts)
    }

    async fn append_transcript(&self, session: &SessionId, entry: &TranscriptEntry) -> Result<()> {
        let path = self.transcript_file(session)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn transcript(&self, session: &SessionId) -> Result<Vec<TranscriptEntry>> {
        let content = match tokio::fs::read_to_string(self.transcript_file(session)?).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(session = %session, error = %e, "skipping malformed transcript line"),
            }
        }
        Ok(entries)
    }

    fn location(&self, session: &SessionId) -> String {
        self.root.join(session.as_str()).display().to_string()
    }
}

/// `{session_dir}/{collection}/{entity}.json`, hidden and temp files skipped.
fn collect_artifact_files(dir: &Path, collection: Option<&str>) -> Vec<(ArtifactPath, PathBuf)> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|entry| {
            let file = entry.path();
            let name = file.file_name()?.to_str()?;
            if name.starts_with('.') {
                return None;
            }
            let stem = name.strip_suffix(".json")?;
            let coll = file.parent()?.file_name()?.to_str()?;
            if collection.is_some_and(|c| c != coll) {
                return None;
            }
            match ArtifactPath::new(coll, stem) {
                Ok(p) => Some((p, file.to_path_buf())),
                Err(_) => {
                    warn!(file = %file.display(), "skipping artifact with invalid path");
                    None
                }
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// In-process store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    artifacts: DashMap<SessionId, BTreeMap<ArtifactPath, Value>>,
    transcripts: DashMap<SessionId, Vec<TranscriptEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(&self, session: &SessionId, artifact: &Artifact) -> Result<()> {
        self.artifacts
            .entry(session.clone())
            .or_default()
            .insert(artifact.path.clone(), artifact.payload.clone());
        Ok(())
    }

    async fn get(&self, session: &SessionId, path: &ArtifactPath) -> Result<Option<Artifact>> {
        Ok(self
            .artifacts
            .get(session)
            .and_then(|m| m.get(path).map(|v| Artifact::new(path.clone(), v.clone()))))
    }

    async fn list(&self, session: &SessionId, collection: Option<&str>) -> Result<Vec<Artifact>> {
        let Some(map) = self.artifacts.get(session) else {
            return Ok(Vec::new());
        };
        Ok(map
            .iter()
            .filter(|(p, _)| collection.map_or(true, |c| p.collection == c))
            .map(|(p, v)| Artifact::new(p.clone(), v.clone()))
            .collect())
    }

    async fn append_transcript(&self, session: &SessionId, entry: &TranscriptEntry) -> Result<()> {
        self.transcripts
            .entry(session.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn transcript(&self, session: &SessionId) -> Result<Vec<TranscriptEntry>> {
        Ok(self
            .transcripts
            .get(session)
            .map(|t| t.clone())
            .unwrap_or_default())
    }

    fn location(&self, session: &SessionId) -> String {
        format!("memory://{}", session)
    }
}
