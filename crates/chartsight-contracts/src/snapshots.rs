use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MANIFEST_NAME: &str = "manifest.json";
const SCHEMA_VERSION: u64 = 1;

/// One stored dashboard snapshot and its analysis state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: u64,
    pub title: String,
    pub filename: String,
    pub created_at: String,
    #[serde(default)]
    pub ai_summary: String,
    /// True once an automatic analysis was attempted, success or not. Keeps
    /// failed snapshots from being re-analyzed on every page view.
    #[serde(default)]
    pub ai_analyzed: bool,
    #[serde(default)]
    pub ai_analysis_error: String,
}

impl SnapshotRecord {
    pub fn has_ai_summary(&self) -> bool {
        !self.ai_summary.trim().is_empty()
    }
}

/// Snapshot storage: image files plus a `manifest.json` beside them.
///
/// Original images are never mutated or deleted; the store only appends
/// files and rewrites the manifest.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    next_id: u64,
    records: Vec<SnapshotRecord>,
}

impl SnapshotStore {
    /// Open (or initialize) a store rooted at `root`. A missing or corrupt
    /// manifest starts the store empty rather than failing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create snapshots dir {}", root.display()))?;

        let mut store = Self {
            root,
            next_id: 1,
            records: Vec::new(),
        };
        let manifest = store.manifest_path();
        let Some(payload) = read_json_object(&manifest) else {
            return Ok(store);
        };

        if let Some(next_id) = payload.get("next_id").and_then(Value::as_u64) {
            store.next_id = next_id.max(1);
        }
        if let Some(rows) = payload.get("snapshots").and_then(Value::as_array) {
            for row in rows {
                if let Ok(record) = serde_json::from_value::<SnapshotRecord>(row.clone()) {
                    store.records.push(record);
                }
            }
        }
        // Guard against manifests written with a stale counter.
        let max_seen = store.records.iter().map(|record| record.id).max();
        if let Some(max_seen) = max_seen {
            store.next_id = store.next_id.max(max_seen + 1);
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_NAME)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Write the image bytes and append a record for them.
    pub fn create(
        &mut self,
        title: Option<String>,
        extension: &str,
        bytes: &[u8],
    ) -> Result<SnapshotRecord> {
        let stamp = Utc::now().timestamp_millis();
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        let filename = format!("snapshot_{}_{:02}.{}", stamp, self.next_id, extension);
        let path = self.root.join(&filename);
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;

        let record = SnapshotRecord {
            id: self.next_id,
            title: title.unwrap_or_else(|| format!("Dashboard Snapshot - {stamp}")),
            filename,
            created_at: now_utc_iso(),
            ai_summary: String::new(),
            ai_analyzed: false,
            ai_analysis_error: String::new(),
        };
        self.next_id += 1;
        self.records.push(record.clone());
        self.save()?;
        Ok(record)
    }

    pub fn get(&self, id: u64) -> Option<&SnapshotRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Most recently created snapshot. Ids are monotonic, so the max id wins.
    pub fn latest(&self) -> Option<&SnapshotRecord> {
        self.records.iter().max_by_key(|record| record.id)
    }

    /// All snapshots, newest first.
    pub fn list(&self) -> Vec<SnapshotRecord> {
        let mut rows = self.records.clone();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows
    }

    pub fn image_path(&self, record: &SnapshotRecord) -> PathBuf {
        self.root.join(&record.filename)
    }

    /// Record a successful analysis: summary set, analyzed flag on, error
    /// cleared.
    pub fn record_summary(&mut self, id: u64, summary: &str) -> Result<()> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.id == id)
            .with_context(|| format!("snapshot {id} not found"))?;
        record.ai_summary = summary.to_string();
        record.ai_analyzed = true;
        record.ai_analysis_error.clear();
        self.save()
    }

    /// Record a failed analysis attempt so it is not silently retried.
    pub fn record_failure(&mut self, id: u64, error: &str) -> Result<()> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.id == id)
            .with_context(|| format!("snapshot {id} not found"))?;
        record.ai_analyzed = true;
        record.ai_analysis_error = error.to_string();
        self.save()
    }

    fn save(&self) -> Result<()> {
        let mut payload = Map::new();
        payload.insert(
            "schema_version".to_string(),
            Value::Number(SCHEMA_VERSION.into()),
        );
        payload.insert("next_id".to_string(), Value::Number(self.next_id.into()));
        payload.insert(
            "snapshots".to_string(),
            serde_json::to_value(&self.records)?,
        );
        let manifest = self.manifest_path();
        fs::write(
            &manifest,
            serde_json::to_string_pretty(&Value::Object(payload))?,
        )
        .with_context(|| format!("failed to write {}", manifest.display()))?;
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
