use std::path::{Path, PathBuf};

use chartsight_contracts::config::VlmConfig;
use chartsight_contracts::events::{EventPayload, EventWriter};
use chartsight_contracts::market::{CsvStore, MarketContext};
use chartsight_contracts::snapshots::{SnapshotRecord, SnapshotStore};
use chartsight_contracts::vlm::{AnalysisKind, FailureKind, VlmFailure, VlmResult};
use serde_json::{json, Value};

use crate::client::{Availability, VisionBackend};
use crate::imaging::ImagePreparer;
use crate::prompts;

/// Source of tabular context for prompt enrichment.
pub trait ContextProvider {
    fn market_context(&self) -> Option<MarketContext>;
}

impl ContextProvider for CsvStore {
    fn market_context(&self) -> Option<MarketContext> {
        self.context()
    }
}

/// Provider for callers with no tabular data; prompts skip the context block.
pub struct NoContext;

impl ContextProvider for NoContext {
    fn market_context(&self) -> Option<MarketContext> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    /// The snapshot the operation resolved to, when resolution got that far.
    pub snapshot_id: Option<u64>,
    pub result: VlmResult,
}

/// Sequences snapshot resolution, image preparation, prompt construction and
/// the backend call. Holds no cross-invocation state beyond its stores; every
/// operation is total and failures never retry automatically — regeneration
/// is a caller-invoked action.
pub struct Pipeline {
    store: SnapshotStore,
    preparer: ImagePreparer,
    backend: Box<dyn VisionBackend>,
    context: Box<dyn ContextProvider>,
    events: Option<EventWriter>,
    max_image_dimension: u32,
    correlation_pair: (String, String),
}

impl Pipeline {
    pub fn new(
        store: SnapshotStore,
        preparer: ImagePreparer,
        backend: Box<dyn VisionBackend>,
        context: Box<dyn ContextProvider>,
        config: &VlmConfig,
    ) -> Self {
        Self {
            store,
            preparer,
            backend,
            context,
            events: None,
            max_image_dimension: config.max_image_dimension,
            correlation_pair: config.correlation_pair.clone(),
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn status(&self) -> Availability {
        self.backend.availability()
    }

    /// Answer a free-form question about a snapshot (the latest one unless a
    /// specific id is given), enriched with tabular context when available.
    pub fn chat(&self, question: &str, snapshot_id: Option<u64>) -> PipelineOutcome {
        let question = question.trim();
        if question.is_empty() {
            return self.failure_outcome(
                None,
                VlmFailure::new(FailureKind::MalformedRequest, "Please provide a question"),
            );
        }

        let (id, image) = match self.resolve(snapshot_id) {
            Ok(resolved) => resolved,
            Err((resolved_id, failure)) => return self.failure_outcome(resolved_id, failure),
        };
        let prepared = match self.prepare(&image) {
            Ok(path) => path,
            Err(failure) => return self.failure_outcome(Some(id), failure),
        };

        let context = self.context.market_context();
        self.emit(
            "vlm_request",
            json!({ "operation": "chat", "snapshot_id": id }),
        );
        let result = self.backend.chat(question, &prepared, context.as_ref());
        self.finish(Some(id), result)
    }

    /// Run a structured analysis of a snapshot. A successful analysis
    /// backfills the snapshot's summary field if it was still empty.
    pub fn analyze(
        &mut self,
        snapshot_id: Option<u64>,
        kind: AnalysisKind,
        pair: Option<(String, String)>,
    ) -> PipelineOutcome {
        let (id, image) = match self.resolve(snapshot_id) {
            Ok(resolved) => resolved,
            Err((resolved_id, failure)) => return self.failure_outcome(resolved_id, failure),
        };
        let prepared = match self.prepare(&image) {
            Ok(path) => path,
            Err(failure) => return self.failure_outcome(Some(id), failure),
        };

        let pair = pair.unwrap_or_else(|| self.correlation_pair.clone());
        let prompt = prompts::analysis_prompt(kind, (&pair.0, &pair.1));
        self.emit(
            "vlm_request",
            json!({ "operation": kind.as_str(), "snapshot_id": id }),
        );
        let result =
            self.backend
                .analyze_image(&prepared, &prompt, Some(prompts::FINANCIAL_ANALYST_SYSTEM));

        let needs_backfill = self
            .store
            .get(id)
            .map(|record| !record.has_ai_summary())
            .unwrap_or(false);
        if result.success && needs_backfill {
            let text = result.response.clone().unwrap_or_default();
            self.persist_summary(id, &text);
        }
        self.finish(Some(id), result)
    }

    /// Generate and persist the automatic summary for a just-saved snapshot.
    /// Failures are recorded on the snapshot so they are not silently
    /// retried on every page view.
    pub fn summarize_on_save(&mut self, snapshot_id: u64) -> PipelineOutcome {
        let (id, image) = match self.resolve(Some(snapshot_id)) {
            Ok(resolved) => resolved,
            Err((resolved_id, failure)) => {
                if let Some(id) = resolved_id {
                    self.persist_failure(id, &failure.message);
                }
                return self.failure_outcome(resolved_id, failure);
            }
        };
        let prepared = match self.prepare(&image) {
            Ok(path) => path,
            Err(failure) => {
                self.persist_failure(id, &failure.message);
                return self.failure_outcome(Some(id), failure);
            }
        };

        self.emit(
            "vlm_request",
            json!({ "operation": "summary", "snapshot_id": id }),
        );
        let result = self.backend.generate_snapshot_summary(&prepared);
        if result.success {
            let text = result.response.clone().unwrap_or_default();
            self.persist_summary(id, &text);
        } else {
            let message = result
                .error_message()
                .unwrap_or("Unknown error")
                .to_string();
            self.persist_failure(id, &message);
        }
        self.finish(Some(id), result)
    }

    /// Caller-invoked retry of the automatic summary, for snapshots saved
    /// while the backend was down.
    pub fn regenerate_summary(&mut self, snapshot_id: u64) -> PipelineOutcome {
        self.summarize_on_save(snapshot_id)
    }

    /// Store a new snapshot image and, unless suppressed, summarize it. The
    /// summary outcome never fails the save itself.
    pub fn save_snapshot(
        &mut self,
        title: Option<String>,
        extension: &str,
        bytes: &[u8],
        generate_summary: bool,
    ) -> anyhow::Result<(SnapshotRecord, Option<PipelineOutcome>)> {
        let record = self.store.create(title, extension, bytes)?;
        self.emit(
            "snapshot_saved",
            json!({ "snapshot_id": record.id, "filename": record.filename }),
        );

        let outcome = if generate_summary {
            Some(self.summarize_on_save(record.id))
        } else {
            None
        };
        let record = self.store.get(record.id).cloned().unwrap_or(record);
        Ok((record, outcome))
    }

    /// RESOLVE_SNAPSHOT and VALIDATE_IMAGE. `AssetMissing` still reports the
    /// id it resolved; `NotFound` has none.
    fn resolve(&self, snapshot_id: Option<u64>) -> Result<(u64, PathBuf), (Option<u64>, VlmFailure)> {
        let record = match snapshot_id {
            Some(id) => self.store.get(id).ok_or_else(|| {
                (
                    None,
                    VlmFailure::new(FailureKind::NotFound, format!("Snapshot {id} not found")),
                )
            })?,
            None => self.store.latest().ok_or_else(|| {
                (
                    None,
                    VlmFailure::new(
                        FailureKind::NotFound,
                        "No snapshots available. Save a dashboard snapshot first.",
                    ),
                )
            })?,
        };

        let path = self.store.image_path(record);
        if !path.exists() {
            return Err((
                Some(record.id),
                VlmFailure::new(FailureKind::AssetMissing, "Snapshot image not found on disk"),
            ));
        }
        Ok((record.id, path))
    }

    fn prepare(&self, image: &Path) -> Result<PathBuf, VlmFailure> {
        match self.preparer.prepare_for_model(image, self.max_image_dimension) {
            Ok(prepared) => Ok(prepared.path),
            Err(reason) => Err(VlmFailure::new(FailureKind::InvalidImage, reason)),
        }
    }

    fn persist_summary(&mut self, id: u64, text: &str) {
        match self.store.record_summary(id, text) {
            Ok(()) => self.emit("summary_recorded", json!({ "snapshot_id": id })),
            Err(err) => self.emit(
                "store_error",
                json!({ "snapshot_id": id, "error": err.to_string() }),
            ),
        }
    }

    fn persist_failure(&mut self, id: u64, message: &str) {
        match self.store.record_failure(id, message) {
            Ok(()) => self.emit(
                "summary_failed",
                json!({ "snapshot_id": id, "error": message }),
            ),
            Err(err) => self.emit(
                "store_error",
                json!({ "snapshot_id": id, "error": err.to_string() }),
            ),
        }
    }

    fn failure_outcome(&self, snapshot_id: Option<u64>, failure: VlmFailure) -> PipelineOutcome {
        self.finish(snapshot_id, VlmResult::failed(self.backend.model(), failure))
    }

    fn finish(&self, snapshot_id: Option<u64>, result: VlmResult) -> PipelineOutcome {
        match &result.failure {
            None => self.emit(
                "vlm_response",
                json!({
                    "snapshot_id": snapshot_id,
                    "model": result.model,
                    "eval_count": result.usage.eval_count,
                }),
            ),
            Some(failure) => self.emit(
                "vlm_failure",
                json!({
                    "snapshot_id": snapshot_id,
                    "kind": failure.kind.as_str(),
                    "message": failure.message,
                }),
            ),
        }
        PipelineOutcome {
            snapshot_id,
            result,
        }
    }

    fn emit(&self, event_type: &str, payload: Value) {
        if let Some(events) = &self.events {
            let _ = events.emit(event_type, map_object(payload));
        }
    }
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}
