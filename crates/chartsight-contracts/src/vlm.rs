use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a pipeline operation failed. Callers branch on the kind; the message
/// stays human-readable and actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Requested snapshot id does not exist, or no snapshots exist at all.
    NotFound,
    /// Snapshot record exists but its image file is gone from storage.
    AssetMissing,
    /// Image failed format, size, or dimension validation.
    InvalidImage,
    /// Backend unreachable, refused the connection, or the configured model
    /// is not installed.
    BackendUnavailable,
    /// Request exceeded the configured timeout.
    TransportTimeout,
    /// Other network-level failure, e.g. connection dropped mid-request.
    TransportError,
    /// Backend reachable but returned a non-200 status or an empty result.
    BackendError,
    /// Caller input could not be used, e.g. an empty question.
    MalformedRequest,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::AssetMissing => "asset_missing",
            FailureKind::InvalidImage => "invalid_image",
            FailureKind::BackendUnavailable => "backend_unavailable",
            FailureKind::TransportTimeout => "transport_timeout",
            FailureKind::TransportError => "transport_error",
            FailureKind::BackendError => "backend_error",
            FailureKind::MalformedRequest => "malformed_request",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlmFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl VlmFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(kind: FailureKind, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: Some(status_code),
        }
    }
}

impl fmt::Display for VlmFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} ({code}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Token and wall-clock accounting reported by the backend. Both fields
/// default to zero when the backend omits them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlmUsage {
    pub eval_count: u64,
    pub total_duration_ns: u64,
}

/// Outcome of one generation call. Exactly one of `response` and `failure`
/// is populated; the constructors are the only way these are built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VlmResult {
    pub success: bool,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<VlmFailure>,
    #[serde(default)]
    pub usage: VlmUsage,
}

impl VlmResult {
    pub fn completed(model: impl Into<String>, response: impl Into<String>, usage: VlmUsage) -> Self {
        Self {
            success: true,
            model: model.into(),
            response: Some(response.into()),
            failure: None,
            usage,
        }
    }

    pub fn failed(model: impl Into<String>, failure: VlmFailure) -> Self {
        Self {
            success: false,
            model: model.into(),
            response: None,
            failure: Some(failure),
            usage: VlmUsage::default(),
        }
    }

    pub fn kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|failure| failure.kind)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.failure.as_ref().map(|failure| failure.message.as_str())
    }
}

/// The analysis flavors a caller can request for a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    #[default]
    Full,
    Trends,
    Correlation,
    Volatility,
    Summary,
}

impl AnalysisKind {
    /// Unknown values fall back to the full analysis, matching the caller
    /// contract for unspecified kinds.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "trends" => AnalysisKind::Trends,
            "correlation" => AnalysisKind::Correlation,
            "volatility" => AnalysisKind::Volatility,
            "summary" => AnalysisKind::Summary,
            _ => AnalysisKind::Full,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Full => "full",
            AnalysisKind::Trends => "trends",
            AnalysisKind::Correlation => "correlation",
            AnalysisKind::Volatility => "volatility",
            AnalysisKind::Summary => "summary",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AnalysisKind, FailureKind, VlmFailure, VlmResult, VlmUsage};

    #[test]
    fn completed_result_has_response_and_no_failure() {
        let result = VlmResult::completed(
            "llava",
            "Gold is trending upward.",
            VlmUsage {
                eval_count: 42,
                total_duration_ns: 1_000,
            },
        );
        assert!(result.success);
        assert_eq!(result.response.as_deref(), Some("Gold is trending upward."));
        assert!(result.failure.is_none());
        assert_eq!(result.usage.eval_count, 42);
    }

    #[test]
    fn failed_result_has_failure_and_no_response() {
        let result = VlmResult::failed(
            "llava",
            VlmFailure::with_status(FailureKind::BackendError, "model exploded", 500),
        );
        assert!(!result.success);
        assert!(result.response.is_none());
        assert_eq!(result.kind(), Some(FailureKind::BackendError));
        assert_eq!(result.error_message(), Some("model exploded"));
        assert_eq!(result.usage, VlmUsage::default());
    }

    #[test]
    fn result_serializes_without_empty_sides() {
        let ok = serde_json::to_value(VlmResult::completed("llava", "fine", VlmUsage::default()))
            .unwrap_or_default();
        assert_eq!(ok["success"], json!(true));
        assert!(ok.get("failure").is_none());

        let err = serde_json::to_value(VlmResult::failed(
            "llava",
            VlmFailure::new(FailureKind::NotFound, "Snapshot 7 not found"),
        ))
        .unwrap_or_default();
        assert!(err.get("response").is_none());
        assert_eq!(err["failure"]["kind"], json!("not_found"));
    }

    #[test]
    fn analysis_kind_parses_known_values_and_falls_back() {
        assert_eq!(AnalysisKind::parse("trends"), AnalysisKind::Trends);
        assert_eq!(AnalysisKind::parse(" Correlation "), AnalysisKind::Correlation);
        assert_eq!(AnalysisKind::parse("volatility"), AnalysisKind::Volatility);
        assert_eq!(AnalysisKind::parse("summary"), AnalysisKind::Summary);
        assert_eq!(AnalysisKind::parse("full"), AnalysisKind::Full);
        assert_eq!(AnalysisKind::parse("nonsense"), AnalysisKind::Full);
    }

    #[test]
    fn failure_display_includes_status_code_when_present() {
        let failure = VlmFailure::with_status(FailureKind::BackendError, "boom", 502);
        assert_eq!(failure.to_string(), "backend_error (502): boom");
        let plain = VlmFailure::new(FailureKind::TransportTimeout, "timed out");
        assert_eq!(plain.to_string(), "transport_timeout: timed out");
    }
}
