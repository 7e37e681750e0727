use std::fs;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chartsight_contracts::config::VlmConfig;
use chartsight_contracts::market::MarketContext;
use chartsight_contracts::vlm::{FailureKind, VlmFailure, VlmResult, VlmUsage};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::prompts;

// Generation policy: biased toward focused, low-randomness descriptive
// output. Not caller-tunable.
pub const GENERATION_TEMPERATURE: f64 = 0.7;
pub const GENERATION_TOP_P: f64 = 0.9;
pub const GENERATION_MAX_TOKENS: u64 = 1024;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub message: String,
}

/// The orchestrator's seam to the vision model. `chat` and
/// `generate_snapshot_summary` are prompt composition over `analyze_image`,
/// so implementations (and mocks) only supply the two core methods.
pub trait VisionBackend: Send + Sync {
    fn model(&self) -> &str;

    fn availability(&self) -> Availability;

    fn analyze_image(&self, image: &Path, prompt: &str, system_prompt: Option<&str>) -> VlmResult;

    fn chat(&self, question: &str, image: &Path, context: Option<&MarketContext>) -> VlmResult {
        let prompt = prompts::build_chat_prompt(question, context);
        self.analyze_image(image, &prompt, Some(prompts::FINANCIAL_ANALYST_SYSTEM))
    }

    fn generate_snapshot_summary(&self, image: &Path) -> VlmResult {
        self.analyze_image(
            image,
            prompts::SNAPSHOT_SUMMARY_PROMPT,
            Some(prompts::FINANCIAL_ANALYST_SYSTEM),
        )
    }
}

/// Client for a local Ollama server running a vision model. Holds only
/// connection configuration; every call is one synchronous request/response,
/// so concurrent use is safe.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    host: String,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

impl OllamaClient {
    pub fn new(config: &VlmConfig) -> Self {
        Self {
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.timeout(),
            http: HttpClient::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn tags_endpoint(&self) -> String {
        format!("{}/api/tags", self.host)
    }

    fn generate_endpoint(&self) -> String {
        format!("{}/api/generate", self.host)
    }

    /// Raw file bytes as standard base64, or `None` when unreadable.
    pub fn encode_image(&self, path: &Path) -> Option<String> {
        let bytes = fs::read(path).ok()?;
        Some(BASE64.encode(bytes))
    }

    fn failed(&self, failure: VlmFailure) -> VlmResult {
        VlmResult::failed(&self.model, failure)
    }
}

impl VisionBackend for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    /// Short probe of the model-listing endpoint. Checks both that the
    /// server answers and that the configured model (bare, `:latest`, or a
    /// tagged variant) is installed.
    fn availability(&self) -> Availability {
        let response = self
            .http
            .get(self.tags_endpoint())
            .timeout(PROBE_TIMEOUT)
            .send();
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return Availability {
                    available: false,
                    message: probe_error_message(&err),
                }
            }
        };

        let status = response.status();
        if status.as_u16() != 200 {
            return Availability {
                available: false,
                message: format!("Ollama server returned status {}", status.as_u16()),
            };
        }

        let payload: Value = match response.json() {
            Ok(payload) => payload,
            Err(_) => {
                return Availability {
                    available: false,
                    message: "Ollama returned an unreadable model list".to_string(),
                }
            }
        };

        let mut bare_names: Vec<String> = Vec::new();
        let mut full_names: Vec<String> = Vec::new();
        if let Some(models) = payload.get("models").and_then(Value::as_array) {
            for row in models {
                if let Some(name) = row.get("name").and_then(Value::as_str) {
                    full_names.push(name.to_string());
                    bare_names.push(name.split(':').next().unwrap_or(name).to_string());
                }
            }
        }

        let latest = format!("{}:latest", self.model);
        let base = self.model.split(':').next().unwrap_or(&self.model);
        let present = bare_names.iter().any(|name| name == &self.model)
            || full_names.iter().any(|name| name == &latest)
            || bare_names.iter().any(|name| name.contains(base));
        if !present {
            return Availability {
                available: false,
                message: format!(
                    "Model '{}' not found. Available: {:?}",
                    self.model, bare_names
                ),
            };
        }

        Availability {
            available: true,
            message: "Ollama is running and model is available".to_string(),
        }
    }

    /// The core request/response cycle: probe, encode, compose, one
    /// non-streaming generation call. Every transport or service fault comes
    /// back as a failed `VlmResult`, never a panic or error.
    fn analyze_image(&self, image: &Path, prompt: &str, system_prompt: Option<&str>) -> VlmResult {
        // Never fire the expensive generation call at a backend known to be
        // down.
        let availability = self.availability();
        if !availability.available {
            return self.failed(VlmFailure::new(
                FailureKind::BackendUnavailable,
                availability.message,
            ));
        }

        let Some(encoded) = self.encode_image(image) else {
            return self.failed(VlmFailure::new(
                FailureKind::AssetMissing,
                format!("Failed to load image: {}", image.display()),
            ));
        };

        let full_prompt = match system_prompt {
            Some(system_prompt) => format!("{system_prompt}\n\n{prompt}"),
            None => prompt.to_string(),
        };

        let payload = json!({
            "model": self.model,
            "prompt": full_prompt,
            "images": [encoded],
            "stream": false,
            "options": {
                "temperature": GENERATION_TEMPERATURE,
                "top_p": GENERATION_TOP_P,
                "num_predict": GENERATION_MAX_TOKENS,
            },
        });

        let response = self
            .http
            .post(self.generate_endpoint())
            .json(&payload)
            .timeout(self.timeout)
            .send();
        let response = match response {
            Ok(response) => response,
            Err(err) => return self.failed(transport_failure(&err, self.timeout)),
        };

        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        if code != 200 {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|parsed| {
                    parsed
                        .get("error")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("Ollama returned status {code}"));
            return self.failed(VlmFailure::with_status(
                FailureKind::BackendError,
                message,
                code,
            ));
        }

        let parsed: Value = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) => {
                return self.failed(VlmFailure::with_status(
                    FailureKind::BackendError,
                    "Ollama returned an invalid JSON response",
                    code,
                ))
            }
        };

        let text = parsed
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return self.failed(VlmFailure::new(
                FailureKind::BackendError,
                "Empty response from Ollama",
            ));
        }

        let usage = VlmUsage {
            eval_count: parsed.get("eval_count").and_then(Value::as_u64).unwrap_or(0),
            total_duration_ns: parsed
                .get("total_duration")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        };
        VlmResult::completed(&self.model, text.trim(), usage)
    }
}

fn probe_error_message(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "Ollama server timeout".to_string()
    } else if err.is_connect() {
        "Cannot connect to Ollama. Is it running? Start with: ollama serve".to_string()
    } else {
        format!("Error checking Ollama: {err}")
    }
}

fn transport_failure(err: &reqwest::Error, timeout: Duration) -> VlmFailure {
    if err.is_timeout() {
        VlmFailure::new(
            FailureKind::TransportTimeout,
            format!(
                "Request timed out after {}s. Try a simpler question.",
                timeout.as_secs()
            ),
        )
    } else if err.is_connect() {
        VlmFailure::new(
            FailureKind::TransportError,
            "Lost connection to Ollama. Is it still running?",
        )
    } else {
        VlmFailure::new(
            FailureKind::TransportError,
            format!("Request to Ollama failed: {err}"),
        )
    }
}
