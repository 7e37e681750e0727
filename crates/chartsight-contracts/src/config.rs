use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llava";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 1024;

/// Connection and policy settings for the vision backend. Built once at
/// startup and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlmConfig {
    pub host: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_image_dimension: u32,
    /// Commodity pair used for correlation analysis when the caller does not
    /// name one explicitly.
    pub correlation_pair: (String, String),
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            correlation_pair: ("gold".to_string(), "oil".to_string()),
        }
    }
}

impl VlmConfig {
    /// Read `OLLAMA_HOST`, `OLLAMA_MODEL` and `OLLAMA_TIMEOUT` with the
    /// standard defaults. Unparseable timeouts fall back to the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(host) = non_empty_env("OLLAMA_HOST") {
            config.host = host;
        }
        if let Some(model) = non_empty_env("OLLAMA_MODEL") {
            config.model = model;
        }
        if let Some(timeout) = non_empty_env("OLLAMA_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                config.timeout_secs = secs;
            }
        }
        config
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where snapshot images and their manifest live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConfig {
    pub media_root: PathBuf,
}

impl MediaConfig {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
        }
    }

    /// `MEDIA_ROOT` env var, defaulting to `./media`.
    pub fn from_env() -> Self {
        let root = non_empty_env("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("media"));
        Self::new(root)
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.media_root.join("snapshots")
    }

    pub fn media_root(&self) -> &Path {
        self.media_root.as_path()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
