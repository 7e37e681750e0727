//! The visual-time-series reasoning pipeline: snapshot image preparation,
//! prompt construction, the Ollama vision client, and the orchestrator that
//! ties them together.

pub mod client;
pub mod imaging;
pub mod pipeline;
pub mod prompts;

pub use client::{Availability, OllamaClient, VisionBackend};
pub use imaging::{ImageCheck, ImageCodec, ImagePreparer, PassthroughCodec, PreparedImage, RasterCodec};
pub use pipeline::{ContextProvider, NoContext, Pipeline, PipelineOutcome};
