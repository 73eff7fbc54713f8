//! Core pipeline worker: claims raw chat messages, filters and
//! deduplicates them, runs the summarizing oracle, scores and persists
//! items and bullets, and enqueues follow-up work.

pub mod bullet_dedup;
pub mod bullets;
pub mod dedup;
pub mod driver;
pub mod filter;
pub mod gate;
pub mod infra;
pub mod orchestrator;
pub mod scoring;
pub mod settings;
pub mod testing;
pub mod traits;

pub use driver::PipelineWorker;
pub use settings::PipelineSettings;
pub use traits::Storage;

use briefwire_common::{RawMessage, ResolvedLink};

/// A raw message that survived filtering, carrying everything later
/// stages need. Allocated per batch; no cross-batch memory.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub message: RawMessage,
    /// Footer-stripped text used for all downstream processing.
    pub text: String,
    /// Preview pulled from the media payload, if any.
    pub preview: Option<String>,
    /// Recent same-channel messages preceding this one, oldest first.
    pub context: Vec<String>,
    pub links: Vec<ResolvedLink>,
    /// Empty when embeddings are unavailable; disables semantic checks.
    pub embedding: Vec<f32>,
}
