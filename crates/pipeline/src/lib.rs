//! Async multi-stage channel pipeline (C9) with parallel fan-out stages,
//! optional order preservation, a plugin/storage registry, and the
//! composable block modifiers (C10) that wrap a stage's transform.

mod envelope;
mod modifiers;
mod pipeline;
mod storage;

pub use envelope::Envelope;
pub use modifiers::Modifier;
pub use pipeline::{BlockOptions, ChannelPipeline, Transform};
pub use storage::{InMemoryStorage, PipelineId, Storage};
