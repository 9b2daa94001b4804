//! Frontera de persistencia: traits + implementación in-memory.

pub mod memory;
pub mod types;

pub use memory::{InMemoryArtifactStore, InMemoryJobStore};
pub use types::{ArtifactStore, JobFilter, JobOrder, JobStore};
