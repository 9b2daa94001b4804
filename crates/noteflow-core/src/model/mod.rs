//! Modelo de datos del motor: jobs, steps y artifacts.

pub mod artifact;
pub mod enums;
pub mod job;
pub mod step;

pub use artifact::Artifact;
pub use enums::{ArtifactStatus, ArtifactType, JobStatus, RequiresInput, Reversibility, StepStatus};
pub use job::{Job, JobSource};
pub use step::StepResult;
