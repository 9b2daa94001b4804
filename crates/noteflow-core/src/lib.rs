//! noteflow-core: motor de ejecución reversible de jobs.
pub mod config;
pub mod constants;
pub mod context;
pub mod engine;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod model;
pub mod processor;
pub mod repo;

pub use config::PipelineConfig;
pub use context::{ApiCall, ApiReverter, ExecutionContext, ReverseAction, RollbackReport};
pub use engine::{Executor, Pipeline, PipelineBuilder, PipelineStats, RevertReport, Route, Router, StepOutcome};
pub use errors::{ConfigError, ContextError, EngineError, ProcessorError, StoreError};
pub use event::{EventBus, PipelineEvent, PipelineEventKind};
pub use model::{Artifact, ArtifactStatus, ArtifactType, Job, JobSource, JobStatus, RequiresInput, Reversibility, StepResult, StepStatus};
pub use processor::{Processor, ProcessorInfo, ProcessorRegistry, StepRunResult};
pub use repo::{ArtifactStore, InMemoryArtifactStore, InMemoryJobStore, JobFilter, JobOrder, JobStore};
