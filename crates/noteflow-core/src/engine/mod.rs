//! Motor: router (qué sigue), executor (un step) y pipeline (muchos jobs).

pub mod executor;
pub mod pipeline;
pub mod router;

pub use executor::{Executor, RevertReport, StepOutcome};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineStats};
pub use router::{Route, Router};
