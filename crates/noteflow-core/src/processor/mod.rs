//! Contrato de processors y su registry.

pub mod definition;
pub mod registry;
pub mod run_result;

pub use definition::{Processor, ProcessorInfo};
pub use registry::ProcessorRegistry;
pub use run_result::StepRunResult;
