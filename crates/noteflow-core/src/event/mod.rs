//! Eventos del pipeline y bus de difusión.

pub mod bus;
pub mod types;

pub use bus::EventBus;
pub use types::{PipelineEvent, PipelineEventKind};
