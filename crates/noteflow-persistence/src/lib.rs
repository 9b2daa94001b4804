//! noteflow-persistence
//!
//! Implementaciones en disco (JSON) de `JobStore` y `ArtifactStore`.
//!
//! Módulos:
//! - `fs`: stores sobre el sistema de archivos, un documento por job.
//! - `config`: carga de configuración desde .env.
//! - `error`: errores propios y su conversión a `StoreError`.

pub mod config;
pub mod error;
pub mod fs;

pub use config::{init_dotenv, StoreConfig};
pub use error::PersistenceError;
pub use fs::{FileArtifactStore, FileJobStore};
