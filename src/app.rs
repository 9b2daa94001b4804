//! Construcción del pipeline de la aplicación a partir del entorno.
use std::sync::Arc;

use log::info;
use noteflow_adapters::{builtin_processors, AdaptersConfig};
use noteflow_core::{Pipeline, PipelineConfig, ProcessorRegistry};
use noteflow_persistence::{FileArtifactStore, FileJobStore, StoreConfig};

use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub adapters: AdaptersConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        noteflow_persistence::init_dotenv();
        Ok(Self { pipeline: PipelineConfig::from_env()?,
                  store: StoreConfig::from_env(),
                  adapters: AdaptersConfig::from_env() })
    }

    /// Todo bajo un mismo directorio raíz: `data/` para stores y `output/`
    /// para los archivos generados.
    pub fn rooted_at(root: &std::path::Path) -> Self {
        Self { pipeline: PipelineConfig::default(),
               store: StoreConfig::new(root.join("data")),
               adapters: AdaptersConfig::new(root.join("output")) }
    }
}

/// Pipeline con stores en disco y los processors incluidos.
pub fn build_pipeline(cfg: &AppConfig) -> Result<Pipeline, AppError> {
    let registry = ProcessorRegistry::from_processors(builtin_processors(&cfg.adapters))?;
    info!("loaded {} processor(s); data dir {}", registry.len(), cfg.store.data_dir.display());
    Ok(Pipeline::builder(registry).job_store(Arc::new(FileJobStore::from_config(&cfg.store)))
                                  .artifact_store(Arc::new(FileArtifactStore::from_config(&cfg.store)))
                                  .config(cfg.pipeline.clone())
                                  .build())
}
