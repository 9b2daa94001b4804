//! Configuración del pipeline desde variables de entorno.
//!
//! Variables (todas opcionales):
//! - `NOTEFLOW_MAX_CONCURRENT` (default 3, >= 1)
//! - `NOTEFLOW_POLL_INTERVAL_MS` (default 1000)
//! - `NOTEFLOW_MAX_STEP_RETRIES` (default 0)
//! - `NOTEFLOW_STEP_TIMEOUT_MS` (sin definir = sin timeout)
//! - `NOTEFLOW_EVENT_CAPACITY` (default 256)
use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::constants::{DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_CONCURRENT, DEFAULT_POLL_INTERVAL_MS};
use crate::errors::ConfigError;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    /// Reintentos de un step fallido antes de dar el job por fallido.
    pub max_step_retries: u32,
    /// Un step que excede el timeout se trata como falla de `process`.
    pub step_timeout: Option<Duration>,
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_concurrent: DEFAULT_MAX_CONCURRENT,
               poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
               max_step_retries: 0,
               step_timeout: None,
               event_capacity: DEFAULT_EVENT_CAPACITY }
    }
}

impl PipelineConfig {
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        init_dotenv();
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables inyectable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let max_concurrent = parse_var(&lookup, "NOTEFLOW_MAX_CONCURRENT")?.unwrap_or(d.max_concurrent);
        if max_concurrent == 0 {
            return Err(ConfigError::InvalidValue { key: "NOTEFLOW_MAX_CONCURRENT".into(),
                                                   value: "0".into() });
        }
        let poll_interval = parse_var::<u64>(&lookup, "NOTEFLOW_POLL_INTERVAL_MS")?.map(Duration::from_millis)
                                                                                  .unwrap_or(d.poll_interval);
        let max_step_retries = parse_var(&lookup, "NOTEFLOW_MAX_STEP_RETRIES")?.unwrap_or(d.max_step_retries);
        let step_timeout = parse_var::<u64>(&lookup, "NOTEFLOW_STEP_TIMEOUT_MS")?.map(Duration::from_millis);
        let event_capacity = parse_var(&lookup, "NOTEFLOW_EVENT_CAPACITY")?.unwrap_or(d.event_capacity);
        Ok(Self { max_concurrent,
                  poll_interval,
                  max_step_retries,
                  step_timeout,
                  event_capacity })
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim()
                        .parse()
                        .map(Some)
                        .map_err(|_| ConfigError::InvalidValue { key: key.to_string(),
                                                                 value: raw }),
    }
}
