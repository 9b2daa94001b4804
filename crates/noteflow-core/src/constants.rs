//! Constantes del motor core.
//!
//! Valores estáticos compartidos por el modelo, el executor y la
//! configuración. Cambiar `USER_INPUT_KEY` rompe a los processors que leen el
//! input del usuario desde `job.data`.

/// Versión lógica del motor. Se persiste en `PipelineStats` para que la capa
/// de transporte pueda reportarla.
pub const ENGINE_VERSION: &str = "N1.0";

/// Clave de `job.data` donde se deja el último input entregado al reanudar.
pub const USER_INPUT_KEY: &str = "user_input";

/// Clave de `output_data` donde un step omitido deja el motivo.
pub const SKIP_REASON_KEY: &str = "skip_reason";

/// Prefijo del StepResult sintético que agrupa artifacts compensatorios
/// creados durante `revert()`.
pub const REVERT_STEP_PREFIX: &str = "revert:";

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
