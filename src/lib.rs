//! noteflow: cableado de la aplicación sobre el motor.
//!
//! - `app`: arma el `Pipeline` con stores en disco y processors incluidos.
//! - `cli`: comandos de la línea de órdenes.
//! - `errors`: error de nivel aplicación.
//! - `logging`: inicialización de `tracing-subscriber`.

pub mod app;
pub mod cli;
pub mod errors;
pub mod logging;

pub use app::{build_pipeline, AppConfig};
pub use errors::AppError;
