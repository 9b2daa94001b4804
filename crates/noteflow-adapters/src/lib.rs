//! noteflow-adapters: processors incluidos con el motor.
//!
//! - `text_echo`: copia una fuente de texto al directorio de salida con un
//!   encabezado.
//! - `word_counter`: estadísticas de la copia (archivo `.stats.json`) y marca
//!   " [counted]" al final.
//! - `review_gate`: aprobación humana opcional (`config.review = true`).
//!
//! Todo efecto lateral pasa por el `ExecutionContext`, así que un revert del
//! job deja el disco como estaba.

pub mod config;
pub mod processors;

use std::sync::Arc;

use noteflow_core::Processor;

pub use config::AdaptersConfig;
pub use processors::{ReviewGate, TextEcho, WordCounter};

/// Lista de processors incluidos, en orden de registro.
pub fn builtin_processors(config: &AdaptersConfig) -> Vec<Arc<dyn Processor>> {
    vec![Arc::new(TextEcho::new(config.clone())),
         Arc::new(WordCounter::new()),
         Arc::new(ReviewGate::new())]
}
