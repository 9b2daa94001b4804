//! Processors incluidos.

pub mod review_gate;
pub mod text_echo;
pub mod word_counter;

pub use review_gate::ReviewGate;
pub use text_echo::TextEcho;
pub use word_counter::WordCounter;

use serde_json::{Map, Value};

/// Quita de `job.data` las claves que aportó un step.
pub(crate) fn drop_keys(data: &mut Map<String, Value>, keys: &[&str]) {
    for k in keys {
        data.remove(*k);
    }
}
