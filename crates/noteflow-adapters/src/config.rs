//! Configuración de los processors incluidos desde variables de entorno.

use std::env;
use std::path::PathBuf;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

pub const DEFAULT_OUTPUT_DIR: &str = "./output";
pub const DEFAULT_OUTPUT_PREFIX: &str = "processed_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptersConfig {
    /// Directorio donde `text_echo` deja sus copias. Un job puede
    /// sobreescribirlo con `config.output_dir`.
    pub output_dir: PathBuf,
    pub prefix: String,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self { output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
               prefix: DEFAULT_OUTPUT_PREFIX.to_string() }
    }
}

impl AdaptersConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into(),
               ..Self::default() }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// `NOTEFLOW_OUTPUT_DIR` y `NOTEFLOW_OUTPUT_PREFIX`.
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let output_dir = lookup("NOTEFLOW_OUTPUT_DIR").filter(|v| !v.trim().is_empty())
                                                      .map(PathBuf::from)
                                                      .unwrap_or(defaults.output_dir);
        let prefix = lookup("NOTEFLOW_OUTPUT_PREFIX").unwrap_or(defaults.prefix);
        Self { output_dir, prefix }
    }
}
