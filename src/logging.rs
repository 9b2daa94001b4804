use tracing_subscriber::EnvFilter;

/// Inicializa el logging con `tracing-subscriber`; los registros del facade
/// `log` de las librerías también se capturan.
///
/// `RUST_LOG` manda si está definido; si no, se usa `default_level`.
pub fn init(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // try_init: en tests puede haber un subscriber ya instalado
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter)
                                     .with_target(false)
                                     .with_writer(std::io::stderr)
                                     .try_init();
}
