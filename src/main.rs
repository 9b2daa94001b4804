use noteflow::cli::{self, Command};
use noteflow::{build_pipeline, logging, AppConfig, AppError};

async fn run(args: &[String]) -> Result<serde_json::Value, AppError> {
    let cmd = Command::parse(args)?;
    let cfg = AppConfig::from_env()?;
    let pipeline = build_pipeline(&cfg)?;
    cli::execute(&pipeline, cmd).await
}

#[tokio::main]
async fn main() {
    // .env antes de leer RUST_LOG
    let _ = dotenvy::dotenv();
    logging::init("info");
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args).await {
        Ok(out) => match serde_json::to_string_pretty(&out) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("[noteflow] {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("[noteflow] {e}");
            std::process::exit(e.exit_code());
        }
    }
}
