use dashpi_agent::config::{AgentConfig, ConfigError};
use dashpi_agent::server;
use dashpi_agent::state::AppState;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match AgentConfig::from_env_and_args() {
        Ok(c) => c,
        Err(ConfigError::Help(usage)) => {
            println!("{usage}");
            return Ok(());
        }
        Err(e) => {
            eprintln!("dashpi_agent: {e}");
            std::process::exit(2);
        }
    };

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = server::serve(AppState::for_host(config)).await {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}
