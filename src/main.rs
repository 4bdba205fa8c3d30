use clap::Parser;
use storefront::{
    CliArgs, LoggingConfig, ServerConfig, init_logging, run_server, shutdown_telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging_config = LoggingConfig::from_env();
    let _guard = init_logging(logging_config)?;

    let cli = CliArgs::parse();
    let config = ServerConfig::from_args(cli)?;

    // fail fast before binding anything
    config.validate()?;

    let result = run_server(config).await;

    // flush spans before exit
    shutdown_telemetry();

    result
}
