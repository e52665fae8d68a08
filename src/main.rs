use itemflow::cli::{self, Args};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("itemflow=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("Starting itemflow {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cli::run(&args).await {
        error!("Command failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}
