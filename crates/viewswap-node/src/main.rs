//! ViewSwap node - engagement exchange behind an HTTP gateway adapter

use clap::Parser;
use tracing::{error, info};

use viewswap_logging::{FileConfig, SubscriberBuilder};
use viewswap_node::{Args, ViewSwapNode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let mut logging = SubscriberBuilder::new()
        .with_level(args.log_level.clone())
        .with_format(args.log_format);
    if let Some(dir) = &args.log_dir {
        logging = logging.with_file_output(FileConfig {
            directory: dir.clone(),
            ..FileConfig::default()
        });
    }
    let _log_guard = logging.init()?;

    let config = args.to_node_config();
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!(
        data_dir = %config.data_dir.display(),
        listen = %config.listen,
        mode = if config.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" },
        backup_dir = ?config.backup_dir,
        operators = config.engine.operator_ids.len(),
        "Starting ViewSwap node"
    );

    let node = ViewSwapNode::new(config).await?;
    node.start().await?;

    let listener = tokio::net::TcpListener::bind(node.config().listen).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, node.router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    node.stop().await?;
    Ok(())
}
