use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use event_router::config::RouterConfig;
use event_router::metrics::{self, LogReceiver, PrometheusReceiver, Receiver};
use event_router::processor::{self, ProcessorOptions};
use event_router::provider;
use event_router::logging;

#[derive(Parser)]
#[command(name = "event_router")]
#[command(about = "Streams vSphere events as CloudEvents to a downstream processor")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the router configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable debug logging and log every backend request
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let config = RouterConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let receiver: Arc<dyn Receiver> = match &config.metrics.bind_address {
        Some(addr) => {
            let addr = addr.parse().context("parsing metrics.bind_address")?;
            metrics::init_metrics(addr)?;
            Arc::new(PrometheusReceiver)
        }
        None => Arc::new(LogReceiver),
    };
    let push_interval = Duration::from_secs(config.metrics.push_interval_secs);

    let ctx = CancellationToken::new();
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received interrupt, shutting down");
            }
            ctx.cancel();
        });
    }

    let options = ProcessorOptions::default()
        .verbose(cli.verbose)
        .push_interval(push_interval);
    let processor = processor::from_config(&ctx, &config.processor, receiver.clone(), options)
        .await
        .context("creating processor")?;
    let provider = provider::from_config(&config.provider, push_interval).context("creating provider")?;

    let metrics_task = {
        let provider = provider.clone();
        let receiver = receiver.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { provider.push_metrics(&ctx, receiver).await })
    };

    info!("event router started");
    let result = provider.stream(&ctx, processor.as_ref()).await;

    ctx.cancel();
    let _ = metrics_task.await;
    if let Err(e) = provider.shutdown(&CancellationToken::new()).await {
        error!(error = %e, "could not shut down provider");
    }

    result.context("streaming events")?;
    info!("event router stopped");
    Ok(())
}
