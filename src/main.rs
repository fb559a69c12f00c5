use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use venuelink::{
    cli::Args, config::Config, events::LinkEvent, manager::ConnectionManager,
    monitoring::setup_metrics, tracing_setup::setup_tracing,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_tracing(&args.log_level, args.json_logs)?;
    info!("Starting venuelink v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::from_args(&args)?);

    if config.metrics.enabled {
        setup_metrics(config.metrics.port).await?;
        info!("Metrics server started on port {}", config.metrics.port);
    }

    let manager = ConnectionManager::new(config);
    let client = manager.get_or_create("cli");

    client.connect(&args.token, args.login_id.as_deref()).await?;
    client.subscribe_to_symbol(&args.symbol).await?;
    info!(symbol = %args.symbol, "subscribed, press Ctrl+C to shut down");

    let bus = client.events();
    let mut ticks = bus.subscribe_ticks();
    let mut link = bus.subscribe_link();
    let mut errors = bus.subscribe_errors();

    loop {
        tokio::select! {
            tick = ticks.recv() => match tick {
                Ok(tick) => info!(
                    quote = tick.quote,
                    at = %tick.datetime_utc().format("%H:%M:%S"),
                    "tick"
                ),
                Err(_) => warn!("tick observer lagged"),
            },
            event = link.recv() => {
                if let Ok(event) = event {
                    match event {
                        LinkEvent::LinkDown { attempts } => {
                            error!(attempts, "link permanently down, exiting");
                            break;
                        }
                        other => info!(event = ?other, "link event"),
                    }
                }
            }
            venue_error = errors.recv() => {
                if let Ok(venue_error) = venue_error {
                    warn!(code = %venue_error.code, message = %venue_error.message, "venue error");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    manager.shutdown_all().await;
    info!("stopped");
    Ok(())
}
