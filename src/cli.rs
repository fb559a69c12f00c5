use crate::config::DEFAULT_ENDPOINT;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "venuelink",
    about = "websocket trading client: authorize, stream ticks, and watch contract events",
    version
)]
pub struct Args {
    /// API token for the venue account
    #[arg(short, long)]
    pub token: String,

    /// Application identifier registered with the venue
    #[arg(short, long, default_value = "1089")]
    pub app_id: String,

    /// Login id to authorize as (learned from the venue when omitted)
    #[arg(long)]
    pub login_id: Option<String>,

    /// Symbol to subscribe to (e.g., R_100, R_50)
    #[arg(short, long, default_value = "R_100")]
    pub symbol: String,

    /// WebSocket endpoint URL
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Enable metrics server
    #[arg(long)]
    pub metrics: bool,

    /// Metrics server port
    #[arg(long, default_value = "9090")]
    pub metrics_port: u16,

    /// Connection + authorization timeout in seconds
    #[arg(long, default_value = "15")]
    pub connect_timeout: u64,

    /// Catalog request timeout in seconds
    #[arg(long, default_value = "10")]
    pub request_timeout: u64,

    /// Tick buffer capacity per symbol
    #[arg(long, default_value = "300")]
    pub max_ticks: usize,
}
