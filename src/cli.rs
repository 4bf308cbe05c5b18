//! Command-line interface

use clap::Parser;

/// Authenticating tool-call gateway for Microsoft Graph
#[derive(Parser, Debug)]
#[command(name = "graph-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "GRAPH_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "GRAPH_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GRAPH_GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "GRAPH_GATEWAY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
