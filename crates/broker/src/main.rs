// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use switchyard::config::{BrokerConfig, Cli, LogFormat};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init()
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(filter).with_writer(std::io::stderr).init()
        }
    }

    let config = match BrokerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = switchyard::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
