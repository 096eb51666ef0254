// Copyright 2020 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

mod cli;
mod config_loader;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use log::{info, warn, LevelFilter};
use resolver_core::Resolver;
use simple_logger::SimpleLogger;
use std::process::ExitCode;

fn level_filter(log_level: &str) -> LevelFilter {
    match log_level.to_ascii_lowercase().as_str() {
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The logger may not be initialized yet if the failure happened while loading
            // configuration, so fall back to stderr.
            eprintln!("burrow: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = config_loader::load(&args.config)
        .await
        .context("failed to load configuration")?;

    SimpleLogger::new()
        .with_level(level_filter(&config.log_level))
        .init()
        .context("failed to initialize logger")?;

    info!("burrow ready, binding {}:{}", config.server.address, config.server.port);

    let resolver = Resolver::new(&config).context("failed to build resolver")?;
    let resolver = std::sync::Arc::new(resolver);

    let shutdown = resolver.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {e}");
            return;
        }
        info!("shutdown signal received, draining in-flight requests");
        shutdown.stop();
    });

    resolver.serve().await.context("listener failed")?;
    info!("burrow stopped cleanly");
    Ok(())
}
