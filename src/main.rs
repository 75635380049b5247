//! # Stream Bench - Main Entry Point
//!
//! 1. **Parse arguments** and set up logging
//! 2. **Build the configuration** and the selected broker adapter
//! 3. **Run** every topic until its stop condition or an interrupt
//! 4. **Report** the summary, the latency trace and optional JSON results
//!
//! SIGINT and SIGTERM cancel the run; whatever was measured up to then is
//! still reported.

use anyhow::Result;
use clap::Parser;
use stream_bench::{
    benchmark::{BenchmarkConfig, BenchmarkRunner},
    broker::BrokerFactory,
    cli::Args,
    logging,
    results::{BenchmarkReport, ResultsManager},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so buffered file logs are flushed.
    let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

    info!("Starting Stream Bench v{}", stream_bench::VERSION);

    let config = BenchmarkConfig::from_args(&args)?;
    let broker = BrokerFactory::create(config.broker, &config.broker_settings())?;

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone()));

    let runner = BenchmarkRunner::new(config, broker);
    let outcome = match runner.run(token.clone()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Benchmark failed: {:#}", e);
            return Err(e);
        }
    };
    if token.is_cancelled() {
        warn!("Benchmark interrupted, reporting partial results");
    }

    let command_line = std::env::args().skip(1).collect();
    let report = BenchmarkReport::new(runner.config(), outcome, command_line);
    ResultsManager::new(Some(args.latency_file.clone()), args.output_file.clone())
        .publish(&report)?;

    info!("Stream Bench completed successfully");
    Ok(())
}

/// Cancel `token` on the first SIGINT or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!("Failed to listen for interrupt: {}", e);
                            return;
                        }
                    }
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for interrupt: {}", e);
            return;
        }
    }

    info!("Shutdown signal received, stopping benchmark");
    token.cancel();
}
