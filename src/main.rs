//! AI Tutor Service Monitor Binary

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tutor_monitor::logging::initialize_tracing;
use tutor_monitor::runner::{single_check_exit_status, spawn_signal_listener};
use tutor_monitor::{Config, MonitorRunner, OverallHealth};

#[derive(Debug, Parser)]
#[command(name = "tutor-monitor", version, about = "AI Tutor monitoring system")]
struct Cli {
    /// Check interval in seconds (default: 30)
    #[arg(long)]
    interval: Option<u64>,

    /// Run a single check and exit
    #[arg(long)]
    single: bool,

    /// With --single, exit with status 2 unless every service is healthy
    #[arg(long, requires = "single")]
    fail_on_unhealthy: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Root directory for logs, reports and dashboards
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Timeout for every outbound request, in seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(seconds) = self.interval {
            config.check_interval = Duration::from_secs(seconds);
        }

        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }

        if let Some(seconds) = self.timeout {
            config.http_timeout = Duration::from_secs(seconds);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation failed: {}", e);
        return ExitCode::FAILURE;
    }

    let _log_guard = match initialize_tracing(
        &config.log_dir(),
        cli.verbose,
        config.log_max_bytes,
        config.log_max_files,
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Starting AI Tutor Monitor v{}", env!("CARGO_PKG_VERSION"));
    for service in &config.services {
        info!("Monitoring {} at {}", service.name, service.health_url());
    }

    let mut runner = match MonitorRunner::new(config) {
        Ok(runner) => runner,
        Err(e) => {
            error!("Monitor failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.single {
        runner.run_single().await;
        let summary = runner.store().summarize();
        info!(
            "Overall health: {} ({}/{} services up)",
            summary.overall_health, summary.services_up, summary.services_total
        );
        if summary.overall_health != OverallHealth::Healthy {
            warn!("Single check found an unhealthy stack");
        }
        return ExitCode::from(single_check_exit_status(&summary, cli.fail_on_unhealthy));
    }

    spawn_signal_listener(runner.shutdown_handle());

    match runner.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Monitoring failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
