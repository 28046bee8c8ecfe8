//! Follows the gateway error log and restarts the gateway service when
//! bad-file-descriptor errors pile up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use gatewarden::config::SupervisorConfig;
use gatewarden::error::Result;
use gatewarden::monitor::{LogMonitor, MonitorConfig, tail};
use gatewarden::service::{ServiceManagerLookup, ServiceRestarter};
use gatewarden::util::logging;

/// Restart the gateway when its log reports repeated EBADF spawn failures
#[derive(Parser, Debug)]
#[command(name = "gateway-log-monitor")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log file to follow, overriding `monitor.log_path`
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Stats file, overriding `monitor.stats_path`
    #[arg(long, value_name = "FILE")]
    stats_file: Option<PathBuf>,

    /// Service label, overriding `service_label`
    #[arg(long)]
    label: Option<String>,

    /// Also process lines already in the log
    #[arg(long)]
    from_start: bool,
}

/// Load configuration and apply command-line overrides
fn resolve(args: Args) -> Result<(SupervisorConfig, MonitorConfig)> {
    let mut config = SupervisorConfig::load(args.config.as_deref())?;
    if let Some(label) = args.label {
        config.service_label = label;
    }

    let mut monitor = config.monitor.clone();
    if let Some(path) = args.log_file {
        monitor.log_path = path;
    }
    if let Some(path) = args.stats_file {
        monitor.stats_path = path;
    }
    monitor.from_start |= args.from_start;

    Ok((config, monitor))
}

#[tokio::main]
async fn main() {
    // Logging is configured by the file, so load failures go straight to stderr
    let (config, monitor_config) = match resolve(Args::parse()) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("gateway-log-monitor: failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    logging::init(config.log_level);

    if let Err(e) = run(config, monitor_config).await {
        error!("gateway-log-monitor failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: SupervisorConfig, monitor_config: MonitorConfig) -> Result<()> {
    info!("gateway-log-monitor v{} starting", gatewarden::VERSION);

    let manager = config.restart.manager;
    let restarter = ServiceRestarter::new(manager, config.service_label.clone())
        .with_retry(config.restart.retry);
    let lines = tail::follow(
        monitor_config.log_path.clone(),
        Duration::from_millis(monitor_config.poll_interval_ms),
        monitor_config.from_start,
    );

    let mut monitor = LogMonitor::new(monitor_config, config.service_label, Arc::new(restarter))?
        .with_lookup(Arc::new(ServiceManagerLookup::new(manager)));

    tokio::select! {
        result = monitor.run(lines) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, saving stats");
            monitor.touch();
        }
    }

    Ok(())
}
