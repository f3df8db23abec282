mod assembler;
mod collectors;
mod config;
mod poller;
mod publish;
mod state;

use assembler::Assembler;
use clap::Parser;
use config::{BackendChoice, Config, ConfigError};
use poller::Poller;
use publish::FileSink;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hwstatsd")]
#[command(version, about = "Polls hardware sensors and publishes a stats snapshot file")]
struct Cli {
    /// YAML config file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seconds between snapshots.
    #[arg(long, env = "HWSTATS_INTERVAL")]
    interval: Option<f64>,
    /// Network interface to report; empty picks the first one.
    #[arg(long, env = "HWSTATS_NETWORK")]
    network: Option<String>,
    /// Snapshot file path.
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long, value_enum)]
    backend: Option<BackendChoice>,
    /// Publish a single snapshot and exit.
    #[arg(long)]
    once: bool,
    #[arg(long)]
    print_default_config: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config, ConfigError> {
        let mut cfg = match &self.config {
            Some(path) => Config::load_from_file(path)?,
            None => Config::default(),
        };
        if let Some(interval) = self.interval {
            cfg.interval_secs = interval;
        }
        if let Some(network) = &self.network {
            cfg.network_interface = network.clone();
        }
        if let Some(output) = &self.output {
            cfg.output_path = output.clone();
        }
        if let Some(backend) = self.backend {
            cfg.backend = backend;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match cli.load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let sensors = match collectors::build_sensors(&cfg) {
        Ok(sensors) => sensors,
        Err(err) => {
            error!(error = %err, "failed to initialise sensor backend");
            std::process::exit(1);
        }
    };

    let sink = FileSink::new(&cfg.output_path, cfg.output_format);
    info!(
        backend = ?sensors.backend,
        interval = %humantime::format_duration(cfg.interval()),
        network = %display_interface(&cfg.network_interface),
        output = %sink.path().display(),
        "starting hwstatsd"
    );

    let assembler = Assembler::new(sensors, cfg.network_interface.clone(), cfg.interval_secs);
    let mut poller = Poller::new(assembler, Box::new(sink), cfg.interval());
    if cli.once {
        poller = poller.with_max_cycles(1);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (redetect_tx, redetect_rx) = watch::channel(());
    watch_for_redetect(redetect_tx);

    let mut poll_task = tokio::spawn(async move { poller.run(shutdown_rx, redetect_rx).await });

    tokio::select! {
        finished = &mut poll_task => {
            if let Err(err) = finished {
                error!(error = %err, "poll task failed");
                std::process::exit(1);
            }
            return;
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!(error = %err, "failed to wait for Ctrl+C");
            }
            info!("Ctrl+C received, stopping");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(err) = poll_task.await {
        error!(error = %err, "poll task failed");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn display_interface(name: &str) -> &str {
    if name.is_empty() {
        "<auto>"
    } else {
        name
    }
}

/// SIGHUP drops the cached GPU choice so a hot-plugged card is picked up.
#[cfg(unix)]
fn watch_for_redetect(tx: watch::Sender<()>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGHUP handler, GPU re-detect disabled");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received");
            if tx.send(()).is_err() {
                break;
            }
        }
    });
}

#[cfg(not(unix))]
fn watch_for_redetect(_tx: watch::Sender<()>) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("hwstatsd").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn cli_overrides_defaults() {
        let cli = parse(&[
            "--interval",
            "2.5",
            "--network",
            "wlan0",
            "--backend",
            "system",
            "--output",
            "/tmp/stats.yaml",
        ]);
        let cfg = cli.load_config().expect("valid config");
        assert_eq!(cfg.interval_secs, 2.5);
        assert_eq!(cfg.network_interface, "wlan0");
        assert_eq!(cfg.backend, BackendChoice::System);
        assert_eq!(cfg.output_path, PathBuf::from("/tmp/stats.yaml"));
    }

    #[test]
    fn cli_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "interval_secs: 5\nnetwork_interface: eth1\n").unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "--interval", "1"]);
        let cfg = cli.load_config().expect("valid config");
        assert_eq!(cfg.interval_secs, 1.0);
        assert_eq!(cfg.network_interface, "eth1");
    }

    #[test]
    fn invalid_interval_from_cli_is_rejected() {
        let cli = parse(&["--interval", "0"]);
        assert!(matches!(cli.load_config(), Err(ConfigError::Validation(_))));
        let cli = parse(&["--interval", "1e20"]);
        assert!(matches!(cli.load_config(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn once_flag_parses() {
        assert!(parse(&["--once"]).once);
        assert!(!parse(&[]).once);
    }
}
