#![forbid(unsafe_code)]

use clap::Parser;
use conntrail_lib::capture::{resolve_interface, spawn_capture, CaptureSettings};
use conntrail_lib::config::{load_from_path, validate, Config};
use conntrail_lib::output::{stdout_sink, OutputFormat};
use conntrail_lib::telemetry::init_tracing;
use conntrail_lib::{ConntrailError, Engine, EngineSettings};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Passive TCP connection and DNS name correlator",
    long_about = "Passive TCP connection and DNS name correlator.\n\n\
        Live capture needs libpcap: build with `--features capture` and run with \
        CAP_NET_RAW or as root. Builds without the feature exit at startup."
)]
struct Cli {
    /// Path to an optional configuration TOML file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Interface to capture on [defaults to auto-detect]
    #[arg(short, long, value_name = "NAME", env = "CONNTRAIL_INTERFACE")]
    interface: Option<String>,

    /// Print every connection instead of the first per destination and port
    #[arg(long, env = "CONNTRAIL_ALLCONNS")]
    allconns: bool,

    /// Time a SYN may wait for its reply before it is reported as TIMEOUT
    #[arg(long, value_name = "MS")]
    idle_timeout_ms: Option<u64>,

    /// Event output format: text or json
    #[arg(long, value_name = "FORMAT")]
    format: Option<OutputFormat>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<Config, ConntrailError> {
        let mut cfg = match &self.config {
            Some(path) => load_from_path(path)?,
            None => Config::default(),
        };
        if let Some(interface) = self.interface {
            cfg.interface = interface;
        }
        if self.allconns {
            cfg.track_all = true;
        }
        if let Some(ms) = self.idle_timeout_ms {
            cfg.idle_timeout_ms = ms;
        }
        if let Some(format) = self.format {
            cfg.output.format = format;
        }
        if let Some(level) = self.log_level {
            cfg.logging.level = level;
        }
        validate(&cfg).map_err(ConntrailError::Config)?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = match cli.into_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            let _ = init_tracing("info", false);
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&cfg.logging.level, cfg.logging.show_target) {
        eprintln!("failed to initialize tracing: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(cfg).await {
        error!(%err, "conntrail exited with error");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<(), ConntrailError> {
    let interface = resolve_interface(&cfg.interface_selection())?;
    info!(
        interface = %interface.name,
        address = %interface.address,
        track_all = cfg.track_all,
        idle_timeout_ms = cfg.idle_timeout_ms,
        "configuration loaded"
    );

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(cfg.channel_capacity);
    let capture = spawn_capture(&interface, CaptureSettings::default(), tx, cancel.clone())?;

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let engine = Engine::new(&EngineSettings::from_config(&cfg, interface.address));
    let mut sink = stdout_sink(cfg.output.format);
    engine.run(rx, &mut sink, cancel.clone()).await;

    cancel.cancel();
    match tokio::task::spawn_blocking(move || capture.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => warn!("capture thread panicked"),
        Err(e) => warn!(error = %e, "failed to join capture thread"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to setup SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
