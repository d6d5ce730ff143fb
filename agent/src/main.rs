use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use common::{Config, OutputFormat};
use hec_agent::{logging, Poller};

#[derive(Parser, Debug)]
#[command(name = "hec-agent", version, about = "Fetch HEC security events on a schedule and log them")]
struct Args {
    /// TOML config file (default: $HEC_CONFIG or ./config/default.toml)
    #[arg(long)]
    config: Option<String>,

    #[arg(long, env = "HEC_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "HEC_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    /// API host, e.g. cloudinfra-gw-us.portal.checkpoint.com
    #[arg(long, env = "HEC_HOST")]
    host: Option<String>,

    /// Seconds between polls
    #[arg(long)]
    interval: Option<u64>,

    /// txt, csv or syslog
    #[arg(long = "file-type")]
    file_type: Option<OutputFormat>,

    /// Destination for txt/csv output
    #[arg(long = "output-file")]
    output_file: Option<PathBuf>,

    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(v) = self.client_id {
            config.api.client_id = v;
        }
        if let Some(v) = self.access_key {
            config.api.access_key = v;
        }
        if let Some(v) = self.host {
            config.api.host = v;
        }
        if let Some(v) = self.interval {
            config.poll.interval_secs = v;
        }
        if let Some(v) = self.file_type {
            config.output.format = v;
        }
        if let Some(v) = self.output_file {
            config.output.path = Some(v);
        }
        if let Some(v) = self.log_file {
            config.logging.file = Some(v);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let once = args.once;

    let (config_path, explicit) = Config::locate(args.config.as_deref());
    let mut config = Config::load_or_default(&config_path, explicit)?;
    args.apply(&mut config);
    config.validate()?;

    logging::init(config.logging.file.as_deref())?;
    info!("Starting HEC agent against {} ({} output)", config.api.host_name(), config.output.format);

    let mut poller = Poller::from_config(&config)?;

    if once {
        poller.run_cycle().await?;
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    poller.run(shutdown).await;
    info!("Shutting down");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal as unix_signal, SignalKind};
            match unix_signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    let _ = signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = signal::ctrl_c().await;
        }

        info!("Shutdown requested, finishing current cycle");
        shutdown.cancel();
    });
}
