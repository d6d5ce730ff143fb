use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use inquire::{Password, PasswordDisplayMode, Select, Text};

use common::{Config, OutputFormat, QueryWindow};
use hec_agent::{collect_window, logging, sink, Enricher, QueryClient};

/// One-off retrieval of HEC security events for an explicit time range.
/// Anything not given on the command line or in the config is prompted for.
#[derive(Parser, Debug)]
#[command(name = "hec-cli", version, about = "Retrieve HEC security events for a single time range")]
struct Args {
    #[arg(long)]
    config: Option<String>,

    #[arg(long, env = "HEC_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "HEC_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    #[arg(long, env = "HEC_HOST")]
    host: Option<String>,

    /// Start of the range, e.g. 2024-01-01T00:00:00Z
    #[arg(long = "start-time")]
    start: Option<String>,

    /// End of the range (exclusive), e.g. 2024-01-31T23:59:59Z
    #[arg(long = "end-time")]
    end: Option<String>,

    /// txt, csv or syslog
    #[arg(long = "file-type")]
    file_type: Option<OutputFormat>,

    #[arg(long = "output-file")]
    output_file: Option<PathBuf>,

    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config_path, explicit) = Config::locate(args.config.as_deref());
    let mut config = Config::load_or_default(&config_path, explicit)?;

    if let Some(v) = args.client_id {
        config.api.client_id = v;
    }
    if let Some(v) = args.access_key {
        config.api.access_key = v;
    }
    if let Some(v) = args.host {
        config.api.host = v;
    }
    if let Some(v) = args.log_file {
        config.logging.file = Some(v);
    }

    if config.api.client_id.trim().is_empty() {
        config.api.client_id = Text::new("Client ID:").prompt()?;
    }
    if config.api.access_key.trim().is_empty() {
        config.api.access_key = Password::new("Access key:")
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()?;
    }
    if config.api.host.trim().is_empty() {
        config.api.host = Text::new("API host:")
            .with_placeholder("cloudinfra-gw-us.portal.checkpoint.com")
            .prompt()?;
    }

    let start = match args.start {
        Some(v) => v,
        None => Text::new("Start date:").with_placeholder("2024-01-01T00:00:00Z").prompt()?,
    };
    let end = match args.end {
        Some(v) => v,
        None => Text::new("End date:").with_placeholder("2024-01-31T23:59:59Z").prompt()?,
    };
    let window = QueryWindow::parse(&start, &end)?;

    config.output.format = match args.file_type {
        Some(format) => format,
        None => Select::new(
            "Output format:",
            vec![OutputFormat::Txt, OutputFormat::Csv, OutputFormat::Syslog],
        )
        .prompt()?,
    };
    if let Some(path) = args.output_file {
        config.output.path = Some(path);
    }
    if config.output.format != OutputFormat::Syslog && config.output.path.is_none() {
        let default = format!("HEC_log.{}", config.output.format);
        let path = Text::new("Output file:").with_default(&default).prompt()?;
        config.output.path = Some(PathBuf::from(path));
    }

    config.validate()?;
    logging::init(config.logging.file.as_deref())?;

    let client = QueryClient::new(&config.api).context("failed to build API client")?;
    let enricher = Enricher::new(config.api.host_name(), &config.enrich.link_rewrites);
    let mut sink = sink::from_config(&config.output)?;

    println!("{} {}", "Querying events for".bright_cyan(), window.to_string().bright_white());

    match collect_window(&client, &enricher, sink.as_mut(), &window).await {
        Ok(0) => {
            println!("{}", "No events found for the given time frame.".dimmed());
            Ok(())
        }
        Ok(count) => {
            let target = config
                .output
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "syslog".to_string());
            println!(
                "{} {} events written to {}",
                "✓".bright_green().bold(),
                count.to_string().bright_white().bold(),
                target.bright_white()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {} ({})", "Error:".red().bold(), e, e.kind());
            std::process::exit(1);
        }
    }
}
