//! Sends a list of messages through pooled SMTP sessions and prints a report.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use volley_common::{Message, logging};
use volley_dispatch::{DispatchConfig, DispatchReport, Dispatcher, SessionOptions};
use volley_smtp::{Credentials, SmtpConfig, SmtpConnector};

/// Username used when only a password is supplied, as SMTP relay services
/// that authenticate by API key expect.
const DEFAULT_USERNAME: &str = "SMTP_Injection";

#[derive(Parser, Debug)]
#[command(name = "volley")]
#[command(about = "Bulk email dispatch over pooled SMTP sessions", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the per-phase timing table after the summary
    #[arg(short, long)]
    timings: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send every message in a RON list
    Send {
        /// File containing a list of messages
        messages: PathBuf,
    },
    /// Send generated messages, useful for load testing a relay or sink
    Sample {
        /// Number of messages to generate
        #[arg(short = 'n', long, default_value_t = 100)]
        count: usize,

        /// Recipient domain, e.g. a sink domain that discards mail
        #[arg(short, long, default_value = "example.com")]
        domain: String,
    },
}

#[derive(Debug, Deserialize)]
struct Config {
    smtp: SmtpConfig,
    dispatch: DispatchConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config_path = find_config_file(cli.config.as_deref())?;
    let mut config: Config = read_ron(&config_path)?;
    apply_password_override(&mut config.smtp);

    let messages = match &cli.command {
        Commands::Send { messages } => read_ron::<Vec<Message>>(messages)?,
        Commands::Sample { count, domain } => sample_messages(*count, domain),
    };

    tracing::info!(
        server = %config.smtp.address(),
        config = %config_path.display(),
        "Loaded {} messages",
        messages.len()
    );

    let options = SessionOptions::from_config(&config.smtp);
    let connector = SmtpConnector::new(config.smtp)?;
    let dispatcher = Dispatcher::new(connector, options, config.dispatch);
    let report = dispatcher.dispatch(messages).await;

    print_report(&report, cli.timings);
    Ok(())
}

fn read_ron<T: for<'de> Deserialize<'de>>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;

    ron::from_str(&content).map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))
}

/// Find the configuration file using the following precedence:
/// 1. `--config`
/// 2. `VOLLEY_CONFIG` environment variable
/// 3. ./volley.config.ron (current working directory)
/// 4. /etc/volley/volley.config.ron (system-wide config)
fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Ok(env_path) = std::env::var("VOLLEY_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "VOLLEY_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./volley.config.ron"),
        PathBuf::from("/etc/volley/volley.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config\n  - VOLLEY_CONFIG environment variable\n{paths_tried}"
    )
}

/// `VOLLEY_SMTP_PASSWORD` replaces the configured password, so the secret
/// need not live in the config file.
fn apply_password_override(smtp: &mut SmtpConfig) {
    let Ok(password) = std::env::var("VOLLEY_SMTP_PASSWORD") else {
        return;
    };

    let username = smtp
        .credentials
        .as_ref()
        .map_or_else(|| DEFAULT_USERNAME.to_string(), |c| c.username.clone());
    smtp.credentials = Some(Credentials::new(username, password));
}

fn sample_messages(count: usize, domain: &str) -> Vec<Message> {
    (1..=count)
        .map(|i| {
            Message::new(
                format!("recipient{i}@{domain}"),
                format!("Test Email {i}"),
                format!("This is test email {i} plain text content"),
            )
            .with_html(format!(
                "<html><body><h1>Test Email {i}</h1><p>This is the HTML content.</p></body></html>"
            ))
            .with_header("X-Campaign-ID", "volley-sample")
            .with_header("X-Template-ID", format!("template-{}", i % 5))
        })
        .collect()
}

#[allow(clippy::print_stdout)]
fn print_report(report: &DispatchReport, timings: bool) {
    println!("{report}");

    if !report.failures().is_empty() {
        println!("\nFailed messages:");
        for (n, failure) in report.failures().iter().enumerate() {
            println!(
                "{}. #{} to {}: {}",
                n + 1,
                failure.index,
                failure.message.to(),
                failure.reason
            );
        }
    }

    if timings {
        println!("\n{}", report.timings());
    }
}
