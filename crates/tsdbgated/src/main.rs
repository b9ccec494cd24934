//! tsdbgated — the tsdbgate daemon.
//!
//! Terminates TLS for metrics clients and relays their line protocol to
//! a time-series database, optionally dropping lines whose embedded
//! credentials do not authenticate.
//!
//! # Usage
//!
//! ```text
//! tsdbgated --config /etc/tsdbgate/tsdbgate.toml
//! tsdbgated --config tsdbgate.toml --check
//! ```
//!
//! Exit codes: 0 after a graceful stop, 1 on a runtime/startup failure,
//! 2 when the configuration is invalid.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::error;

use tsdbgate_core::{ConfigResult, ProxyConfig, ProxySettings};

mod serve;

const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "tsdbgated",
    about = "TLS-terminating, credential-filtering relay for a time-series database",
    version
)]
struct Cli {
    /// Path to tsdbgate.toml.
    #[arg(short, long, default_value = "/etc/tsdbgate/tsdbgate.toml")]
    config: PathBuf,

    /// Override listen.port from the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tsdbgate=debug"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_settings(cli: &Cli) -> ConfigResult<ProxySettings> {
    let mut config = ProxyConfig::from_file(&cli.config)?;
    if let Some(port) = cli.port {
        config.listen.port = port;
    }
    config.validate()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("tsdbgated: configuration error in {}: {e}", cli.config.display());
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if cli.check {
        println!(
            "{}: ok ({} backend, listening on {})",
            cli.config.display(),
            settings.backend.kind(),
            settings.listen_addr
        );
        return ExitCode::SUCCESS;
    }

    match serve::run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "tsdbgated failed");
            eprintln!("tsdbgated: {e:#}");
            ExitCode::FAILURE
        }
    }
}
