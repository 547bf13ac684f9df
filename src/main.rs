//! Thin binary harness around the library.
//!
//! Loads a TOML config, sets up logging and runs the Runner. No backend
//! wire protocols ship with the binary; a ClientSet built here carries
//! only transport settings, so templates that reach for Consul, Vault
//! or Nomad data require embedding the library with real clients.
//! File- and environment-driven templates run as-is.

use templar::{ClientSet, Error, Result, Runner, RunnerOptions, TemplarConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let (config_path, options) = parse_args()?;
    let config = TemplarConfig::load(config_path.as_deref())?;

    init_tracing(config.log_level.as_deref());

    let clients = ClientSet::builder()
        .transport(config.consul.transport.clone())
        .build();
    warn!("(main) no backend clients wired; only file and env templates will resolve");

    let mut runner = Runner::new(config, clients, options).await?;
    runner.start().await
}

/// `templar [--once] [--dry] [config.toml]`. Anything fancier belongs
/// in an embedding binary.
fn parse_args() -> Result<(Option<String>, RunnerOptions)> {
    let mut config_path = None;
    let mut options = RunnerOptions::default();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--once" | "-once" => options.once = true,
            "--dry" | "-dry" => options.dry = true,
            flag if flag.starts_with('-') => {
                return Err(Error::Fatal(format!("unknown flag {:?}", flag)));
            }
            path => {
                if config_path.replace(path.to_string()).is_some() {
                    return Err(Error::Fatal("multiple config paths given".to_string()));
                }
            }
        }
    }
    Ok((config_path, options))
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
