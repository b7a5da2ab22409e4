use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;
use vigild::{preflight, Config};

/// Checks that the configuration and any spoof-classifier model are usable,
/// prints the resulting engine setup as JSON, and exits non-zero otherwise.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "vigild preflight");

    let config = Config::load().context("failed to load configuration")?;
    let report = preflight(&config).context("configuration rejected")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to encode preflight report")?
    );

    if !report.is_ready() {
        bail!("configured spoof classifier could not be used");
    }
    tracing::info!(strategy = report.texture_strategy, "vigild ready");
    Ok(())
}
