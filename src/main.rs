use anyhow::Context;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    let filter = EnvFilter::try_from_env("CHANGESIM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ok = changesim::run().context("changesim failed")?;
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::from(2) })
}
