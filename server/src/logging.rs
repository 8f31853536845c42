//! Structured logging: `tracing` + `tracing-subscriber` with an
//! `EnvFilter` driven by a `-v` count, optionally writing to a
//! `--log-file` instead of stderr.

use std::path::Path;

use tracing_subscriber::EnvFilter;

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

pub fn init(verbosity: u8, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_writer(file).with_ansi(false).init();
        }
        None => builder.init(),
    }
    Ok(())
}
