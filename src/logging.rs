//! Tracing setup and RPC call timing

use crate::config::LogConfig;
use crate::error::{PubSubError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber described by `config`
///
/// `RUST_LOG` takes precedence over `config.level`. Fails if the output file
/// cannot be opened or a subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_ascii_lowercase()));
    let to_terminal = matches!(config.output.as_str(), "stdout" | "stderr");

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer(&config.output)?)
        .with_timer(ChronoUtc::new(config.timestamp_format.clone()))
        .with_ansi(to_terminal)
        .with_file(config.enable_caller)
        .with_line_number(config.enable_caller);

    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| PubSubError::Config(format!("Failed to install logger: {}", e)))
}

fn make_writer(output: &str) -> Result<BoxMakeWriter> {
    let writer = match output {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        "stderr" => BoxMakeWriter::new(std::io::stderr),
        path => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };
    Ok(writer)
}

/// Measures one RPC and logs its outcome
#[derive(Debug)]
pub struct CallTimer {
    method: &'static str,
    key: String,
    started: Instant,
}

impl CallTimer {
    pub fn start(method: &'static str, key: &str) -> Self {
        tracing::debug!(method, key = %key, "RPC started");
        Self {
            method,
            key: key.to_string(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Log a unary call's result
    pub fn finish<T>(self, result: &std::result::Result<T, tonic::Status>) {
        let elapsed_ms = self.elapsed().as_millis() as u64;
        match result {
            Ok(_) => tracing::info!(
                method = self.method,
                key = %self.key,
                elapsed_ms,
                "RPC completed"
            ),
            Err(status) => tracing::warn!(
                method = self.method,
                key = %self.key,
                elapsed_ms,
                code = ?status.code(),
                detail = status.message(),
                "RPC failed"
            ),
        }
    }

    /// Log the end of a server stream
    pub fn finish_stream(self, delivered: u64) {
        tracing::info!(
            method = self.method,
            key = %self.key,
            elapsed_ms = self.elapsed().as_millis() as u64,
            delivered,
            "Stream closed"
        );
    }
}
