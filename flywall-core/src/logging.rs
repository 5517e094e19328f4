//! Structured logging, file-backed with `SIGHUP`-triggered reopen for log
//! rotation (the daemon's own reload layer, distinct from a config reload).

use std::fs::OpenOptions;
use std::io;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

pub type FileFmtLayer =
    fmt::Layer<tracing_subscriber::Registry, fmt::format::DefaultFields, fmt::format::Format, BoxMakeWriter>;

pub type LogReloadHandle = reload::Handle<FileFmtLayer, tracing_subscriber::Registry>;

const DEFAULT_LOG_FILTER: &str = "info";

pub fn make_file_fmt_layer(log_path: &str) -> io::Result<FileFmtLayer> {
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;
    Ok(fmt::layer().with_writer(BoxMakeWriter::new(file)).with_ansi(false))
}

/// Installs a file-backed subscriber and returns a handle that can reopen
/// the file in place (used after `newsyslog`/`logrotate` renames it).
pub fn setup_log_file(initial_layer: FileFmtLayer) -> LogReloadHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (reload_layer, reload_handle): (
        reload::Layer<FileFmtLayer, tracing_subscriber::Registry>,
        LogReloadHandle,
    ) = reload::Layer::new(initial_layer);
    tracing_subscriber::registry().with(reload_layer).with(filter).init();
    reload_handle
}

/// Installs a plain stdout subscriber, used when no `--log-file` is given
/// (e.g. `flywall validate` run interactively).
pub fn setup_stdout() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
