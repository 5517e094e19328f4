//! The single error taxonomy for the reconciliation engine.
//!
//! Every fallible operation in `flywall-core` returns `Result<_, Error>`.
//! Variants are grouped by the component that raises them (loader, migrator,
//! validator, renderer, reconciler, control plane) matching the surface
//! taxonomy the engine's error-handling design is built around.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Source position of a config node, captured by the loader for diagnostics.
pub type Position = (Utf8PathBuf, u32);

#[derive(Debug, Error)]
pub enum Error {
    // -- Loader (B) --
    #[error("failed to parse configuration at {path}: {message}")]
    ConfigParse { path: Utf8PathBuf, message: String },
    #[error("include cycle detected: {0}")]
    ConfigCycle(String),
    #[error("unknown top-level block `{block}` at {path}:{line}")]
    ConfigUnknownBlock {
        block: String,
        path: Utf8PathBuf,
        line: u32,
    },
    #[error("missing environment variable `{0}`")]
    ConfigMissingEnv(String),

    // -- Migrator (C) --
    #[error("unsupported schema version `{0}`")]
    ConfigUnsupportedVersion(String),

    // -- Validator (D) --
    #[error("unknown {kind} reference `{name}`")]
    ConfigRefUnknown { kind: String, name: String },
    #[error("configuration conflict: {message}")]
    ConfigConflict {
        message: String,
        position: Option<Position>,
    },
    #[error("configuration invariant violated: {0}")]
    ConfigInvariant(String),

    // -- Renderer (E) --
    #[error("internal rendering error: {0}")]
    RenderError(String),

    // -- Reconciler (F) --
    #[error("kernel apply failed in {subsystem}: {message}")]
    KernelApply { subsystem: String, message: String },
    #[error("rollback failed: {0}")]
    RollbackFailure(String),

    // -- Supervisor (G) --
    #[error("upgrade checksum mismatch")]
    UpgradeChecksumMismatch,
    #[error("upgrade readiness timeout")]
    UpgradeTimeout,
    #[error("upgrade handoff error: {0}")]
    UpgradeHandoffError(String),

    // -- Control socket (H) --
    #[error("reconciler busy")]
    Busy,
    #[error("request timed out")]
    Timeout,

    // -- Ambient --
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("shell command error: {0}")]
    Shell(#[from] crate::shell::Error),
    #[error("state error: {0}")]
    State(#[from] crate::state::Error),
    #[error("snapshot (de)serialization error: {0}")]
    BinCodeEncode(#[from] bincode::error::EncodeError),
    #[error("snapshot (de)serialization error: {0}")]
    BinCodeDecode(#[from] bincode::error::DecodeError),
    #[error("rtnetlink error: {0}")]
    Rtnetlink(#[from] rtnetlink::Error),
}

impl Error {
    /// The CLI/control-socket exit-code family this error maps to.
    ///
    /// 0 success, 1 generic failure, 2 config error, 3 kernel apply error, 4 upgrade error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigParse { .. }
            | Error::ConfigCycle(_)
            | Error::ConfigUnknownBlock { .. }
            | Error::ConfigMissingEnv(_)
            | Error::ConfigUnsupportedVersion(_)
            | Error::ConfigRefUnknown { .. }
            | Error::ConfigConflict { .. }
            | Error::ConfigInvariant(_) => 2,
            Error::RenderError(_)
            | Error::KernelApply { .. }
            | Error::RollbackFailure(_) => 3,
            Error::UpgradeChecksumMismatch | Error::UpgradeTimeout | Error::UpgradeHandoffError(_) => 4,
            _ => 1,
        }
    }
}
