//! Error taxonomy for the mining engine.
//!
//! Each variant maps to one of the fatal/recoverable/advisory categories the
//! engine distinguishes. `StaleShare` and `Transient` conditions are *not*
//! represented here — they are plain return values (see `share_processor`
//! and `candidate_queue`), not exceptional control flow.

use thiserror::Error;

/// Process exit code a fatal variant should map to in `main`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing required flag, bad numeric range, or an unsupported flag
    /// combination (e.g. `--use-gpu` with `--cset`). Exit code 1.
    #[error("configuration error: {0}")]
    Config(String),

    /// OpenCL platform/device/kernel build failure. Exit code 2.
    #[error("GPU initialization failed: {0}")]
    GpuInit(String),

    /// CRT Set file missing, truncated, or a post-load invariant fails.
    #[error("file format error: {0}")]
    FileFormat(String),

    /// Work-source transport failure, surfaced from an external collaborator.
    /// The engine itself only ever observes this as `None` and keeps mining
    /// on the last header; this variant exists for callers that want to log
    /// the underlying cause.
    #[error("work source error: {0}")]
    WorkSource(String),

    /// A structural invariant was violated — e.g. `shift` too low for the
    /// loaded CRT Set's bit width. Always fatal.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl EngineError {
    /// Exit code `main` should use when this error reaches the top level.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_) => 1,
            EngineError::GpuInit(_) => 2,
            EngineError::FileFormat(_) => 2,
            EngineError::WorkSource(_) => 2,
            EngineError::Invariant(_) => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
