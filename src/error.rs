//! Error taxonomy shared by sessions, the BFS engine and the benchmark controller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, Error)]
pub enum BenchError {
    /// The engine executable does not exist. Nothing further can run.
    #[error("engine binary not found: {}", .0.display())]
    BinaryMissing(PathBuf),

    /// The engine crashed or went silent while loading tables / allocating buffers.
    #[error("engine failed during startup: {0}")]
    Startup(String),

    /// Non-zero exit from a command run.
    #[error("engine exited with {}: {stderr}", status_label(.code))]
    Execution { code: Option<i32>, stderr: String },

    /// The accelerated path silently degraded to a slower execution path.
    #[error("fallback marker detected: {0}")]
    Fallback(String),

    #[error("timed out after {:.3}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// A result artifact was absent or could not be parsed.
    #[error("result artifact {}: {reason}", path.display())]
    ProtocolMismatch { path: PathBuf, reason: String },

    #[error("session is closed")]
    Closed,

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Only a missing engine binary aborts a whole run; everything else is
    /// converted into a recorded outcome at the component boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BenchError::BinaryMissing(_))
    }

    /// Short stable tag used in result tables.
    pub fn kind(&self) -> &'static str {
        match self {
            BenchError::BinaryMissing(_) => "binary_missing",
            BenchError::Startup(_) => "startup",
            BenchError::Execution { .. } => "execution",
            BenchError::Fallback(_) => "fallback",
            BenchError::Timeout(_) => "timeout",
            BenchError::ProtocolMismatch { .. } => "protocol_mismatch",
            BenchError::Closed => "closed",
            BenchError::Dataset(_) => "dataset",
            BenchError::Config(_) => "config",
            BenchError::Io(_) => "io",
        }
    }
}

fn status_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "no status (killed by signal)".to_string(),
    }
}
