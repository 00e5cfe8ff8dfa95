//! Session-driven benchmarks and iterative BFS over an external SQL engine,
//! comparing a CPU engine against its GPU-accelerated fork.
//!
//! The engine is an opaque process driven through its command language:
//! - [`session`] opens engine instances with a dataset loaded
//! - [`controller`] runs timed trials in the three timing modes
//! - [`bfs`] runs multi-source BFS one hop per engine command
//! - [`recorder`] and [`compare`] turn trial records into reports

pub mod bfs;
pub mod channel;
pub mod compare;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod fallback;
pub mod gpu;
pub mod protocol;
pub mod query;
pub mod recorder;
pub mod schema;
pub mod session;
pub mod transcript;

pub use bfs::{BfsOutcome, IterativeBfs, NeighborSource, Termination};
pub use config::BenchConfig;
pub use controller::{BenchmarkController, ControllerOptions, Plan, PlanResult};
pub use error::{BenchError, Result};
pub use schema::{EngineKind, TimingMode, TrialRecord, TrialStatus};
pub use session::{PipedOptions, PipedSession, ScriptSession};
