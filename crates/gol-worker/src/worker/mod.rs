//! Worker Module - Game of Life compute worker
//!
//! ```text
//! +------------------+
//! |  WorkerServer    |  <- ROUTER socket, one task per request
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |     Worker       |  <- validates jobs, runs life::step_rows
//! +------------------+
//!          |
//!          v
//!      PauseGate         (checked before every cell)
//! ```

mod config;
pub mod control_plane;
mod pause;
pub mod server;
mod worker;

pub use config::WorkerConfig;
pub use pause::PauseGate;
pub use server::{ExitReason, WorkerServer};
pub use worker::{TurnError, Worker, WorkerStats};
