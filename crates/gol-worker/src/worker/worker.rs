//! Worker Implementation
//!
//! The Worker is the compute unit behind the RPC server. It owns no world
//! state between turns: every [`TurnJob`] carries the full read-only grid,
//! and the worker returns only the rows it was asked for.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   Worker                     │
//! │                                              │
//! │  ┌────────────┐   ┌──────────────────────┐   │
//! │  │ PauseGate  │◀──│ step_rows (per cell) │   │
//! │  └────────────┘   └──────────────────────┘   │
//! │  ┌────────────┐                              │
//! │  │WorkerStats │                              │
//! │  └────────────┘                              │
//! └──────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use gol_protocol::{
    ErrorCode, GridError, PartialGrid, RpcFailure, TurnJob, EXECUTE_TURN_METHOD,
};

use super::config::WorkerConfig;
use super::pause::PauseGate;
use crate::life;

#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Unknown method '{0}'")]
    UnknownMethod(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(GridError),

    #[error("Invalid row range: {0}")]
    InvalidRange(GridError),
}

impl TurnError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TurnError::UnknownMethod(_) => ErrorCode::UnknownMethod,
            TurnError::InvalidGrid(_) | TurnError::InvalidRange(_) => ErrorCode::InvalidParams,
        }
    }
}

impl From<TurnError> for RpcFailure {
    fn from(err: TurnError) -> Self {
        RpcFailure::new(err.code(), err.to_string())
    }
}

/// Lifetime counters
#[derive(Debug, Default)]
pub struct WorkerStats {
    turns: AtomicU64,
    rows: AtomicU64,
}

impl WorkerStats {
    pub fn turns_executed(&self) -> u64 {
        self.turns.load(Ordering::Relaxed)
    }

    pub fn rows_computed(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    fn record(&self, rows: usize) {
        self.turns.fetch_add(1, Ordering::Relaxed);
        self.rows.fetch_add(rows as u64, Ordering::Relaxed);
    }
}

pub struct Worker {
    config: WorkerConfig,
    gate: Arc<PauseGate>,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            gate: Arc::new(PauseGate::new()),
            stats: WorkerStats::default(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn gate(&self) -> Arc<PauseGate> {
        self.gate.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Engage or release the pause gate; returns `true` if the state changed.
    pub fn set_paused(&self, paused: bool) -> bool {
        let changed = self.gate.set(paused);
        if changed {
            tracing::info!(worker = %self.config.worker_id, paused, "Pause state changed");
        }
        changed
    }

    /// Compute one turn for the job's rows.
    ///
    /// Blocks the calling thread while the pause gate is engaged, so callers
    /// on an async runtime must run this on the blocking pool.
    pub fn execute_turn(&self, job: &TurnJob) -> Result<PartialGrid, TurnError> {
        if job.method != EXECUTE_TURN_METHOD {
            return Err(TurnError::UnknownMethod(job.method.clone()));
        }
        job.grid.validate().map_err(TurnError::InvalidGrid)?;

        let range = job.rows();
        job.grid.check_range(range).map_err(TurnError::InvalidRange)?;

        tracing::debug!(
            worker = %self.config.worker_id,
            rows = ?(range.start..range.end),
            "Executing turn"
        );

        let gate = &self.gate;
        let cells = life::step_rows(&job.grid, range, || gate.wait_if_paused());
        self.stats.record(range.len());

        Ok(PartialGrid {
            row_start: range.start,
            width: job.grid.width(),
            cells,
        })
    }
}
