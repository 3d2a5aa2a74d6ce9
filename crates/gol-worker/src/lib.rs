//! Game of Life Worker
//!
//! 计算分配到的行区间的下一回合状态，通过 ZeroMQ ROUTER 对 Broker 提供服务。

pub mod life;
pub mod worker;

pub use worker::{
    ExitReason, PauseGate, TurnError, Worker, WorkerConfig, WorkerServer, WorkerStats,
};
