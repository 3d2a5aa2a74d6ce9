//! Distributor Events
//!
//! 分发器通过 channel 发出的事件，由二进制负责记录或展示。

use std::fmt;
use std::path::PathBuf;

use gol_protocol::Cell;

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Paused,
    Executing,
    Quitting,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Paused => write!(f, "Paused"),
            State::Executing => write!(f, "Executing"),
            State::Quitting => write!(f, "Quitting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributorEvent {
    /// 周期性存活细胞统计
    AliveCellsCount { completed_turns: u64, cells_count: usize },

    /// 一张 PGM 已写入磁盘
    ImageOutputComplete { completed_turns: u64, path: PathBuf },

    StateChange { completed_turns: u64, new_state: State },

    /// 运行结束时的最终存活细胞
    FinalTurnComplete { completed_turns: u64, alive: Vec<Cell> },
}

impl DistributorEvent {
    pub fn completed_turns(&self) -> u64 {
        match self {
            DistributorEvent::AliveCellsCount { completed_turns, .. }
            | DistributorEvent::ImageOutputComplete { completed_turns, .. }
            | DistributorEvent::StateChange { completed_turns, .. }
            | DistributorEvent::FinalTurnComplete { completed_turns, .. } => *completed_turns,
        }
    }
}

impl fmt::Display for DistributorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributorEvent::AliveCellsCount { cells_count, .. } => {
                write!(f, "Alive Cells {}", cells_count)
            }
            DistributorEvent::ImageOutputComplete { path, .. } => {
                write!(f, "File {} Output Done", path.display())
            }
            DistributorEvent::StateChange { new_state, .. } => write!(f, "{}", new_state),
            DistributorEvent::FinalTurnComplete { alive, .. } => {
                write!(f, "Final Turn Complete ({} alive)", alive.len())
            }
        }
    }
}
