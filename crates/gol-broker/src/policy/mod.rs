//! Partition Policy - 分区策略
//!
//! 决定每个回合如何把网格的行切分给 Worker。
//! 屏障与合并逻辑只依赖 [`PartitionPolicy`] 的输出：
//! 一组首尾相接、覆盖 `[0, height)` 的半开行区间。
//!
//! # 可选策略
//!
//! ```text
//! height = 10, threads = 4
//!
//! EvenSplit:  [0,2) [2,4) [4,6) [6,10)     前 n-1 个各 floor(h/n) 行，余数给最后一个
//! Balanced:   [0,3) [3,6) [6,8) [8,10)     余数逐行分给前几个
//! ```

pub mod balanced;
pub mod even;

pub use balanced::Balanced;
pub use even::EvenSplit;

use gol_protocol::RowRange;
use serde::{Deserialize, Serialize};

/// 分区策略 Trait
///
/// 实现必须满足：`1 <= threads <= height` 时返回恰好 `threads` 个非空区间，
/// 按顺序首尾相接且并集为 `[0, height)`。
pub trait PartitionPolicy: Send + Sync {
    fn partition(&self, height: usize, threads: usize) -> Vec<RowRange>;

    fn name(&self) -> &'static str;
}

/// 按名称构建策略（配置文件 / 命令行使用）
pub fn from_name(name: &str) -> Option<Box<dyn PartitionPolicy>> {
    match name {
        "even" => Some(Box::new(EvenSplit)),
        "balanced" => Some(Box::new(Balanced)),
        _ => None,
    }
}

/// Worker 失效后其未完成分区的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// 转交给仍存活的 Worker；没有存活 Worker 时本次运行以 WorkerLost 失败
    Redistribute,
    /// 分区留在失效 Worker 的队列中，回合停滞直到 Reset
    Stall,
}

impl FailurePolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "redistribute" => Some(FailurePolicy::Redistribute),
            "stall" => Some(FailurePolicy::Stall),
            _ => None,
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Redistribute
    }
}
