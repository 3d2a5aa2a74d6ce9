//! Game of Life Protocol - Broker / Worker / Client 之间的消息定义
//!
//! ```text
//! Client (DEALER) ──BrokerCommand──▶ Broker (ROUTER)
//!                                      │
//!                                      │ WorkerCommand
//!                                      ▼
//!                                 Worker (ROUTER)
//! ```
//!
//! 所有消息均使用 bincode 序列化，帧格式见 [`wire`]。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod grid;
pub mod wire;

pub use grid::{Cell, Grid, GridError, PartialGrid, RowRange, ALIVE, DEAD};
pub use wire::{RpcClient, RpcError};

/// Worker 暴露的单回合计算方法名（Subscribe 时作为 callback 上报）
pub const EXECUTE_TURN_METHOD: &str = "Worker.ExecuteTurn";

/// Broker 默认监听端口
pub const DEFAULT_BROKER_PORT: u16 = 8030;

/// Worker 默认监听端口
pub const DEFAULT_WORKER_PORT: u16 = 8080;

// ---------------------------------------------------------------------------
// Client/Worker -> Broker
// ---------------------------------------------------------------------------

/// 发往 Broker 的命令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrokerCommand {
    /// Worker 注册自身
    Subscribe(Subscription),
    /// 提交一次完整运行（阻塞直到运行结束）
    Publish(PublishRequest),
    /// 暂停 / 恢复
    Pause(PauseRequest),
    /// 中断当前运行（kill=true 时同时关闭所有 Worker）
    Reset(ResetRequest),
    /// 当前回合与存活细胞数
    GetAlive,
    /// 当前世界快照
    RetrieveWorld,
    /// 关闭 Broker 进程
    KillBroker,
}

/// Broker 的响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrokerResponse {
    Status(StatusReport),
    World(WorldSnapshot),
    Paused(PauseState),
    Alive(AliveCount),
    Error(RpcFailure),
}

/// Worker 注册信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Worker 监听地址（"host:port" 或 "tcp://host:port"）
    pub worker_address: String,

    /// Worker 执行回合的方法名
    pub callback: String,
}

/// 运行请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    /// 初始世界
    pub grid: Grid,

    /// 期望的并行度（会被限制为已注册 Worker 数）
    pub threads: usize,

    /// 回合数
    pub turns: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PauseRequest {
    pub new_state: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResetRequest {
    pub kill: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub message: String,
}

impl StatusReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// 世界快照（Publish 与 RetrieveWorld 共用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub grid: Grid,
    pub turn: u64,
}

/// 暂停状态
///
/// Worker 的响应中 `turn` 恒为 0（Worker 不跟踪回合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseState {
    pub paused: bool,
    pub turn: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliveCount {
    pub turn: u64,
    pub count: usize,
}

// ---------------------------------------------------------------------------
// Broker -> Worker
// ---------------------------------------------------------------------------

/// 发往 Worker 的命令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerCommand {
    ExecuteTurn(TurnJob),
    Pause(PauseRequest),
    Terminate,
}

/// Worker 的响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerResponse {
    TurnCompleted(PartialGrid),
    Paused(PauseState),
    Status(StatusReport),
    Error(RpcFailure),
}

/// 单个分区任务
///
/// 携带完整的只读世界（环面邻居查找需要全局可见），
/// Worker 只计算 `[row_start, row_end)` 的行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnJob {
    /// 调用的方法名，必须与 Worker 注册时的 callback 一致
    pub method: String,

    /// 本回合开始时的完整世界
    pub grid: Arc<Grid>,

    pub row_start: usize,
    pub row_end: usize,
}

impl TurnJob {
    pub fn rows(&self) -> RowRange {
        RowRange::new(self.row_start, self.row_end)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// 错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 注册表已满
    CapacityExhausted,
    /// 无法连接对端
    ConnectionFailed,
    /// 参数非法
    InvalidParams,
    /// 未知的回调方法
    UnknownMethod,
    /// 所有可用 Worker 均已失效
    WorkerLost,
    /// 回合屏障超时
    TurnTimeout,
    /// Broker 正在关闭
    ShuttingDown,
    /// 通信 / 序列化错误
    CommunicationError,
    Internal,
}

/// 跨线路传递的错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcFailure {}

/// 把 "host:port" 规范化为 ZeroMQ 的 tcp endpoint
pub fn tcp_endpoint(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("tcp://{}", address)
    }
}
