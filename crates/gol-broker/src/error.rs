//! Broker 错误类型
//!
//! 库内部使用 [`BrokerError`]，跨线路时转换为 [`RpcFailure`]。

use gol_protocol::{ErrorCode, RpcError, RpcFailure};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Registry full ({capacity} workers)")]
    CapacityExhausted { capacity: usize },

    #[error("Cannot reach worker at {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidParams(String),

    #[error("Worker lost: {0}")]
    WorkerLost(String),

    #[error("Turn {turn} did not complete within {timeout_ms} ms")]
    TurnTimeout { turn: u64, timeout_ms: u64 },

    #[error("Broker is shutting down")]
    ShuttingDown,

    #[error("Worker RPC failed: {0}")]
    Rpc(#[from] RpcError),

    /// Worker 处理了请求但返回错误
    #[error("Worker rejected request: {0}")]
    Remote(RpcFailure),

    #[error("Unexpected reply from worker: {0}")]
    UnexpectedReply(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BrokerError::CapacityExhausted { .. } => ErrorCode::CapacityExhausted,
            BrokerError::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            BrokerError::InvalidParams(_) => ErrorCode::InvalidParams,
            BrokerError::WorkerLost(_) => ErrorCode::WorkerLost,
            BrokerError::TurnTimeout { .. } => ErrorCode::TurnTimeout,
            BrokerError::ShuttingDown => ErrorCode::ShuttingDown,
            BrokerError::Rpc(_) | BrokerError::UnexpectedReply(_) => ErrorCode::CommunicationError,
            BrokerError::Remote(failure) => failure.code,
            BrokerError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// 传输层故障（Worker 不可达或超时），区别于 Worker 正常返回的错误
    pub fn is_transport(&self) -> bool {
        matches!(self, BrokerError::Rpc(_) | BrokerError::UnexpectedReply(_))
    }
}

impl From<BrokerError> for RpcFailure {
    fn from(err: BrokerError) -> Self {
        RpcFailure::new(err.code(), err.to_string())
    }
}
