//! Worker Proxy - Broker 到 Worker 的连接
//!
//! 负责与已订阅的 Worker 进行 ZeroMQ 通信
//!
//! # Architecture
//!
//! ```text
//! dispatch loop ──▶ ZmqWorkerLink.turn    (DEALER) ──┐
//!                                                     ├──▶ Worker (ROUTER)
//! Pause / Kill  ──▶ ZmqWorkerLink.control (DEALER) ──┘
//! ```
//!
//! 每个 DEALER socket 同一时刻只有一个未完成请求；turn socket 归 dispatch loop
//! 独占，control socket 供 Pause 扇出与 Terminate 使用，两者互不阻塞。
//!
//! [`WorkerLink`] / [`WorkerConnector`] 是 Broker 与传输层之间的接缝，
//! 测试中可以替换为进程内实现。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use gol_protocol::{
    tcp_endpoint, PartialGrid, PauseRequest, RpcClient, RpcError, TurnJob, WorkerCommand,
    WorkerResponse,
};

use crate::error::BrokerError;

/// 到单个 Worker 的 RPC 句柄
#[async_trait]
pub trait WorkerLink: Send + Sync {
    /// Worker 订阅时上报的地址
    fn address(&self) -> &str;

    /// 执行一个分区
    ///
    /// `paused` 为 Broker 的暂停状态：暂停期间等待超时不视为失败。
    async fn execute_turn(
        &self,
        job: TurnJob,
        paused: &watch::Receiver<bool>,
    ) -> Result<PartialGrid, BrokerError>;

    /// 切换 Worker 本地暂停闸门，返回 Worker 报告的状态
    async fn pause(&self, paused: bool) -> Result<bool, BrokerError>;

    /// 让 Worker 进程退出
    async fn terminate(&self) -> Result<(), BrokerError>;
}

/// 根据订阅地址建立 [`WorkerLink`]
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn WorkerLink>, BrokerError>;
}

/// ZeroMQ 连接器
#[derive(Debug, Clone)]
pub struct ZmqConnector {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ZmqConnector {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

#[async_trait]
impl WorkerConnector for ZmqConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn WorkerLink>, BrokerError> {
        let endpoint = tcp_endpoint(address);
        let dial = |e: RpcError| BrokerError::ConnectionFailed {
            address: address.to_string(),
            reason: e.to_string(),
        };

        let turn = RpcClient::connect(&endpoint, self.connect_timeout, self.request_timeout)
            .await
            .map_err(dial)?;
        let control = RpcClient::connect(&endpoint, self.connect_timeout, self.request_timeout)
            .await
            .map_err(dial)?;

        debug!("Connected turn and control sockets to {}", endpoint);

        Ok(Arc::new(ZmqWorkerLink {
            address: address.to_string(),
            turn: Mutex::new(turn),
            control: Mutex::new(control),
            request_timeout: self.request_timeout,
            terminate_timeout: self.connect_timeout,
        }))
    }
}

pub struct ZmqWorkerLink {
    address: String,
    turn: Mutex<RpcClient>,
    control: Mutex<RpcClient>,
    request_timeout: Duration,
    terminate_timeout: Duration,
}

#[async_trait]
impl WorkerLink for ZmqWorkerLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn execute_turn(
        &self,
        job: TurnJob,
        paused: &watch::Receiver<bool>,
    ) -> Result<PartialGrid, BrokerError> {
        let mut client = self.turn.lock().await;
        client.send(&WorkerCommand::ExecuteTurn(job)).await?;

        loop {
            let reply = client
                .recv_timeout::<WorkerResponse>(self.request_timeout)
                .await?;
            let still_paused = *paused.borrow();

            match reply {
                Some(WorkerResponse::TurnCompleted(partial)) => return Ok(partial),
                Some(WorkerResponse::Error(failure)) => return Err(BrokerError::Remote(failure)),
                Some(other) => {
                    return Err(BrokerError::UnexpectedReply(format!("{:?}", other)));
                }
                None if still_paused => {
                    debug!("Turn on {} still parked while paused", self.address);
                }
                None => {
                    client.poison();
                    return Err(RpcError::Timeout {
                        endpoint: client.endpoint().to_string(),
                        timeout_ms: self.request_timeout.as_millis() as u64,
                    }
                    .into());
                }
            }
        }
    }

    async fn pause(&self, paused: bool) -> Result<bool, BrokerError> {
        let mut client = self.control.lock().await;
        let request = WorkerCommand::Pause(PauseRequest { new_state: paused });
        match client.call::<_, WorkerResponse>(&request).await? {
            WorkerResponse::Paused(state) => Ok(state.paused),
            WorkerResponse::Error(failure) => Err(BrokerError::Remote(failure)),
            other => Err(BrokerError::UnexpectedReply(format!("{:?}", other))),
        }
    }

    async fn terminate(&self) -> Result<(), BrokerError> {
        let mut client = self.control.lock().await;
        client.send(&WorkerCommand::Terminate).await?;

        // 已失效的 Worker 不会回复，不为它等满一个 RPC 超时
        match client.recv_timeout::<WorkerResponse>(self.terminate_timeout).await? {
            Some(WorkerResponse::Status(_)) => Ok(()),
            Some(WorkerResponse::Error(failure)) => Err(BrokerError::Remote(failure)),
            Some(other) => Err(BrokerError::UnexpectedReply(format!("{:?}", other))),
            None => {
                client.poison();
                warn!("No reply to Terminate from {}", self.address);
                Ok(())
            }
        }
    }
}
