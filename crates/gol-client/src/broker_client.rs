//! Broker Client - 与 Broker 的 RPC 通信
//!
//! 每个 DEALER socket 同一时刻只能有一个未完成请求，因此使用两个 socket：
//!
//! ```text
//! publish()                         ──▶ run socket     (DEALER) ──┐
//! pause / get_alive / retrieve_world                               ├──▶ Broker (ROUTER)
//! reset / kill_broker               ──▶ control socket (DEALER) ──┘
//! ```
//!
//! Publish 可能运行很久，不设超时；其余调用使用常规 RPC 超时。

use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use gol_protocol::{
    AliveCount, BrokerCommand, BrokerResponse, Grid, PauseRequest, PauseState, PublishRequest,
    ResetRequest, RpcClient, RpcError, RpcFailure, StatusReport, WorldSnapshot,
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Broker RPC failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("Broker returned an error: {0}")]
    Broker(RpcFailure),

    #[error("Unexpected reply from broker: {0}")]
    UnexpectedReply(String),
}

pub struct BrokerClient {
    endpoint: String,
    run: Mutex<RpcClient>,
    control: Mutex<RpcClient>,
}

impl BrokerClient {
    /// 连接两个 DEALER socket 到 Broker
    pub async fn connect(
        endpoint: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let run = RpcClient::connect(endpoint, connect_timeout, request_timeout).await?;
        let control = RpcClient::connect(endpoint, connect_timeout, request_timeout).await?;
        tracing::info!("✅ Connected to broker at {}", endpoint);

        Ok(Self {
            endpoint: endpoint.to_string(),
            run: Mutex::new(run),
            control: Mutex::new(control),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 提交一次运行并等待其结束
    pub async fn publish(
        &self,
        grid: Grid,
        turns: u64,
        threads: usize,
    ) -> Result<WorldSnapshot, ClientError> {
        let command = BrokerCommand::Publish(PublishRequest {
            grid,
            threads,
            turns,
        });
        let response = self.run.lock().await.call_unbounded(&command).await?;
        match response {
            BrokerResponse::World(world) => Ok(world),
            other => Err(unexpected(other)),
        }
    }

    pub async fn pause(&self, paused: bool) -> Result<PauseState, ClientError> {
        match self
            .control_call(BrokerCommand::Pause(PauseRequest { new_state: paused }))
            .await?
        {
            BrokerResponse::Paused(state) => Ok(state),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_alive(&self) -> Result<AliveCount, ClientError> {
        match self.control_call(BrokerCommand::GetAlive).await? {
            BrokerResponse::Alive(alive) => Ok(alive),
            other => Err(unexpected(other)),
        }
    }

    pub async fn retrieve_world(&self) -> Result<WorldSnapshot, ClientError> {
        match self.control_call(BrokerCommand::RetrieveWorld).await? {
            BrokerResponse::World(world) => Ok(world),
            other => Err(unexpected(other)),
        }
    }

    pub async fn reset(&self, kill: bool) -> Result<StatusReport, ClientError> {
        match self
            .control_call(BrokerCommand::Reset(ResetRequest { kill }))
            .await?
        {
            BrokerResponse::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn kill_broker(&self) -> Result<StatusReport, ClientError> {
        match self.control_call(BrokerCommand::KillBroker).await? {
            BrokerResponse::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    async fn control_call(&self, command: BrokerCommand) -> Result<BrokerResponse, ClientError> {
        Ok(self.control.lock().await.call(&command).await?)
    }
}

fn unexpected(response: BrokerResponse) -> ClientError {
    match response {
        BrokerResponse::Error(failure) => ClientError::Broker(failure),
        other => ClientError::UnexpectedReply(format!("{:?}", other)),
    }
}
