//! ZMQ Frontend Server - 接收来自 Client / Worker 的 Broker 命令
//!
//! 实现 ZeroMQ ROUTER 模式，与 Client 和 Worker 的 DEALER socket 通信。
//!
//! ## 架构
//! ```text
//! ┌──────────────┐   BrokerCommand    ┌──────────────┐
//! │ Client/Worker│ ─────────────────▶ │  ZMQ Socket  │
//! │   (DEALER)   │ ◀───────────────── │   (ROUTER)   │
//! └──────────────┘   BrokerResponse   └──────┬───────┘
//!                                            │ 每个请求一个任务
//!                                            ▼
//!                                     ┌──────────────┐
//!                                     │    Broker    │
//!                                     └──────┬───────┘
//!                                            │ 结果
//!                                            ▼
//!                                      reply channel ──▶ socket owner
//! ```
//!
//! Publish 会阻塞整个运行，因此每个请求都在独立任务中处理，
//! 只有持有 socket 的循环负责发送响应。
//! Broker 进入关闭状态后停止接收新请求，把已在处理中的响应发完再退出。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use gol_protocol::wire::{Envelope, RouterEndpoint};
use gol_protocol::{tcp_endpoint, BrokerCommand, BrokerResponse, RpcError};

use crate::coordinator::Broker;

/// 关闭时等待处理中响应的最长时间
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// 由请求任务产生、交给 socket 循环发送的响应
struct Reply {
    identity: Vec<u8>,
    response: BrokerResponse,
}

/// ZMQ Frontend Server
pub struct BrokerServer {
    broker: Arc<Broker>,
    router: RouterEndpoint,
}

impl BrokerServer {
    /// 绑定 ROUTER socket（`address` 为 "host:port" 或完整 endpoint）
    pub async fn bind(broker: Arc<Broker>, address: &str) -> Result<Self, RpcError> {
        let router = RouterEndpoint::bind(&tcp_endpoint(address)).await?;
        tracing::info!("✅ Broker listening on {}", router.endpoint());
        Ok(Self { broker, router })
    }

    /// 实际绑定的 endpoint（端口 0 时为解析后的端口）
    pub fn endpoint(&self) -> &str {
        self.router.endpoint()
    }

    pub fn broker(&self) -> Arc<Broker> {
        self.broker.clone()
    }

    /// 服务直到 Broker 被关闭（KillBroker 或 [`Broker::kill`]）
    pub async fn run(mut self) -> Result<()> {
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Reply>();
        let mut shutdown = self.broker.shutdown_signal();
        let mut reply_tx = Some(reply_tx);

        tracing::info!("Broker receiving loop started on: {}", self.router.endpoint());

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                Some(reply) = reply_rx.recv() => {
                    self.send_reply(reply).await;
                }

                envelope = self.router.recv::<BrokerCommand>() => {
                    let Envelope { identity, command } = match envelope {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            tracing::warn!("Dropping unreadable request: {}", e);
                            continue;
                        }
                    };
                    if let Some(tx) = &reply_tx {
                        spawn_handler(self.broker.clone(), identity, command, tx.clone());
                    }
                }
            }
        }

        // 不再接收新请求；通道在所有处理任务结束后关闭
        drop(reply_tx.take());
        tracing::info!("Broker shutting down, flushing in-flight replies");
        loop {
            match tokio::time::timeout(DRAIN_GRACE, reply_rx.recv()).await {
                Ok(Some(reply)) => self.send_reply(reply).await,
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("Gave up waiting for in-flight requests");
                    break;
                }
            }
        }

        tracing::info!("Broker server exited");
        Ok(())
    }

    async fn send_reply(&mut self, reply: Reply) {
        if let Err(e) = self.router.send(&reply.identity, &reply.response).await {
            tracing::error!("Failed to send reply: {}", e);
        }
    }
}

fn spawn_handler(
    broker: Arc<Broker>,
    identity: Vec<u8>,
    command: BrokerCommand,
    reply_tx: mpsc::UnboundedSender<Reply>,
) {
    tokio::spawn(async move {
        let response = handle_command(&broker, command).await;
        let _ = reply_tx.send(Reply { identity, response });
    });
}

/// 把一条命令映射到 Broker 方法
pub async fn handle_command(broker: &Arc<Broker>, command: BrokerCommand) -> BrokerResponse {
    match command {
        BrokerCommand::Subscribe(sub) => {
            tracing::debug!("Received Subscribe from {}", sub.worker_address);
            match broker.subscribe(sub).await {
                Ok(status) => BrokerResponse::Status(status),
                Err(e) => {
                    tracing::warn!("Subscribe rejected: {}", e);
                    BrokerResponse::Error(e.into())
                }
            }
        }
        BrokerCommand::Publish(request) => {
            tracing::debug!(
                "Received Publish: {}x{}, {} turns, {} threads",
                request.grid.width(),
                request.grid.height(),
                request.turns,
                request.threads
            );
            match broker.publish(request).await {
                Ok(world) => BrokerResponse::World(world),
                Err(e) => BrokerResponse::Error(e.into()),
            }
        }
        BrokerCommand::Pause(request) => {
            BrokerResponse::Paused(broker.pause(request.new_state).await)
        }
        BrokerCommand::Reset(request) => {
            tracing::info!("Received Reset (kill={})", request.kill);
            match broker.reset(request.kill).await {
                Ok(status) => BrokerResponse::Status(status),
                Err(e) => BrokerResponse::Error(e.into()),
            }
        }
        BrokerCommand::GetAlive => BrokerResponse::Alive(broker.get_alive()),
        BrokerCommand::RetrieveWorld => BrokerResponse::World(broker.retrieve_world()),
        BrokerCommand::KillBroker => {
            tracing::info!("Received KillBroker");
            BrokerResponse::Status(broker.kill().await)
        }
    }
}
