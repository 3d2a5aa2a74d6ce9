//! Wire - ZeroMQ framing and request/response plumbing
//!
//! ```text
//! RpcClient (DEALER)                         RouterEndpoint (ROUTER)
//!   send:  [empty, bincode(req)]  ───────▶   recv: [identity, empty, bincode(req)]
//!   recv:  [empty, bincode(resp)] ◀───────   send: [identity, empty, bincode(resp)]
//! ```
//!
//! 每个 `RpcClient` 同一时刻只允许一个未完成的请求；需要并发调用的一方
//! （Broker 对 Worker、Client 对 Broker）为不同用途各开一个 socket。

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use zeromq::{Socket, SocketRecv, SocketSend, ZmqMessage};

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("ZeroMQ transport error: {0}")]
    Transport(#[from] zeromq::ZmqError),

    #[error("Serialization error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Timed out connecting to {endpoint}")]
    ConnectTimeout { endpoint: String },

    #[error("No response from {endpoint} within {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("Malformed message: {0}")]
    MalformedFrame(String),

    #[error("Connection to {endpoint} is unusable after an earlier timeout")]
    Poisoned { endpoint: String },
}

/// 请求端：DEALER socket + bincode
pub struct RpcClient {
    socket: zeromq::DealerSocket,
    endpoint: String,
    request_timeout: Duration,
    in_flight: bool,
    poisoned: bool,
}

impl RpcClient {
    /// 连接到 ROUTER 端点，连接过程受 `connect_timeout` 限制
    pub async fn connect(
        endpoint: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, RpcError> {
        let mut socket = zeromq::DealerSocket::new();
        tracing::debug!("Connecting DEALER to {}", endpoint);

        match tokio::time::timeout(connect_timeout, socket.connect(endpoint)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RpcError::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                })
            }
        }

        Ok(Self {
            socket,
            endpoint: endpoint.to_string(),
            request_timeout,
            in_flight: false,
            poisoned: false,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// 发送请求并在默认超时内等待响应
    pub async fn call<Req, Resp>(&mut self, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let timeout = self.request_timeout;
        self.send(request).await?;
        match self.recv_timeout(timeout).await? {
            Some(response) => Ok(response),
            None => {
                // 迟到的响应会被误认为下一个请求的响应
                self.poisoned = true;
                Err(RpcError::Timeout {
                    endpoint: self.endpoint.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// 发送请求并无限期等待响应（用于长时间运行的 Publish）
    pub async fn call_unbounded<Req, Resp>(&mut self, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.send(request).await?;
        self.recv().await
    }

    /// 只发送请求；随后用 [`recv_timeout`](Self::recv_timeout) 取回响应
    pub async fn send<Req: Serialize>(&mut self, request: &Req) -> Result<(), RpcError> {
        if self.poisoned || self.in_flight {
            return Err(RpcError::Poisoned {
                endpoint: self.endpoint.clone(),
            });
        }

        let payload = bincode::serialize(request)?;

        // DealerSocket 发送格式：[empty_frame, payload]
        let mut msg = ZmqMessage::from(Vec::<u8>::new());
        msg.push_back(payload.into());
        self.socket.send(msg).await?;
        self.in_flight = true;
        Ok(())
    }

    /// 等待当前请求的响应
    ///
    /// 超时返回 `Ok(None)`，请求仍视为未完成，可以再次等待。
    pub async fn recv_timeout<Resp: DeserializeOwned>(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Resp>, RpcError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn recv<Resp: DeserializeOwned>(&mut self) -> Result<Resp, RpcError> {
        let msg = self.socket.recv().await;
        self.in_flight = false;

        // DealerSocket 接收格式：[empty_frame, payload]
        let payload = msg?
            .into_vec()
            .pop()
            .ok_or_else(|| RpcError::MalformedFrame("empty response".to_string()))?;

        Ok(bincode::deserialize(&payload)?)
    }

    /// 放弃当前请求，之后的调用全部失败
    pub fn poison(&mut self) {
        self.poisoned = true;
    }
}

/// 服务端：ROUTER socket + bincode
pub struct RouterEndpoint {
    socket: zeromq::RouterSocket,
    endpoint: String,
}

/// 一条带路由身份的请求
pub struct Envelope<C> {
    pub identity: Vec<u8>,
    pub command: C,
}

impl RouterEndpoint {
    /// 绑定 ROUTER socket，返回实际绑定的地址（端口 0 时会被解析）
    pub async fn bind(endpoint: &str) -> Result<Self, RpcError> {
        let mut socket = zeromq::RouterSocket::new();
        let bound = socket.bind(endpoint).await?;
        let endpoint = bound.to_string();
        tracing::info!("ROUTER bound to {}", endpoint);
        Ok(Self { socket, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 接收下一条请求
    ///
    /// 格式错误的帧返回 `MalformedFrame`，调用方应记录后继续循环。
    pub async fn recv<C: DeserializeOwned>(&mut self) -> Result<Envelope<C>, RpcError> {
        let msg = self.socket.recv().await?;

        // RouterSocket 收到的消息格式：[address, empty_frame, payload]
        let frames = msg.into_vec();
        if frames.len() < 3 {
            return Err(RpcError::MalformedFrame(format!(
                "expected at least 3 frames, got {}",
                frames.len()
            )));
        }

        let identity = frames[0].to_vec();
        let command = bincode::deserialize(&frames[frames.len() - 1])?;
        Ok(Envelope { identity, command })
    }

    /// 向指定身份发送响应
    pub async fn send<R: Serialize>(&mut self, identity: &[u8], response: &R) -> Result<(), RpcError> {
        let payload = bincode::serialize(response)?;
        if payload.is_empty() {
            return Err(RpcError::MalformedFrame("empty response payload".to_string()));
        }

        // RouterSocket 发送格式：[address, empty_frame, payload]
        let mut msg = ZmqMessage::from(identity.to_vec());
        msg.push_back(Vec::<u8>::new().into());
        msg.push_back(payload.into());
        self.socket.send(msg).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BrokerCommand, BrokerResponse, StatusReport};

    #[tokio::test]
    async fn test_router_dealer_round_trip() {
        let mut router = RouterEndpoint::bind("tcp://127.0.0.1:0").await.unwrap();
        let endpoint = router.endpoint().to_string();

        let server = tokio::spawn(async move {
            let envelope: Envelope<BrokerCommand> = router.recv().await.unwrap();
            assert!(matches!(envelope.command, BrokerCommand::GetAlive));
            router
                .send(&envelope.identity, &BrokerResponse::Status(StatusReport::new("pong")))
                .await
                .unwrap();
        });

        let mut client = RpcClient::connect(
            &endpoint,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let response: BrokerResponse = client.call(&BrokerCommand::GetAlive).await.unwrap();
        match response {
            BrokerResponse::Status(status) => assert_eq!(status.message, "pong"),
            other => panic!("unexpected response: {:?}", other),
        }

        server.await.unwrap();
    }
}
