//! Worker Server - ZeroMQ RPC server for the Worker
//!
//! Exposes the [`Worker`] to the broker over a ROUTER socket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Broker                         │
//! │   turn socket (DEALER)      control socket (DEALER) │
//! └──────────┬───────────────────────────┬──────────────┘
//!            │ ExecuteTurn               │ Pause / Terminate
//!            ▼                           ▼
//! ┌─────────────────────────────────────────────────────┐
//! │               WorkerServer (ROUTER)                 │
//! │                                                     │
//! │  ExecuteTurn ──▶ spawn_blocking ──▶ reply channel ─┐│
//! │  Pause       ──▶ answered inline                   ││
//! │  Terminate   ──▶ reply, then exit loop             ││
//! │        ▲                                           ││
//! │        └────────────── socket owner ◀──────────────┘│
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! - **Request**: broker sends `WorkerCommand` (bincode serialized)
//! - **Response**: worker sends `WorkerResponse` (bincode serialized)
//!
//! Turn computation is moved off the socket loop so a Pause arriving on the
//! control socket is answered while a turn is parked on the pause gate.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use gol_protocol::wire::{Envelope, RouterEndpoint};
use gol_protocol::{
    ErrorCode, PauseState, RpcError, RpcFailure, StatusReport, TurnJob, WorkerCommand,
    WorkerResponse,
};

use super::Worker;

/// A reply produced off the socket loop
struct Reply {
    identity: Vec<u8>,
    response: WorkerResponse,
}

/// Why the serve loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Terminated,
    Shutdown,
}

pub struct WorkerServer {
    worker: Arc<Worker>,
    router: RouterEndpoint,
}

impl WorkerServer {
    /// Bind the ROUTER socket on the configured host and port
    pub async fn bind(worker: Arc<Worker>) -> Result<Self, RpcError> {
        let endpoint = worker.config().bind_endpoint();
        let router = RouterEndpoint::bind(&endpoint).await?;
        tracing::info!(worker = %worker.worker_id(), "Worker listening on {}", router.endpoint());
        Ok(Self { worker, router })
    }

    /// Resolved endpoint (the real port when bound to port 0)
    pub fn endpoint(&self) -> &str {
        self.router.endpoint()
    }

    /// Listening port parsed from the resolved endpoint
    pub fn port(&self) -> Option<u16> {
        self.endpoint().rsplit(':').next()?.parse().ok()
    }

    pub fn worker(&self) -> Arc<Worker> {
        self.worker.clone()
    }

    /// Serve until a Terminate command arrives
    pub async fn run(self) -> Result<ExitReason> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serve until a Terminate command arrives or `shutdown` resolves
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<ExitReason>
    where
        F: Future<Output = ()>,
    {
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Reply>();
        tokio::pin!(shutdown);

        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(worker = %self.worker.worker_id(), "Shutdown requested");
                    break ExitReason::Shutdown;
                }

                Some(reply) = reply_rx.recv() => {
                    if let Err(e) = self.router.send(&reply.identity, &reply.response).await {
                        tracing::error!("Failed to send turn result: {}", e);
                    }
                }

                envelope = self.router.recv::<WorkerCommand>() => {
                    let Envelope { identity, command } = match envelope {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            // No identity to reply to; the caller times out.
                            tracing::warn!("Dropping unreadable request: {}", e);
                            continue;
                        }
                    };

                    match command {
                        WorkerCommand::ExecuteTurn(job) => {
                            self.spawn_turn(identity, job, reply_tx.clone());
                        }
                        WorkerCommand::Pause(request) => {
                            self.worker.set_paused(request.new_state);
                            let response = WorkerResponse::Paused(PauseState {
                                paused: self.worker.is_paused(),
                                turn: 0,
                            });
                            if let Err(e) = self.router.send(&identity, &response).await {
                                tracing::error!("Failed to send pause reply: {}", e);
                            }
                        }
                        WorkerCommand::Terminate => {
                            tracing::info!(worker = %self.worker.worker_id(), "Terminate received");
                            // Let any parked turn run to completion.
                            self.worker.set_paused(false);
                            let response = WorkerResponse::Status(StatusReport::new("terminating"));
                            if let Err(e) = self.router.send(&identity, &response).await {
                                tracing::error!("Failed to send terminate reply: {}", e);
                            }
                            break ExitReason::Terminated;
                        }
                    }
                }
            }
        };

        let stats = self.worker.stats();
        tracing::info!(
            worker = %self.worker.worker_id(),
            turns = stats.turns_executed(),
            rows = stats.rows_computed(),
            "Worker server exited ({:?})",
            reason
        );
        Ok(reason)
    }

    fn spawn_turn(&self, identity: Vec<u8>, job: TurnJob, reply_tx: mpsc::UnboundedSender<Reply>) {
        let worker = self.worker.clone();
        tokio::spawn(async move {
            let response = match tokio::task::spawn_blocking(move || worker.execute_turn(&job)).await {
                Ok(Ok(partial)) => WorkerResponse::TurnCompleted(partial),
                Ok(Err(e)) => {
                    tracing::warn!("Rejected turn: {}", e);
                    WorkerResponse::Error(e.into())
                }
                Err(e) => WorkerResponse::Error(RpcFailure::new(
                    ErrorCode::Internal,
                    format!("turn task failed: {}", e),
                )),
            };
            // The loop is gone after Terminate; the result has nowhere to go.
            let _ = reply_tx.send(Reply { identity, response });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::life;
    use crate::worker::WorkerConfig;
    use gol_protocol::{Cell, Grid, PauseRequest, RpcClient, EXECUTE_TURN_METHOD};
    use std::time::Duration;

    async fn start() -> (String, Arc<Worker>, tokio::task::JoinHandle<Result<ExitReason>>) {
        let worker = Arc::new(Worker::new(WorkerConfig::local()));
        let server = WorkerServer::bind(worker.clone()).await.unwrap();
        let endpoint = server.endpoint().to_string();
        let handle = tokio::spawn(server.run());
        (endpoint, worker, handle)
    }

    async fn client(endpoint: &str) -> RpcClient {
        RpcClient::connect(endpoint, Duration::from_secs(5), Duration::from_secs(5))
            .await
            .unwrap()
    }

    fn glider_job() -> (Grid, WorkerCommand) {
        let grid = Grid::with_alive(
            6,
            6,
            &[
                Cell { x: 1, y: 0 },
                Cell { x: 2, y: 1 },
                Cell { x: 0, y: 2 },
                Cell { x: 1, y: 2 },
                Cell { x: 2, y: 2 },
            ],
        );
        let command = WorkerCommand::ExecuteTurn(TurnJob {
            method: EXECUTE_TURN_METHOD.to_string(),
            grid: Arc::new(grid.clone()),
            row_start: 0,
            row_end: 6,
        });
        (grid, command)
    }

    #[tokio::test]
    async fn test_execute_turn_over_zmq() {
        let (endpoint, _worker, handle) = start().await;
        let mut turn = client(&endpoint).await;

        let (grid, command) = glider_job();
        let response: WorkerResponse = turn.call(&command).await.unwrap();
        match response {
            WorkerResponse::TurnCompleted(partial) => {
                assert_eq!(partial.cells, life::step(&grid).cells())
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let response: WorkerResponse = turn.call(&WorkerCommand::Terminate).await.unwrap();
        assert!(matches!(response, WorkerResponse::Status(_)));
        assert_eq!(handle.await.unwrap().unwrap(), ExitReason::Terminated);
    }

    #[tokio::test]
    async fn test_pause_answered_while_turn_parked() {
        let (endpoint, worker, handle) = start().await;
        let mut turn = client(&endpoint).await;
        let mut control = client(&endpoint).await;

        let response: WorkerResponse = control
            .call(&WorkerCommand::Pause(PauseRequest { new_state: true }))
            .await
            .unwrap();
        assert!(matches!(
            response,
            WorkerResponse::Paused(PauseState { paused: true, .. })
        ));

        let (_, command) = glider_job();
        turn.send(&command).await.unwrap();
        let parked: Option<WorkerResponse> =
            turn.recv_timeout(Duration::from_millis(100)).await.unwrap();
        assert!(parked.is_none());
        assert_eq!(worker.stats().turns_executed(), 0);

        let response: WorkerResponse = control
            .call(&WorkerCommand::Pause(PauseRequest { new_state: false }))
            .await
            .unwrap();
        assert!(matches!(
            response,
            WorkerResponse::Paused(PauseState { paused: false, .. })
        ));

        let done: Option<WorkerResponse> = turn.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(done, Some(WorkerResponse::TurnCompleted(_))));

        let _: WorkerResponse = control.call(&WorkerCommand::Terminate).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_method_is_an_error_reply() {
        let (endpoint, _worker, handle) = start().await;
        let mut turn = client(&endpoint).await;

        let (grid, _) = glider_job();
        let command = WorkerCommand::ExecuteTurn(TurnJob {
            method: "Worker.Unknown".to_string(),
            grid: Arc::new(grid),
            row_start: 0,
            row_end: 6,
        });
        let response: WorkerResponse = turn.call(&command).await.unwrap();
        match response {
            WorkerResponse::Error(failure) => assert_eq!(failure.code, ErrorCode::UnknownMethod),
            other => panic!("unexpected response: {:?}", other),
        }

        let _: WorkerResponse = turn.call(&WorkerCommand::Terminate).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}
