//! In-process workers for driving the broker without sockets.
//!
//! Each [`LocalLink`] wraps a real `gol_worker::Worker`, so turns are computed
//! by the same code and parked on the same pause gate as a networked worker.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use gol_broker::coordinator::{Broker, CoordinatorConfig};
use gol_broker::policy::EvenSplit;
use gol_broker::{BrokerError, WorkerConnector, WorkerLink};
use gol_protocol::{
    Cell, Grid, PartialGrid, PublishRequest, RpcError, Subscription, TurnJob, EXECUTE_TURN_METHOD,
};
use gol_worker::{life, Worker, WorkerConfig};

pub struct LocalLink {
    address: String,
    worker: Arc<Worker>,
    delay: Duration,
    pause_delay: Duration,
    /// Fail every turn once this many turns have been executed
    fail_after: AtomicU64,
    /// Reply with one cell too many
    corrupt: AtomicBool,
    /// Panic inside the next execute_turn
    panic_next: AtomicBool,
    turns: AtomicU64,
    terminated: AtomicBool,
}

impl LocalLink {
    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    pub fn turns(&self) -> u64 {
        self.turns.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Make the link behave like an unreachable worker from now on
    pub fn fail_now(&self) {
        self.fail_after.store(0, Ordering::SeqCst);
    }

    pub fn fail_after(&self, turns: u64) {
        self.fail_after.store(turns, Ordering::SeqCst);
    }

    pub fn corrupt_replies(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::SeqCst);
    }

    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerLink for LocalLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn execute_turn(
        &self,
        job: TurnJob,
        _paused: &watch::Receiver<bool>,
    ) -> Result<PartialGrid, BrokerError> {
        if self.turns.load(Ordering::SeqCst) >= self.fail_after.load(Ordering::SeqCst) {
            return Err(BrokerError::Rpc(RpcError::Timeout {
                endpoint: self.address.clone(),
                timeout_ms: 0,
            }));
        }
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("{} crashed while executing a turn", self.address);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let worker = self.worker.clone();
        let result = tokio::task::spawn_blocking(move || worker.execute_turn(&job))
            .await
            .map_err(|e| BrokerError::Internal(e.to_string()))?;

        self.turns.fetch_add(1, Ordering::SeqCst);
        let mut partial = result.map_err(|e| BrokerError::Remote(e.into()))?;
        if self.corrupt.load(Ordering::SeqCst) {
            partial.cells.push(gol_protocol::DEAD);
        }
        Ok(partial)
    }

    async fn pause(&self, paused: bool) -> Result<bool, BrokerError> {
        if !self.pause_delay.is_zero() {
            tokio::time::sleep(self.pause_delay).await;
        }
        self.worker.set_paused(paused);
        Ok(self.worker.is_paused())
    }

    async fn terminate(&self) -> Result<(), BrokerError> {
        self.worker.set_paused(false);
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out [`LocalLink`]s; addresses starting with `unreachable` are refused.
#[derive(Default)]
pub struct LocalConnector {
    delay: Duration,
    pause_delay: Duration,
    links: Mutex<HashMap<String, Arc<LocalLink>>>,
}

impl LocalConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Links whose pause RPC takes `delay` to complete
    pub fn with_pause_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            pause_delay: delay,
            ..Self::default()
        })
    }

    pub fn link(&self, address: &str) -> Arc<LocalLink> {
        self.links.lock().unwrap()[address].clone()
    }

    pub fn links(&self) -> Vec<Arc<LocalLink>> {
        self.links.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl WorkerConnector for LocalConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn WorkerLink>, BrokerError> {
        if address.starts_with("unreachable") {
            return Err(BrokerError::ConnectionFailed {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let link = Arc::new(LocalLink {
            address: address.to_string(),
            worker: Arc::new(Worker::new(WorkerConfig::local().with_id(address))),
            delay: self.delay,
            pause_delay: self.pause_delay,
            fail_after: AtomicU64::new(u64::MAX),
            corrupt: AtomicBool::new(false),
            panic_next: AtomicBool::new(false),
            turns: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
        });
        self.links
            .lock()
            .unwrap()
            .insert(address.to_string(), link.clone());
        Ok(link)
    }
}

pub fn broker(config: CoordinatorConfig, connector: Arc<LocalConnector>) -> Arc<Broker> {
    Arc::new(Broker::new(config, Box::new(EvenSplit), connector))
}

pub fn address(n: usize) -> String {
    format!("local-{}", n)
}

pub async fn subscribe(broker: &Arc<Broker>, address: &str) -> Result<String, BrokerError> {
    broker
        .subscribe(Subscription {
            worker_address: address.to_string(),
            callback: EXECUTE_TURN_METHOD.to_string(),
        })
        .await
        .map(|status| status.message)
}

/// Subscribe `n` workers named `local-0..n`
pub async fn subscribe_workers(broker: &Arc<Broker>, n: usize) {
    for i in 0..n {
        subscribe(broker, &address(i)).await.unwrap();
    }
}

pub fn publish_request(grid: Grid, turns: u64, threads: usize) -> PublishRequest {
    PublishRequest {
        grid,
        threads,
        turns,
    }
}

/// Sequential reference: apply the rule `turns` times
pub fn reference(grid: &Grid, turns: u64) -> Grid {
    let mut grid = grid.clone();
    for _ in 0..turns {
        grid = life::step(&grid);
    }
    grid
}

/// Deterministic pseudo-random soup
pub fn soup(width: usize, height: usize, seed: u64) -> Grid {
    let mut state = seed | 1;
    let mut alive = Vec::new();
    for y in 0..height {
        for x in 0..width {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            if state % 3 == 0 {
                alive.push(Cell { x, y });
            }
        }
    }
    Grid::with_alive(width, height, &alive)
}

pub fn glider(size: usize) -> Grid {
    let cells = [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)]
        .iter()
        .map(|&(x, y)| Cell { x, y })
        .collect::<Vec<_>>();
    Grid::with_alive(size, size, &cells)
}

/// Grid from rows of 0/1 flags
pub fn from_flags(rows: &[&[u8]]) -> Grid {
    Grid::from_rows(
        rows.iter()
            .map(|row| row.iter().map(|&f| if f == 1 { gol_protocol::ALIVE } else { gol_protocol::DEAD }).collect())
            .collect(),
    )
    .unwrap()
}

/// Poll `cond` until it holds or `timeout` elapses
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
