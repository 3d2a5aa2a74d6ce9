//! Distributor - 客户端事件循环
//!
//! 读取初始世界，把整个运行作为一次 Publish 提交给 Broker，
//! 在运行期间通过控制 socket 响应按键和周期性统计。
//!
//! ```text
//!                 ┌─────────────────────────────────────┐
//!  publish task ─▶│                                     │
//!  ticker (2s)  ─▶│  select! ──▶ BrokerClient (control) │──▶ DistributorEvent
//!  key commands ─▶│                                     │
//!                 └─────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use gol_protocol::WorldSnapshot;

use crate::broker_client::{BrokerClient, ClientError};
use crate::events::{DistributorEvent, State};
use crate::keys::ControlCommand;
use crate::pgm;

/// 运行参数
#[derive(Debug, Clone)]
pub struct Params {
    pub turns: u64,
    pub threads: usize,
    pub image_width: usize,
    pub image_height: usize,
}

/// 输入输出目录与统计间隔
#[derive(Debug, Clone)]
pub struct IoSettings {
    pub images_dir: PathBuf,
    pub out_dir: PathBuf,
    pub tick: Duration,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("images"),
            out_dir: PathBuf::from("out"),
            tick: Duration::from_secs(2),
        }
    }
}

/// 事件循环的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 运行完成全部回合（或被其他客户端中断）
    Completed { turn: u64 },
    /// `q`：Broker 与 Worker 保持运行
    Quit { turn: u64 },
    /// `k`：Worker 与 Broker 均已关闭
    Killed { turn: u64 },
}

type PublishHandle = JoinHandle<Result<WorldSnapshot, ClientError>>;

pub struct Distributor {
    client: Arc<BrokerClient>,
    params: Params,
    io: IoSettings,
    events: mpsc::Sender<DistributorEvent>,
    paused: bool,
}

impl Distributor {
    pub fn new(
        client: Arc<BrokerClient>,
        params: Params,
        io: IoSettings,
        events: mpsc::Sender<DistributorEvent>,
    ) -> Self {
        Self {
            client,
            params,
            io,
            events,
            paused: false,
        }
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<ControlCommand>) -> Result<Outcome> {
        let (width, height) = (self.params.image_width, self.params.image_height);
        let path = pgm::input_path(&self.io.images_dir, width, height);
        let grid = pgm::read(&path).context("Failed to load initial world")?;
        if grid.width() != width || grid.height() != height {
            anyhow::bail!(
                "{} is {}x{}, expected {}x{}",
                path.display(),
                grid.width(),
                grid.height(),
                width,
                height
            );
        }
        tracing::info!(
            "Loaded {} ({} alive), publishing {} turns on {} threads",
            path.display(),
            grid.alive_count(),
            self.params.turns,
            self.params.threads
        );

        let mut publish: PublishHandle = {
            let client = self.client.clone();
            let (turns, threads) = (self.params.turns, self.params.threads);
            tokio::spawn(async move { client.publish(grid, turns, threads).await })
        };

        let mut ticker = tokio::time::interval_at(Instant::now() + self.io.tick, self.io.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        loop {
            tokio::select! {
                result = &mut publish => {
                    let world = result.context("Publish task failed")??;
                    return self.finish(world).await;
                }

                _ = ticker.tick() => {
                    match self.client.get_alive().await {
                        Ok(alive) => {
                            self.emit(DistributorEvent::AliveCellsCount {
                                completed_turns: alive.turn,
                                cells_count: alive.count,
                            })
                            .await;
                        }
                        Err(e) => tracing::warn!("GetAlive failed: {}", e),
                    }
                }

                command = commands.recv(), if commands_open => {
                    match command {
                        None => commands_open = false,
                        Some(ControlCommand::Pause) => self.toggle_pause().await?,
                        Some(ControlCommand::Save) => {
                            self.save_snapshot().await?;
                        }
                        Some(ControlCommand::Quit) => return self.quit(publish).await,
                        Some(ControlCommand::Kill) => return self.kill(publish).await,
                    }
                }
            }
        }
    }

    async fn toggle_pause(&mut self) -> Result<()> {
        let state = self
            .client
            .pause(!self.paused)
            .await
            .context("Pause request failed")?;
        self.paused = state.paused;

        let new_state = if state.paused {
            tracing::info!("Paused at turn {}", state.turn);
            State::Paused
        } else {
            tracing::info!("Continuing from turn {}", state.turn);
            State::Executing
        };
        self.emit(DistributorEvent::StateChange {
            completed_turns: state.turn,
            new_state,
        })
        .await;
        Ok(())
    }

    /// 保存当前世界，返回其回合数
    async fn save_snapshot(&mut self) -> Result<u64> {
        let world = self
            .client
            .retrieve_world()
            .await
            .context("RetrieveWorld failed")?;
        self.write_image(&world).await?;
        Ok(world.turn)
    }

    async fn write_image(&self, world: &WorldSnapshot) -> Result<()> {
        let path = pgm::output_path(
            &self.io.out_dir,
            world.grid.width(),
            world.grid.height(),
            world.turn,
        );
        pgm::write(&path, &world.grid).context("Failed to write snapshot")?;
        self.emit(DistributorEvent::ImageOutputComplete {
            completed_turns: world.turn,
            path,
        })
        .await;
        Ok(())
    }

    async fn finish(self, world: WorldSnapshot) -> Result<Outcome> {
        self.emit(DistributorEvent::FinalTurnComplete {
            completed_turns: world.turn,
            alive: world.grid.alive_cells(),
        })
        .await;
        self.write_image(&world).await?;
        self.emit(DistributorEvent::StateChange {
            completed_turns: world.turn,
            new_state: State::Quitting,
        })
        .await;
        Ok(Outcome::Completed { turn: world.turn })
    }

    async fn quit(self, publish: PublishHandle) -> Result<Outcome> {
        let turn = self.client.get_alive().await.map(|a| a.turn).unwrap_or(0);
        self.client.reset(false).await.context("Reset failed")?;
        let _ = wait_for_publish(publish).await;

        self.emit(DistributorEvent::StateChange {
            completed_turns: turn,
            new_state: State::Quitting,
        })
        .await;
        Ok(Outcome::Quit { turn })
    }

    async fn kill(mut self, publish: PublishHandle) -> Result<Outcome> {
        let turn = self.save_snapshot().await?;
        self.client.reset(true).await.context("Reset(kill) failed")?;
        self.client.kill_broker().await.context("KillBroker failed")?;
        let _ = wait_for_publish(publish).await;

        self.emit(DistributorEvent::StateChange {
            completed_turns: turn,
            new_state: State::Quitting,
        })
        .await;
        Ok(Outcome::Killed { turn })
    }

    async fn emit(&self, event: DistributorEvent) {
        // 没有消费者时事件直接丢弃
        let _ = self.events.send(event).await;
    }
}

/// Reset 之后被中断的 Publish 会很快返回
async fn wait_for_publish(publish: PublishHandle) -> Option<WorldSnapshot> {
    match tokio::time::timeout(Duration::from_secs(5), publish).await {
        Ok(Ok(Ok(world))) => Some(world),
        Ok(Ok(Err(e))) => {
            tracing::debug!("Interrupted publish returned an error: {}", e);
            None
        }
        Ok(Err(e)) => {
            tracing::warn!("Publish task failed: {}", e);
            None
        }
        Err(_) => {
            tracing::warn!("Publish did not return after reset");
            None
        }
    }
}
