//! Coordinator - Broker 运行上下文
//!
//! 将注册表、任务队列、分区策略与 Worker 连接串联起来的核心模块。
//! RPC 处理函数只是 [`Broker`] 方法的薄适配层。
//!
//! # Publish 主循环
//!
//! ```text
//! reset(false)            中断并清空上一次运行
//! run_lock                等待上一次 Publish 退出
//! epoch += 1              新的运行代数
//!
//! for turn in 0..turns (interrupt 未置位):
//!   Phase 1: Gate         等待暂停闸门打开（不持有闸门）
//!   Phase 2: Partition    threads = min(请求, 存活 Worker, 行数)，按策略切分
//!   Phase 3: Dispatch     每个 Worker 一个分区，入队到它自己的 JobQueue
//!   Phase 4: Barrier      等待本回合全部分区完成（可选超时）
//!   Phase 5: Commit       代数未变时 next → world，turn += 1
//! ```
//!
//! # Dispatch loop（每个 Worker 一个）
//!
//! ```text
//! pop ─▶ Stop?  ──yes──▶ terminate Worker, 退出
//!   │
//!   ├─ 过期代数 ──▶ 丢弃（屏障视为放弃）
//!   ├─ RPC 成功 ──▶ 合并到 next，通知屏障
//!   ├─ Worker 返回错误 ──▶ 通知屏障失败
//!   └─ 传输失败 ──▶ 标记失效，任务放回自己的队列，按 FailurePolicy 处理，退出
//! ```
//!
//! # 锁顺序
//!
//! `next` → `world`。`pause_state` 是独立的异步锁，只串行化暂停状态切换。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};

use gol_protocol::{
    AliveCount, Grid, PartialGrid, PauseState, PublishRequest, RowRange, StatusReport,
    Subscription, TurnJob, WorldSnapshot,
};

use crate::error::BrokerError;
use crate::policy::{FailurePolicy, PartitionPolicy};
use crate::queue::{Job, JobOutcome, QueueItem};
use crate::registry::{Registry, WorkerEntry};
use crate::transport::WorkerConnector;

/// Coordinator 配置
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// 最多同时存活的 Worker 数
    pub max_workers: usize,

    /// 每个 Worker 的任务队列容量
    pub queue_capacity: usize,

    /// Worker 失效后的处理方式
    pub failure_policy: FailurePolicy,

    /// 单回合屏障的超时时间（None 表示无限等待）
    pub turn_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_workers: 16,
            queue_capacity: 100,
            failure_policy: FailurePolicy::Redistribute,
            turn_timeout: None,
        }
    }
}

/// 权威世界状态
struct World {
    grid: Arc<Grid>,
    turn: u64,
}

/// Publish 存活期间置位，Drop 时清除
struct ActiveRun<'a>(&'a watch::Sender<bool>);

impl<'a> ActiveRun<'a> {
    fn begin(flag: &'a watch::Sender<bool>) -> Self {
        flag.send_replace(true);
        Self(flag)
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

/// dispatch loop 以任何方式退出时（包括 panic）让条目失效，
/// 被丢弃的分区由屏障报告为失败
struct DispatcherExit(Arc<WorkerEntry>);

impl Drop for DispatcherExit {
    fn drop(&mut self) {
        let entry = &self.0;
        // 已经被 retire 的条目保留队列（Stall 策略下任务停在这里）
        if entry.mark_dead() {
            if std::thread::panicking() {
                error!("Dispatch loop for {} panicked; worker retired", entry.id);
            }
            entry.queue.close();
        }
    }
}

/// Broker - 运行上下文
pub struct Broker {
    config: CoordinatorConfig,
    policy: Box<dyn PartitionPolicy>,
    connector: Arc<dyn WorkerConnector>,
    registry: Registry,

    /// 当前世界与回合数
    world: RwLock<World>,

    /// 下一回合的缓冲区，dispatch loop 把分区结果写到这里
    next: StdMutex<Grid>,

    /// 暂停状态切换锁（与闸门分离）
    pause_state: Mutex<bool>,

    /// 暂停闸门：Publish 在每回合开始前等待它变为 false
    gate: watch::Sender<bool>,

    /// 中断当前运行（Reset）
    interrupt: AtomicBool,

    /// Broker 是否仍接受工作（Kill 后为 false）
    running: AtomicBool,

    /// 运行代数，Reset / Publish 时递增
    epoch: AtomicU64,

    /// 同一时刻只有一个 Publish 在推进回合
    run_lock: Mutex<()>,

    /// Publish 是否仍在执行
    publish_active: watch::Sender<bool>,

    /// KillBroker 之后置位，服务端据此退出
    shutdown: watch::Sender<bool>,
}

impl Broker {
    pub fn new(
        config: CoordinatorConfig,
        policy: Box<dyn PartitionPolicy>,
        connector: Arc<dyn WorkerConnector>,
    ) -> Self {
        let registry = Registry::new(config.max_workers, config.queue_capacity);
        Self {
            config,
            policy,
            connector,
            registry,
            world: RwLock::new(World {
                grid: Arc::new(Grid::new(0, 0)),
                turn: 0,
            }),
            next: StdMutex::new(Grid::new(0, 0)),
            pause_state: Mutex::new(false),
            gate: watch::channel(false).0,
            interrupt: AtomicBool::new(false),
            running: AtomicBool::new(true),
            epoch: AtomicU64::new(0),
            run_lock: Mutex::new(()),
            publish_active: watch::channel(false).0,
            shutdown: watch::channel(false).0,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        *self.gate.borrow()
    }

    pub fn turn(&self) -> u64 {
        self.world.read().unwrap_or_else(PoisonError::into_inner).turn
    }

    /// KillBroker 之后变为 true
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    // -----------------------------------------------------------------------
    // Subscribe
    // -----------------------------------------------------------------------

    /// 连接 Worker、登记并启动它的 dispatch loop
    pub async fn subscribe(self: &Arc<Self>, sub: Subscription) -> Result<StatusReport, BrokerError> {
        if !self.is_running() {
            return Err(BrokerError::ShuttingDown);
        }
        if sub.callback.is_empty() {
            return Err(BrokerError::InvalidParams("callback must not be empty".to_string()));
        }
        if self.registry.is_full() {
            return Err(BrokerError::CapacityExhausted {
                capacity: self.registry.capacity(),
            });
        }

        let link = self.connector.connect(&sub.worker_address).await?;

        // 暂停期间加入的 Worker 也要停在闸门上。持有 pause_state 直到登记完成，
        // 之后的暂停切换一定会转发给这个 Worker。
        let entry = {
            let paused = self.pause_state.lock().await;
            if *paused {
                if let Err(e) = link.pause(true).await {
                    warn!("Failed to pause late subscriber {}: {}", sub.worker_address, e);
                }
            }

            let entry = self.registry.insert(link, &sub.callback)?;
            let handle = tokio::spawn(self.clone().dispatch_loop(entry.clone()));
            entry.set_dispatcher(handle);
            entry
        };

        // 与 Kill 竞争时，Kill 可能已经错过这个条目
        if !self.is_running() {
            entry.queue.push_stop();
            return Err(BrokerError::ShuttingDown);
        }

        info!(
            "Worker subscribed: {} at {} (callback={}, live={}/{})",
            entry.id,
            sub.worker_address,
            sub.callback,
            self.registry.live_count(),
            self.registry.capacity()
        );
        Ok(StatusReport::new(format!("subscribed as {}", entry.id)))
    }

    // -----------------------------------------------------------------------
    // Publish
    // -----------------------------------------------------------------------

    /// 执行一次完整运行，返回最终世界与回合数
    pub async fn publish(&self, request: PublishRequest) -> Result<WorldSnapshot, BrokerError> {
        if !self.is_running() {
            return Err(BrokerError::ShuttingDown);
        }
        request
            .grid
            .validate()
            .map_err(|e| BrokerError::InvalidParams(e.to_string()))?;
        if request.threads == 0 {
            return Err(BrokerError::InvalidParams("threads must be at least 1".to_string()));
        }

        // 中断并清空上一次运行，然后等它退出
        self.reset(false).await?;
        let _run = self.run_lock.lock().await;
        if !self.is_running() {
            return Err(BrokerError::ShuttingDown);
        }
        let _active = ActiveRun::begin(&self.publish_active);

        let pruned = self.registry.prune();
        if pruned > 0 {
            debug!("Pruned {} retired worker(s)", pruned);
        }

        self.interrupt.store(false, Ordering::SeqCst);
        let width = request.grid.width();
        let height = request.grid.height();
        let epoch = {
            let mut next = self.lock_next();
            let mut world = self.world.write().unwrap_or_else(PoisonError::into_inner);
            *next = request.grid.clone();
            world.grid = Arc::new(request.grid);
            world.turn = 0;
            self.epoch.fetch_add(1, Ordering::AcqRel) + 1
        };

        info!(
            "Run started: {}x{} grid, {} turns, {} threads requested, policy={}",
            width,
            height,
            request.turns,
            request.threads,
            self.policy.name()
        );

        let outcome = self.drive(epoch, height, request.threads, request.turns).await;

        if let Err(e) = &outcome {
            error!("Run failed: {}", e);
            self.invalidate_run(false);
        }
        outcome?;

        let snapshot = self.retrieve_world();
        info!(
            "Run finished at turn {} with {} alive cells",
            snapshot.turn,
            snapshot.grid.alive_count()
        );
        Ok(snapshot)
    }

    /// 回合循环；因中断或被放弃而结束时返回 Ok
    async fn drive(
        &self,
        epoch: u64,
        height: usize,
        requested: usize,
        turns: u64,
    ) -> Result<(), BrokerError> {
        let mut gate = self.gate.subscribe();
        let mut clamped_to = None;

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                debug!("Run interrupted");
                return Ok(());
            }
            let turn = self.turn();
            if turn >= turns {
                return Ok(());
            }

            // Phase 1: 获取后立即释放闸门
            let gate_open = gate.wait_for(|paused| !*paused).await.is_ok();
            if !gate_open || self.interrupt.load(Ordering::SeqCst) {
                return Ok(());
            }

            // Phase 2: 分区
            let workers = self.registry.live();
            if workers.is_empty() {
                return Err(BrokerError::WorkerLost("no live workers subscribed".to_string()));
            }
            let threads = requested.min(workers.len()).min(height);
            if threads < requested && clamped_to != Some(threads) {
                warn!(
                    "Requested {} threads but only {} usable ({} live workers, {} rows); running with {}",
                    requested,
                    threads,
                    workers.len(),
                    height,
                    threads
                );
                clamped_to = Some(threads);
            }
            let ranges = self.policy.partition(height, threads);
            let grid = self.world.read().unwrap_or_else(PoisonError::into_inner).grid.clone();

            // Phase 3: 派发
            let mut barrier = Vec::with_capacity(threads);
            for (entry, range) in workers.iter().zip(ranges) {
                let (job, done) = Job::new(epoch, turn, range, grid.clone());
                self.enqueue(entry, job);
                barrier.push(done);
            }

            // Phase 4: 屏障
            if !self.await_barrier(barrier, epoch, turn).await? {
                debug!("Turn {} abandoned", turn);
                return Ok(());
            }

            // Phase 5: 提交
            if !self.commit(epoch) {
                return Ok(());
            }
            debug!("Turn {} committed", turn + 1);
        }
    }

    /// 把任务放入首选 Worker 的队列；首选已失效时转给最空闲的存活 Worker
    fn enqueue(&self, preferred: &Arc<WorkerEntry>, job: Job) {
        self.registry.with_retire_lock(|| {
            let target = if preferred.is_alive() {
                Some(preferred.clone())
            } else {
                self.registry.least_loaded()
            };

            let Some(target) = target else {
                job.complete(Err(BrokerError::WorkerLost(format!(
                    "{} failed and no live worker remains",
                    preferred.id
                ))));
                return;
            };

            if let Err(job) = target.queue.push(job) {
                if target.queue.is_closed() {
                    // 正在关闭：丢弃任务，屏障视为放弃
                    return;
                }
                let turn = job.turn;
                job.complete(Err(BrokerError::Internal(format!(
                    "job queue of {} is full at turn {}",
                    target.id, turn
                ))));
            }
        })
    }

    /// 等待本回合所有分区；`Ok(false)` 表示运行已被 Reset，本回合被放弃
    ///
    /// 分区在代数未变化时被丢弃，说明负责它的 dispatch loop 已经退出，按失败处理。
    async fn await_barrier(
        &self,
        barrier: Vec<oneshot::Receiver<JobOutcome>>,
        epoch: u64,
        turn: u64,
    ) -> Result<bool, BrokerError> {
        let all = async {
            for done in barrier {
                match done.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Err(e),
                    Err(_) if self.epoch.load(Ordering::Acquire) != epoch => return Ok(false),
                    Err(_) => {
                        return Err(BrokerError::WorkerLost(format!(
                            "a partition of turn {} was dropped by its dispatcher",
                            turn
                        )))
                    }
                }
            }
            Ok(true)
        };

        let Some(limit) = self.config.turn_timeout else {
            return all.await;
        };

        tokio::pin!(all);
        loop {
            tokio::select! {
                result = &mut all => return result,
                _ = tokio::time::sleep(limit) => {
                    // 暂停造成的等待不算超时
                    if self.is_paused() {
                        continue;
                    }
                    return Err(BrokerError::TurnTimeout {
                        turn,
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            }
        }
    }

    /// 屏障满足后交换世界。代数已变化（被 Reset）时放弃提交。
    fn commit(&self, epoch: u64) -> bool {
        let next = self.lock_next();
        if self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        let mut world = self.world.write().unwrap_or_else(PoisonError::into_inner);
        world.grid = Arc::new(next.clone());
        world.turn += 1;
        true
    }

    fn lock_next(&self) -> std::sync::MutexGuard<'_, Grid> {
        self.next.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Dispatch loop
    // -----------------------------------------------------------------------

    async fn dispatch_loop(self: Arc<Self>, entry: Arc<WorkerEntry>) {
        debug!("Dispatch loop started for {}", entry.id);
        let _exit = DispatcherExit(entry.clone());
        let paused = self.gate.subscribe();

        loop {
            let job = match entry.queue.pop().await {
                QueueItem::Stop => break,
                QueueItem::Job(job) => job,
            };

            if job.epoch != self.epoch.load(Ordering::Acquire) {
                // 上一次运行的残留任务
                continue;
            }

            let request = TurnJob {
                method: entry.callback.clone(),
                grid: job.grid.clone(),
                row_start: job.range.start,
                row_end: job.range.end,
            };

            match entry.link.execute_turn(request, &paused).await {
                Ok(partial) => {
                    let outcome = self.merge(job.epoch, job.range, &partial);
                    job.complete(outcome);
                }
                Err(e) if !e.is_transport() => {
                    warn!("{} rejected turn {}: {}", entry.id, job.turn, e);
                    job.complete(Err(e));
                }
                Err(e) => {
                    error!(
                        "{} at {} failed during turn {}: {}",
                        entry.id,
                        entry.address(),
                        job.turn,
                        e
                    );
                    self.retire(&entry, job);
                    break;
                }
            }
        }

        if let Err(e) = entry.link.terminate().await {
            warn!("Failed to terminate {}: {}", entry.id, e);
        }
        debug!("Dispatch loop exited for {}", entry.id);
    }

    /// 把分区结果写入 next 缓冲区；过期代数的结果被忽略
    fn merge(&self, epoch: u64, range: RowRange, partial: &PartialGrid) -> JobOutcome {
        if partial.range() != range {
            return Err(BrokerError::UnexpectedReply(format!(
                "expected rows {}..{}, got {}..{}",
                range.start,
                range.end,
                partial.range().start,
                partial.range().end
            )));
        }

        let mut next = self.lock_next();
        if self.epoch.load(Ordering::Acquire) != epoch {
            return Ok(());
        }
        next.write_partial(partial)
            .map_err(|e| BrokerError::UnexpectedReply(e.to_string()))
    }

    /// Worker 传输失败：标记失效，任务放回它自己的队列，再按策略处理
    fn retire(&self, entry: &WorkerEntry, job: Job) {
        self.registry.with_retire_lock(|| {
            entry.mark_dead();
            if let Err(job) = entry.queue.push(job) {
                job.complete(Err(BrokerError::WorkerLost(format!(
                    "{} failed and its queue is unavailable",
                    entry.id
                ))));
            }

            match self.config.failure_policy {
                FailurePolicy::Stall => {
                    warn!(
                        "{} retired; {} partition(s) stay queued on it until reset",
                        entry.id,
                        entry.queue.len()
                    );
                }
                FailurePolicy::Redistribute => {
                    for job in entry.queue.take_jobs() {
                        match self.registry.least_loaded() {
                            Some(target) => {
                                info!(
                                    "Redistributing rows {}..{} of turn {} from {} to {}",
                                    job.range.start, job.range.end, job.turn, entry.id, target.id
                                );
                                if let Err(job) = target.queue.push(job) {
                                    job.complete(Err(BrokerError::Internal(format!(
                                        "job queue of {} rejected a redistributed partition",
                                        target.id
                                    ))));
                                }
                            }
                            None => {
                                job.complete(Err(BrokerError::WorkerLost(format!(
                                    "{} failed and no live worker remains",
                                    entry.id
                                ))));
                            }
                        }
                    }
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Pause / Reset / Kill
    // -----------------------------------------------------------------------

    /// 切换暂停状态，对相同状态的重复请求是幂等的。Kill 之后不再改变状态。
    pub async fn pause(&self, new_state: bool) -> PauseState {
        let mut paused = self.pause_state.lock().await;
        if self.is_running() {
            self.switch_pause(&mut paused, new_state).await;
        }

        PauseState {
            paused: *paused,
            turn: self.turn(),
        }
    }

    /// 调用方持有 pause_state
    async fn switch_pause(&self, paused: &mut bool, new_state: bool) {
        if *paused == new_state {
            return;
        }
        *paused = new_state;
        self.gate.send_replace(new_state);

        for entry in self.registry.live() {
            if let Err(e) = entry.link.pause(new_state).await {
                warn!("Failed to forward pause={} to {}: {}", new_state, entry.id, e);
            }
        }
        info!(
            "{} at turn {}",
            if new_state { "Paused" } else { "Resumed" },
            self.turn()
        );
    }

    /// 中断当前运行；`kill` 时同时关闭所有 Worker 并等待 Publish 退出
    pub async fn reset(&self, kill: bool) -> Result<StatusReport, BrokerError> {
        self.interrupt.store(true, Ordering::SeqCst);
        {
            // 恢复与停止在同一把锁下完成，Kill 期间的 Pause(true) 不会再关上闸门
            let mut paused = self.pause_state.lock().await;
            self.switch_pause(&mut paused, false).await;
            if kill {
                self.running.store(false, Ordering::SeqCst);
            }
        }
        self.invalidate_run(true);

        if !kill {
            return Ok(StatusReport::new("run reset"));
        }

        let entries = self.registry.all();
        for entry in &entries {
            entry.queue.push_stop();
        }
        for entry in &entries {
            if let Some(handle) = entry.take_dispatcher() {
                if let Err(e) = handle.await {
                    warn!("Dispatch loop for {} ended abnormally: {}", entry.id, e);
                }
            }
        }

        let mut active = self.publish_active.subscribe();
        let _ = active.wait_for(|running| !*running).await;

        info!("All {} worker(s) released", entries.len());
        Ok(StatusReport::new(format!("terminated {} worker(s)", entries.len())))
    }

    /// 递增代数并清空所有队列，使进行中的分区失效
    fn invalidate_run(&self, reset_turn: bool) {
        {
            let _next = self.lock_next();
            let mut world = self.world.write().unwrap_or_else(PoisonError::into_inner);
            self.epoch.fetch_add(1, Ordering::AcqRel);
            if reset_turn {
                world.turn = 0;
            }
        }

        let dropped: usize = self.registry.all().iter().map(|e| e.queue.drain()).sum();
        if dropped > 0 {
            debug!("Discarded {} pending partition(s)", dropped);
        }
    }

    /// 关闭 Broker：必要时先执行 Reset(kill)，然后通知服务端退出
    pub async fn kill(&self) -> StatusReport {
        if self.is_running() {
            if let Err(e) = self.reset(true).await {
                warn!("Reset during kill failed: {}", e);
            }
        }
        self.shutdown.send_replace(true);
        StatusReport::new("broker shutting down")
    }

    // -----------------------------------------------------------------------
    // Snapshot & Metrics
    // -----------------------------------------------------------------------

    pub fn retrieve_world(&self) -> WorldSnapshot {
        let (grid, turn) = {
            let world = self.world.read().unwrap_or_else(PoisonError::into_inner);
            (world.grid.clone(), world.turn)
        };
        WorldSnapshot {
            grid: (*grid).clone(),
            turn,
        }
    }

    pub fn get_alive(&self) -> AliveCount {
        let (grid, turn) = {
            let world = self.world.read().unwrap_or_else(PoisonError::into_inner);
            (world.grid.clone(), world.turn)
        };
        AliveCount {
            turn,
            count: grid.alive_count(),
        }
    }
}
