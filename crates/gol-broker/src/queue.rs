//! Job Queue - 每个 Worker 一条的有界任务队列
//!
//! ```text
//! Publish ──push(Job)──▶ ┌───────────────┐ ──pop──▶ dispatch loop ──▶ Worker
//! Reset   ──drain()────▶ │   JobQueue    │
//! Kill    ──push_stop()▶ └───────────────┘
//! ```
//!
//! 每个 [`Job`] 携带一个 oneshot 发送端，构成回合屏障：
//! - `complete(Ok)`：分区已合并
//! - `complete(Err)`：分区失败，Publish 返回该错误
//! - 直接丢弃（被 drain 或落到已关闭的队列）：Publish 视为本回合被放弃
//!
//! 队列只有一个消费者（该 Worker 的 dispatch loop）。消费到 `Stop` 后队列关闭，
//! 之后 push 的任务会被退回，剩余任务被丢弃。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use gol_protocol::{Grid, RowRange};
use tokio::sync::{oneshot, Notify};

use crate::error::BrokerError;

/// 回合屏障上的单个分区结果
pub type JobOutcome = Result<(), BrokerError>;

/// 一个回合中分配给某个 Worker 的分区
#[derive(Debug)]
pub struct Job {
    /// 所属运行的代数，过期的结果不会被合并
    pub epoch: u64,
    pub turn: u64,
    pub range: RowRange,
    pub grid: Arc<Grid>,
    done: oneshot::Sender<JobOutcome>,
}

impl Job {
    pub fn new(
        epoch: u64,
        turn: u64,
        range: RowRange,
        grid: Arc<Grid>,
    ) -> (Self, oneshot::Receiver<JobOutcome>) {
        let (done, rx) = oneshot::channel();
        (
            Self {
                epoch,
                turn,
                range,
                grid,
                done,
            },
            rx,
        )
    }

    /// 通知屏障。Publish 已经离开时结果被忽略。
    pub fn complete(self, outcome: JobOutcome) {
        let _ = self.done.send(outcome);
    }
}

#[derive(Debug)]
pub enum QueueItem {
    Job(Job),
    /// 让 dispatch loop 退出的哨兵
    Stop,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    closed: bool,
}

#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 入队一个任务。队列已满或已关闭时原样退回。
    pub fn push(&self, job: Job) -> Result<(), Job> {
        let mut state = self.lock();
        if state.closed || state.items.len() >= self.capacity {
            return Err(job);
        }
        state.items.push_back(QueueItem::Job(job));
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// 入队停止哨兵（不受容量限制）
    pub fn push_stop(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.items.push_back(QueueItem::Stop);
        drop(state);
        self.available.notify_one();
    }

    /// 取出下一项，队列为空时等待
    pub async fn pop(&self) -> QueueItem {
        loop {
            {
                let mut state = self.lock();
                match state.items.pop_front() {
                    Some(QueueItem::Stop) => {
                        state.closed = true;
                        // 剩余任务被丢弃，屏障视为放弃
                        state.items.clear();
                        return QueueItem::Stop;
                    }
                    Some(item) => return item,
                    None => {}
                }
            }
            // notify_one 在无等待者时会保留一个许可，不会丢失唤醒
            self.available.notified().await;
        }
    }

    /// 丢弃所有未派发的任务，返回丢弃数量。停止哨兵保留。
    pub fn drain(&self) -> usize {
        let mut state = self.lock();
        let before = state.items.len();
        state.items.retain(|item| matches!(item, QueueItem::Stop));
        before - state.items.len()
    }

    /// 关闭队列并丢弃剩余项；之后的 push 会被退回
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let dropped = state.items.len();
        state.items.clear();
        dropped
    }

    /// 取走所有未派发的任务（用于把失效 Worker 的任务转交出去）
    pub fn take_jobs(&self) -> Vec<Job> {
        let mut state = self.lock();
        let mut jobs = Vec::new();
        let mut kept = VecDeque::new();
        for item in state.items.drain(..) {
            match item {
                QueueItem::Job(job) => jobs.push(job),
                stop => kept.push_back(stop),
            }
        }
        state.items = kept;
        jobs
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(turn: u64) -> (Job, oneshot::Receiver<JobOutcome>) {
        Job::new(1, turn, RowRange::new(0, 1), Arc::new(Grid::new(1, 1)))
    }

    #[tokio::test]
    async fn test_fifo_and_barrier_signal() {
        let queue = JobQueue::new(4);
        let (first, first_rx) = job(0);
        let (second, _second_rx) = job(1);
        queue.push(first).unwrap();
        queue.push(second).unwrap();

        match queue.pop().await {
            QueueItem::Job(job) => {
                assert_eq!(job.turn, 0);
                job.complete(Ok(()));
            }
            QueueItem::Stop => panic!("unexpected stop"),
        }
        assert!(matches!(first_rx.await, Ok(Ok(()))));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let queue = JobQueue::new(1);
        let (a, _a_rx) = job(0);
        let (b, _b_rx) = job(1);
        queue.push(a).unwrap();
        let rejected = queue.push(b).unwrap_err();
        assert_eq!(rejected.turn, 1);

        // 哨兵不受容量限制
        queue.push_stop();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_drain_abandons_jobs() {
        let queue = JobQueue::new(8);
        let (a, a_rx) = job(0);
        queue.push(a).unwrap();
        queue.push_stop();

        assert_eq!(queue.drain(), 1);
        assert!(a_rx.await.is_err());
        assert!(matches!(queue.pop().await, QueueItem::Stop));
    }

    #[tokio::test]
    async fn test_stop_closes_queue() {
        let queue = JobQueue::new(8);
        let (late, late_rx) = job(0);
        queue.push_stop();
        queue.push(late).unwrap();

        assert!(matches!(queue.pop().await, QueueItem::Stop));
        assert!(queue.is_closed());
        // Stop 之后的任务被丢弃
        assert!(late_rx.await.is_err());

        let (again, _rx) = job(1);
        assert!(queue.push(again).is_err());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(JobQueue::new(8));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { matches!(queue.pop().await, QueueItem::Stop) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.push_stop();
        assert!(consumer.await.unwrap());
    }

    #[test]
    fn test_take_jobs_keeps_stop() {
        let queue = JobQueue::new(8);
        let (a, _a_rx) = job(0);
        let (b, _b_rx) = job(1);
        queue.push(a).unwrap();
        queue.push_stop();
        queue.push(b).unwrap();

        let taken = queue.take_jobs();
        assert_eq!(taken.iter().map(|j| j.turn).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(queue.len(), 1);
    }
}
