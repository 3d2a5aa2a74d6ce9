//! Worker Registry - 已订阅 Worker 的登记表
//!
//! 失效的 Worker 被标记为 dead（quiesced），不再参与分区，但仍保留在表中
//! 以便 Reset 清空其队列、Kill 回收其 dispatch loop。dispatch loop 已退出且
//! 队列为空的失效条目在下一次 Publish 开始时被 [`Registry::prune`] 移除。
//! 容量只统计存活条目。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::task::JoinHandle;

use crate::error::BrokerError;
use crate::queue::JobQueue;
use crate::transport::WorkerLink;

pub struct WorkerEntry {
    pub id: String,
    /// Worker 执行回合的方法名，随每个分区下发
    pub callback: String,
    pub link: Arc<dyn WorkerLink>,
    pub queue: JobQueue,
    alive: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerEntry {
    pub fn address(&self) -> &str {
        self.link.address()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// 标记为失效；返回 `true` 表示本次调用完成了状态切换
    pub fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn set_dispatcher(&self, handle: JoinHandle<()>) {
        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// dispatch loop 是否已经结束（句柄已被取走也视为结束）
    pub fn dispatcher_finished(&self) -> bool {
        self.dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    pub fn take_dispatcher(&self) -> Option<JoinHandle<()>> {
        self.dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub struct Registry {
    entries: RwLock<Vec<Arc<WorkerEntry>>>,
    capacity: usize,
    queue_capacity: usize,
    next_id: AtomicUsize,
    /// 串行化“标记失效 + 转交任务”，保证被选中的接收方在转交时仍然存活
    retire_lock: Mutex<()>,
}

impl Registry {
    pub fn new(capacity: usize, queue_capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            capacity,
            queue_capacity,
            next_id: AtomicUsize::new(0),
            retire_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 登记一个新 Worker，在写锁下复核容量
    pub fn insert(
        &self,
        link: Arc<dyn WorkerLink>,
        callback: &str,
    ) -> Result<Arc<WorkerEntry>, BrokerError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let live = entries.iter().filter(|e| e.is_alive()).count();
        if live >= self.capacity {
            return Err(BrokerError::CapacityExhausted {
                capacity: self.capacity,
            });
        }

        let entry = Arc::new(WorkerEntry {
            id: format!("worker-{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            callback: callback.to_string(),
            link,
            queue: JobQueue::new(self.queue_capacity),
            alive: AtomicBool::new(true),
            dispatcher: Mutex::new(None),
        });
        entries.push(entry.clone());
        Ok(entry)
    }

    /// 所有条目（含已失效的），按订阅顺序
    pub fn all(&self) -> Vec<Arc<WorkerEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 存活条目，按订阅顺序
    pub fn live(&self) -> Vec<Arc<WorkerEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.is_alive())
            .cloned()
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.is_alive())
            .count()
    }

    pub fn is_full(&self) -> bool {
        self.live_count() >= self.capacity
    }

    /// 移除已完全退出的失效条目，返回移除数量
    pub fn prune(&self) -> usize {
        let _guard = self.retire_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.is_alive() || !e.dispatcher_finished() || !e.queue.is_empty());
        before - entries.len()
    }

    /// 在 retire 锁下执行 `f`
    pub fn with_retire_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.retire_lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// 队列最短的存活 Worker（调用方应持有 retire 锁）
    pub fn least_loaded(&self) -> Option<Arc<WorkerEntry>> {
        self.live().into_iter().min_by_key(|e| e.queue.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gol_protocol::{PartialGrid, TurnJob};
    use tokio::sync::watch;

    struct NullLink(String);

    #[async_trait]
    impl WorkerLink for NullLink {
        fn address(&self) -> &str {
            &self.0
        }

        async fn execute_turn(
            &self,
            _job: TurnJob,
            _paused: &watch::Receiver<bool>,
        ) -> Result<PartialGrid, BrokerError> {
            Err(BrokerError::Internal("not used".to_string()))
        }

        async fn pause(&self, paused: bool) -> Result<bool, BrokerError> {
            Ok(paused)
        }

        async fn terminate(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn link(n: usize) -> Arc<dyn WorkerLink> {
        Arc::new(NullLink(format!("127.0.0.1:{}", 8080 + n)))
    }

    #[test]
    fn test_ids_follow_subscription_order() {
        let registry = Registry::new(4, 100);
        let a = registry.insert(link(0), "Worker.ExecuteTurn").unwrap();
        let b = registry.insert(link(1), "Worker.ExecuteTurn").unwrap();

        assert_eq!(a.id, "worker-0");
        assert_eq!(b.id, "worker-1");
        assert_eq!(b.address(), "127.0.0.1:8081");
        assert_eq!(registry.live_count(), 2);
    }

    #[test]
    fn test_capacity_counts_live_entries_only() {
        let registry = Registry::new(2, 100);
        let a = registry.insert(link(0), "cb").unwrap();
        registry.insert(link(1), "cb").unwrap();

        assert!(registry.is_full());
        assert!(matches!(
            registry.insert(link(2), "cb"),
            Err(BrokerError::CapacityExhausted { capacity: 2 })
        ));

        assert!(a.mark_dead());
        assert!(!a.mark_dead());
        assert!(!registry.is_full());

        let c = registry.insert(link(2), "cb").unwrap();
        assert_eq!(c.id, "worker-2");
        assert_eq!(registry.all().len(), 3);
        assert_eq!(registry.live().len(), 2);
    }

    #[tokio::test]
    async fn test_prune_removes_exited_dead_entries() {
        let registry = Registry::new(4, 100);
        let a = registry.insert(link(0), "cb").unwrap();
        let b = registry.insert(link(1), "cb").unwrap();
        let _c = registry.insert(link(2), "cb").unwrap();

        // a: 失效且 dispatch loop 已退出
        a.set_dispatcher(tokio::spawn(async {}));
        a.mark_dead();
        // b: 失效但 dispatch loop 仍在运行；worker-2 存活且没有 dispatch loop
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        b.set_dispatcher(tokio::spawn(async move {
            let _ = wait.await;
        }));
        b.mark_dead();
        while !a.dispatcher_finished() {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.prune(), 1);
        let ids: Vec<_> = registry.all().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["worker-1", "worker-2"]);

        release.send(()).unwrap();
        if let Some(handle) = b.take_dispatcher() {
            handle.await.unwrap();
        }
        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.all().len(), 1);
        assert_eq!(registry.live_count(), 1);
    }
}
