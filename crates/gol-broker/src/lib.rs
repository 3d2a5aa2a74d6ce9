//! Game of Life Broker
//!
//! 把每个回合的网格按行切分给已订阅的 Worker，等待回合屏障后合并结果。
//!
//! ```text
//! BrokerServer (ROUTER) ──▶ Broker ──▶ Registry ──▶ JobQueue ──▶ dispatch loop ──▶ WorkerLink
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod transport;

pub use config::BrokerConfig;
pub use coordinator::{Broker, CoordinatorConfig};
pub use error::BrokerError;
pub use policy::{Balanced, EvenSplit, FailurePolicy, PartitionPolicy};
pub use transport::{BrokerServer, WorkerConnector, WorkerLink, ZmqConnector};
