//! Transport Module - 传输层
//!
//! 负责与 Worker 和 Client 的通信

pub mod worker_proxy;
pub mod zmq_frontend;

pub use worker_proxy::{WorkerConnector, WorkerLink, ZmqConnector, ZmqWorkerLink};
pub use zmq_frontend::BrokerServer;
