//! Game of Life Client
//!
//! 读取 PGM 初始世界，通过 Broker 驱动一次运行，并响应键盘命令。

pub mod broker_client;
pub mod distributor;
pub mod events;
pub mod keys;
pub mod pgm;

pub use broker_client::{BrokerClient, ClientError};
pub use distributor::{Distributor, IoSettings, Outcome, Params};
pub use events::{DistributorEvent, State};
pub use keys::ControlCommand;
