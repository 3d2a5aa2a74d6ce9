//! Configuration Management - 配置管理
//!
//! 提供统一的配置管理系统，支持命令行参数和配置文件。
//!
//! # 配置层次
//!
//! ```text
//! BrokerConfig (顶层配置)
//!   ├─ NetworkConfig  (监听地址、RPC / 连接超时)
//!   ├─ RegistryConfig (Worker 容量、队列容量)
//!   ├─ RunConfig      (分区策略、失效策略、回合超时)
//!   └─ LoggingConfig  (日志配置)
//! ```

use crate::coordinator::CoordinatorConfig;
use crate::policy::{self, FailurePolicy, PartitionPolicy};
use anyhow::{Context, Result};
use clap::Parser;
use gol_protocol::DEFAULT_BROKER_PORT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Broker 主配置
///
/// 可以从命令行参数或配置文件加载
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "gol-broker")]
#[command(about = "Game of Life Broker - distributes each turn across subscribed workers", long_about = None)]
pub struct BrokerConfig {
    /// 网络配置
    #[command(flatten)]
    #[serde(default)]
    pub network: NetworkConfig,

    /// 注册表配置
    #[command(flatten)]
    #[serde(default)]
    pub registry: RegistryConfig,

    /// 运行策略配置
    #[command(flatten)]
    #[serde(default)]
    pub run: RunConfig,

    /// 日志配置
    #[command(flatten)]
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 可选：从配置文件加载
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

/// 网络配置
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface the ROUTER socket binds to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Broker RPC port
    #[arg(long, default_value_t = DEFAULT_BROKER_PORT)]
    pub port: u16,

    /// Worker RPC timeout (milliseconds)
    #[arg(long, default_value_t = 30000)]
    pub rpc_timeout_ms: u64,

    /// Timeout for dialing a subscribing worker (milliseconds)
    #[arg(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,
}

/// 注册表配置
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of live workers
    #[arg(long, default_value_t = 16)]
    pub max_workers: usize,

    /// Per-worker job queue capacity
    #[arg(long, default_value_t = 100)]
    pub queue_capacity: usize,
}

/// 运行策略配置
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
pub struct RunConfig {
    /// Row partition policy
    ///
    /// Options: "even" (default), "balanced"
    #[arg(long, default_value = "even")]
    pub partition_policy: String,

    /// What happens to a failed worker's partition
    ///
    /// Options: "redistribute" (default), "stall"
    #[arg(long, default_value = "redistribute")]
    pub failure_policy: String,

    /// Fail a turn that takes longer than this (milliseconds, 0 = wait forever)
    #[arg(long, default_value_t = 0)]
    pub turn_timeout_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl BrokerConfig {
    /// 从命令行参数加载配置
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// 从配置文件加载（YAML 或 JSON）
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        // 根据文件后缀判断格式
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).context("Failed to parse YAML config")
            }
            Some("json") => serde_json::from_str(&content).context("Failed to parse JSON config"),
            _ => anyhow::bail!("Unsupported config file format (use .yaml, .yml, or .json)"),
        }
    }

    /// 加载配置（指定 --config-file 时以文件为准，否则使用命令行参数）
    pub fn load() -> Result<Self> {
        let mut config = Self::from_args();

        if let Some(config_file) = config.config_file.take() {
            config = Self::from_file(&config_file)?;
            config.config_file = Some(config_file);
        }

        config.validate()?;
        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.registry.max_workers == 0 {
            anyhow::bail!("max_workers must be greater than 0");
        }
        if self.registry.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }
        if self.network.rpc_timeout_ms == 0 || self.network.connect_timeout_ms == 0 {
            anyhow::bail!("rpc_timeout_ms and connect_timeout_ms must be greater than 0");
        }

        if policy::from_name(&self.run.partition_policy).is_none() {
            anyhow::bail!(
                "Invalid partition_policy: {} (must be even/balanced)",
                self.run.partition_policy
            );
        }
        if FailurePolicy::from_name(&self.run.failure_policy).is_none() {
            anyhow::bail!(
                "Invalid failure_policy: {} (must be redistribute/stall)",
                self.run.failure_policy
            );
        }

        match self.logging.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log_level: {} (must be trace/debug/info/warn/error)",
                self.logging.log_level
            ),
        }

        Ok(())
    }

    /// ROUTER 绑定地址 "host:port"
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.network.bind, self.network.port)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.network.rpc_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }

    /// 转换为 CoordinatorConfig
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_workers: self.registry.max_workers,
            queue_capacity: self.registry.queue_capacity,
            failure_policy: FailurePolicy::from_name(&self.run.failure_policy).unwrap_or_default(),
            turn_timeout: match self.run.turn_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    /// 按名称构建分区策略
    pub fn partition_policy(&self) -> Result<Box<dyn PartitionPolicy>> {
        policy::from_name(&self.run.partition_policy)
            .context(format!("Unknown partition policy: {}", self.run.partition_policy))
    }

    /// 打印配置摘要
    pub fn print_summary(&self) {
        println!("📋 Broker Configuration:");
        println!("  Network:");
        println!("    Bind: {}", self.bind_address());
        println!("    RPC timeout: {} ms", self.network.rpc_timeout_ms);
        println!("    Connect timeout: {} ms", self.network.connect_timeout_ms);
        println!("  Registry:");
        println!("    Max workers: {}", self.registry.max_workers);
        println!("    Queue capacity: {}", self.registry.queue_capacity);
        println!("  Run:");
        println!("    Partition policy: {}", self.run.partition_policy);
        println!("    Failure policy: {}", self.run.failure_policy);
        if self.run.turn_timeout_ms == 0 {
            println!("    Turn timeout: disabled");
        } else {
            println!("    Turn timeout: {} ms", self.run.turn_timeout_ms);
        }
        println!("  Logging:");
        println!("    Level: {}", self.logging.log_level);
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            registry: RegistryConfig::default(),
            run: RunConfig::default(),
            logging: LoggingConfig::default(),
            config_file: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_BROKER_PORT,
            rpc_timeout_ms: 30000,
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_workers: 16,
            queue_capacity: 100,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            partition_policy: "even".to_string(),
            failure_policy: "redistribute".to_string(),
            turn_timeout_ms: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.network.port, 8030);
        assert_eq!(config.registry.max_workers, 16);
        assert_eq!(config.registry.queue_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_defaults_match_default_impl() {
        let parsed = BrokerConfig::parse_from(["gol-broker"]);
        let default = BrokerConfig::default();
        assert_eq!(parsed.bind_address(), default.bind_address());
        assert_eq!(parsed.run.partition_policy, default.run.partition_policy);
        assert_eq!(parsed.network.rpc_timeout_ms, default.network.rpc_timeout_ms);
    }

    #[test]
    fn test_config_validation() {
        let mut config = BrokerConfig::default();

        config.registry.max_workers = 0;
        assert!(config.validate().is_err());
        config.registry.max_workers = 16;

        config.registry.queue_capacity = 0;
        assert!(config.validate().is_err());
        config.registry.queue_capacity = 100;

        config.run.partition_policy = "striped".to_string();
        assert!(config.validate().is_err());
        config.run.partition_policy = "balanced".to_string();
        assert!(config.validate().is_ok());

        config.run.failure_policy = "retry".to_string();
        assert!(config.validate().is_err());
        config.run.failure_policy = "stall".to_string();

        config.logging.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_coordinator_config() {
        let mut config = BrokerConfig::default();
        let coord_config = config.to_coordinator_config();
        assert_eq!(coord_config.max_workers, 16);
        assert_eq!(coord_config.failure_policy, FailurePolicy::Redistribute);
        assert!(coord_config.turn_timeout.is_none());

        config.run.failure_policy = "stall".to_string();
        config.run.turn_timeout_ms = 250;
        let coord_config = config.to_coordinator_config();
        assert_eq!(coord_config.failure_policy, FailurePolicy::Stall);
        assert_eq!(coord_config.turn_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "network:\n  port: 9030\nregistry:\n  max_workers: 4\nrun:\n  partition_policy: balanced"
        )
        .unwrap();

        let config = BrokerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.network.port, 9030);
        assert_eq!(config.network.bind, "0.0.0.0");
        assert_eq!(config.registry.max_workers, 4);
        assert_eq!(config.registry.queue_capacity, 100);
        assert_eq!(config.partition_policy().unwrap().name(), "balanced");
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"run": {{"failure_policy": "stall", "turn_timeout_ms": 1000}}}}"#).unwrap();

        let config = BrokerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.run.failure_policy, "stall");
        assert_eq!(config.run.turn_timeout_ms, 1000);
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(BrokerConfig::from_file(file.path()).is_err());
    }
}
