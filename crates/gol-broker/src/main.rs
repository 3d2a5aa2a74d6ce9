//! Game of Life Broker - 主服务入口
//!
//! 接收 Worker 订阅与 Client 的运行请求，把每个回合分发给 Worker 执行

use gol_broker::config::{BrokerConfig, LoggingConfig};
use gol_broker::coordinator::Broker;
use gol_broker::transport::{BrokerServer, ZmqConnector};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置（支持命令行参数和配置文件）
    let config = BrokerConfig::load().context("Failed to load configuration")?;

    // 初始化日志
    init_logging(&config.logging);

    info!("🚀 Game of Life Broker starting...");

    // 打印配置摘要
    config.print_summary();

    let policy = config.partition_policy()?;
    let connector = Arc::new(ZmqConnector::new(
        config.connect_timeout(),
        config.rpc_timeout(),
    ));
    let broker = Arc::new(Broker::new(
        config.to_coordinator_config(),
        policy,
        connector,
    ));

    let bind_address = config.bind_address();
    let server = BrokerServer::bind(broker.clone(), &bind_address)
        .await
        .context(format!("Failed to bind broker on {}", bind_address))?;

    info!("💡 Broker is ready to accept workers and runs on {}", server.endpoint());

    // Ctrl+C 与 KillBroker 走同一条关闭路径
    let serving = tokio::spawn(server.run());
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received, terminating workers...");
            broker.kill().await;
        }
        _ = wait_for_kill(&broker) => {}
    }

    match serving.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Broker server failed: {}", e),
        Err(e) => error!("Broker server task panicked: {}", e),
    }

    info!("✅ Broker shutdown complete");
    Ok(())
}

/// 等待 KillBroker
async fn wait_for_kill(broker: &Broker) {
    let mut shutdown = broker.shutdown_signal();
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

/// Graceful Shutdown Signal
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C signal");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

/// 初始化日志系统（RUST_LOG 优先）
fn init_logging(logging_config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging_config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
