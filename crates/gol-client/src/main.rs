//! Game of Life Client - 命令行入口
//!
//! 按键：p 暂停/继续，s 保存快照，q 退出（保留 Broker），k 关闭全部

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gol_client::keys::spawn_stdin_reader;
use gol_client::{BrokerClient, Distributor, DistributorEvent, IoSettings, Outcome, Params};

#[derive(Parser, Debug)]
#[command(name = "gol-client")]
#[command(about = "Run Game of Life on a broker and its workers", long_about = None)]
struct Args {
    /// Broker 地址
    #[arg(long, default_value = "tcp://127.0.0.1:8030", env = "GOL_BROKER")]
    broker: String,

    /// 回合数
    #[arg(short, long, default_value = "10000000000")]
    turns: u64,

    /// 期望的并行度
    #[arg(short = 'j', long, default_value = "8")]
    threads: usize,

    #[arg(long, default_value = "512")]
    width: usize,

    #[arg(long, default_value = "512")]
    height: usize,

    /// 输入目录（<W>x<H>.pgm）
    #[arg(long, default_value = "images")]
    images: PathBuf,

    /// 输出目录（<W>x<H>x<turn>.pgm）
    #[arg(long, default_value = "out")]
    out: PathBuf,

    /// 存活细胞统计间隔（毫秒）
    #[arg(long, default_value = "2000")]
    tick_ms: u64,

    #[arg(long, default_value = "5000")]
    connect_timeout_ms: u64,

    /// 控制请求超时（毫秒），Publish 不受限制
    #[arg(long, default_value = "30000")]
    rpc_timeout_ms: u64,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if args.threads == 0 {
        anyhow::bail!("--threads must be at least 1");
    }
    if args.tick_ms == 0 {
        anyhow::bail!("--tick-ms must be greater than 0");
    }

    let client = BrokerClient::connect(
        &args.broker,
        Duration::from_millis(args.connect_timeout_ms),
        Duration::from_millis(args.rpc_timeout_ms),
    )
    .await
    .with_context(|| format!("Failed to connect to broker at {}", args.broker))?;

    let params = Params {
        turns: args.turns,
        threads: args.threads,
        image_width: args.width,
        image_height: args.height,
    };
    let io = IoSettings {
        images_dir: args.images,
        out_dir: args.out,
        tick: Duration::from_millis(args.tick_ms),
    };

    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, mut event_rx) = mpsc::channel::<DistributorEvent>(64);
    spawn_stdin_reader(command_tx);

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!("[turn {}] {}", event.completed_turns(), event);
        }
    });

    let outcome = Distributor::new(Arc::new(client), params, io, event_tx)
        .run(command_rx)
        .await;
    let _ = printer.await;

    // stdin 读取任务可能仍阻塞在 read 上，直接退出进程
    match outcome {
        Ok(Outcome::Completed { turn }) => info!("✅ Run finished after {} turns", turn),
        Ok(Outcome::Quit { turn }) => info!("👋 Left the broker running at turn {}", turn),
        Ok(Outcome::Killed { turn }) => info!("🛑 Broker and workers shut down at turn {}", turn),
        Err(e) => {
            error!("Run failed: {:#}", e);
            std::process::exit(1);
        }
    }
    std::process::exit(0);
}
