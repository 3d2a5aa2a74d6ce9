//! Keyboard Commands
//!
//! 从标准输入逐行读取按键：
//!
//! | 键 | 命令 |
//! |---|---|
//! | `p` | 暂停 / 继续 |
//! | `s` | 保存当前世界快照 |
//! | `q` | 软退出：Reset，Broker 与 Worker 继续运行 |
//! | `k` | 硬退出：保存快照，Reset(kill)，KillBroker |

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Save,
    Quit,
    Kill,
}

impl ControlCommand {
    pub fn from_key(line: &str) -> Option<Self> {
        match line.trim() {
            "p" | "P" => Some(ControlCommand::Pause),
            "s" | "S" => Some(ControlCommand::Save),
            "q" | "Q" => Some(ControlCommand::Quit),
            "k" | "K" => Some(ControlCommand::Kill),
            _ => None,
        }
    }
}

/// 在后台读取 stdin，直到 EOF 或接收端关闭
pub fn spawn_stdin_reader(tx: mpsc::Sender<ControlCommand>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match ControlCommand::from_key(&line) {
                    Some(command) => {
                        if tx.send(command).await.is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => tracing::warn!("Unknown key {:?} (use p, s, q or k)", line.trim()),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
        tracing::debug!("Keyboard reader exited");
    })
}
