//! Weather Agent 命令行入口
//!
//! 加载 .env 与配置，组装 Runner，创建会话后运行演示脚本（--demo）或逐行读取标准输入。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use weather_agent::config::{load_config, AppConfig};
use weather_agent::core::{build_runner, initial_state_from_config, DEMO_QUERIES};
use weather_agent::{observability, ConversationLoop};

#[derive(Parser, Debug)]
#[command(name = "weather-agent", version, about = "Multi-agent weather assistant with guardrails")]
struct Cli {
    /// 额外的 TOML 配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 运行内置演示脚本
    #[arg(long)]
    demo: bool,

    /// 用户 ID（默认取配置 app.user_id）
    #[arg(long)]
    user: Option<String>,

    /// 会话 ID（默认取配置 app.session_id）
    #[arg(long)]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    observability::init();
    let cli = Cli::parse();

    let cfg = match load_config(cli.config.clone()) {
        Ok(cfg) => cfg,
        Err(e) if cli.config.is_none() => {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        }
        Err(e) => return Err(e).context("Failed to load config"),
    };

    let runner = Arc::new(build_runner(&cfg).context("Failed to build runner")?);
    let user_id = cli.user.unwrap_or_else(|| cfg.app.user_id.clone());
    let session_id = cli.session.unwrap_or_else(|| cfg.app.session_id.clone());
    runner
        .create_session(&user_id, Some(&session_id), initial_state_from_config(&cfg))
        .await
        .context("Failed to create session")?;
    tracing::info!(app = %cfg.app.name, user = %user_id, session = %session_id, "Session ready");

    let conversation = ConversationLoop::new(runner, user_id, session_id);

    if cli.demo {
        for query in DEMO_QUERIES {
            ask(&conversation, query).await?;
        }
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
            break;
        }
        ask(&conversation, query).await?;
    }
    Ok(())
}

async fn ask(conversation: &ConversationLoop, query: &str) -> anyhow::Result<()> {
    println!("\n>>> User Query: {}", query);
    let response = conversation
        .submit(query)
        .await
        .with_context(|| format!("Turn failed for query '{}'", query))?;
    println!("<<< Agent Response: {}", response.display_text());
    Ok(())
}
