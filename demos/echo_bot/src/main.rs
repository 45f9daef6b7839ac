//! Echo Bot Example
//!
//! A small bot built on the Linbot dispatch core. Point a OneBot v11 gateway's
//! reverse WebSocket at `ws://127.0.0.1:8050/onebot/v11/ws` (or whatever
//! `linbot.toml` configures) and try:
//!
//! ```text
//! /echo <text>  - repeat text in the group
//! /ping         - Pong!
//! /info         - message info
//! /help         - command list
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- -c linbot.toml
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use linbot::prelude::*;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "echo-bot", version, about = "A simple echo bot for Linbot")]
struct Args {
    /// Directory to run in; config files are searched here
    #[arg(short = 'p', long)]
    working_dir: Option<PathBuf>,

    /// Configuration file to load instead of searching for one
    #[arg(short, long)]
    config: Option<PathBuf>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Repeats the command argument back to the group.
async fn echo(_event: EventContext<GroupMessageEvent>, args: CommandArgs) -> ApiResult<()> {
    let text = args.trimmed();
    if text.is_empty() {
        return Ok(());
    }
    api::send_group_msg(text.to_string(), None).await?;
    Ok(())
}

async fn ping() -> ApiResult<()> {
    api::reply("Pong!").await?;
    Ok(())
}

async fn help() -> ApiResult<()> {
    api::reply(
        "Echo Bot - Commands\n\
         /echo <text> - Echo text\n\
         /ping        - Pong!\n\
         /info        - Message info\n\
         /help        - This help",
    )
    .await?;
    Ok(())
}

async fn info(event: EventContext<MessageEvent>) -> ApiResult<()> {
    let nickname = event.sender.display_name().unwrap_or("Unknown");
    let mut text = format!(
        "Message Info\n\
         • Type: {}\n\
         • From: {} ({})\n\
         • Message ID: {}",
        event.message_type, nickname, event.user_id, event.message_id
    );
    if let Some(group_id) = event.event().group_id() {
        text.push_str(&format!("\n• Group: {group_id}"));
    }
    api::reply(text).await?;
    Ok(())
}

fn echo_plugin() -> BoxedPlugin {
    plugin_fn("echo", |registry| {
        registry.register(on_command("/echo").block(true), echo);
        registry.register(on_command("/ping").block(true), ping);
        registry.register(on_command("/info").block(true), info);
        registry.register(on_command("/help").block(true), help);
        Ok(())
    })
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.working_dir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("cannot enter working directory {}", dir.display()))?;
    }

    let mut builder = LinbotRuntime::builder().plugin(echo_plugin());
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    let runtime = builder.build().context("failed to build runtime")?;
    debug!(?args, "Starting echo bot");

    runtime.run().await?;
    Ok(())
}
