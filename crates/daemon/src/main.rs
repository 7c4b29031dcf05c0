// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `porpulsion` — peer-to-peer Kubernetes connector agent.

use clap::{Parser, Subcommand};
use porpulsion_daemon::config::{Config, ServeArgs};
use porpulsion_daemon::lifecycle;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "porpulsion", version, about = "Peer-to-peer Kubernetes connector agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent
    Serve(ServeArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args),
    }
}

fn serve(args: ServeArgs) -> ExitCode {
    let config = match Config::resolve(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("porpulsion: {e}");
            return ExitCode::from(1);
        }
    };

    let _log_guard = init_tracing(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("porpulsion: cannot start runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = runtime.block_on(async {
        let ctx = lifecycle::build_context(config).await?;
        lifecycle::serve(ctx).await
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Stdout + rolling file logging. `RUST_LOG` wins; otherwise the
/// persisted `log_level` setting (read cheaply from the state blob)
/// provides the default.
fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = persisted_log_level(config).unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_dir = config.state_dir.join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(log_dir, "porpulsion.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Some(guard)
}

/// Peek at the persisted settings without opening the whole registry.
fn persisted_log_level(config: &Config) -> Option<String> {
    let text = std::fs::read_to_string(config.state_dir.join("state.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    value
        .get("data")?
        .get("settings")?
        .get("log_level")?
        .as_str()
        .map(|level| level.to_lowercase())
}
