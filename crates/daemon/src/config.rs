// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration.
//!
//! Flags mirror environment variables (`AGENT_NAME`, `SELF_URL`,
//! `NAMESPACE`); `self_url` falls back to the orchestrator-injected
//! `POD_IP` when neither flag nor env gives one.

use crate::env;
use clap::Args;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("agent name is required (--agent-name or AGENT_NAME)")]
    MissingAgentName,
    #[error("self URL is required (--self-url, SELF_URL, or POD_IP)")]
    MissingSelfUrl,
    #[error("no usable state directory (set PORPULSION_STATE_DIR or HOME)")]
    NoStateDir,
}

/// `porpulsion serve` flags.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Name this agent announces to peers
    #[arg(long, env = "AGENT_NAME")]
    pub agent_name: Option<String>,

    /// Externally reachable base URL of this agent's peer port
    #[arg(long, env = "SELF_URL")]
    pub self_url: Option<String>,

    /// Bind address for both listeners
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Local dashboard API port
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Peer-facing port (handshake + channel upgrades)
    #[arg(long, default_value_t = 8081)]
    pub peer_port: u16,

    /// Kubernetes namespace for executed workloads
    #[arg(long, env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// State directory override
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

/// Resolved agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub agent_name: String,
    pub self_url: String,
    pub host: String,
    pub port: u16,
    pub peer_port: u16,
    pub namespace: String,
    pub state_dir: PathBuf,
}

impl Config {
    pub fn resolve(args: ServeArgs) -> Result<Self, ConfigError> {
        let agent_name = args
            .agent_name
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingAgentName)?;

        let self_url = match args.self_url.filter(|s| !s.is_empty()) {
            Some(url) => url,
            None => {
                let ip = env::pod_ip().ok_or(ConfigError::MissingSelfUrl)?;
                format!("http://{ip}:{}", args.peer_port)
            }
        };

        let namespace = args
            .namespace
            .filter(|s| !s.is_empty())
            .or_else(env::pod_namespace)
            .unwrap_or_else(|| "default".to_string());

        let state_dir = match args.state_dir {
            Some(dir) => dir,
            None => env::state_dir().ok_or(ConfigError::NoStateDir)?,
        };

        Ok(Self {
            agent_name,
            self_url,
            host: args.host,
            port: args.port,
            peer_port: args.peer_port,
            namespace,
            state_dir,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
