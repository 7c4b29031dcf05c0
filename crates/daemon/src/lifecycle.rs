// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent lifecycle: startup wiring, serve loop, graceful shutdown.

use crate::channel::ChannelManager;
use crate::config::{Config, ConfigError};
use crate::context::AgentContext;
use crate::credentials::CredentialStore;
use crate::executor::Executor;
use crate::handlers;
use crate::handshake::HandshakeService;
use crate::http::{dashboard_router, peer_router};
use crate::reconciler::Reconciler;
use crate::tunnel::{TunnelServer, TunnelStreams};
use porpulsion_storage::StateRegistry;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Fatal startup failures, mapped onto process exit codes.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("credential store failure: {0}")]
    CredentialStore(String),
    #[error("kubernetes client failure: {0}")]
    Kubernetes(String),
    #[error("cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

impl StartupError {
    /// 1 = misconfiguration, 2 = irrecoverable credential store failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::CredentialStore(_) => 2,
            _ => 1,
        }
    }
}

/// Build the full agent context from a resolved config.
pub async fn build_context(config: Config) -> Result<Arc<AgentContext>, StartupError> {
    let registry = Arc::new(
        StateRegistry::open(&config.state_dir)
            .map_err(|e| StartupError::CredentialStore(e.to_string()))?,
    );
    let credentials = Arc::new(
        CredentialStore::init(Arc::clone(&registry), &config.agent_name)
            .map_err(|e| StartupError::CredentialStore(e.to_string()))?,
    );

    let client = kube::Client::try_default()
        .await
        .map_err(|e| StartupError::Kubernetes(e.to_string()))?;
    let executor = Arc::new(Executor::new(client, &config.namespace));

    let channels = ChannelManager::new(Arc::clone(&registry), &credentials.ca_pem());
    let handshake = HandshakeService::new(
        Arc::clone(&registry),
        Arc::clone(&credentials),
        Arc::clone(&channels),
        &config.agent_name,
        &config.self_url,
    );

    let ctx = Arc::new(AgentContext {
        config,
        registry,
        credentials,
        channels: Arc::clone(&channels),
        executor: Arc::clone(&executor),
        handshake,
        tunnel_streams: TunnelStreams::new(),
        http: reqwest::Client::new(),
        reconcile_wake: Arc::new(Notify::new()),
    });

    let tunnel_server =
        TunnelServer::new(executor, Arc::clone(&channels), Arc::clone(&ctx.registry));
    channels.set_router(Arc::new(handlers::build_router(Arc::clone(&ctx), tunnel_server)));

    Ok(ctx)
}

/// Run the agent until SIGTERM/ctrl-c.
pub async fn serve(ctx: Arc<AgentContext>) -> Result<(), StartupError> {
    // Dial every known peer.
    for peer in ctx.registry.peers() {
        ctx.channels.ensure_peer(&peer);
    }

    let shutdown = CancellationToken::new();
    let reconciler = Reconciler::new(Arc::clone(&ctx)).spawn(shutdown.clone());

    let dashboard_addr = format!("{}:{}", ctx.config.host, ctx.config.port);
    let peer_addr = format!("{}:{}", ctx.config.host, ctx.config.peer_port);

    let dashboard_listener = tokio::net::TcpListener::bind(&dashboard_addr)
        .await
        .map_err(|e| StartupError::Bind { addr: dashboard_addr.clone(), reason: e.to_string() })?;
    let peer_listener = tokio::net::TcpListener::bind(&peer_addr)
        .await
        .map_err(|e| StartupError::Bind { addr: peer_addr.clone(), reason: e.to_string() })?;

    tracing::info!(
        agent = %ctx.config.agent_name,
        dashboard = %dashboard_addr,
        peer = %peer_addr,
        namespace = %ctx.config.namespace,
        fingerprint = %ctx.credentials.fingerprint(),
        "porpulsion agent listening"
    );

    let dashboard_app = dashboard_router(Arc::clone(&ctx));
    let peer_app = peer_router(Arc::clone(&ctx));
    let dashboard_shutdown = shutdown.clone();
    let peer_shutdown = shutdown.clone();
    let dashboard = async move {
        axum::serve(dashboard_listener, dashboard_app)
            .with_graceful_shutdown(wait_cancelled(dashboard_shutdown))
            .await
    };
    let peer_surface = async move {
        axum::serve(peer_listener, peer_app)
            .with_graceful_shutdown(wait_cancelled(peer_shutdown))
            .await
    };

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        signal_token.cancel();
    });

    let (dashboard_result, peer_result) = tokio::join!(dashboard, peer_surface);

    // Clean shutdown: tell every peer goodbye before dropping channels.
    ctx.channels.goodbye_all().await;
    reconciler.abort();

    for result in [dashboard_result, peer_result] {
        if let Err(e) = result {
            tracing::warn!(error = %e, "listener exited with error");
        }
    }
    Ok(())
}

async fn wait_cancelled(token: CancellationToken) {
    token.cancelled().await;
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
