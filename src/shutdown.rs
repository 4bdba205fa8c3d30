//! Graceful shutdown.
//!
//! On SIGINT/SIGTERM the HTTP server stops accepting connections and gets a
//! grace period to drain in-flight requests. Registered handlers then run,
//! each under its own timeout, so one stuck handler cannot block the rest.

use crate::session::SessionRegistry;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time in-flight requests get after the signal
    pub grace_period: Duration,
    /// Upper bound for each shutdown handler
    pub handler_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(5),
        }
    }
}

impl ShutdownConfig {
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// A component that needs to do work before the process exits.
#[async_trait]
pub trait ShutdownHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn shutdown(&self) -> Result<()>;
}

pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    triggered: watch::Sender<bool>,
    handlers: Vec<Box<dyn ShutdownHandler>>,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        let (triggered, _) = watch::channel(false);
        Self {
            config,
            triggered,
            handlers: Vec::new(),
        }
    }

    pub fn add_handler(&mut self, handler: Box<dyn ShutdownHandler>) {
        self.handlers.push(handler);
    }

    /// Waits for Ctrl-C or SIGTERM, then triggers shutdown.
    pub async fn wait_for_signal(&self) {
        let mut triggered = self.triggered.subscribe();
        tokio::select! {
            signal = os_signal() => info!(signal, "shutdown signal received"),
            _ = triggered.wait_for(|fired| *fired) => {}
        }
        self.trigger();
    }

    /// Starts shutdown without waiting for a signal.
    pub fn trigger(&self) {
        self.triggered.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.borrow()
    }

    /// Completes `grace_period` after shutdown was triggered.
    pub async fn drain_deadline(&self) {
        let mut triggered = self.triggered.subscribe();
        if triggered.wait_for(|fired| *fired).await.is_err() {
            return;
        }
        sleep(self.config.grace_period).await;
    }

    /// Runs every handler in registration order. Failures and timeouts are
    /// logged and reported after all handlers had their turn.
    pub async fn run_handlers(&self) -> Result<()> {
        let mut failed = Vec::new();
        for handler in &self.handlers {
            match timeout(self.config.handler_timeout, handler.shutdown()).await {
                Ok(Ok(())) => info!(handler = handler.name(), "shutdown handler finished"),
                Ok(Err(e)) => {
                    error!(handler = handler.name(), error = %e, "shutdown handler failed");
                    failed.push(handler.name().to_string());
                }
                Err(_) => {
                    warn!(
                        handler = handler.name(),
                        timeout_ms = self.config.handler_timeout.as_millis() as u64,
                        "shutdown handler timed out"
                    );
                    failed.push(handler.name().to_string());
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("shutdown handlers failed: {}", failed.join(", ")))
        }
    }
}

async fn os_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Writes every live cart to its mirror before exit.
pub struct CartMirrorShutdownHandler {
    sessions: Arc<SessionRegistry>,
}

impl CartMirrorShutdownHandler {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl ShutdownHandler for CartMirrorShutdownHandler {
    fn name(&self) -> &str {
        "cart_mirror"
    }

    async fn shutdown(&self) -> Result<()> {
        let flushed = self.sessions.flush_mirrors().await?;
        info!(carts = flushed, "cart mirrors flushed");
        Ok(())
    }
}
