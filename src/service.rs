//! Chat service facade
//!
//! Binds the listener, starts the ChatServer actor and the accept loop, and
//! exposes `start` / `stop` plus an error-notification channel to whatever
//! embeds the server (the CLI binary, a GUI, tests).

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::chat_log::ChatLog;
use crate::config::ServerConfig;
use crate::credentials::CredentialStore;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::server::{ChatServer, ServerCommand};
use crate::session::outbound_queue_len;

/// Channel buffer size for server commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Pause after the first failed accept; doubles while failures continue
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// A running chat server
pub struct ChatService {
    local_addr: SocketAddr,
    cmd_tx: mpsc::Sender<ServerCommand>,
    accept_task: JoinHandle<()>,
    server_task: JoinHandle<()>,
    errors: Option<mpsc::UnboundedReceiver<String>>,
}

impl ChatService {
    /// Bind `0.0.0.0:<config.port>` and start serving
    ///
    /// Failing to bind is the only fatal error.
    pub async fn start(config: ServerConfig) -> Result<Self, AppError> {
        let (err_tx, err_rx) = mpsc::unbounded_channel();

        let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to start server on port {}: {}", config.port, e);
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;

        let credentials = CredentialStore::open(&config.users_path);
        let chat_log = config.log_dir.as_ref().and_then(|dir| match ChatLog::create(dir) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!("Session log disabled: {}", e);
                let _ = err_tx.send(format!("Session log disabled: {}", e));
                None
            }
        });

        // Create ChatServer actor channel and start
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let server = ChatServer::new(cmd_rx, &config, credentials, chat_log);
        let server_task = tokio::spawn(server.run());

        let queue_len = outbound_queue_len(config.history_capacity);
        let accept_task = tokio::spawn(accept_loop(listener, cmd_tx.clone(), err_tx, queue_len));

        info!("Chat server listening on {}", local_addr);

        Ok(Self {
            local_addr,
            cmd_tx,
            accept_task,
            server_task,
            errors: Some(err_rx),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Take the error-notification channel; `None` after the first call
    pub fn take_errors(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.errors.take()
    }

    /// Stop accepting, close every session and wait for the actor to finish
    pub async fn stop(self) {
        self.accept_task.abort();
        let _ = self.accept_task.await;

        if self.cmd_tx.send(ServerCommand::Shutdown).await.is_err() {
            warn!("ChatServer already stopped");
        }
        let _ = self.server_task.await;

        info!("Chat server stopped");
    }
}

/// Connection accept loop
///
/// Accept errors (e.g. out of file descriptors) are reported and retried
/// after a growing pause instead of spinning.
async fn accept_loop(
    listener: TcpListener,
    cmd_tx: mpsc::Sender<ServerCommand>,
    err_tx: mpsc::UnboundedSender<String>,
    queue_len: usize,
) {
    let mut failures: u32 = 0;
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                failures = 0;
                info!("New connection from {}", addr);
                let cmd_tx = cmd_tx.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cmd_tx, queue_len).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                error!("Failed to accept connection: {}", e);
                let _ = err_tx.send(format!("Failed to accept connection: {}", e));
                tokio::time::sleep(accept_backoff(failures)).await;
            }
        }
    }
}

/// Pause before retrying after `failures` consecutive accept errors
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}
