//! Kukaracha Chat Server Library
//!
//! A line-delimited TCP chat server using the Actor pattern for state
//! management.
//!
//! # Features
//! - One JSON frame per line: `{"sender", "text", "timestamp"}`
//! - Login/password authentication against a salted SHA-256 credential file
//! - Optional registration of unknown logins on first attempt
//! - Broadcast of chat messages to every connected session
//! - Bounded history replayed to newly authenticated users
//! - Admin moderation: `/kick`, `/ban`, `/unban`
//! - Per-run plain-text session log
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning the registry, credentials,
//!   ban list and history
//! - Each connection runs a `handler` task that frames bytes into messages
//!   and forwards them to the server
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use kukaracha_server::{ChatService, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::from_env().with_port(4242);
//!     let service = ChatService::start(config).await.unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     service.stop().await;
//! }
//! ```

pub mod chat_log;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod history;
pub mod message;
pub mod moderation;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use chat_log::ChatLog;
pub use config::ServerConfig;
pub use credentials::{AuthOutcome, CredentialRecord, CredentialStore};
pub use error::{AppError, AuthError, CodecError, ModerationError, RegistryError, SendError, StoreError};
pub use handler::handle_connection;
pub use history::HistoryRing;
pub use message::ChatMessage;
pub use moderation::{AdminCommand, BanList};
pub use registry::SessionRegistry;
pub use server::{ChatServer, ServerCommand};
pub use service::ChatService;
pub use session::{FrameBuffer, SessionHandle};
pub use types::SessionId;
