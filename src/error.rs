//! Error types for the chat server
//!
//! Defines application-level errors plus one enum per failure category:
//! wire decoding, credential storage, authentication, registry misuse,
//! moderation and message sending. Uses thiserror for ergonomic error
//! definitions.

use thiserror::Error;

/// Application-level errors
///
/// Fatal for whatever owns them: the listener at startup, or a single
/// connection task.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,
}

/// Wire frame errors
///
/// `MalformedMessage` is recoverable: the frame is dropped and the
/// connection stays up.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is not a well-formed `{sender, text, timestamp}` record
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Message could not be serialized
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Credential file errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Credential file IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// File parsed but is not a `{"users": [...]}` object
    #[error("Credential file is corrupt")]
    Corrupt,
}

/// Authentication failures
///
/// The display text is the reason sent to the client after `AUTH_FAIL:`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Empty login or empty password
    #[error("{0}")]
    InvalidCredentials(&'static str),

    #[error("Wrong password")]
    WrongPassword,

    #[error("User not found. Ask the administrator to register you")]
    UserNotFound,

    /// Credential file could not be read or written
    #[error("{0}")]
    StorageError(&'static str),

    /// Another session already holds this login
    #[error("User is already connected")]
    AlreadyConnected,

    #[error("User is banned")]
    Banned,
}

/// Session registry misuse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Name '{0}' is already bound")]
    NameTaken(String),

    #[error("Unknown session")]
    UnknownSession,
}

/// Admin command failures
///
/// The display text is the reply sent back to the admin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModerationError {
    /// Command given without a target; carries the command name
    #[error("Usage: {0} <name>")]
    MissingTarget(&'static str),

    #[error("You cannot target yourself")]
    SelfTarget,

    #[error("User '{0}' not found")]
    NotFound(String),

    #[error("User '{0}' is already banned")]
    AlreadyBanned(String),

    #[error("User '{0}' is not banned")]
    NotBanned(String),

    #[error("unknown command: `{0}`")]
    UnknownCommand(String),
}

/// Message send errors
///
/// Occurs when a session's connection task is gone or not keeping up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The session's outbound queue is full
    #[error("Outbound queue full")]
    QueueFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_reason_text() {
        assert_eq!(AuthError::Banned.to_string(), "User is banned");
        assert_eq!(
            AuthError::InvalidCredentials("Login must not be empty").to_string(),
            "Login must not be empty"
        );
    }

    #[test]
    fn test_moderation_error_reply_text() {
        assert_eq!(
            ModerationError::UnknownCommand("/mute".to_string()).to_string(),
            "unknown command: `/mute`"
        );
        assert_eq!(
            ModerationError::MissingTarget("/kick").to_string(),
            "Usage: /kick <name>"
        );
    }

    #[test]
    fn test_app_error_wraps_io() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use").into();
        assert!(matches!(err, AppError::Io(_)));
        assert_eq!(err.to_string(), "IO error: in use");
        assert_eq!(AppError::ChannelSend.to_string(), "Channel send error");
    }
}
