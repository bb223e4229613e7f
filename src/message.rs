//! Chat message model and the control sub-protocol
//!
//! Every frame on the wire is a `ChatMessage`. Messages whose sender is
//! `SERVER` are system notices; some of them carry a control payload
//! (`AUTH_OK`, `AUTH_FAIL:<reason>`, `USER_LIST:<a,b,c>`).

use chrono::{DateTime, SubsecRound, Utc};

use crate::error::{AuthError, ModerationError};

/// Sender name reserved for server-generated messages
pub const SERVER_SENDER: &str = "SERVER";

/// Authentication succeeded
pub const AUTH_OK: &str = "AUTH_OK";

/// Prefix of an authentication failure; the reason follows
pub const AUTH_FAIL_PREFIX: &str = "AUTH_FAIL:";

/// Prefix of a user list snapshot; comma-joined logins follow
pub const USER_LIST_PREFIX: &str = "USER_LIST:";

/// A single chat message
///
/// Immutable once built. The timestamp is kept at millisecond precision so a
/// message survives an encode/decode cycle unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    sender: String,
    text: String,
    timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message stamped with the current time
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_timestamp(sender, text, Utc::now())
    }

    /// Create a message with an explicit timestamp (truncated to milliseconds)
    pub fn with_timestamp(
        sender: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: timestamp.trunc_subsecs(3),
        }
    }

    /// Create a system notice from `SERVER`
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SERVER_SENDER, text)
    }

    /// `AUTH_OK` control message
    pub fn auth_ok() -> Self {
        Self::system(AUTH_OK)
    }

    /// `AUTH_FAIL:<reason>` control message
    pub fn auth_fail(reason: &AuthError) -> Self {
        Self::system(format!("{}{}", AUTH_FAIL_PREFIX, reason))
    }

    /// `USER_LIST:<a,b,c>` control message
    pub fn user_list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = names
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self::system(format!("{}{}", USER_LIST_PREFIX, joined))
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether this message was generated by the server
    pub fn is_system(&self) -> bool {
        self.sender == SERVER_SENDER
    }
}

/// Convert a moderation failure into the reply sent to the admin
impl From<ModerationError> for ChatMessage {
    fn from(err: ModerationError) -> Self {
        ChatMessage::system(err.to_string())
    }
}
