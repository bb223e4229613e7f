//! Ban list and admin command parsing
//!
//! The ban list lives in memory only and starts empty on every run.

use std::collections::HashSet;

use crate::error::ModerationError;

/// Logins denied at authentication time (case-sensitive)
#[derive(Debug, Default)]
pub struct BanList {
    banned: HashSet<String>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the login was already banned
    pub fn ban(&mut self, login: &str) -> bool {
        self.banned.insert(login.to_string())
    }

    /// Returns `false` if the login was not banned
    pub fn unban(&mut self, login: &str) -> bool {
        self.banned.remove(login)
    }

    pub fn is_banned(&self, login: &str) -> bool {
        self.banned.contains(login)
    }

    pub fn len(&self) -> usize {
        self.banned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banned.is_empty()
    }
}

/// A validated admin command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Kick(String),
    Ban(String),
    Unban(String),
}

impl AdminCommand {
    /// Parse `/cmd <name>` issued by `admin`
    ///
    /// The command token is case-insensitive. The target must be present and
    /// must not be the admin's own login.
    pub fn parse(text: &str, admin: &str) -> Result<Self, ModerationError> {
        let mut tokens = text.split_whitespace();
        let command = tokens.next().unwrap_or_default();
        let target = tokens.next();

        let (name, build): (&'static str, fn(String) -> AdminCommand) =
            match command.to_lowercase().as_str() {
                "/kick" => ("/kick", AdminCommand::Kick),
                "/ban" => ("/ban", AdminCommand::Ban),
                "/unban" => ("/unban", AdminCommand::Unban),
                _ => return Err(ModerationError::UnknownCommand(command.to_string())),
            };

        let target = target.ok_or(ModerationError::MissingTarget(name))?;
        if target.eq_ignore_ascii_case(admin) {
            return Err(ModerationError::SelfTarget);
        }
        Ok(build(target.to_string()))
    }
}
