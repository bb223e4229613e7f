//! ChatServer Actor implementation
//!
//! The central actor that owns all shared state: the session registry, the
//! credential store, the ban list, the history ring and the session log.
//! Connection tasks talk to it over an mpsc channel; every state change and
//! broadcast happens inside a single command handler, so no locks are needed.

use std::net::SocketAddr;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::chat_log::ChatLog;
use crate::config::ServerConfig;
use crate::credentials::{AuthOutcome, CredentialStore};
use crate::error::{AuthError, ModerationError};
use crate::history::HistoryRing;
use crate::message::ChatMessage;
use crate::moderation::{AdminCommand, BanList};
use crate::registry::SessionRegistry;
use crate::session::SessionHandle;
use crate::types::SessionId;

/// Commands sent from connection tasks (and the service) to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection accepted
    Connect {
        session_id: SessionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::Sender<ChatMessage>,
        close: watch::Sender<bool>,
    },
    /// A decoded frame from a connection
    Inbound {
        session_id: SessionId,
        message: ChatMessage,
    },
    /// Connection closed (by either side)
    Disconnect { session_id: SessionId },
    /// Close every session and stop the actor
    Shutdown,
}

/// The main ChatServer actor
pub struct ChatServer {
    registry: SessionRegistry,
    credentials: CredentialStore,
    bans: BanList,
    history: HistoryRing,
    chat_log: Option<ChatLog>,
    allow_registration: bool,
    admin_login: String,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(
        receiver: mpsc::Receiver<ServerCommand>,
        config: &ServerConfig,
        credentials: CredentialStore,
        chat_log: Option<ChatLog>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            credentials,
            bans: BanList::new(),
            history: HistoryRing::new(config.history_capacity),
            chat_log,
            allow_registration: config.allow_registration,
            admin_login: config.admin_login.clone(),
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Processes commands until `Shutdown` arrives or all senders are dropped.
    pub async fn run(mut self) {
        info!(
            "ChatServer started (auto-registration {})",
            if self.allow_registration { "enabled" } else { "disabled" }
        );

        while let Some(cmd) = self.receiver.recv().await {
            let stop = matches!(cmd, ServerCommand::Shutdown);
            self.handle_command(cmd);
            if stop {
                break;
            }
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    pub fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect {
                session_id,
                peer,
                outbound,
                close,
            } => self.handle_connect(session_id, peer, outbound, close),
            ServerCommand::Inbound {
                session_id,
                message,
            } => self.handle_inbound(session_id, message),
            ServerCommand::Disconnect { session_id } => self.handle_disconnect(session_id),
            ServerCommand::Shutdown => self.handle_shutdown(),
        }
    }

    fn handle_connect(
        &mut self,
        session_id: SessionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::Sender<ChatMessage>,
        close: watch::Sender<bool>,
    ) {
        info!("Session {} connected", session_id);
        self.registry
            .add(SessionHandle::new(session_id, peer, outbound, close));
        debug!("Total sessions: {}", self.registry.len());
    }

    fn handle_inbound(&mut self, session_id: SessionId, message: ChatMessage) {
        let Some(session) = self.registry.get(session_id) else {
            return;
        };

        if session.is_closing() {
            debug!("Ignoring message from closing session {}", session_id);
            return;
        }

        if session.authenticated {
            self.handle_chat(session_id, message);
        } else {
            self.handle_auth(session_id, message);
        }
    }

    /// First frame of a session: sender is the login, text is the password
    fn handle_auth(&mut self, session_id: SessionId, message: ChatMessage) {
        let login = message.sender().trim().to_string();

        match self.check_credentials(&login, message.text()) {
            Ok(outcome) => self.complete_login(session_id, login, outcome),
            Err(err) => self.reject(session_id, &login, err),
        }
    }

    fn check_credentials(&mut self, login: &str, password: &str) -> Result<AuthOutcome, AuthError> {
        if login.is_empty() {
            return Err(AuthError::InvalidCredentials("Login must not be empty"));
        }
        if self.registry.is_name_taken(login) {
            return Err(AuthError::AlreadyConnected);
        }
        if self.bans.is_banned(login) {
            return Err(AuthError::Banned);
        }

        if self.credentials.contains(login) {
            self.credentials.authenticate(login, password)
        } else if self.allow_registration {
            self.credentials.register_user(login, password)
        } else {
            Err(AuthError::UserNotFound)
        }
    }

    fn reject(&mut self, session_id: SessionId, login: &str, err: AuthError) {
        warn!("Authentication failed for '{}' on {}: {}", login, session_id, err);
        if let Some(session) = self.registry.get(session_id) {
            let _ = session.send_message(ChatMessage::auth_fail(&err));
            session.disconnect_from_server();
        }
    }

    fn complete_login(&mut self, session_id: SessionId, login: String, outcome: AuthOutcome) {
        if let Err(e) = self.registry.bind(&login, session_id) {
            warn!("Failed to bind '{}' to {}: {}", login, session_id, e);
            self.reject(session_id, &login, AuthError::AlreadyConnected);
            return;
        }

        let Some(session) = self.registry.get(session_id) else {
            return;
        };

        let welcome = match outcome {
            AuthOutcome::RegisteredNew => "New account created, you are logged in",
            AuthOutcome::SuccessExisting => "Logged in",
        };
        let _ = session.send_message(ChatMessage::auth_ok());
        let _ = session.send_message(ChatMessage::system(welcome));
        self.history.snapshot_replay(session);
        let _ = session.send_message(ChatMessage::user_list(self.registry.user_names()));

        info!("User '{}' authenticated on {}", login, session_id);

        let notice = ChatMessage::system(format!("{} joined the chat", login));
        self.record(&notice);
        self.broadcast_except(&notice, session_id);
        self.broadcast_user_list();
    }

    fn handle_chat(&mut self, session_id: SessionId, message: ChatMessage) {
        let Some(session) = self.registry.get(session_id) else {
            return;
        };
        let Some(login) = session.login.clone() else {
            return;
        };

        if message.sender().trim() != login {
            let _ = session.send_message(ChatMessage::system(
                "You cannot change your user name during a session",
            ));
            return;
        }

        let text = message.text().trim();
        if text.is_empty() {
            return;
        }

        if self.is_admin(&login) && text.starts_with('/') {
            let text = text.to_string();
            self.handle_admin_command(session_id, &login, &text);
            return;
        }

        info!("Message from {}: {}", login, message.text());
        self.record(&message);
        self.broadcast(&message);
    }

    fn is_admin(&self, login: &str) -> bool {
        login.eq_ignore_ascii_case(&self.admin_login)
    }

    fn handle_admin_command(&mut self, admin_id: SessionId, admin_login: &str, text: &str) {
        info!("Admin command from {}: {}", admin_login, text);

        let reply = match AdminCommand::parse(text, admin_login).and_then(|cmd| self.execute(cmd)) {
            Ok(confirmation) => ChatMessage::system(confirmation),
            Err(err) => err.into(),
        };

        if let Some(admin) = self.registry.get(admin_id) {
            let _ = admin.send_message(reply);
        }
    }

    fn execute(&mut self, cmd: AdminCommand) -> Result<String, ModerationError> {
        match cmd {
            AdminCommand::Kick(name) => {
                let target = self
                    .registry
                    .find(&name)
                    .filter(|s| !s.is_closing())
                    .ok_or_else(|| ModerationError::NotFound(name.clone()))?;
                let _ = target.send_message(ChatMessage::system(
                    "You have been kicked by the administrator",
                ));
                target.disconnect_from_server();
                info!("User '{}' kicked", name);
                Ok(format!("User '{}' has been kicked", name))
            }
            AdminCommand::Ban(name) => {
                if !self.bans.ban(&name) {
                    return Err(ModerationError::AlreadyBanned(name));
                }
                if let Some(target) = self.registry.find(&name) {
                    let _ = target.send_message(ChatMessage::system(
                        "You have been banned by the administrator",
                    ));
                    target.disconnect_from_server();
                }
                info!("User '{}' banned", name);
                Ok(format!("User '{}' has been banned", name))
            }
            AdminCommand::Unban(name) => {
                if !self.bans.unban(&name) {
                    return Err(ModerationError::NotBanned(name));
                }
                info!("User '{}' unbanned", name);
                Ok(format!("User '{}' has been unbanned", name))
            }
        }
    }

    fn handle_disconnect(&mut self, session_id: SessionId) {
        let Some(session) = self.registry.remove(session_id) else {
            return;
        };
        info!("Session {} ({}) disconnected", session_id, session.display_name());

        if let (true, Some(login)) = (session.authenticated, session.login) {
            let notice = ChatMessage::system(format!("{} left the chat", login));
            self.record(&notice);
            self.broadcast(&notice);
            self.broadcast_user_list();
        }

        debug!("Total sessions: {}", self.registry.len());
    }

    fn handle_shutdown(&mut self) {
        info!("Closing {} session(s)", self.registry.len());
        for session in self.registry.all() {
            session.disconnect_from_server();
        }
        self.registry.clear();
    }

    /// Append to history and the session log
    fn record(&mut self, message: &ChatMessage) {
        self.history.append(message.clone());
        if let Some(log) = self.chat_log.as_mut() {
            log.append(message);
        }
    }

    /// Send to every connected session that is not being torn down
    fn broadcast(&self, message: &ChatMessage) {
        for session in self.registry.all().filter(|s| !s.is_closing()) {
            if session.send_message(message.clone()).is_err() {
                debug!("Session {} already gone, skipping", session.id);
            }
        }
    }

    fn broadcast_except(&self, message: &ChatMessage, skip: SessionId) {
        for session in self.registry.all().filter(|s| !s.is_closing() && s.id != skip) {
            let _ = session.send_message(message.clone());
        }
    }

    /// Send the current user list to every authenticated session
    fn broadcast_user_list(&self) {
        let list = ChatMessage::user_list(self.registry.user_names());
        for session in self.registry.all().filter(|s| s.is_live_member()) {
            let _ = session.send_message(list.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::outbound_queue_len;
    use tempfile::TempDir;

    const CLOSE: &str = "<close>";

    struct Harness {
        server: ChatServer,
        queue_len: usize,
        _dir: TempDir,
    }

    fn harness(allow_registration: bool) -> Harness {
        harness_with(ServerConfig::default().with_registration(allow_registration))
    }

    fn harness_with(config: ServerConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = config
            .with_users_path(dir.path().join("users.json"))
            .with_log_dir(None);
        let (_tx, rx) = mpsc::channel(8);
        let credentials = CredentialStore::open(&config.users_path);
        Harness {
            server: ChatServer::new(rx, &config, credentials, None),
            queue_len: outbound_queue_len(config.history_capacity),
            _dir: dir,
        }
    }

    struct Client {
        id: SessionId,
        rx: mpsc::Receiver<ChatMessage>,
        close: watch::Receiver<bool>,
        close_seen: bool,
    }

    impl Client {
        /// Drain everything queued so far; a close request shows up once,
        /// after the messages, as `<close>`
        fn texts(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(m) = self.rx.try_recv() {
                out.push(m.text().to_string());
            }
            if *self.close.borrow() && !self.close_seen {
                self.close_seen = true;
                out.push(CLOSE.to_string());
            }
            out
        }
    }

    impl Harness {
        fn register(&mut self, login: &str, password: &str) {
            self.server.credentials.register_user(login, password).unwrap();
        }

        fn connect(&mut self) -> Client {
            let (tx, rx) = mpsc::channel(self.queue_len);
            let (close_tx, close) = watch::channel(false);
            let id = SessionId::new();
            self.server.handle_command(ServerCommand::Connect {
                session_id: id,
                peer: None,
                outbound: tx,
                close: close_tx,
            });
            Client {
                id,
                rx,
                close,
                close_seen: false,
            }
        }

        fn send(&mut self, client: &Client, sender: &str, text: &str) {
            self.server.handle_command(ServerCommand::Inbound {
                session_id: client.id,
                message: ChatMessage::new(sender, text),
            });
        }

        fn disconnect(&mut self, client: &Client) {
            self.server
                .handle_command(ServerCommand::Disconnect { session_id: client.id });
        }

        /// Connect and authenticate, discarding the login chatter
        fn login(&mut self, login: &str, password: &str) -> Client {
            let mut client = self.connect();
            self.send(&client, login, password);
            let texts = client.texts();
            assert_eq!(texts.first().map(String::as_str), Some("AUTH_OK"), "{:?}", texts);
            client
        }
    }

    #[test]
    fn test_unknown_user_rejected_when_registration_disabled() {
        let mut h = harness(false);
        let mut alice = h.connect();

        h.send(&alice, "alice", "x");

        let texts = alice.texts();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with("AUTH_FAIL:"));
        assert_eq!(texts[1], CLOSE);
        assert!(!h.server.registry.is_name_taken("alice"));
        assert!(!h.server.credentials.contains("alice"));
    }

    #[test]
    fn test_auto_registration_logs_in() {
        let mut h = harness(true);
        let mut alice = h.connect();

        h.send(&alice, "alice", "secret");

        let texts = alice.texts();
        assert_eq!(texts[0], "AUTH_OK");
        assert!(texts.contains(&"USER_LIST:alice".to_string()));
        assert_eq!(texts.last().map(String::as_str), Some("USER_LIST:alice"));
        assert!(!texts.contains(&CLOSE.to_string()));
        assert!(h.server.credentials.contains("alice"));
        assert!(h.server.registry.find("alice").unwrap().authenticated);
    }

    #[test]
    fn test_join_notice_and_user_list_broadcast() {
        let mut h = harness(true);
        h.register("bob", "pw");
        let mut bob = h.login("bob", "pw");

        let mut alice = h.connect();
        h.send(&alice, "alice", "secret");

        assert_eq!(
            bob.texts(),
            vec!["alice joined the chat".to_string(), "USER_LIST:alice,bob".to_string()]
        );

        let texts = alice.texts();
        assert_eq!(texts[0], "AUTH_OK");
        assert_eq!(texts[1], "New account created, you are logged in");
        // bob's join notice is in history
        assert!(texts[2].starts_with("--- History"));
        assert_eq!(texts[3], "bob joined the chat");
        assert!(texts[4].starts_with("--- End of history"));
        assert_eq!(&texts[5..], ["USER_LIST:alice,bob", "USER_LIST:alice,bob"]);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let mut h = harness(false);
        h.register("bob", "pw");
        let mut bob = h.connect();

        h.send(&bob, "bob", "not-pw");

        assert_eq!(bob.texts(), vec!["AUTH_FAIL:Wrong password".to_string(), CLOSE.to_string()]);
        assert!(!h.server.registry.is_name_taken("bob"));
    }

    #[test]
    fn test_blank_login_rejected() {
        let mut h = harness(true);
        let mut anon = h.connect();

        h.send(&anon, "   ", "pw");

        let texts = anon.texts();
        assert!(texts[0].starts_with("AUTH_FAIL:"));
        assert_eq!(texts[1], CLOSE);
    }

    #[test]
    fn test_same_login_only_one_session() {
        let mut h = harness(false);
        h.register("alice", "pw");
        let mut first = h.connect();
        let mut second = h.connect();

        h.send(&first, "alice", "pw");
        assert_eq!(first.texts()[0], "AUTH_OK");
        // the waiting session saw the join notice
        assert_eq!(second.texts(), vec!["alice joined the chat".to_string()]);

        h.send(&second, "alice", "pw");
        assert_eq!(
            second.texts(),
            vec!["AUTH_FAIL:User is already connected".to_string(), CLOSE.to_string()]
        );
        assert_eq!(h.server.registry.find("alice").unwrap().id, first.id);
    }

    #[test]
    fn test_failed_session_ignored_after_reject() {
        let mut h = harness(false);
        h.register("alice", "pw");
        let mut client = h.connect();

        h.send(&client, "alice", "wrong");
        h.send(&client, "alice", "pw");

        let texts = client.texts();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].starts_with("AUTH_FAIL:"));
        assert!(!h.server.registry.is_name_taken("alice"));
    }

    #[test]
    fn test_chat_relayed_to_everyone_including_sender() {
        let mut h = harness(false);
        h.register("alice", "pw");
        h.register("bob", "pw");
        let mut alice = h.login("alice", "pw");
        let mut bob = h.login("bob", "pw");
        let mut lurker = h.connect();
        alice.texts();

        h.send(&alice, "alice", "hello");

        assert_eq!(alice.texts(), vec!["hello".to_string()]);
        assert_eq!(bob.texts(), vec!["hello".to_string()]);
        assert!(lurker.texts().contains(&"hello".to_string()));
        assert_eq!(h.server.history.iter().last().unwrap().text(), "hello");
    }

    #[test]
    fn test_sender_mismatch_not_relayed() {
        let mut h = harness(false);
        h.register("alice", "pw");
        h.register("bob", "pw");
        let mut alice = h.login("alice", "pw");
        let mut bob = h.login("bob", "pw");
        alice.texts();
        let history_len = h.server.history.len();

        h.send(&alice, "bob", "I am bob now");

        assert_eq!(
            alice.texts(),
            vec!["You cannot change your user name during a session".to_string()]
        );
        assert!(bob.texts().is_empty());
        assert_eq!(h.server.history.len(), history_len);
    }

    #[test]
    fn test_whitespace_message_dropped() {
        let mut h = harness(false);
        h.register("alice", "pw");
        let mut alice = h.login("alice", "pw");
        let history_len = h.server.history.len();

        h.send(&alice, "alice", "   \t ");

        assert!(alice.texts().is_empty());
        assert_eq!(h.server.history.len(), history_len);
    }

    #[test]
    fn test_non_admin_slash_text_is_chat() {
        let mut h = harness(false);
        h.register("bob", "pw");
        h.register("carol", "pw");
        let mut bob = h.login("bob", "pw");
        let mut carol = h.login("carol", "pw");
        bob.texts();

        h.send(&carol, "carol", "/kick bob");

        assert_eq!(bob.texts(), vec!["/kick bob".to_string()]);
        assert_eq!(carol.texts(), vec!["/kick bob".to_string()]);
        assert!(h.server.registry.find("bob").is_some_and(|s| !s.is_closing()));
    }

    #[test]
    fn test_ban_disconnects_and_blocks_login() {
        let mut h = harness(false);
        h.register("admin", "root");
        h.register("bob", "pw");
        let mut admin = h.login("admin", "root");
        let mut bob = h.login("bob", "pw");
        admin.texts();

        h.send(&admin, "admin", "/ban bob");

        assert_eq!(
            bob.texts(),
            vec!["You have been banned by the administrator".to_string(), CLOSE.to_string()]
        );
        assert_eq!(admin.texts(), vec!["User 'bob' has been banned".to_string()]);

        h.disconnect(&bob);
        assert_eq!(
            admin.texts(),
            vec!["bob left the chat".to_string(), "USER_LIST:admin".to_string()]
        );

        let mut again = h.connect();
        h.send(&again, "bob", "pw");
        let texts = again.texts();
        assert!(texts[0].starts_with("AUTH_FAIL:") && texts[0].contains("banned"));
        assert_eq!(texts[1], CLOSE);
        assert!(!h.server.registry.is_name_taken("bob"));
    }

    #[test]
    fn test_ban_offline_user_then_unban() {
        let mut h = harness(false);
        h.register("admin", "root");
        h.register("bob", "pw");
        let mut admin = h.login("admin", "root");

        h.send(&admin, "admin", "/ban bob");
        h.send(&admin, "admin", "/ban bob");
        assert_eq!(
            admin.texts(),
            vec![
                "User 'bob' has been banned".to_string(),
                "User 'bob' is already banned".to_string()
            ]
        );

        let mut bob = h.connect();
        h.send(&bob, "bob", "pw");
        assert!(bob.texts()[0].contains("banned"));

        h.send(&admin, "admin", "/unban bob");
        h.send(&admin, "admin", "/unban bob");
        assert_eq!(
            admin.texts(),
            vec![
                "User 'bob' has been unbanned".to_string(),
                "User 'bob' is not banned".to_string()
            ]
        );

        h.login("bob", "pw");
    }

    #[test]
    fn test_kick() {
        let mut h = harness(false);
        h.register("Admin", "root");
        h.register("bob", "pw");
        let mut admin = h.login("Admin", "root");
        let mut bob = h.login("bob", "pw");
        admin.texts();

        h.send(&admin, "Admin", "/KICK bob");

        assert_eq!(
            bob.texts(),
            vec!["You have been kicked by the administrator".to_string(), CLOSE.to_string()]
        );
        assert_eq!(admin.texts(), vec!["User 'bob' has been kicked".to_string()]);

        // kicked sessions receive nothing more and cannot speak
        h.send(&bob, "bob", "still here?");
        assert!(admin.texts().is_empty());
        assert!(bob.texts().is_empty());

        h.send(&admin, "Admin", "/kick bob");
        assert_eq!(admin.texts(), vec!["User 'bob' not found".to_string()]);
    }

    #[test]
    fn test_admin_command_errors_reply_only_to_admin() {
        let mut h = harness(false);
        h.register("admin", "root");
        h.register("bob", "pw");
        let mut admin = h.login("admin", "root");
        let mut bob = h.login("bob", "pw");
        admin.texts();
        let history_len = h.server.history.len();

        h.send(&admin, "admin", "/kick");
        h.send(&admin, "admin", "/kick admin");
        h.send(&admin, "admin", "/mute bob");
        h.send(&admin, "admin", "/kick carol");

        assert_eq!(
            admin.texts(),
            vec![
                "Usage: /kick <name>".to_string(),
                "You cannot target yourself".to_string(),
                "unknown command: `/mute`".to_string(),
                "User 'carol' not found".to_string(),
            ]
        );
        assert!(bob.texts().is_empty());
        assert_eq!(h.server.history.len(), history_len);
    }

    #[test]
    fn test_admin_plain_chat_relayed() {
        let mut h = harness(false);
        h.register("admin", "root");
        let mut admin = h.login("admin", "root");

        h.send(&admin, "admin", "good morning");

        assert_eq!(admin.texts(), vec!["good morning".to_string()]);
    }

    #[test]
    fn test_disconnect_broadcasts_left_and_records_history() {
        let mut h = harness(false);
        h.register("alice", "pw");
        h.register("bob", "pw");
        let mut alice = h.login("alice", "pw");
        let bob = h.login("bob", "pw");
        alice.texts();

        h.disconnect(&bob);

        assert_eq!(
            alice.texts(),
            vec!["bob left the chat".to_string(), "USER_LIST:alice".to_string()]
        );
        assert_eq!(h.server.history.iter().last().unwrap().text(), "bob left the chat");
        assert!(!h.server.registry.is_name_taken("bob"));

        // a second disconnect for the same session is a no-op
        h.disconnect(&bob);
        assert!(alice.texts().is_empty());
    }

    #[test]
    fn test_unauthenticated_disconnect_is_silent() {
        let mut h = harness(false);
        h.register("alice", "pw");
        let mut alice = h.login("alice", "pw");
        let anon = h.connect();

        h.disconnect(&anon);

        assert!(alice.texts().is_empty());
        assert_eq!(h.server.registry.len(), 1);
    }

    #[test]
    fn test_history_keeps_newest_messages() {
        let mut h = harness(false);
        h.register("alice", "pw");
        h.register("carol", "pw");
        let alice = h.login("alice", "pw");

        for i in 0..1001 {
            h.send(&alice, "alice", &format!("msg {}", i));
        }
        assert_eq!(h.server.history.len(), 1000);

        let mut carol = h.connect();
        h.send(&carol, "carol", "pw");
        let texts = carol.texts();

        assert_eq!(texts[0], "AUTH_OK");
        assert!(texts[2].starts_with("--- History") && texts[2].contains("1000"));
        let replayed = &texts[3..1003];
        assert_eq!(replayed[0], "msg 1");
        assert_eq!(replayed[999], "msg 1000");
        assert!(!replayed.contains(&"msg 0".to_string()));
        assert!(replayed.windows(2).all(|w| {
            let a: usize = w[0][4..].parse().unwrap();
            let b: usize = w[1][4..].parse().unwrap();
            b == a + 1
        }));
        assert!(texts[1003].starts_with("--- End of history"));
    }

    #[test]
    fn test_history_capacity_from_config() {
        let mut h = harness_with(ServerConfig::default().with_history_capacity(2));
        h.register("alice", "pw");
        let alice = h.login("alice", "pw");
        for text in ["one", "two", "three"] {
            h.send(&alice, "alice", text);
        }
        let texts: Vec<_> = h.server.history.iter().map(|m| m.text().to_string()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[test]
    fn test_shutdown_closes_everyone() {
        let mut h = harness(false);
        h.register("alice", "pw");
        let mut alice = h.login("alice", "pw");
        let mut anon = h.connect();

        h.server.handle_command(ServerCommand::Shutdown);

        assert_eq!(alice.texts(), vec![CLOSE.to_string()]);
        assert_eq!(anon.texts(), vec![CLOSE.to_string()]);
        assert!(h.server.registry.is_empty());
    }

    #[test]
    fn test_registration_storage_failure_rejects_and_leaves_name_free() {
        let dir = TempDir::new().unwrap();
        let users_dir = dir.path().join("data");
        std::fs::create_dir(&users_dir).unwrap();
        let config = ServerConfig::default()
            .with_registration(true)
            .with_users_path(users_dir.join("users.json"))
            .with_log_dir(None);
        let (_tx, rx) = mpsc::channel(8);
        let credentials = CredentialStore::open(&config.users_path);
        let mut h = Harness {
            server: ChatServer::new(rx, &config, credentials, None),
            queue_len: outbound_queue_len(config.history_capacity),
            _dir: dir,
        };
        std::fs::remove_dir_all(&users_dir).unwrap();

        let mut alice = h.connect();
        h.send(&alice, "alice", "pw");

        assert_eq!(
            alice.texts(),
            vec!["AUTH_FAIL:Failed to save the new user".to_string(), CLOSE.to_string()]
        );
        assert!(!h.server.registry.is_name_taken("alice"));
        assert!(!h.server.credentials.contains("alice"));
    }

    #[test]
    fn test_stalled_reader_disconnected_when_queue_fills() {
        let mut h = harness_with(ServerConfig::default().with_history_capacity(2));
        h.register("alice", "pw");
        h.register("bob", "pw");
        let mut alice = h.login("alice", "pw");
        let mut bob = h.login("bob", "pw");
        alice.texts();

        // bob never drains his queue
        for i in 0..h.queue_len + 1 {
            h.send(&alice, "alice", &format!("msg {}", i));
            alice.texts();
        }

        let bob_session = h.server.registry.find("bob").unwrap();
        assert!(bob_session.is_closing());
        assert!(!h.server.registry.find("alice").unwrap().is_closing());
        let bob_texts = bob.texts();
        assert_eq!(bob_texts.last().map(String::as_str), Some(CLOSE));
        assert_eq!(bob_texts.len(), h.queue_len + 1);

        // the connection task reports the close; everyone else hears about it
        h.disconnect(&bob);
        let texts = alice.texts();
        assert!(texts.contains(&"bob left the chat".to_string()));
        assert!(texts.contains(&"USER_LIST:alice".to_string()));
    }
}
