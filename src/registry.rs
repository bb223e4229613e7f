//! Session registry
//!
//! Two coupled indices over the live sessions: by `SessionId` for every
//! connection, and by login for authenticated ones. All mutations go through
//! this type so the indices never disagree.

use std::collections::{BTreeMap, HashMap};

use crate::error::RegistryError;
use crate::session::SessionHandle;
use crate::types::SessionId;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// All connected sessions: SessionId -> SessionHandle
    sessions: HashMap<SessionId, SessionHandle>,
    /// Bound logins: login -> SessionId (sorted for user lists)
    by_name: BTreeMap<String, SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly connected session
    pub fn add(&mut self, session: SessionHandle) {
        self.sessions.insert(session.id, session);
    }

    /// Forget a session, releasing its login if it held one
    pub fn remove(&mut self, id: SessionId) -> Option<SessionHandle> {
        let session = self.sessions.remove(&id)?;
        if let Some(login) = &session.login {
            if self.by_name.get(login) == Some(&id) {
                self.by_name.remove(login);
            }
        }
        Some(session)
    }

    /// Bind `login` to a session and mark it authenticated
    ///
    /// Never overwrites an existing binding.
    pub fn bind(&mut self, login: &str, id: SessionId) -> Result<(), RegistryError> {
        if self.by_name.contains_key(login) {
            return Err(RegistryError::NameTaken(login.to_string()));
        }
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownSession)?;
        session.login = Some(login.to_string());
        session.authenticated = true;
        self.by_name.insert(login.to_string(), id);
        Ok(())
    }

    /// Release a login; the session itself stays registered
    pub fn unbind(&mut self, login: &str) -> Option<SessionId> {
        self.by_name.remove(login)
    }

    /// Session currently bound to `login`
    pub fn find(&self, login: &str) -> Option<&SessionHandle> {
        self.by_name.get(login).and_then(|id| self.sessions.get(id))
    }

    pub fn get(&self, id: SessionId) -> Option<&SessionHandle> {
        self.sessions.get(&id)
    }

    /// All registered sessions, in no particular order
    pub fn all(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.values()
    }

    pub fn is_name_taken(&self, login: &str) -> bool {
        self.by_name.contains_key(login)
    }

    /// Bound logins in sorted order
    pub fn user_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session and binding
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.by_name.clear();
    }
}
