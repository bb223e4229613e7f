//! Persistent credential store
//!
//! Keeps salted SHA-256 password hashes in memory and mirrors them to a JSON
//! file shaped `{"users":[{"login":..,"salt":..,"hash":..}]}`. The file is
//! rewritten whole on every registration.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{AuthError, StoreError};

const SALT_LEN: usize = 16;

/// Successful authentication outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Existing account, password matched
    SuccessExisting,
    /// Account created on this attempt
    RegisteredNew,
}

/// One stored account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub login: String,
    pub salt: String,
    pub hash: String,
}

#[derive(Serialize)]
struct UsersFileRef<'a> {
    users: Vec<&'a CredentialRecord>,
}

/// Credential table backed by a JSON file
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    users: HashMap<String, CredentialRecord>,
    loaded: bool,
}

impl CredentialStore {
    /// Open the store at `path`, loading it if possible
    ///
    /// A failed load is logged; the store then retries on first use.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self {
            path: path.into(),
            users: HashMap::new(),
            loaded: false,
        };
        if let Err(e) = store.load() {
            warn!(
                "Failed to load credentials from {}: {}; new accounts will not be saved",
                store.path.display(),
                e
            );
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// (Re)load the table from disk, creating an empty file if missing
    pub fn load(&mut self) -> Result<(), StoreError> {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&self.path, b"{\n    \"users\": []\n}\n")?;
            info!("Created empty credential file {}", self.path.display());
        }

        let data = fs::read(&self.path)?;
        let doc: serde_json::Value = serde_json::from_slice(&data)?;
        let entries = doc
            .as_object()
            .ok_or(StoreError::Corrupt)?
            .get("users")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        self.users.clear();
        for entry in entries {
            match serde_json::from_value::<CredentialRecord>(entry) {
                Ok(record)
                    if !record.login.is_empty()
                        && !record.salt.is_empty()
                        && !record.hash.is_empty() =>
                {
                    self.users.insert(record.login.clone(), record);
                }
                _ => warn!("Skipping invalid user record in {}", self.path.display()),
            }
        }

        self.loaded = true;
        info!("Loaded {} user(s) from {}", self.users.len(), self.path.display());
        Ok(())
    }

    /// Exact, case-sensitive membership test
    pub fn contains(&self, login: &str) -> bool {
        self.users.contains_key(login)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Check a password against the stored hash
    pub fn authenticate(&mut self, login: &str, password: &str) -> Result<AuthOutcome, AuthError> {
        self.ensure_loaded()?;
        let login = validate(login, password)?;

        let record = self.users.get(login).ok_or(AuthError::UserNotFound)?;
        if hash_password(&record.salt, password) != record.hash {
            return Err(AuthError::WrongPassword);
        }
        Ok(AuthOutcome::SuccessExisting)
    }

    /// Create a new account and persist the table
    ///
    /// The in-memory insert is rolled back if the file cannot be written.
    pub fn register_user(&mut self, login: &str, password: &str) -> Result<AuthOutcome, AuthError> {
        self.ensure_loaded()?;
        let login = validate(login, password)?;

        let salt = generate_salt();
        let record = CredentialRecord {
            login: login.to_string(),
            hash: hash_password(&salt, password),
            salt,
        };
        let previous = self.users.insert(login.to_string(), record);

        if let Err(e) = self.save() {
            warn!("Failed to save new user {}: {}", login, e);
            match previous {
                Some(prev) => self.users.insert(login.to_string(), prev),
                None => self.users.remove(login),
            };
            return Err(AuthError::StorageError("Failed to save the new user"));
        }

        info!("Registered new user {}", login);
        Ok(AuthOutcome::RegisteredNew)
    }

    fn ensure_loaded(&mut self) -> Result<(), AuthError> {
        if self.loaded {
            return Ok(());
        }
        self.load().map_err(|e| {
            warn!("Credential store unavailable: {}", e);
            AuthError::StorageError("Failed to open the user database")
        })
    }

    /// Write the full table to a temp file, then rename it over the old one
    fn save(&self) -> Result<(), StoreError> {
        let mut records: Vec<&CredentialRecord> = self.users.values().collect();
        records.sort_by(|a, b| a.login.cmp(&b.login));
        let json = serde_json::to_vec_pretty(&UsersFileRef { users: records })?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Trim the login and reject empty credentials
fn validate<'a>(login: &'a str, password: &str) -> Result<&'a str, AuthError> {
    let login = login.trim();
    if login.is_empty() {
        return Err(AuthError::InvalidCredentials("Login must not be empty"));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidCredentials("Password must not be empty"));
    }
    Ok(login)
}

/// hex(SHA-256(salt || "::" || password))
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"::");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
