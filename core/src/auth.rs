//! Identity provider: email/password accounts and the signed-in session.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Local;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::{open_connection, open_memory_connection};
use crate::store::Subscription;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,
    #[error("email already in use: {0}")]
    EmailInUse(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("auth database error")]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AuthError {
    /// Text shown to the person at the sign-in or sign-up form.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "Failed to sign in. Please check your credentials.",
            AuthError::EmailInUse(_) => "This email is already in use.",
            AuthError::WeakPassword => "Password should be at least 6 characters.",
            AuthError::InvalidEmail(_) => "Failed to create an account.",
            AuthError::Database(_) | AuthError::Other(_) => {
                "Authentication is unavailable right now. Please try again."
            }
        }
    }
}

pub type AuthListener = Arc<dyn Fn(Option<&User>) + Send + Sync>;

pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<User>;

    /// Register for identity changes. The listener runs once immediately with
    /// the current identity.
    fn on_auth_state_changed(&self, listener: AuthListener) -> Subscription;

    fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError>;

    fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError>;

    fn sign_out(&self) -> Result<(), AuthError>;

    /// Pick up a sign-in or sign-out made by another process. Returns whether
    /// the identity changed; listeners have been told when it did.
    fn refresh(&self) -> Result<bool, AuthError> {
        Ok(false)
    }
}

#[derive(Default)]
struct AuthListeners {
    next_id: u64,
    entries: Vec<(u64, AuthListener)>,
}

/// Accounts kept in the local database. The signed-in identity is persisted
/// so it survives restarts.
pub struct LocalAuth {
    conn: Mutex<Connection>,
    current: Mutex<Option<User>>,
    listeners: Arc<Mutex<AuthListeners>>,
}

fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    to_hex(&hasher.finalize())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn load_session(conn: &Connection) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        "SELECT u.uid, u.email FROM auth_session s JOIN users u ON u.uid = s.uid
         WHERE s.slot = 1",
        [],
        |row| {
            Ok(User {
                uid: row.get(0)?,
                email: row.get(1)?,
            })
        },
    )
    .optional()
}

impl LocalAuth {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Self::from_connection(open_connection(path)?)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(open_memory_connection()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        let current = load_session(&conn)?;
        if let Some(user) = &current {
            tracing::debug!(email = %user.email, "Restored signed-in session");
        }
        Ok(Self {
            conn: Mutex::new(conn),
            current: Mutex::new(current),
            listeners: Arc::new(Mutex::new(AuthListeners::default())),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current(&self, user: Option<User>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = user;
        self.notify();
    }

    // Listeners run with no auth lock held; they may call back into the provider.
    fn notify(&self) {
        let user = self.current_user();
        let listeners: Vec<AuthListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(user.as_ref());
        }
    }

    fn persist_session(&self, uid: &str) -> Result<(), AuthError> {
        let now = Local::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO auth_session (slot, uid, signed_in_at) VALUES (1, ?1, ?2)
             ON CONFLICT(slot) DO UPDATE SET uid = excluded.uid, signed_in_at = excluded.signed_in_at",
            params![uid, now],
        )?;
        Ok(())
    }
}

impl AuthProvider for LocalAuth {
    fn current_user(&self) -> Option<User> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn on_auth_state_changed(&self, listener: AuthListener) -> Subscription {
        let id = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Arc::clone(&listener)));
            id
        };

        listener(self.current_user().as_ref());

        let weak: Weak<Mutex<AuthListeners>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entries
                    .retain(|(lid, _)| *lid != id);
            }
        })
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::InvalidEmail(email));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let user = User {
            uid: Uuid::new_v4().to_string(),
            email,
        };
        let salt_bytes: [u8; 16] = rand::rng().random();
        let salt = to_hex(&salt_bytes);
        let hash = hash_password(&salt, password);
        let now = Local::now().to_rfc3339();

        {
            let conn = self.conn();
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                params![user.email],
                |row| row.get(0),
            )?;
            if exists {
                return Err(AuthError::EmailInUse(user.email));
            }
            conn.execute(
                "INSERT INTO users (uid, email, password_salt, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user.uid, user.email, salt, hash, now],
            )?;
        }
        tracing::info!(email = %user.email, "Account created");

        self.persist_session(&user.uid)?;
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email);
        let row: Option<(String, String, String)> = self
            .conn()
            .query_row(
                "SELECT uid, password_salt, password_hash FROM users WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((uid, salt, expected)) = row else {
            tracing::debug!(%email, "Sign-in rejected: unknown email");
            return Err(AuthError::InvalidCredentials);
        };
        if hash_password(&salt, password) != expected {
            tracing::debug!(%email, "Sign-in rejected: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let user = User { uid, email };
        self.persist_session(&user.uid)?;
        tracing::info!(email = %user.email, "Signed in");
        self.set_current(Some(user.clone()));
        Ok(user)
    }

    fn sign_out(&self) -> Result<(), AuthError> {
        self.conn()
            .execute("DELETE FROM auth_session WHERE slot = 1", [])?;
        if self.current_user().is_some() {
            tracing::info!("Signed out");
            self.set_current(None);
        }
        Ok(())
    }

    fn refresh(&self) -> Result<bool, AuthError> {
        let stored = load_session(&self.conn())?;
        if stored == self.current_user() {
            return Ok(false);
        }
        match &stored {
            Some(user) => tracing::info!(email = %user.email, "Signed in from another process"),
            None => tracing::info!("Signed out from another process"),
        }
        self.set_current(stored);
        Ok(true)
    }
}
