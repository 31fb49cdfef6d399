//! User account store over a single long-lived SQLite connection.

use crate::password::{self, PasswordError};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("required field '{0}' is empty")]
    EmptyField(&'static str),
    #[error("{field} is already registered")]
    Duplicate { field: &'static str },
    #[error("no account for that email")]
    NotFound,
    #[error("stored timestamp is invalid: {0}")]
    InvalidTimestamp(String),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Read-only profile view for display after login.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// One row of the diagnostic account listing.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub username: String,
    pub email: String,
    /// Byte length of the stored descriptor, if one was enrolled.
    pub descriptor_len: Option<usize>,
}

/// SQLite-backed account store.
///
/// Owns one connection for the life of the process; every operation is a
/// single auto-committed statement. Uniqueness races between concurrent
/// processes are resolved by the UNIQUE constraints.
pub struct UserStore {
    conn: Connection,
}

impl UserStore {
    /// Open (creating if needed) the database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Idempotently create the `users` table. Safe on every start.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                descriptor BLOB,
                created_at TEXT NOT NULL
            )",
        )?;
        Ok(())
    }

    /// Register a new account.
    ///
    /// The password is hashed with argon2 before insertion. The descriptor
    /// blob is opaque to the store and persisted verbatim; its dimension
    /// invariant is owned by the descriptor codec, which rejects blobs of
    /// the wrong length when they are read back. Fails with
    /// [`StoreError::Duplicate`] when the username or email is already
    /// taken.
    pub fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        descriptor: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        if username.trim().is_empty() {
            return Err(StoreError::EmptyField("username"));
        }
        if email.trim().is_empty() {
            return Err(StoreError::EmptyField("email"));
        }
        if password.trim().is_empty() {
            return Err(StoreError::EmptyField("password"));
        }

        let password_hash = password::hash(password)?;
        let created_at = Utc::now().to_rfc3339();

        let result = self.conn.execute(
            "INSERT INTO users (username, email, password_hash, descriptor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![username, email, password_hash, descriptor, created_at],
        );

        match result {
            Ok(_) => {
                tracing::info!(username, email, enrolled = descriptor.is_some(), "account registered");
                Ok(())
            }
            Err(e) => Err(map_constraint_violation(e)),
        }
    }

    /// Check a password against the stored credential.
    ///
    /// Returns false for an unknown email or a non-matching password.
    pub fn verify_password(&self, email: &str, password: &str) -> Result<bool, StoreError> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT password_hash FROM users WHERE email = ?1",
                [email],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(hash) => Ok(password::verify(password, &hash)?),
            None => Ok(false),
        }
    }

    /// Fetch the stored facial descriptor blob for an email.
    ///
    /// `Err(NotFound)` for an unknown email; `Ok(None)` when the account
    /// was registered without an enrollment photo. The blob is returned
    /// verbatim; decoding and length validation happen in the descriptor
    /// codec.
    pub fn descriptor(&self, email: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.conn
            .query_row(
                "SELECT descriptor FROM users WHERE email = ?1",
                [email],
                |row| row.get::<_, Option<Vec<u8>>>(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    /// Read-only profile fetch for display.
    pub fn profile(&self, email: &str) -> Result<Profile, StoreError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT username, created_at FROM users WHERE email = ?1",
                [email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (username, created_at) = row.ok_or(StoreError::NotFound)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| StoreError::InvalidTimestamp(created_at))?
            .with_timezone(&Utc);

        Ok(Profile { username, created_at })
    }

    /// List all accounts with their descriptor sizes (diagnostics).
    pub fn accounts(&self) -> Result<Vec<AccountSummary>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT username, email, descriptor FROM users ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let descriptor: Option<Vec<u8>> = row.get(2)?;
            Ok(AccountSummary {
                username: row.get(0)?,
                email: row.get(1)?,
                descriptor_len: descriptor.map(|d| d.len()),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Turn a UNIQUE constraint failure into a Duplicate error naming the
/// offending column; other SQLite errors pass through.
fn map_constraint_violation(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(err, Some(msg)) = &e {
        if err.code == rusqlite::ErrorCode::ConstraintViolation {
            if msg.contains("users.username") {
                return StoreError::Duplicate { field: "username" };
            }
            if msg.contains("users.email") {
                return StoreError::Duplicate { field: "email" };
            }
        }
    }
    StoreError::Sqlite(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        let store = UserStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        store
    }

    /// Blob of the size a 512-dim f32 descriptor serializes to.
    fn descriptor_blob(fill: u8) -> Vec<u8> {
        vec![fill; 512 * 4]
    }

    #[test]
    fn test_init_schema_idempotent() {
        let store = store();
        store.init_schema().unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn test_register_and_verify_password() {
        let store = store();
        store.register("alice", "a@x.com", "pw123", None).unwrap();
        assert!(store.verify_password("a@x.com", "pw123").unwrap());
        assert!(!store.verify_password("a@x.com", "wrong").unwrap());
        assert!(!store.verify_password("b@x.com", "pw123").unwrap());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let store = store();
        store.register("alice", "a@x.com", "pw123", None).unwrap();
        let err = store.register("alice", "other@x.com", "pw456", None).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { field: "username" }));

        // Original row unchanged.
        assert!(store.verify_password("a@x.com", "pw123").unwrap());
        assert_eq!(store.accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let store = store();
        store.register("alice", "a@x.com", "pw123", None).unwrap();
        let err = store.register("bob", "a@x.com", "pw456", None).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { field: "email" }));
        assert_eq!(store.accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_fields_rejected() {
        let store = store();
        assert!(matches!(
            store.register("", "a@x.com", "pw", None),
            Err(StoreError::EmptyField("username"))
        ));
        assert!(matches!(
            store.register("alice", "  ", "pw", None),
            Err(StoreError::EmptyField("email"))
        ));
        assert!(matches!(
            store.register("alice", "a@x.com", "", None),
            Err(StoreError::EmptyField("password"))
        ));
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let store = store();
        let blob = descriptor_blob(7);
        store.register("alice", "a@x.com", "pw123", Some(&blob)).unwrap();
        assert_eq!(store.descriptor("a@x.com").unwrap(), Some(blob));
    }

    #[test]
    fn test_descriptor_absent() {
        let store = store();
        store.register("alice", "a@x.com", "pw123", None).unwrap();
        assert_eq!(store.descriptor("a@x.com").unwrap(), None);
    }

    #[test]
    fn test_descriptor_unknown_email() {
        let store = store();
        assert!(matches!(store.descriptor("nobody@x.com"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_profile() {
        let store = store();
        let before = Utc::now();
        store.register("alice", "a@x.com", "pw123", None).unwrap();
        let profile = store.profile("a@x.com").unwrap();
        assert_eq!(profile.username, "alice");
        assert!(profile.created_at >= before - chrono::Duration::seconds(1));
        assert!(profile.created_at <= Utc::now() + chrono::Duration::seconds(1));
    }

    #[test]
    fn test_profile_unknown_email() {
        let store = store();
        assert!(matches!(store.profile("nobody@x.com"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_accounts_listing() {
        let store = store();
        store
            .register("alice", "a@x.com", "pw", Some(&descriptor_blob(0)))
            .unwrap();
        store.register("bob", "b@x.com", "pw", None).unwrap();

        let accounts = store.accounts().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].username, "alice");
        assert_eq!(accounts[0].descriptor_len, Some(512 * 4));
        assert_eq!(accounts[1].email, "b@x.com");
        assert_eq!(accounts[1].descriptor_len, None);
    }

    #[test]
    fn test_password_stored_hashed() {
        let store = store();
        store.register("alice", "a@x.com", "pw123", None).unwrap();
        let stored: String = store
            .conn
            .query_row("SELECT password_hash FROM users WHERE email = 'a@x.com'", [], |r| r.get(0))
            .unwrap();
        assert_ne!(stored, "pw123");
        assert!(stored.starts_with("$argon2"));
    }
}
