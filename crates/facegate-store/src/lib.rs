//! facegate-store — SQLite-backed user accounts.
//!
//! One `users` table holding username, email, argon2 password hash, an
//! optional facial descriptor blob and a creation timestamp. The store
//! owns a single long-lived connection, opened at startup.

pub mod password;
pub mod store;

pub use store::{AccountSummary, Profile, StoreError, UserStore};
