//! Secret handling utilities.
//!
//! Re-exports the secrecy types reportq hands around, so callers reading
//! `Config::database_url` don't need their own secrecy import.

pub use secrecy::{ExposeSecret, SecretString};
