//! # tidesync Storage
//!
//! Local collaborator traits and backends for tidesync.
//!
//! The engine depends on two kinds of local persistence:
//!
//! - a [`LocalStore`] holding the application's records, one named
//!   collection at a time (get-all, put, delete, clear)
//! - a [`StateStore`] holding the engine's own durable state under a few
//!   fixed keys
//!
//! Both traits are async and must persist durably before returning.
//!
//! ## Available Backends
//!
//! - [`InMemoryLocalStore`] / [`InMemoryStateStore`] - For testing
//! - [`FileLocalStore`] / [`FileStateStore`] - For persistent storage
//!   using OS file APIs

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{LocalStore, StateStore};
pub use error::{StorageError, StorageResult};
pub use file::{FileLocalStore, FileStateStore};
pub use memory::{InMemoryLocalStore, InMemoryStateStore};
