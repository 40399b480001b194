//! # tidesync Protocol
//!
//! Replication values shared by the tidesync engine and its tools.
//!
//! This crate provides:
//! - [`Operation`] and [`OperationKind`], the unit of replication work
//! - [`RemoteRecord`], the wire envelope carrying `lastModified`/`syncedBy`
//! - remote path helpers
//! - the [`Entity`] trait for typed business records
//!
//! This is a pure crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod operation;
pub mod path;
mod remote;

pub use entity::Entity;
pub use error::{ProtocolError, ProtocolResult};
pub use operation::{Operation, OperationKind, RecordKey};
pub use remote::{RemoteRecord, LAST_MODIFIED_FIELD, SYNCED_BY_FIELD};
