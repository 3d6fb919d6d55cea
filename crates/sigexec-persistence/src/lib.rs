//! Order store and audit persistence.
//!
//! Provides:
//! - `OrderStore`: the contract the controller writes every order transition through
//! - `InMemoryOrderStore`: map-backed store for tests and paper trading
//! - `JournalOrderStore`: JSON Lines journal of order events, replayed on open
//! - `AuditSink`: best-effort capture of controller exceptions
//!
//! JSON Lines keeps each record on its own line, so an interrupted write
//! only loses that line and the rest of the file stays readable.

pub mod audit;
mod book;
pub mod error;
pub mod journal;
pub mod memory;
pub mod store;

pub use audit::{AuditException, AuditLevel, AuditSink, DynAuditSink, JsonLinesAuditSink, MemoryAuditSink};
pub use error::{StoreError, StoreResult};
pub use journal::JournalOrderStore;
pub use memory::{InMemoryOrderStore, StoreOp};
pub use store::{DynOrderStore, OrderStore, StatusChange};
