//! # `platewise_core`
//!
//! Shared resolution logic for the Platewise clients (the `platewise`
//! command-line agent and the browser app).
//!
//! A user's data lives in a small graph of replicated documents:
//!
//! ```text
//! root identity document ──┬── personal document (meal logs)
//!                          └── groups[] ── group document ──┬── primary (dishes)
//!                                                           └── secondary (meal plans)
//! ```
//!
//! This crate walks that graph through a narrow [`DocumentStore`] interface.
//! Documents that have not replicated to this peer yet resolve to
//! [`Resolution::Pending`], which callers retry with [`retry_pending`].

#![warn(missing_docs)]

mod backoff;
mod context;
mod doc_ref;
mod group;
mod identity;
mod payload;
mod resolution;
mod store;

pub use backoff::{BackoffConfig, retry_pending};
pub use context::{ContextLoader, ResolvedContext, RootChange};
pub use doc_ref::{DocRef, InvalidDocRef};
pub use group::{GroupRecord, GroupResolver};
pub use identity::{GroupEntry, RootIdentity, RootResolver};
pub use payload::{PAYLOAD_FIELD, encode_payload};
pub use resolution::{Resolution, ResolveError};
pub use store::{DocumentStore, MemoryStore, SnapshotStream, StoreError};
