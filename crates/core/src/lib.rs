//! Core task-management primitives for the generation relay.
//!
//! This crate owns everything with real invariants:
//!
//! - [`Task`] — one unit of generative work, its lifecycle state machine,
//!   and the per-task progress fan-out to live subscribers.
//! - [`TaskStore`] — the concurrency-safe registry for one job domain
//!   (video or image).
//! - [`TaskDirectory`] — the read/administrative view composing all
//!   domain stores.
//! - [`snapshot`] — durable JSON snapshots of task metadata for
//!   restart-time visibility recovery.
//! - [`extract`] — best-effort heuristics recovering progress
//!   percentages and artifact URLs from loosely-shaped upstream text.
//!
//! Everything here is transport-agnostic; the HTTP surface and the
//! runner supervising backend calls live in `genrelay-api`.

pub mod aggregate;
pub mod error;
pub mod extract;
pub mod snapshot;
pub mod store;
pub mod task;
pub mod types;

pub use aggregate::TaskDirectory;
pub use error::CoreError;
pub use store::TaskStore;
pub use task::{Task, TaskEvent, TaskStatus, TaskSnapshot};
pub use types::{TaskId, TaskKind, Timestamp};
