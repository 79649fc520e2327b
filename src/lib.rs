//! Tessera - sharded multi-model data store core.
//!
//! Tessera is the engineering core of a distributed key/value and row
//! engine: the client session and meta-cache that route operations to
//! the correct tablet leader or follower across failures and schema
//! changes, the per-tablet row operation planner that turns a logical
//! statement into ordered sub-document writes and iterator-driven
//! reads with snapshot semantics, and the incremental wire-protocol
//! parser that decodes a streaming byte sequence into the commands
//! feeding the planner.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Wire Parser                              │
//! │        incremental, zero-copy decode of inbound bytes           │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Command Translator                          │
//! │        argument shape and range validation, typed requests      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Session                                │
//! │   buffering │ per-tablet batching │ flush │ error collection    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Meta Cache + Selector                         │
//! │    (table, partition key) → tablet │ leader/replica choice      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Row Operation Planner                        │
//! │   doc keys │ sub-document writes │ snapshot reads │ paging      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::error`] - Status taxonomy
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::time`] - Hybrid timestamps and read-time validation
//!
//! ## Data Path
//! - [`wire`] - Streaming protocol parser
//! - [`translate`] - Command translation into typed requests
//! - [`plan`] - Write/read planners, doc keys, iterator bridge
//! - [`scan`] - Server-side scanner lifecycle
//!
//! ## Client
//! - [`routing`] - Meta cache, partition hashing, replica selection
//! - [`session`] - Operation buffering and grouped flush
//!
//! # Key Invariants
//!
//! - Exactly one of (hash doc key, range doc key, tuple id) identifies
//!   the row scope of any planner output
//! - A meta-cache entry is fresh or stale; stale entries produce no
//!   selector output until refreshed
//! - A tablet has at most one leader as observed by any single caller
//! - Parser offsets satisfy `token_begin <= pos <= full_size` at every
//!   quiescent point
//! - A session refuses to close while any operation is pending

// Core infrastructure
pub mod core;

// Wire protocol
pub mod wire;

// Command translation
pub mod translate;

// Row operation planning
pub mod plan;

// Scanner lifecycle
pub mod scan;

// Client routing
pub mod routing;

// Client session
pub mod session;

// Re-exports for convenience
pub use crate::core::{config, error, time};
pub use plan::{ReadPlanner, WritePlanner};
pub use routing::{MetaCache, ReplicaSelection};
pub use session::{FlushMode, Session, SessionOp};
pub use translate::translate;
pub use wire::CommandParser;
