//! tally-sync - Offline-first sync engine for Tally
//!
//! This crate contains the local record store, the three-way merge
//! reconciler, the clock correction service, and the sync orchestrator
//! that keeps a Tally workspace in step with the server.

pub mod api;
pub mod bus;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod graph;
pub mod merge;
pub mod model;
pub mod resolver;
pub mod store;
pub mod sync;


pub use config::SyncConfig;
pub use error::{Error, Result};
pub use model::{EntityKind, LocalId, RemoteId};
pub use sync::{SyncManager, SyncMode, SyncReport};
