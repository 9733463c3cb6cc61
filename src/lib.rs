//! svncache - Local status cache for Subversion working copies
//!
//! Reconciles raw SVN status reports into per-resource status records,
//! serves lookups from a hierarchical cache and pushes deep refreshes to a
//! background queue.

pub mod cache;
pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod logging;
pub mod queue;
pub mod reconcile;
pub mod repository;
pub mod resource;
pub mod status;
pub mod storage;
pub mod wc;
pub mod workspace;

pub use connector::{Connector, ConnectorError};
pub use error::{SvnCacheError, SvnCacheResult};
pub use resource::{Depth, Resource, ResourceKind, Workspace};
pub use status::{ChangeMask, StatusRecord, TextStatus};
pub use storage::StatusStorage;
pub use workspace::FsWorkspace;
