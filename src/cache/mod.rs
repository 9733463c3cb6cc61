//! In-memory status cache
//!
//! Records are grouped by parent container so that a folder's immediate
//! children can be dropped together when the folder is refreshed.
//!
//! # Indices
//!
//! | Index | Key | Value |
//! |-------|-----|-------|
//! | `HierarchicalCache` | parent container | child records |
//! | `SwitchedIndex` | resource path | switched-to URL |
//! | `ExternalsIndex` | location id | wrapped locations |
//!
//! None of these types lock; the storage facade guards them together.

pub mod externals;
pub mod switched;
pub mod tree;

pub use externals::ExternalsIndex;
pub use switched::SwitchedIndex;
pub use tree::HierarchicalCache;
