//! Status model
//!
//! Records describing the version-control state of a resource, and the pure
//! classifier turning raw backend codes into that model.
//!
//! | Text status | Meaning |
//! |-------------|---------|
//! | Normal | Versioned, unchanged |
//! | New | Unversioned, not ignored |
//! | Ignored | Unversioned and ignored, or below an opaque node |
//! | NotExists | Unknown to both disk and backend |
//! | Obstructed | Disk entity blocks the versioned node |
//! | Linked | Linked into the workspace from elsewhere |
//! | PreReplaced | Deleted, then recreated locally |
//! | InternalInvalid | The cache cannot reason about the resource |

pub mod classify;
pub mod record;

pub use classify::{change_mask, compound_status, prop_status_of, text_status_of};
pub use record::{
    ChangeMask, ConflictAction, ConflictOperation, ConflictReason, ConflictVersion, StatusRecord,
    TextStatus, TreeConflict,
};
