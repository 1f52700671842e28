//! Kronoa: a version-controlled content store with Git-like semantics over
//! a content-addressable object layer.
//!
//! Content lives in immutable numbered *editions* whose path files map
//! paths to sha-256 addressed objects (or tombstones), resolved through a
//! parent chain. Publishing moves three pointers — working labels, staging,
//! production — guarded by a lease-based lock, and unreferenced objects are
//! reclaimed by a two-phase garbage collector.
//!
//! [`Session`] is the public facade; everything underneath speaks only the
//! [`storage::Backend`] contract.

mod edition;
mod error;
mod hash;
pub mod layout;
mod lock;
pub mod path;
mod session;
mod state;
mod txn;

pub use edition::{bootstrap, EditionId, EditionStore, Resolution};
pub use error::{Error, Result};
pub use hash::{ContentHash, PathFile};
pub use lock::{LockHandle, LockManager, LockOptions};
pub use session::{GcOptions, GcReport, Mode, PathStatus, Session, Stat};
pub use state::{
    LockRecord, PendingSubmission, Pointer, RejectionRecord, SessionState, Source,
};
