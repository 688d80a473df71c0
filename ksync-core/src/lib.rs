//! # ksync-core
//!
//! Pure logic for ksync (no I/O, instant tests).
//!
//! This crate implements the comparison and decision logic of environment
//! sync without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about what a fetch changed and whether a write may proceed
//!
//! The actual I/O (relay, disk) is performed by `ksync-client`, which feeds
//! snapshots into these functions and acts on their verdicts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod changes;
pub mod conflict;
pub mod declarations;
pub mod diff;
pub mod path;
pub mod snapshot;

pub use changes::{Change, ChangeKind, ChangesByEnvironment};
pub use conflict::{evaluate, ConflictReason, Verdict};
pub use declarations::{Declarations, FileDecl, MissingRequired, SecretDecl};
pub use diff::{diff, diff_files};
pub use path::{check_tracked_path, PathError};
pub use snapshot::{Snapshot, SnapshotError};
