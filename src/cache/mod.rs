//! Kernel package cache
//!
//! Built packages are kept on the build machine so a second request for the
//! same commit skips the multi-hour kernel build.
//!
//! # Layout
//!
//! | Path | Contents |
//! |------|----------|
//! | `<root>/kernel_cache.json` | Index, most recently used first |
//! | `<root>/kernel_cache.json.lock/` | Held while the index is rewritten |
//! | `<root>/packages/commit_id-<commit>/` | Packages of one commit |
//!
//! An entry is only a hit if its key matches and a package of the right kind
//! is still on disk. Entries whose packages vanished are stale and treated as
//! misses.

pub mod artifact;
pub mod entry;
pub mod lock;
pub mod store;

pub use artifact::{select_primary, ArtifactStore};
pub use entry::{CacheEntry, PackageKind};
pub use store::{CacheStore, InsertOutcome, VerifiedEntry, CACHE_FILE_NAME};
