//! kcache - cached kernel package builds
//!
//! Builds Debian kernel packages from a git tree on a local or remote build
//! machine and keeps the packages of recently built commits, so a repeated
//! request for the same commit returns the existing package instead of
//! rebuilding.

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod install;
pub mod packager;
pub mod source;
pub mod target;
pub mod ui;

pub use error::{KcacheError, KcacheResult};
