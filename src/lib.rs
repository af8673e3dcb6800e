//! # hovel
//!
//! A development-environment orchestrator: an HTTP control plane that
//! provisions, runs, monitors, and tears down isolated per-branch dev
//! workspaces, each backed by a rendered container-group specification.
//!
//! ## Architecture
//!
//! - [`branch`] — the `Branch` entity and its lifecycle status.
//! - [`port_allocator`] — assigns unique host ports to branches.
//! - [`registry`] — filesystem-backed persistence of branch records.
//! - [`template`] — workspace rendering and service filtering.
//! - [`credential`] — AI-provider API key validation.
//! - [`vcs`] — version-control branch creation/removal.
//! - [`container`] — drives the container engine's `compose` subcommands.
//! - [`terminal`] — starts interactive web-terminal sessions.
//! - [`engine`] — orchestrates the above into full branch lifecycle
//!   operations.
//! - [`api`] — the HTTP control plane.
//! - [`config`] — environment-driven configuration.
//! - [`error`] — the crate-wide error type.

pub mod api;
pub mod branch;
pub mod config;
pub mod container;
pub mod credential;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod port_allocator;
pub mod registry;
pub mod template;
pub mod terminal;
pub mod testing;
pub mod vcs;

pub use branch::{Branch, Status};
pub use error::{Error, Result};
