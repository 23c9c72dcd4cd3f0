//! Reconciliation of request setting rules on a versioned remote service.
//!
//! Declared rules are validated once at the boundary ([`model`]), remote records are brought into
//! the same shape ([`flatten`]), and the two sides are compared rule by rule and field by field
//! ([`diff`]). The [`Reconciler`] applies the resulting changeset to a draft version and checks
//! the outcome ([`verify`]).
//!
//! ## Crate Features
//!
//! - `default` enables the `clap` feature.
//! - `clap` allows flattening [`ReconcilerOptions`] into a clap-based CLI.

pub mod apply;
pub mod client;
pub mod config;
pub mod diff;
pub mod flatten;
pub mod logging;
pub mod model;
pub mod verify;

pub use apply::{Outcome, Reconciler};
pub use client::{RemoteClient, memory::InMemoryClient};
pub use config::ReconcilerOptions;
pub use diff::{Changeset, diff};
pub use flatten::flatten;
