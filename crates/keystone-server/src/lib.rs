//! Keystone node bootstrap
//!
//! Decides which subsystems run on this host, settles the addresses they use,
//! waits for the store, issues identities, and launches collaborators in
//! dependency order.

pub mod bootstrap;
pub mod cli;
pub mod launcher;
pub mod startup;

pub use bootstrap::{bootstrap, run, BootstrapOutcome, Collaborators};
pub use cli::{Cli, Commands, StartArgs};
