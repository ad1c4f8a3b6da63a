//! MeshCore companion command-line client.
//!
//! A [`session::Session`] owns one link to a companion radio. Every inbound
//! frame goes through the [`router::EventRouter`], which updates the
//! [`cache::StateCache`] and then resolves waiters in the
//! [`registry::WaitRegistry`]. The [`executor::Executor`] runs command
//! chains against a session one command at a time.

pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod output;
pub mod registry;
pub mod repl;
pub mod router;
pub mod session;
pub mod transport;

pub use error::{CliError, Result};
pub use executor::{ExecOptions, Executor};
pub use session::{Session, SessionConfig};
