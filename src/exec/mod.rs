// src/exec/mod.rs

//! Action execution layer.
//!
//! This module is responsible for carrying out the action configured for a
//! daemon once the dispatch pipeline releases a change:
//!
//! - [`command_line`] expands argument templates (`{file}`, `{change}`, ...).
//! - [`runner`] spawns one process per change with `tokio::process::Command`
//!   and reports its lifecycle as notifications.
//! - [`sink`] is the seam to a remote action sink.
//! - [`backend`] provides the `ActionBackend` trait and the concrete
//!   `RealActionBackend` used in production, which tests replace with a fake.

pub mod backend;
pub mod command_line;
pub mod runner;
pub mod sink;

pub use backend::{ActionBackend, ActionError, ActionFuture, RealActionBackend};
pub use command_line::CommandLine;
pub use runner::ActionRunner;
pub use sink::{
    ActionSink, SinkClient, SinkConnector, SinkContent, SinkFuture, SinkRequest, host_name,
};
