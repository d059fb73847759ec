// src/engine/mod.rs

//! Dispatch engine for dirwatch.
//!
//! This module ties together:
//! - the [`Controller`], which owns the watchers and guards lifecycle and
//!   configuration operations
//! - the dispatch queue and its retry bookkeeping ([`queue`])
//! - the per-task checks run before an action starts ([`pipeline`])
//! - the running-action counters behind batch caps and drains ([`slots`])
//! - the dispatch worker that reacts to:
//!   - changes submitted by watchers
//!   - action completions
//!   - drain / discard requests from the controller
//!
//! The pure per-task logic lives in [`pipeline`]; the async shell is
//! implemented in [`runtime`].

pub mod controller;
pub mod pipeline;
pub mod queue;
pub mod runtime;
pub mod slots;

pub use controller::Controller;
pub use pipeline::{Pipeline, RequeueCause, Verdict, temp_path};
pub use queue::DispatchQueue;
pub use runtime::WorkerControl;
pub use slots::Slots;
