// src/config/mod.rs

//! Configuration loading and validation for dirwatch.
//!
//! Responsibilities:
//! - Define the TOML-backed data model and its validated form (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Compile filters and reject invalid settings (`validate.rs`).
//!
//! Persisting edited configuration is left to the caller; the controller
//! only accepts already validated [`WatcherConfig`] values.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ActionConfig, ConfigFile, ControllerOptions, Credentials, DispatchPolicy, NameFilter,
    PathFilters, ProcessAction, RawAction, RawConfigFile, RawControllerSection,
    RawDaemonConfig, RawPathFilters, RawPolicy, RawRecovery, RecoverySettings, SinkAction,
    Subscriptions, WatcherConfig, WindowStyle,
};
