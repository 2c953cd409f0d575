//! Gantry Core - Shared types for the Gantry deployer
//!
//! This crate provides the error taxonomy and the configuration layer
//! (worker launch settings, task defaults, host inventory and playbook steps).

pub mod config;
pub mod error;

pub use config::{Config, HostConfig, StepConfig, TaskDefaults, WorkerConfig};
pub use error::{
    ConfigError, GantryError, ReportError, Result, StateError, TaskError, WorkerError,
};
