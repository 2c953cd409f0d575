//! Error types for Gantry

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using GantryError
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry operations
#[derive(Debug, Error)]
pub enum GantryError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Task construction and lane layout errors
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Run state errors
    #[error(transparent)]
    State(#[from] StateError),

    /// Worker process errors
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Report query errors
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building tasks and laying out lanes.
///
/// These surface at construction time, before any worker is started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// A group was named but no registered host carries it
    #[error("Not found servers for group \"{0}\"")]
    InvalidGroup(String),

    /// No group was named and the registry is empty
    #[error("No servers registered")]
    NoHosts,

    /// A task parameter is empty or malformed
    #[error("Invalid task parameter: {field} - {message}")]
    InvalidParameter { field: String, message: String },

    /// A lane is already as long as the lane it should be aligned to
    #[error(
        "Lane {lane} ({lane_len} slots) cannot be aligned to lane {primary} ({primary_len} slots); \
         check parallel block nesting"
    )]
    LaneOverrun {
        lane: usize,
        lane_len: usize,
        primary: usize,
        primary_len: usize,
    },

    /// Misuse of begin/end of a parallel block
    #[error("Parallel block error: {0}")]
    ParallelBlock(String),
}

/// Run state errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// Mutation attempted while tasks are executing
    #[error("Deployer is already running")]
    AlreadyRunning,
}

/// Worker process errors
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker binary could not be started
    #[error("Can not run worker '{program}' for lane {lane}: {source}")]
    Spawn {
        lane: usize,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A spawned worker is missing one of its piped streams
    #[error("Worker for lane {lane} has no {pipe} pipe")]
    MissingPipe { lane: usize, pipe: &'static str },
}

/// Report query errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    /// The report holds no entries
    #[error("Not found task reports.")]
    NoEntries,

    /// The report holds more than one entry
    #[error("There are more than one task report ({0} found).")]
    MultipleEntries(usize),
}

impl GantryError {
    /// Whether this error was raised before any worker was started
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Task(_))
    }
}
