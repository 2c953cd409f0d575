//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "gantry.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "gantry.yaml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".gantry.toml";

/// Default worker binary
pub const DEFAULT_WORKER_PROGRAM: &str = "gossha";

/// Default remote login
pub const DEFAULT_USER: &str = "root";

/// Default task timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Default grace period in seconds on top of a task timeout
pub const DEFAULT_REPLY_GRACE_SECS: u64 = 30;

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ALT_CONFIG_FILE,
        ".gantry.yaml",
    ]
}
