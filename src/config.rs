//! Startup configuration, read once from the environment.

use std::env;
use std::path::PathBuf;

use tracing::debug;

/// Protocol version assumed when neither the environment nor the session
/// log says otherwise.
pub const DEFAULT_PROTO_VERSION: &str = "1.21.111";

const CAPTURE_DIR_VAR: &str = "RELAYSCOPE_CAPTURE_DIR";
const PROTO_DIR_VAR: &str = "RELAYSCOPE_PROTO_DIR";
const PROTO_VERSION_VAR: &str = "RELAYSCOPE_PROTO_VERSION";

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the relay writes session logs into.
    pub capture_dir: PathBuf,
    /// Directory holding `proto-<version>.toml` definition files.
    pub proto_dir: PathBuf,
    pub proto_version: String,
}

impl Config {
    pub fn from_env() -> Config {
        let config = Config::from_lookup(|key| env::var(key).ok());
        debug!(
            capture_dir = %config.capture_dir.display(),
            proto_dir = %config.proto_dir.display(),
            proto_version = %config.proto_version,
            "configuration loaded"
        );
        config
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Config {
        Config {
            capture_dir: get(CAPTURE_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("captures")),
            proto_dir: get(PROTO_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/protocol")),
            proto_version: get(PROTO_VERSION_VAR)
                .unwrap_or_else(|| DEFAULT_PROTO_VERSION.to_string()),
        }
    }
}
