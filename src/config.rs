//! Bridge configuration parsing, validation, and rendezvous path resolution.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::framer::codec::MAX_LINE_BYTES;
use crate::{AppError, Result};

/// Environment variable overriding the rendezvous socket path.
pub const SOCKET_ENV_VAR: &str = "AGENT_BRIDGE_SOCKET";

/// File name of the rendezvous socket inside the runtime directory.
pub const DEFAULT_SOCKET_FILE: &str = "agent-bridge.sock";

fn default_host_cli() -> String {
    "agent-engine".into()
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

/// Bridge configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty file (or no file at all) yields a
/// usable configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Explicit rendezvous socket path. Loses to [`SOCKET_ENV_VAR`].
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    /// Engine host CLI binary spawned once per invocation.
    #[serde(default = "default_host_cli")]
    pub host_cli: String,
    /// Arguments passed to the host CLI.
    #[serde(default)]
    pub host_cli_args: Vec<String>,
    /// Close sessions started on a connection when that connection drops.
    #[serde(default)]
    pub close_on_disconnect: bool,
    /// Longest accepted inbound line, in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            host_cli: default_host_cli(),
            host_cli_args: Vec::new(),
            close_on_disconnect: false,
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the rendezvous socket path.
    ///
    /// Precedence: `AGENT_BRIDGE_SOCKET`, then `socket_path` from the file,
    /// then [`default_socket_path`].
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        match env::var(SOCKET_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
            _ => self
                .socket_path
                .clone()
                .unwrap_or_else(default_socket_path),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.host_cli.trim().is_empty() {
            return Err(AppError::Config("host_cli must not be empty".into()));
        }

        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        if let Some(ref path) = self.socket_path {
            if path.as_os_str().is_empty() {
                return Err(AppError::Config("socket_path must not be empty".into()));
            }
        }

        Ok(())
    }
}

/// Default rendezvous path: `$XDG_RUNTIME_DIR/agent-bridge.sock`, falling back
/// to the system temp directory.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    let runtime_dir = env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map_or_else(env::temp_dir, PathBuf::from);
    runtime_dir.join(DEFAULT_SOCKET_FILE)
}
