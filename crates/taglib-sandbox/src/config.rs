//! Sandbox configuration.
//!
//! [`SandboxConfig`] controls where the guest binary comes from, where the
//! compilation cache lives, and the resource limits applied to every session.
//! Sensible defaults are provided via the [`Default`] implementation, and a
//! builder-style API allows callers to customise individual fields fluently.
//! [`SandboxConfig::from_env`] layers environment overrides on top.

use std::path::PathBuf;

/// Environment variable naming a guest binary that replaces the embedded one.
pub const ENV_BINARY_PATH: &str = "TAGLIB_WASM_PATH";
/// Environment variable overriding the compilation cache directory.
pub const ENV_CACHE_DIR: &str = "TAGLIB_WASM_CACHE_DIR";
/// Environment variable toggling the compilation cache (`0` disables it).
pub const ENV_CACHE: &str = "TAGLIB_WASM_CACHE";

const DEFAULT_CACHE_DIR_NAME: &str = "taglib-wasm-cache";

/// Artifact source, cache and resource settings for the sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Guest binary to load instead of the embedded one.
    ///
    /// Only consulted when the artifact is first built.
    ///
    /// Default: **none**.
    pub binary_path: Option<PathBuf>,

    /// Directory holding compiled machine code between runs.
    ///
    /// Default: **`<tmp>/taglib-wasm-cache-<uid>`** (no suffix off Unix).
    pub cache_dir: Option<PathBuf>,

    /// Whether compiled artifacts are persisted and reused.
    ///
    /// Default: **true**.
    pub cache_enabled: bool,

    /// Maximum linear memory a session may grow to, in bytes.
    ///
    /// Default: **512 MiB**.
    pub max_memory: usize,

    /// Whether the guest may write to the host's stdout/stderr.
    ///
    /// Default: **false**.
    pub inherit_stdio: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            cache_dir: None,
            cache_enabled: true,
            max_memory: 512 * 1024 * 1024,
            inherit_stdio: false,
        }
    }
}

impl SandboxConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `TAGLIB_WASM_PATH`, `TAGLIB_WASM_CACHE_DIR` and
    /// `TAGLIB_WASM_CACHE`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(path) = env_non_empty(ENV_BINARY_PATH) {
            cfg.binary_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = env_non_empty(ENV_CACHE_DIR) {
            cfg.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(toggle) = env_non_empty(ENV_CACHE) {
            cfg.cache_enabled = toggle != "0";
        }
        cfg
    }

    /// Set the override guest binary path.
    pub fn with_binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    /// Set the compilation cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Enable or disable the compilation cache.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Set the maximum memory limit (in bytes).
    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Let the guest write to the host's stdio.
    pub fn with_inherit_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdio = inherit;
        self
    }

    /// The cache directory that will actually be used.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(default_cache_dir_name()))
    }
}

/// Per-user directory name, so users sharing a temp directory never share
/// (or fight over the ownership of) a cache.
#[cfg(unix)]
fn default_cache_dir_name() -> String {
    format!("{DEFAULT_CACHE_DIR_NAME}-{}", nix::unistd::Uid::effective())
}

#[cfg(not(unix))]
fn default_cache_dir_name() -> String {
    DEFAULT_CACHE_DIR_NAME.to_string()
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
