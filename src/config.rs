use crate::error::{ShimError, Result};
use crate::translate::request::DEFAULT_PASSTHROUGH_PARAMS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShimConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_route")]
    pub route: String,
    #[serde(default)]
    pub mode: ForwardMode,
    /// Answer every request with a canned 400 after auditing it.
    #[serde(default)]
    pub debug_short_circuit: bool,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub params: ParamsConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// Rewrite OpenAI requests into the Ollama chat schema.
    #[default]
    Translate,
    /// Forward the body untouched (OpenAI-compatible backends).
    Passthrough,
}

impl std::str::FromStr for ForwardMode {
    type Err = ShimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "translate" => Ok(Self::Translate),
            "passthrough" => Ok(Self::Passthrough),
            other => Err(ShimError::config(format!(
                "Unknown mode '{other}'. Expected 'translate' or 'passthrough'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_audit_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamsConfig {
    /// Top-level request keys copied verbatim to the backend.
    #[serde(default = "default_passthrough_params")]
    pub passthrough: Vec<String>,
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self {
            passthrough: default_passthrough_params(),
        }
    }
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            route: default_route(),
            mode: ForwardMode::default(),
            debug_short_circuit: false,
            backend: BackendConfig::default(),
            audit: AuditConfig::default(),
            params: ParamsConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    8000
}

fn default_route() -> String {
    "/chat/completions".to_string()
}

fn default_backend_url() -> String {
    "http://localhost:11434/api/chat".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_passthrough_params() -> Vec<String> {
    DEFAULT_PASSTHROUGH_PARAMS
        .iter()
        .map(|p| (*p).to_string())
        .collect()
}

impl ShimConfig {
    /// Load config from a TOML file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShimError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` to read variables. Empty values are
    /// treated as unset; for aliased keys the first non-empty one wins.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|&k| lookup(k))
                .find(|v| !v.trim().is_empty())
        };

        if let Some(url) = get(&["SHIM_URL", "URL"]) {
            self.backend.url = url;
        }
        if let Some(port) = get(&["SHIM_PORT", "PORT"]) {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring unparsable port"),
            }
        }
        if let Some(route) = get(&["SHIM_RULE", "RULE"]) {
            self.route = route;
        }
        if let Some(secs) = get(&["SHIM_TIMEOUT_SECS"]) {
            match secs.trim().parse::<u64>() {
                Ok(secs) => self.backend.timeout_secs = secs,
                Err(_) => tracing::warn!(value = %secs, "Ignoring unparsable timeout"),
            }
        }
        if let Some(mode) = get(&["SHIM_MODE"]) {
            match mode.parse::<ForwardMode>() {
                Ok(mode) => self.mode = mode,
                Err(e) => tracing::warn!(error = %e, "Ignoring SHIM_MODE"),
            }
        }
        if let Some(flag) = get(&["SHIM_DEBUG"]) {
            self.debug_short_circuit = parse_flag(&flag);
        }
        if let Some(flag) = get(&["SHIM_AUDIT"]) {
            self.audit.enabled = parse_flag(&flag);
        }
        if let Some(dir) = get(&["SHIM_LOG_DIR", "LOG_DIR"]) {
            self.audit.dir = PathBuf::from(dir);
        }
        if let Some(base) = get(&["SHIM_BASE_DIR", "BASE_DIR"]) {
            if self.audit.dir.is_relative() {
                self.audit.dir = PathBuf::from(base).join(&self.audit.dir);
            }
        }
    }

    /// Reject settings the router or client cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.route.starts_with('/') {
            return Err(ShimError::config(format!(
                "Route '{}' must start with '/'",
                self.route
            )));
        }
        if !(self.backend.url.starts_with("http://") || self.backend.url.starts_with("https://")) {
            return Err(ShimError::config(format!(
                "Backend URL '{}' must be http:// or https://",
                self.backend.url
            )));
        }
        if self.backend.timeout_secs == 0 {
            return Err(ShimError::config("Backend timeout must be at least 1 second"));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Candidate config file locations, in search order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("ollama-shim.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("ollama-shim").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("ollama-shim").join("config.toml"));
        paths.push(home.join(".ollama-shim.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
