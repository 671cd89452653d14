//! Configuration loader
//!
//! Loads [`PhiVaultConfig`] from a file, then layers environment overrides
//! on top.
//!
//! ## Loading Strategy
//! 1. `PHIVAULT_CONFIG`, if set, names the file to load
//! 2. Otherwise probes the standard locations (see [`probe_config_paths`])
//! 3. No file found: every section keeps its default
//! 4. `PHIVAULT_*` overrides are applied, then the result is validated
//!
//! ## Environment Variables
//! - `PHIVAULT_CONFIG`: Explicit config file path
//! - `PHIVAULT_LOG_LEVEL`: Default tracing filter (e.g. `debug`)
//! - `PHIVAULT_LOG_JSON`: Emit JSON log lines (true/false)
//! - `PHIVAULT_KMS_URL`: Use the HTTP key provider at this base URL
//! - `PHIVAULT_KMS_TIMEOUT_MS`: Per-call key provider timeout
//! - `PHIVAULT_KMS_MAX_ATTEMPTS`: Attempts per key provider call
//! - `PHIVAULT_AUDIT_PAGE_SIZE`: Audit query page size
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./phivault.toml`, `./phivault.json`, `./config/phivault.toml`
//! 2. The same names in the parent and grandparent directories
//! 3. The same names relative to the executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use phivault_domain::{KmsBackend, PhiVaultConfig, PhiVaultError, Result};

const FILE_NAMES: [&str; 3] = ["phivault.toml", "phivault.json", "config/phivault.toml"];

/// Load configuration from the first file found plus environment overrides
///
/// # Errors
/// Returns `PhiVaultError::Config` if:
/// - `PHIVAULT_CONFIG` names a file that does not exist
/// - The file format is invalid
/// - An override has an invalid value
/// - The merged configuration fails validation
pub fn load() -> Result<PhiVaultConfig> {
    let explicit = std::env::var("PHIVAULT_CONFIG").ok().map(PathBuf::from);

    let mut config = match explicit.or_else(probe_config_paths) {
        Some(path) => read_config_file(&path)?,
        None => {
            tracing::info!("No config file found, using defaults");
            PhiVaultConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Defaults plus environment overrides, ignoring config files
///
/// # Errors
/// Returns `PhiVaultError::Config` if an override is invalid or the result
/// fails validation.
pub fn load_from_env() -> Result<PhiVaultConfig> {
    let mut config = PhiVaultConfig::default();
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
/// Environment overrides are not applied.
///
/// # Errors
/// Returns `PhiVaultError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - The configuration fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<PhiVaultConfig> {
    let config_path = match path {
        Some(p) => p,
        None => probe_config_paths().ok_or_else(|| {
            PhiVaultError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    let config = read_config_file(&config_path)?;
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<PhiVaultConfig> {
    if !path.exists() {
        return Err(PhiVaultError::Config(format!("Config file not found: {}", path.display())));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| PhiVaultError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
///
/// # Errors
/// Returns `PhiVaultError::Config` if format is invalid or parsing fails.
fn parse_config(contents: &str, path: &Path) -> Result<PhiVaultConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| PhiVaultError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| PhiVaultError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(PhiVaultError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.extend([exe_dir.to_path_buf(), exe_dir.join(".."), exe_dir.join("../..")]);
        }
    }

    roots
        .iter()
        .flat_map(|root| FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.is_file())
}

/// Apply `PHIVAULT_*` environment overrides to `config`
///
/// # Errors
/// Returns `PhiVaultError::Config` if a numeric override does not parse.
pub fn apply_env_overrides(config: &mut PhiVaultConfig) -> Result<()> {
    if let Some(level) = env_opt("PHIVAULT_LOG_LEVEL") {
        config.logging.level = level;
    }
    if std::env::var_os("PHIVAULT_LOG_JSON").is_some() {
        config.logging.json = env_bool("PHIVAULT_LOG_JSON", config.logging.json);
    }
    if let Some(url) = env_opt("PHIVAULT_KMS_URL") {
        let api_key_env = match &config.kms.backend {
            KmsBackend::Http { api_key_env, .. } => api_key_env.clone(),
            KmsBackend::Local => None,
        };
        config.kms.backend = KmsBackend::Http { base_url: url, api_key_env };
    }
    if let Some(timeout) = env_parse::<u64>("PHIVAULT_KMS_TIMEOUT_MS")? {
        config.kms.request_timeout_ms = timeout;
    }
    if let Some(attempts) = env_parse::<u32>("PHIVAULT_KMS_MAX_ATTEMPTS")? {
        config.kms.max_attempts = attempts;
    }
    if let Some(page_size) = env_parse::<usize>("PHIVAULT_AUDIT_PAGE_SIZE")? {
        config.audit.page_size = page_size;
    }
    Ok(())
}

/// Non-empty environment variable
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parse an optional numeric environment variable
///
/// # Errors
/// Returns `PhiVaultError::Config` if the variable is set but invalid.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| PhiVaultError::Config(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
///
/// # Returns
/// The parsed boolean value, or `default` if not set.
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
