//! Configuration vault – reads/writes `~/.lcdepth/config.toml`.
//!
//! The file holds an `[lc]` table (the fusion settings) and a `[scenario]`
//! table (the synthetic scene `lcdepth run` fuses).  Every key is optional.

use lcdepth_types::{LcConfig, PlannerKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::scenario::ScenarioConfig;

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub lc: LcConfig,
    pub scenario: ScenarioConfig,
}

impl Config {
    /// Check both sections.
    pub fn validate(&self) -> Result<(), String> {
        self.lc.validate().map_err(|e| e.to_string())?;
        self.scenario.validate().map_err(|e| e.to_string())
    }
}

/// Return the path to `~/.lcdepth/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".lcdepth").join("config.toml")
}

/// Load, apply env overrides, and validate.  A missing file yields the
/// defaults (with overrides).
pub fn load_or_default(path: &Path) -> Result<Config, String> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `LCDEPTH_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LCDEPTH_ITERATIONS` | `lc.iterations` |
/// | `LCDEPTH_PLANNER` | `lc.planner` |
/// | `LCDEPTH_SPREAD_ITER` | `lc.params.spread_iter` |
/// | `LCDEPTH_SPREAD_N` | `lc.params.spread_n` |
/// | `LCDEPTH_USE_LC_PROB` | `lc.use_lc_prob` |
///
/// Unparseable values are logged and ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    fn parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
        let raw = std::env::var(var).ok()?;
        let value = raw.parse::<T>().ok();
        if value.is_none() {
            warn!(var, value = %raw, "ignoring unparseable override");
        }
        value
    }

    if let Some(n) = parsed::<usize>("LCDEPTH_ITERATIONS") {
        cfg.lc.iterations = n;
    }
    if let Some(kind) = parsed::<PlannerKind>("LCDEPTH_PLANNER") {
        cfg.lc.planner = kind;
    }
    if let Some(n) = parsed::<usize>("LCDEPTH_SPREAD_ITER") {
        cfg.lc.params.spread_iter = n;
    }
    if let Some(n) = parsed::<usize>("LCDEPTH_SPREAD_N") {
        cfg.lc.params.spread_n = n;
    }
    if let Some(p) = parsed::<f32>("LCDEPTH_USE_LC_PROB") {
        cfg.lc.use_lc_prob = p;
    }
}

/// Save the config to a specific path, creating the parent directory.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
