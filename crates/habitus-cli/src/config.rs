//! Configuration Vault – reads/writes `~/.habitus/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

use habitus_runtime::{EngineConfig, Posture};

/// When recognition cycles run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostureChoice {
    /// After every logged execution.
    #[default]
    Development,
    /// After every `every_n`-th logged execution.
    Production,
}

impl std::fmt::Display for PostureChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostureChoice::Development => write!(f, "development"),
            PostureChoice::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for PostureChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(PostureChoice::Development),
            "production" | "prod" => Ok(PostureChoice::Production),
            other => Err(format!("unknown posture '{other}' (development / production)")),
        }
    }
}

/// Persisted user configuration stored in `~/.habitus/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database holding memories and the execution log.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Base URL of the OpenAI-compatible model server.
    #[serde(default = "default_llm_url")]
    pub llm_url: String,

    /// Model used for reconciliation (e.g. "llama3", "gpt-4o-mini").
    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token for hosted model servers (stored as plain text; the file
    /// is written owner-only).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    #[serde(default)]
    pub posture: PostureChoice,

    /// Cycle frequency under the production posture.
    #[serde(default = "default_every_n")]
    pub every_n: u64,

    /// Minimum seconds between two analyses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval_secs: Option<u64>,

    #[serde(default = "default_analysis_timeout")]
    pub analysis_timeout_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db_path", &self.db_path)
            .field("llm_url", &self.llm_url)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("posture", &self.posture)
            .field("every_n", &self.every_n)
            .field("min_interval_secs", &self.min_interval_secs)
            .field("analysis_timeout_secs", &self.analysis_timeout_secs)
            .finish()
    }
}

fn default_db_path() -> PathBuf {
    habitus_dir_for_home(&home_dir()).join("habitus.db")
}
fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3".to_string()
}
fn default_every_n() -> u64 {
    10
}
fn default_analysis_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            llm_url: default_llm_url(),
            model: default_model(),
            api_key: String::new(),
            posture: PostureChoice::default(),
            every_n: default_every_n(),
            min_interval_secs: None,
            analysis_timeout_secs: default_analysis_timeout(),
        }
    }
}

impl Config {
    /// Translate the user-facing settings into the engine's configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig {
            db_path: self.db_path.clone(),
            llm_url: self.llm_url.clone(),
            model: self.model.clone(),
            api_key: Some(self.api_key.clone()).filter(|k| !k.is_empty()),
            analysis_timeout_secs: self.analysis_timeout_secs,
            ..EngineConfig::default()
        };
        engine.recognizer.posture = match self.posture {
            PostureChoice::Development => Posture::Development,
            PostureChoice::Production => Posture::Production {
                every_n: NonZeroU64::new(self.every_n).unwrap_or(NonZeroU64::MIN),
            },
        };
        engine.recognizer.min_interval_secs = self.min_interval_secs;
        engine
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn habitus_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".habitus")
}

/// Return the path to `~/.habitus/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    habitus_dir_for_home(home).join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `HABITUS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HABITUS_DB_PATH` | `db_path` |
/// | `HABITUS_LLM_URL` | `llm_url` |
/// | `HABITUS_MODEL` | `model` |
/// | `HABITUS_POSTURE` | `posture` (`development` / `production`) |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HABITUS_DB_PATH") {
        cfg.db_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("HABITUS_LLM_URL") {
        cfg.llm_url = v;
    }
    if let Ok(v) = std::env::var("HABITUS_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("HABITUS_POSTURE")
        && let Ok(posture) = v.parse::<PostureChoice>()
    {
        cfg.posture = posture;
    }
}

/// Save the config to disk, creating `~/.habitus/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only read/write (rw-------) on Unix.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_redacts_api_key() {
        let cfg = Config {
            api_key: "sk-super-secret".to_string(),
            ..Config::default()
        };
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("sk-super-secret"), "api key must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_key() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            db_path: dir.path().join("mem.db"),
            posture: PostureChoice::Production,
            every_n: 5,
            min_interval_secs: Some(60),
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        // Only fields without an env override, so parallel tests cannot interfere.
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.every_n, 5);
        assert_eq!(loaded.min_interval_secs, Some(60));
        assert_eq!(loaded.analysis_timeout_secs, 30);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config = toml::from_str("model = \"qwen2.5\"").expect("parse");
        assert_eq!(cfg.model, "qwen2.5");
        assert_eq!(cfg.llm_url, "http://localhost:11434");
        assert_eq!(cfg.posture, PostureChoice::Development);
        assert!(cfg.db_path.ends_with(".habitus/habitus.db"));
    }

    #[test]
    fn config_path_points_to_habitus_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.habitus/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn engine_config_maps_posture_and_key() {
        let cfg = Config {
            posture: PostureChoice::Production,
            every_n: 0,
            api_key: String::new(),
            ..Config::default()
        };
        let engine = cfg.engine_config();
        assert_eq!(
            engine.recognizer.posture,
            Posture::Production { every_n: NonZeroU64::MIN }
        );
        assert!(engine.api_key.is_none());
    }

    #[test]
    fn posture_parses_short_forms() {
        assert_eq!("prod".parse::<PostureChoice>(), Ok(PostureChoice::Production));
        assert_eq!(" Development ".parse::<PostureChoice>(), Ok(PostureChoice::Development));
        assert!("sometimes".parse::<PostureChoice>().is_err());
    }

    #[test]
    fn apply_env_overrides_changes_llm_url_and_model() {
        // SAFETY: single-threaded test; no other test touches these variables.
        unsafe {
            std::env::set_var("HABITUS_LLM_URL", "http://gpu-box:8000");
            std::env::set_var("HABITUS_MODEL", "gpt-4o-mini");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.llm_url, "http://gpu-box:8000");
        assert_eq!(cfg.model, "gpt-4o-mini");
        unsafe {
            std::env::remove_var("HABITUS_LLM_URL");
            std::env::remove_var("HABITUS_MODEL");
        }
    }

    #[test]
    fn apply_env_overrides_changes_db_path() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("HABITUS_DB_PATH", "/tmp/habitus-test.db") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/habitus-test.db"));
        unsafe { std::env::remove_var("HABITUS_DB_PATH") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_posture() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("HABITUS_POSTURE", "sometimes") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.posture, PostureChoice::Development);

        unsafe { std::env::set_var("HABITUS_POSTURE", "production") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.posture, PostureChoice::Production);
        unsafe { std::env::remove_var("HABITUS_POSTURE") };
    }
}
