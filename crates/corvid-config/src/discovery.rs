//! Config file discovery and layered loading.
//!
//! Resolution order (later overrides earlier):
//! 1. Built-in defaults
//! 2. One TOML file: the explicit `--config` path, else
//!    `$CORVID_CONFIG_DIR/corvid.toml`, else `<platform config dir>/corvid/corvid.toml`
//! 3. `CORVID_*` environment variables
//!
//! [`load_settings`] then runs [`Settings::finalize`].

use std::path::{Path, PathBuf};

use crate::env::apply_env_overrides;
use crate::{ConfigError, Result, Settings};

/// Config filename within the config directory.
const CONFIG_FILE: &str = "corvid.toml";

/// Application name for platform directory resolution.
const APP_NAME: &str = "corvid";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "CORVID_CONFIG_DIR";

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    /// The settings; finalized when returned by `load_settings`.
    pub settings: Settings,
    /// File that was loaded, if any.
    pub source: Option<PathBuf>,
    /// Environment variables that overrode file or default values.
    pub env_overrides: Vec<&'static str>,
}

/// Load settings: defaults, then a config file, then the environment,
/// then [`Settings::finalize`].
///
/// An explicit `path` must exist. A discovered file is optional.
pub fn load_settings(path: Option<&Path>) -> Result<LoadedSettings> {
    let mut loaded = discover_settings(path)?;
    loaded.settings = loaded.settings.finalize()?;
    Ok(loaded)
}

/// Layer defaults, file and environment without applying the guard rails.
///
/// Lets a caller install logging from the loaded settings before
/// `finalize` reports on them.
pub fn discover_settings(path: Option<&Path>) -> Result<LoadedSettings> {
    let (mut settings, source) = match path {
        Some(path) => (load_settings_file(path)?, Some(path.to_path_buf())),
        None => match config_path().filter(|p| p.is_file()) {
            Some(found) => (load_settings_file(&found)?, Some(found)),
            None => (Settings::default(), None),
        },
    };

    let env_overrides = apply_env_overrides(&mut settings)?;

    tracing::debug!(
        source = ?source,
        overrides = ?env_overrides,
        environment = %settings.environment,
        "Settings loaded"
    );

    Ok(LoadedSettings {
        settings,
        source,
        env_overrides,
    })
}

/// Parse a config file without applying the environment or guard rails.
pub fn load_settings_file(path: &Path) -> Result<Settings> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Settings::from_toml(&contents)
}

/// Path of the discovered config file (which may not exist).
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE))
}

/// Config directory: `CORVID_CONFIG_DIR`, else the platform default.
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Environment;
    use serial_test::serial;

    const ENV_VARS: &[&str] = &[
        "CORVID_CONFIG_DIR",
        "CORVID_ENV",
        "CORVID_LLM_MODEL",
        "CORVID_VERIFY_SSL",
        "CORVID_SQL_MOCK_DATA",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_explicit_file_then_env() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[llm]\nmodel = \"from-file\"\nmax_tokens = 256\n").unwrap();

        unsafe { std::env::set_var("CORVID_LLM_MODEL", "from-env") };
        let loaded = load_settings(Some(&path)).unwrap();
        clear_env();

        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.settings.llm.model, "from-env");
        assert_eq!(loaded.settings.llm.max_tokens, 256);
        assert_eq!(loaded.env_overrides, vec!["CORVID_LLM_MODEL"]);
    }

    #[test]
    #[serial]
    fn test_discovered_in_config_dir() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("corvid.toml"), "environment = \"staging\"\n").unwrap();

        unsafe { std::env::set_var("CORVID_CONFIG_DIR", dir.path()) };
        let loaded = load_settings(None).unwrap();
        clear_env();

        assert_eq!(loaded.settings.environment, Environment::Staging);
        assert!(loaded.source.is_some());
    }

    #[test]
    #[serial]
    fn test_missing_discovered_file_uses_defaults() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("CORVID_CONFIG_DIR", dir.path()) };
        let loaded = load_settings(None).unwrap();
        clear_env();

        assert!(loaded.source.is_none());
        assert_eq!(loaded.settings.llm, Settings::default().llm);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        clear_env();
        let err = load_settings(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    #[serial]
    fn test_production_guard_rails_apply_to_env() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("CORVID_CONFIG_DIR", dir.path());
            std::env::set_var("CORVID_ENV", "production");
            std::env::set_var("CORVID_VERIFY_SSL", "false");
        }
        let err = load_settings(None).unwrap_err();

        unsafe {
            std::env::set_var("CORVID_VERIFY_SSL", "true");
            std::env::set_var("CORVID_SQL_MOCK_DATA", "true");
        }
        let loaded = load_settings(None).unwrap();
        clear_env();

        assert!(matches!(err, ConfigError::InsecureTls));
        assert!(!loaded.settings.sql.mock_data);
    }
}
