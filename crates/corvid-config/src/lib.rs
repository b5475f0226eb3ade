//! Configuration system for Corvid.
//!
//! Provides typed [`Settings`] with:
//! - Defaults for every section, so no config file is required
//! - One optional TOML file (explicit path, `CORVID_CONFIG_DIR`, or the
//!   platform config directory)
//! - `CORVID_*` environment overrides (`OPENAI_API_KEY` as a key fallback)
//! - Production guard rails applied at startup by [`Settings::finalize`]

pub mod discovery;
pub mod env;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedSettings, config_dir, config_path, discover_settings, load_settings, load_settings_file,
};
pub use env::{apply_env_overrides, apply_overrides};
pub use error::{ConfigError, Result};
pub use types::*;
