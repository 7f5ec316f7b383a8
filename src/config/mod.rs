// src/config/mod.rs

//! Job file loading and validation.
//!
//! - `model.rs`: TOML-backed data model.
//! - `loader.rs`: reading a file from disk.
//! - `validate.rs`: `RawConfigFile -> ConfigFile` with reference, regex and
//!   cycle checks.
//! - `duration.rs`: `"250ms"` / `"2s"` style durations.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ArgConfig, ConfigFile, ConfigSection, FromOutputConfig, JobConfig, RawConfigFile, Settings,
};
