// src/config/mod.rs

//! TOML configuration: the serde data model, disk loading with env and `~`
//! expansion, and the shape checks that run before rules are compiled.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    DEFAULT_CONFIG_FILE, expand_env, expand_path, expand_str, load_and_validate, load_from_path,
};
pub use model::{ConfigFile, GeneralSection, RuleConfig};
pub use validate::validate_config;
