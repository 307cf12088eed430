// src/errors.rs

//! Crate-wide error enum. Rule compilation failures carry the rule name so
//! startup errors point at the offending `[[rule]]` entry.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchrunError {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("rule '{rule}': invalid event pattern: {source}")]
    PatternError {
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule '{rule}': invalid template: {detail}")]
    TemplateError { rule: String, detail: String },

    #[error("rule '{rule}': invalid schedule: {detail}")]
    ScheduleError { rule: String, detail: String },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;

pub type Result<T> = std::result::Result<T, WatchrunError>;
