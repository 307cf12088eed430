// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::ConfigFile;
use crate::config::validate::validate_config;
use crate::errors::Result;

/// Read and deserialize a config file, nothing more.
///
/// Semantic checks (rule shape, patterns, schedules) are left to
/// [`load_and_validate`] and `rules::RuleSet::compile`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a config file and check its shape: `event` XOR `schedule`,
/// non-empty `process`, sane `[general]` values. Serde fills in defaults
/// for everything omitted.
///
/// Patterns, templates and schedules are compiled (and therefore fully
/// validated) one step later, by `rules::RuleSet::compile`.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let config = load_from_path(&path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Config file looked for in the working directory when `--config` is not
/// given.
pub const DEFAULT_CONFIG_FILE: &str = "Watchrun.toml";

/// Expand `$NAME` / `${NAME}` environment references in a string.
///
/// Unset variables are left untouched, so a value like `backup/$UNSET/x`
/// survives expansion verbatim and fails later with a clear path error
/// instead of silently collapsing to `backup//x`.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }

        let rest = &input[idx + 1..];
        let (name, consumed) = match rest.strip_prefix('{') {
            Some(body) => match body.find('}') {
                Some(end) => (&body[..end], end + 2),
                None => ("", 0),
            },
            None => {
                let end = rest
                    .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                    .unwrap_or(rest.len());
                (&rest[..end], end)
            }
        };

        let valid_name = !name.is_empty()
            && !name.starts_with(|c: char| c.is_ascii_digit())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_name {
            out.push('$');
            continue;
        }

        match std::env::var(name) {
            Ok(value) => {
                out.push_str(&value);
                for _ in 0..consumed {
                    chars.next();
                }
            }
            Err(_) => out.push('$'),
        }
    }

    out
}

/// Expand environment references and a leading `~`, keeping the result a
/// string. This is what `event` and `backup` rule values go through, where
/// the value embeds a path rather than being one.
pub fn expand_str(input: &str) -> String {
    let expanded = expand_env(input);

    if expanded == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return home;
        }
    } else if let Some(rest) = expanded.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{rest}", home.trim_end_matches('/'));
        }
    }

    expanded
}

/// Expand environment references and a leading `~` in a path-like string.
pub fn expand_path(input: &str) -> PathBuf {
    PathBuf::from(expand_str(input))
}
