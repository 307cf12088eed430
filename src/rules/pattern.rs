// src/rules/pattern.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use regex::Regex;

/// Capture values extracted when a rule fires.
///
/// For event rules these come from the regex match; for scheduled rules they
/// are the components of the firing time (`year`, `month`, ...). Both feed
/// the same template substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSet {
    /// Values of the capture groups in order, `{0}` being the first group.
    /// Groups that did not participate in the match are empty strings.
    pub positional: Vec<String>,

    /// Values of named capture groups (or time components for cron rules).
    pub named: BTreeMap<String, String>,
}

impl CaptureSet {
    pub fn positional(&self, index: usize) -> Option<&str> {
        self.positional.get(index).map(String::as_str)
    }

    pub fn named(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

/// A rule's compiled `event` pattern.
///
/// The raw pattern is a regular expression matched against paths relative to
/// the watch root, with forward slashes on every platform. Matching is
/// anchored at the start of the path (like `re.match`), so `data/(\d+)\.csv`
/// matches `data/42.csv` but not `raw/data/42.csv`; use `.*` explicitly to
/// match anywhere.
#[derive(Debug, Clone)]
pub struct EventPattern {
    raw: String,
    regex: Regex,
    group_count: usize,
    group_names: Vec<String>,
}

impl EventPattern {
    /// Compile a raw pattern. Fails on invalid regex syntax.
    pub fn compile(raw: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{raw})"))?;
        let group_count = regex.captures_len() - 1;
        let group_names = regex
            .capture_names()
            .flatten()
            .map(str::to_string)
            .collect();

        Ok(Self {
            raw: raw.to_string(),
            regex,
            group_count,
            group_names,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Number of capture groups (excluding the implicit whole-match group).
    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn has_group_name(&self, name: &str) -> bool {
        self.group_names.iter().any(|n| n == name)
    }

    /// Match a root-relative path and extract captures.
    ///
    /// Returns `None` when the path does not match.
    pub fn match_path(&self, rel_path: &str) -> Option<CaptureSet> {
        let caps = self.regex.captures(rel_path)?;

        let positional = (1..caps.len())
            .map(|i| {
                caps.get(i)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            })
            .collect();

        // Like the positional groups, named groups that did not participate
        // in the match are present with an empty value.
        let named = self
            .group_names
            .iter()
            .map(|name| {
                let value = caps
                    .name(name)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                (name.clone(), value)
            })
            .collect();

        Some(CaptureSet { positional, named })
    }

    /// Longest literal directory prefix of the pattern.
    ///
    /// Used to decide which directories to watch when `[general].recursive`
    /// is off: for `data/(\d+)\.csv` this is `data`, for `out\.csv` it is
    /// empty (the watch root itself). A segment containing any regex
    /// metacharacter ends the prefix.
    pub fn literal_prefix(&self) -> PathBuf {
        let mut prefix = PathBuf::new();

        let segments: Vec<&str> = self.raw.split('/').collect();
        // The last segment names the file, never a watched directory.
        for segment in &segments[..segments.len().saturating_sub(1)] {
            if segment.is_empty() || segment.contains(is_regex_meta) {
                break;
            }
            prefix.push(segment);
        }

        prefix
    }
}

fn is_regex_meta(c: char) -> bool {
    matches!(
        c,
        '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$'
    )
}
