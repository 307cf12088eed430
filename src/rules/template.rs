// src/rules/template.rs

use std::path::{Path, PathBuf};

use crate::rules::pattern::{CaptureSet, EventPattern};

/// Capture names available to templates of scheduled (cron) rules.
pub const SCHEDULE_CAPTURES: &[&str] = &["year", "month", "day", "hour", "minute"];

/// What a template's placeholders may refer to.
///
/// Event rules expose the regex capture groups plus `{file}`; scheduled rules
/// expose the time components from [`SCHEDULE_CAPTURES`] only.
pub enum TemplateScope<'a> {
    Event(&'a EventPattern),
    Schedule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Positional(usize),
    Named(String),
    File,
}

/// A command or path template with `{...}` placeholders.
///
/// Grammar:
/// - `{0}`, `{1}`, ... positional capture groups (0-based),
/// - `{name}` named capture groups (or time components for cron rules),
/// - `{file}` the resolved path of the triggering file,
/// - `{{` and `}}` escape literal braces.
///
/// Templates are parsed once at load time; [`CommandTemplate::validate_against`]
/// then cross-checks every placeholder against the rule's pattern so that a
/// bad reference is a startup error, not a runtime surprise.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    /// Parse a raw template string. Fails on malformed placeholders.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    if chars.peek() == Some(&'{') {
                        chars.next();
                        literal.push('{');
                        continue;
                    }

                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(format!("unclosed '{{' in template '{raw}'"));
                    }

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_placeholder(&name, raw)?);
                }
                '}' => {
                    if chars.peek() == Some(&'}') {
                        chars.next();
                        literal.push('}');
                    } else {
                        return Err(format!("unmatched '}}' in template '{raw}'"));
                    }
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Check that every placeholder resolves in the given scope.
    pub fn validate_against(&self, scope: &TemplateScope<'_>) -> Result<(), String> {
        for segment in &self.segments {
            match (segment, scope) {
                (Segment::Literal(_), _) => {}
                (Segment::Positional(index), TemplateScope::Event(pattern)) => {
                    if *index >= pattern.group_count() {
                        return Err(format!(
                            "placeholder {{{index}}} but pattern '{}' only has {} capture group(s)",
                            pattern.raw(),
                            pattern.group_count()
                        ));
                    }
                }
                (Segment::Positional(index), TemplateScope::Schedule) => {
                    return Err(format!(
                        "placeholder {{{index}}} is not available in scheduled rules"
                    ));
                }
                (Segment::Named(name), TemplateScope::Event(pattern)) => {
                    if !pattern.has_group_name(name) {
                        return Err(format!(
                            "placeholder {{{name}}} does not name a capture group of pattern '{}'",
                            pattern.raw()
                        ));
                    }
                }
                (Segment::Named(name), TemplateScope::Schedule) => {
                    if !SCHEDULE_CAPTURES.contains(&name.as_str()) {
                        return Err(format!(
                            "placeholder {{{name}}} is not available in scheduled rules \
                             (expected one of {SCHEDULE_CAPTURES:?})"
                        ));
                    }
                }
                (Segment::File, TemplateScope::Event(_)) => {}
                (Segment::File, TemplateScope::Schedule) => {
                    return Err(
                        "placeholder {file} is not available in scheduled rules".to_string()
                    );
                }
            }
        }
        Ok(())
    }

    /// Substitute placeholders. `file` is the resolved triggering path, absent
    /// for scheduled rules.
    ///
    /// Load-time validation makes failures here unreachable in practice, but
    /// the executor still maps an `Err` to a failed run rather than panicking.
    pub fn render(&self, captures: &CaptureSet, file: Option<&Path>) -> Result<String, String> {
        let mut out = String::with_capacity(self.raw.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Positional(index) => match captures.positional(*index) {
                    Some(value) => out.push_str(value),
                    None => return Err(format!("no capture group for placeholder {{{index}}}")),
                },
                Segment::Named(name) => match captures.named(name) {
                    Some(value) => out.push_str(value),
                    None => return Err(format!("no capture value for placeholder {{{name}}}")),
                },
                Segment::File => match file {
                    Some(path) => out.push_str(&path.to_string_lossy()),
                    None => return Err("no triggering file for placeholder {file}".to_string()),
                },
            }
        }

        Ok(out)
    }

    /// Leading literal directory part of a path template, if any.
    ///
    /// For `backup/{0}.csv` this is `backup`; for `{0}.csv` it is `None`.
    /// Used at startup to pre-create (and thereby sanity-check) backup
    /// destinations.
    pub fn literal_dir_prefix(&self) -> Option<PathBuf> {
        match self.segments.first() {
            Some(Segment::Literal(text)) => {
                let dir = &text[..text.rfind('/')?];
                if dir.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(dir))
                }
            }
            _ => None,
        }
    }
}

fn parse_placeholder(name: &str, raw: &str) -> Result<Segment, String> {
    if name.is_empty() {
        return Err(format!("empty placeholder '{{}}' in template '{raw}'"));
    }

    if name.chars().all(|c| c.is_ascii_digit()) {
        let index: usize = name
            .parse()
            .map_err(|_| format!("placeholder index '{name}' out of range in template '{raw}'"))?;
        return Ok(Segment::Positional(index));
    }

    let valid = name
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
    if !valid {
        return Err(format!(
            "invalid placeholder '{{{name}}}' in template '{raw}'"
        ));
    }

    if name == "file" {
        Ok(Segment::File)
    } else {
        Ok(Segment::Named(name.to_string()))
    }
}
