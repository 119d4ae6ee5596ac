//! Set-based label selectors.
//!
//! Grammar: comma-conjoined requirements of the forms `k=v`, `k==v`,
//! `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k` (exists) and `!k` (not
//! exists). An empty selector matches everything.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Eq(String, String),
    Neq(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Eq(key, value) => labels.get(key) == Some(value),
            Requirement::Neq(key, value) => labels.get(key) != Some(value),
            Requirement::In(key, values) => {
                labels.get(key).is_some_and(|v| values.contains(v))
            }
            Requirement::NotIn(key, values) => {
                !labels.get(key).is_some_and(|v| values.contains(v))
            }
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::NotExists(key) => !labels.contains_key(key),
        }
    }
}

/// A parsed label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Parses a selector string. Empty input yields the match-everything
    /// selector.
    pub fn parse(input: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for part in split_requirements(input) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            requirements.push(parse_requirement(part).map_err(|message| {
                SyncError::Selector {
                    selector: input.to_string(),
                    message,
                }
            })?);
        }
        Ok(Self { requirements })
    }

    /// Whether every requirement holds for the given label map.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl FromStr for Selector {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Splits on commas outside of `(...)` value sets.
fn split_requirements(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (index, ch) in input.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&input[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_requirement(part: &str) -> std::result::Result<Requirement, String> {
    if let Some(key) = part.strip_prefix('!') {
        let key = key.trim();
        if key.is_empty() {
            return Err("missing key after '!'".to_string());
        }
        return Ok(Requirement::NotExists(key.to_string()));
    }

    if let Some((key, values)) = split_set_operator(part, " notin ") {
        return Ok(Requirement::NotIn(key, values?));
    }
    if let Some((key, values)) = split_set_operator(part, " in ") {
        return Ok(Requirement::In(key, values?));
    }

    if let Some((key, value)) = part.split_once("!=") {
        return equality(key, value).map(|(k, v)| Requirement::Neq(k, v));
    }
    if let Some((key, value)) = part.split_once("==") {
        return equality(key, value).map(|(k, v)| Requirement::Eq(k, v));
    }
    if let Some((key, value)) = part.split_once('=') {
        return equality(key, value).map(|(k, v)| Requirement::Eq(k, v));
    }

    if part.contains(char::is_whitespace) {
        return Err(format!("unrecognized requirement '{part}'"));
    }
    Ok(Requirement::Exists(part.to_string()))
}

type SetSplit = (String, std::result::Result<Vec<String>, String>);

fn split_set_operator(part: &str, operator: &str) -> Option<SetSplit> {
    let (key, rest) = part.split_once(operator)?;
    let key = key.trim().to_string();
    if key.is_empty() {
        return Some((key, Err(format!("missing key before '{}'", operator.trim()))));
    }
    let rest = rest.trim();
    let Some(inner) = rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')) else {
        return Some((key, Err(format!("expected '(...)' after '{}'", operator.trim()))));
    };
    let values: Vec<String> = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Some((key, Err("empty value set".to_string())));
    }
    Some((key, Ok(values)))
}

fn equality(key: &str, value: &str) -> std::result::Result<(String, String), String> {
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() {
        return Err("missing key in equality requirement".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}
