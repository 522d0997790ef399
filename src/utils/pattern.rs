//! Regex extraction over captured command output and file contents.
//!
//! Every pattern handed to these helpers carries exactly one capture group;
//! the first group is what gets returned.

use anyhow::{Context, Result};
use regex::bytes::Regex;

use crate::core::error::TestFailure;

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Invalid pattern: {}", pattern))
}

fn capture_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// First capture of `pattern` in `data`, or `None`.
pub fn try_search(pattern: &str, data: &[u8]) -> Result<Option<String>> {
    let re = compile(pattern)?;
    Ok(re
        .captures(data)
        .and_then(|caps| caps.get(1))
        .map(|m| capture_text(m.as_bytes())))
}

/// First capture of `pattern` in `data`. Absence fails the test.
pub fn search(item: &str, pattern: &str, data: &[u8]) -> Result<String> {
    try_search(pattern, data)?
        .ok_or_else(|| TestFailure::assertion(format!("couldn't find {}", item)).into())
}

/// First capture of every match, in order. Zero matches fails the test.
pub fn search_all(item: &str, pattern: &str, data: &[u8]) -> Result<Vec<String>> {
    let re = compile(pattern)?;
    let found: Vec<String> = re
        .captures_iter(data)
        .filter_map(|caps| caps.get(1).map(|m| capture_text(m.as_bytes())))
        .collect();

    if found.is_empty() {
        return Err(TestFailure::assertion(format!("couldn't find {}", item)).into());
    }
    Ok(found)
}

/// Whether `pattern` matches anywhere in `data`. Never fails the test.
pub fn contains(pattern: &str, data: &[u8]) -> Result<bool> {
    Ok(compile(pattern)?.is_match(data))
}
