//! Env file parsing and in-place merging.
//!
//! The env file is shared with the deploy step and with humans, so writes
//! replace existing keys where they stand and append new keys at the end;
//! comments, blank lines and unrelated keys are left alone.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::Path;

/// Parser for env files in KEY=VALUE format.
///
/// Supports:
/// - Lines of `KEY=VALUE`, optionally prefixed with `export `
/// - Lines of `KEY="quoted value"` or `KEY='single quoted'`
/// - Comments starting with `#`
/// - Empty lines (skipped)
/// - Inline comments after the value are NOT stripped (to match `.env` convention)
pub struct EnvFile;

impl EnvFile {
    /// Parse env file content into a map of key-value pairs.
    pub fn parse(content: &str) -> HashMap<String, String> {
        content
            .lines()
            .filter_map(Self::split_line)
            .map(|(k, v)| (k.to_string(), Self::unquote(v)))
            .collect()
    }

    /// Read and parse `path`. A missing file is empty.
    pub fn load(path: &Path) -> io::Result<HashMap<String, String>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e),
        }
    }

    /// The process environment. Entries that are not valid UTF-8 are skipped.
    pub fn process() -> HashMap<String, String> {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// `base` with `top` laid over it. Blank values in `top` do not mask
    /// values from `base`.
    pub fn overlay(
        base: &HashMap<String, String>,
        top: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut merged = base.clone();
        for (key, value) in top {
            if !value.trim().is_empty() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Rewrite `content` with `updates` applied. Existing keys keep their line
    /// position; new keys are appended in map order.
    pub fn merge(content: &str, updates: &BTreeMap<String, String>) -> String {
        let mut written: HashSet<&str> = HashSet::new();
        let mut out = String::new();

        for line in content.lines() {
            match Self::split_line(line) {
                Some((key, _)) if updates.contains_key(key) => {
                    if written.insert(key) {
                        out.push_str(&format!("{}={}\n", key, updates[key]));
                    }
                    // Later duplicates of an updated key are dropped.
                }
                _ => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }

        for (key, value) in updates {
            if !written.contains(key.as_str()) {
                out.push_str(&format!("{}={}\n", key, value));
            }
        }
        out
    }

    /// Merge `updates` into the file at `path`, creating it if needed.
    pub fn write_merged(path: &Path, updates: &BTreeMap<String, String>) -> io::Result<()> {
        let existing = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, Self::merge(&existing, updates))
    }

    fn split_line(line: &str) -> Option<(&str, &str)> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let (key, value) = trimmed.split_once('=')?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some((key, value.trim()))
    }

    /// Remove surrounding quotes from a value (double or single).
    fn unquote(s: &str) -> String {
        if s.len() >= 2
            && ((s.starts_with('"') && s.ends_with('"'))
                || (s.starts_with('\'') && s.ends_with('\'')))
        {
            return s[1..s.len() - 1].to_string();
        }
        s.to_string()
    }
}
