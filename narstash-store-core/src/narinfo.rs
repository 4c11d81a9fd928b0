//! Narinfo text handling.
//!
//! Narinfo files are newline-separated `Key: value` lines. The helpers here
//! work on the text directly so fields this crate does not model (`Deriver`,
//! `CA`, compression metadata, ...) pass through untouched.

use crate::fingerprint::NarInfoRecord;
use crate::signing::SigningKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NarInfoError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid NarSize {value:?}: {source}")]
    InvalidNarSize {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("Invalid store path: {0}")]
    InvalidStorePath(String),

    #[error("Malformed narinfo line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },
}

const SIG_PREFIX: &str = "Sig:";

/// Iterate over `(key, value)` pairs, skipping blank lines.
fn fields(text: &str) -> impl Iterator<Item = (usize, Option<(&str, &str)>)> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            (
                i + 1,
                line.split_once(':').map(|(k, v)| (k.trim(), v.trim())),
            )
        })
}

fn field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    fields(text)
        .filter_map(|(_, kv)| kv)
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Parse the fields that make up the signed fingerprint.
///
/// `References:` carries base names; they are expanded to full store paths
/// using the directory of `StorePath`. The first `Sig:` line, if any, ends up
/// in `signature`.
pub fn parse_record(text: &str) -> Result<NarInfoRecord, NarInfoError> {
    let mut store_path = None;
    let mut nar_hash = None;
    let mut nar_size = None;
    let mut references = None;
    let mut signature = None;

    for (line, kv) in fields(text) {
        let (key, value) = kv.ok_or_else(|| NarInfoError::MalformedLine {
            line,
            content: text.lines().nth(line - 1).unwrap_or_default().to_string(),
        })?;
        match key {
            "StorePath" => store_path = Some(value),
            "NarHash" => nar_hash = Some(value),
            "NarSize" => nar_size = Some(value),
            "References" => references = Some(value),
            "Sig" if signature.is_none() => signature = Some(value.to_string()),
            _ => {}
        }
    }

    let store_path = store_path.ok_or(NarInfoError::MissingField("StorePath"))?;
    let nar_hash = nar_hash.ok_or(NarInfoError::MissingField("NarHash"))?;
    let nar_size = nar_size.ok_or(NarInfoError::MissingField("NarSize"))?;
    let nar_size = nar_size
        .parse::<u64>()
        .map_err(|source| NarInfoError::InvalidNarSize {
            value: nar_size.to_string(),
            source,
        })?;

    let store_dir = match store_path.rsplit_once('/') {
        Some((dir, name)) if store_path.starts_with('/') && !dir.is_empty() && !name.is_empty() => {
            dir
        }
        _ => return Err(NarInfoError::InvalidStorePath(store_path.to_string())),
    };

    let references = references
        .unwrap_or_default()
        .split_whitespace()
        .map(|r| format!("{store_dir}/{r}"))
        .collect();

    Ok(NarInfoRecord {
        store_path: store_path.to_string(),
        nar_hash: nar_hash.to_string(),
        nar_size,
        references,
        signature,
    })
}

/// The raw value of the `URL:` field.
pub fn url_of(text: &str) -> Option<&str> {
    field(text, "URL")
}

/// Name of the NAR file a `URL:` value points at.
pub fn nar_filename(url: &str) -> &str {
    url.strip_prefix("nar/").unwrap_or(url)
}

/// Drop every `Sig:` line, keeping all other lines in order.
pub fn strip_signatures(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for line in text.lines() {
        if line.trim_start().starts_with(SIG_PREFIX) {
            continue;
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

/// Replace all existing signatures with a single signature from `key`.
///
/// The new `Sig:` line is always the last line of the result.
pub fn resign(text: &str, key: &SigningKey) -> Result<String, NarInfoError> {
    let record = parse_record(text)?;
    let mut result = strip_signatures(text);
    result.push_str("Sig: ");
    result.push_str(&key.sign_record(&record));
    result.push('\n');
    Ok(result)
}

/// Point the `URL:` field somewhere else.
pub fn rewrite_url(text: &str, url: &str) -> String {
    let mut result = String::with_capacity(text.len() + url.len());
    for line in text.lines() {
        match line.split_once(':') {
            Some((key, _)) if key.trim() == "URL" => {
                result.push_str("URL: ");
                result.push_str(url);
            }
            _ => result.push_str(line),
        }
        result.push('\n');
    }
    result
}
