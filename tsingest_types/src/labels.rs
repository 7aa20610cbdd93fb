//! Label sets and series fingerprints.
//!
//! A stream is identified by its label set, written as `{name="value", other="value"}`. The
//! fingerprint is a hash over the label set sorted by name, so the same set produces the same
//! fingerprint regardless of the order the labels were written in.

use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

/// Separator byte written between names and values when hashing; it cannot appear in valid
/// UTF-8 so `a="bc"` and `ab="c"` never collide.
const SEPARATOR: u8 = 0xff;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LabelParseError {
    #[error("label set must be wrapped in braces: {0}")]
    MissingBraces(String),

    #[error("label '{0}' is missing '='")]
    MissingEquals(String),

    #[error("label name is empty at offset {0}")]
    EmptyName(usize),

    #[error("value for label '{0}' is not a quoted string")]
    UnquotedValue(String),

    #[error("unterminated quoted value for label '{0}'")]
    UnterminatedValue(String),

    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedCharacter { found: char, offset: usize },

    #[error("label set is not a JSON object of strings: {0}")]
    InvalidJson(String),
}

/// A single name/value pair of a series label set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Parse a label set of the form `{name="value", other="value"}`.
///
/// The returned labels are sorted by name.
pub fn parse_label_set(input: &str) -> Result<Vec<Label>, LabelParseError> {
    let trimmed = input.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| LabelParseError::MissingBraces(input.to_string()))?;

    let mut labels = Vec::new();
    let mut chars = inner.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let Some(&(start, _)) = chars.peek() else {
            break;
        };

        let mut key = String::new();
        while let Some((_, c)) = chars.next_if(|(_, c)| *c != '=' && *c != ',') {
            key.push(c);
        }
        let key = key.trim().to_string();
        match chars.next() {
            Some((_, '=')) => {}
            _ => return Err(LabelParseError::MissingEquals(key)),
        }
        if key.is_empty() {
            return Err(LabelParseError::EmptyName(start));
        }

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        match chars.next() {
            Some((_, '"')) => {}
            _ => return Err(LabelParseError::UnquotedValue(key)),
        }

        let mut value = String::new();
        let mut terminated = false;
        while let Some((_, c)) = chars.next() {
            match c {
                '"' => {
                    terminated = true;
                    break;
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                c => value.push(c),
            }
        }
        if !terminated {
            return Err(LabelParseError::UnterminatedValue(key));
        }
        labels.push(Label { key, value });

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        match chars.next() {
            None => break,
            Some((_, ',')) => {}
            Some((offset, found)) => {
                return Err(LabelParseError::UnexpectedCharacter { found, offset });
            }
        }
    }

    labels.sort();
    Ok(labels)
}

/// Fingerprint of a label set. Input order does not matter.
pub fn fingerprint(labels: &[Label]) -> u64 {
    let mut sorted: Vec<&Label> = labels.iter().collect();
    sorted.sort();

    let mut hasher = XxHash64::with_seed(0);
    for label in sorted {
        hasher.write(label.key.as_bytes());
        hasher.write_u8(SEPARATOR);
        hasher.write(label.value.as_bytes());
        hasher.write_u8(SEPARATOR);
    }
    hasher.finish()
}

/// Encode a label set as the JSON object stored in the time series table
pub fn labels_to_json(labels: &[Label]) -> String {
    let map = labels
        .iter()
        .map(|l| (l.key.clone(), serde_json::Value::String(l.value.clone())))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map).to_string()
}

/// Decode a label set stored as a JSON object of string values
pub fn labels_from_json(json: &str) -> Result<Vec<Label>, LabelParseError> {
    let map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(json).map_err(|e| LabelParseError::InvalidJson(e.to_string()))?;

    let mut labels = map
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(value) => Ok(Label { key, value }),
            other => Err(LabelParseError::InvalidJson(format!(
                "value of '{key}' is {other}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    labels.sort();
    Ok(labels)
}
