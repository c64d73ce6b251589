//! Byte-pattern parsing for signature scanning.
//!
//! Patterns are written as space-separated hex byte pairs with `?` (or `??`)
//! marking a wildcard position, e.g. `"48 8B ? 88 00 00 00 E8"`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An ordered sequence of byte tokens; `None` matches any byte.
///
/// Invariant: never empty. Construct through [`Pattern::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    tokens: Vec<Option<u8>>,
}

impl Pattern {
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        for token in text.split_whitespace() {
            if token == "?" || token == "??" {
                tokens.push(None);
                continue;
            }

            let value = u8::from_str_radix(token, 16)
                .map_err(|e| Error::InvalidPattern(format!("bad token '{}': {}", token, e)))?;
            tokens.push(Some(value));
        }

        if tokens.is_empty() {
            return Err(Error::InvalidPattern("pattern is empty".to_string()));
        }

        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[Option<u8>] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Patterns are non-empty by construction.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// True when every token at `data[..len]` matches.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= self.tokens.len()
            && self
                .tokens
                .iter()
                .zip(data)
                .all(|(token, byte)| token.is_none_or(|value| value == *byte))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .tokens
            .iter()
            .map(|token| match token {
                Some(value) => format!("{:02X}", value),
                None => "?".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&text)
    }
}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Pattern::parse(&text).map_err(serde::de::Error::custom)
    }
}
