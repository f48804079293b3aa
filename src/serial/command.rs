//! Frelon serial line message grammar.
//!
//! ```text
//! [">"] TOKEN [ "?" | ["="] VALUE ] [terminator]
//! ```
//!
//! `TOKEN` is ASCII letters, `VALUE` is `digits["."digits]`. `TOKEN?` is a
//! query; `TOKEN=VALUE`, `TOKENVALUE` and a bare `TOKEN` are sets.

use crate::error::{SyncError, SyncResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

#[allow(clippy::expect_used)]
static MESSAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<sync>>)?(?P<cmd>[A-Za-z]+)((?P<req>\?)|=?(?P<val>[0-9]+(\.(?P<dec>[0-9]+))?))?(?P<term>[\r\n]+)?$",
    )
    .expect("valid regex")
});

/// One parsed serial line command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialCommand {
    /// Command token, e.g. `"T"`
    pub token: String,
    /// True for `TOKEN?`
    pub is_query: bool,
    /// Value field as sent, if any
    pub raw_value: Option<String>,
}

impl SerialCommand {
    /// Split a command line into its parts.
    pub fn parse(msg: &str) -> SyncResult<Self> {
        let caps = MESSAGE_RE
            .captures(msg)
            .ok_or_else(|| SyncError::InvalidCommand(msg.to_string()))?;
        let token = caps
            .name("cmd")
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| SyncError::InvalidCommand(msg.to_string()))?;

        Ok(Self {
            token,
            is_query: caps.name("req").is_some(),
            raw_value: caps.name("val").map(|m| m.as_str().to_string()),
        })
    }

    /// True for anything that is not a query, including bare toggles.
    #[must_use]
    pub fn is_set(&self) -> bool {
        !self.is_query
    }

    /// The value field as an integer.
    ///
    /// A missing value parses as an empty string and fails the same way.
    pub fn int_value(&self) -> SyncResult<i64> {
        let value = self.raw_value.as_deref().unwrap_or_default();
        value.parse::<i64>().map_err(|source| SyncError::ValueParse {
            token: self.token.clone(),
            value: value.to_string(),
            source,
        })
    }
}

impl fmt::Display for SerialCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)?;
        if self.is_query {
            f.write_str("?")
        } else if let Some(value) = &self.raw_value {
            write!(f, "={value}")
        } else {
            Ok(())
        }
    }
}
