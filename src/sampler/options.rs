//! Plugin option parsing.
//!
//! The hosting collector hands configuration over as `key=value` tokens,
//! e.g. `component_id=42 set=node1/vmstat schema_check=validated`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::error::SamplerError;

pub const KEY_COMPONENT_ID: &str = "component_id";
pub const KEY_SET: &str = "set";
pub const KEY_SCHEMA_CHECK: &str = "schema_check";

/// How sampled lines are matched to metric slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaCheck {
    /// Line `i` is written to slot `i`. Requires a source whose line order
    /// and count never change after discovery.
    #[default]
    Positional,
    /// Each line's name is resolved through a name index; unknown names fail
    /// the pass.
    Validated,
}

impl SchemaCheck {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positional => "positional",
            Self::Validated => "validated",
        }
    }
}

impl fmt::Display for SchemaCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaCheck {
    type Err = SamplerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positional" => Ok(Self::Positional),
            "validated" => Ok(Self::Validated),
            other => Err(SamplerError::InvalidOption {
                key: KEY_SCHEMA_CHECK.to_string(),
                reason: format!("expected positional or validated, got {other:?}"),
            }),
        }
    }
}

/// Attribute/value list handed to [`Sampler::config`](super::Sampler::config).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginOptions {
    values: HashMap<String, String>,
}

impl PluginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse whitespace-separated `key=value` tokens.
    pub fn parse(line: &str) -> Result<Self, SamplerError> {
        let mut opts = Self::new();

        for token in line.split_whitespace() {
            let (key, value) = token
                .split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| SamplerError::InvalidOption {
                    key: token.to_string(),
                    reason: "expected key=value".to_string(),
                })?;
            opts.insert(key, value);
        }

        Ok(opts)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn component_id(&self) -> Result<Option<u64>, SamplerError> {
        self.get(KEY_COMPONENT_ID)
            .map(|v| {
                parse_unsigned(v).ok_or_else(|| SamplerError::InvalidOption {
                    key: KEY_COMPONENT_ID.to_string(),
                    reason: format!("not an unsigned integer: {v:?}"),
                })
            })
            .transpose()
    }

    pub fn set_name(&self) -> Option<&str> {
        self.get(KEY_SET).filter(|v| !v.is_empty())
    }

    pub fn schema_check(&self) -> Result<Option<SchemaCheck>, SamplerError> {
        self.get(KEY_SCHEMA_CHECK).map(str::parse::<SchemaCheck>).transpose()
    }
}

/// Parse an unsigned integer with C-style base detection: `0x` hex,
/// leading `0` octal, decimal otherwise.
pub fn parse_unsigned(text: &str) -> Option<u64> {
    let text = text.trim();
    let text = text.strip_prefix('+').unwrap_or(text);

    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };

    if digits.is_empty() || digits.starts_with('+') {
        return None;
    }

    u64::from_str_radix(digits, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let opts = PluginOptions::parse("component_id=42 set=node1/vmstat").unwrap();
        assert_eq!(opts.component_id().unwrap(), Some(42));
        assert_eq!(opts.set_name(), Some("node1/vmstat"));
        assert_eq!(opts.schema_check().unwrap(), None);
    }

    #[test]
    fn test_parse_options_rejects_bare_token() {
        let err = PluginOptions::parse("component_id=1 oops").unwrap_err();
        assert!(matches!(err, SamplerError::InvalidOption { ref key, .. } if key == "oops"));

        let err = PluginOptions::parse("=1").unwrap_err();
        assert!(matches!(err, SamplerError::InvalidOption { .. }));
    }

    #[test]
    fn test_empty_set_is_absent() {
        let opts = PluginOptions::parse("set=").unwrap();
        assert_eq!(opts.set_name(), None);
    }

    #[test]
    fn test_schema_check_values() {
        let opts = PluginOptions::parse("schema_check=validated").unwrap();
        assert_eq!(opts.schema_check().unwrap(), Some(SchemaCheck::Validated));

        let opts = PluginOptions::parse("schema_check=strict").unwrap();
        assert!(opts.schema_check().is_err());
    }

    #[test]
    fn test_component_id_invalid() {
        let opts = PluginOptions::parse("component_id=node7").unwrap();
        let err = opts.component_id().unwrap_err();
        assert_eq!(err.kind(), "invalid_option");
    }

    #[test]
    fn test_parse_unsigned_bases() {
        assert_eq!(parse_unsigned("42"), Some(42));
        assert_eq!(parse_unsigned("0"), Some(0));
        assert_eq!(parse_unsigned("0x2A"), Some(42));
        assert_eq!(parse_unsigned("0X2a"), Some(42));
        assert_eq!(parse_unsigned("052"), Some(42));
        assert_eq!(parse_unsigned("+7"), Some(7));
        assert_eq!(parse_unsigned("18446744073709551615"), Some(u64::MAX));
    }

    #[test]
    fn test_parse_unsigned_rejects() {
        for text in ["", "-1", "0x", "09", "abc", "++1", "18446744073709551616"] {
            assert_eq!(parse_unsigned(text), None, "{text:?}");
        }
    }
}
