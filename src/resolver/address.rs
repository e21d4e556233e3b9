//! Address fragments and resolved addresses

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Leading house number (digits, optionally followed by ½) and the street part
fn fragment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+½?)\s+(.*\S)\s*$").expect("address pattern is valid")
    })
}

/// A raw address split into house number and street text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFragment {
    pub number: String,
    pub street: String,
}

impl AddressFragment {
    /// Split `"123 Broadway"` into `("123", "Broadway")`. Fragments without a
    /// leading number do not parse.
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = fragment_pattern().captures(raw)?;
        Some(Self {
            number: captures[1].to_string(),
            street: captures[2].to_string(),
        })
    }
}

/// An address fragment matched to a canonical street
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAddress {
    pub number: String,
    /// Canonical street name as first seen in the street list
    pub street: String,
    /// Normalized form the match was made on
    pub normalized: String,
    pub street_id: u64,
    /// Edit distance between the normalized query and the street
    pub edit_distance: usize,
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number, self.street)
    }
}
