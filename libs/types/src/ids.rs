//! Identifier types shared across the feature pipeline
//!
//! Instruments are identified by their venue symbol. Every per-instrument
//! pipeline instance is keyed by one `InstrumentId`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument identifier (e.g., "BTC/USDT", "0700.HK", "IF2406")
///
/// Stored as the raw venue symbol. Ordering is lexical so that maps keyed
/// by instrument iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Create a new InstrumentId from a symbol
    ///
    /// Surrounding whitespace is trimmed.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().trim().to_string())
    }

    /// Try to create an InstrumentId, returning None for an empty symbol
    pub fn try_new(symbol: impl Into<String>) -> Option<Self> {
        let id = Self::new(symbol);
        if id.0.is_empty() { None } else { Some(id) }
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a pair symbol into base and quote assets, if it is one
    pub fn split_pair(&self) -> Option<(&str, &str)> {
        self.0.split_once('/')
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
