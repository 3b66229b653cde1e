//! Ordered object serialization strategies
//!
//! Objects are encoded with the first strategy that succeeds and decoded by
//! trying each strategy in turn. Every failed attempt is reported as its own
//! [`FileOpsError::Strategy`].

use crate::errors::FileOpsError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// A single serialization scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Compact binary encoding. Fails on sequences of unknown length
    /// (e.g. `#[serde(flatten)]`) and on self-describing targets such as
    /// `serde_json::Value`.
    Bincode,
    /// Self-describing JSON; slower and larger but accepts anything serde can
    /// express.
    Json,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Bincode => "bincode",
            Strategy::Json => "json",
        }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, FileOpsError> {
        match self {
            Strategy::Bincode => bincode::serde::encode_to_vec(value, bincode::config::standard())
                .map_err(|e| FileOpsError::strategy(self.name(), e)),
            Strategy::Json => serde_json::to_vec(value).map_err(|e| FileOpsError::strategy(self.name(), e)),
        }
    }

    /// Decode `bytes`; the whole buffer must be consumed.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, FileOpsError> {
        match self {
            Strategy::Bincode => {
                let (value, read) =
                    bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard())
                        .map_err(|e| FileOpsError::strategy(self.name(), e))?;
                if read != bytes.len() {
                    return Err(FileOpsError::strategy(
                        self.name(),
                        format!("{} trailing bytes after value", bytes.len() - read),
                    ));
                }
                Ok(value)
            }
            Strategy::Json => serde_json::from_slice(bytes).map_err(|e| FileOpsError::strategy(self.name(), e)),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Default order: bincode first, JSON as the permissive fallback.
pub fn default_strategies() -> Vec<Strategy> {
    vec![Strategy::Bincode, Strategy::Json]
}

/// Outcome of a successful attempt, with the failures that preceded it.
#[derive(Debug)]
pub struct Attempt<T> {
    pub value: T,
    pub strategy: Strategy,
    pub failures: Vec<FileOpsError>,
}

/// Encode with the first strategy that succeeds.
pub fn encode_first<T: Serialize + ?Sized>(
    strategies: &[Strategy],
    value: &T,
) -> Result<Attempt<Vec<u8>>, FileOpsError> {
    run_in_order(strategies, |strategy| strategy.encode(value))
}

/// Decode with the first strategy that succeeds.
pub fn decode_first<T: DeserializeOwned>(
    strategies: &[Strategy],
    bytes: &[u8],
) -> Result<Attempt<T>, FileOpsError> {
    run_in_order(strategies, |strategy| strategy.decode(bytes))
}

fn run_in_order<T>(
    strategies: &[Strategy],
    mut attempt: impl FnMut(Strategy) -> Result<T, FileOpsError>,
) -> Result<Attempt<T>, FileOpsError> {
    let mut failures = Vec::new();

    for &strategy in strategies {
        match attempt(strategy) {
            Ok(value) => {
                return Ok(Attempt {
                    value,
                    strategy,
                    failures,
                })
            }
            Err(e) => failures.push(e),
        }
    }

    Err(FileOpsError::AllStrategiesFailed { failures })
}
