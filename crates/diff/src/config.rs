//! Pass options.
//!
//! One immutable [`Options`] value is handed to `grad`, `simplify` and
//! `evaluate`. Missing fields take their defaults when loading from JSON.

use serde::{Deserialize, Serialize};
use tensorgrad_core::edge::PRIME;

use crate::error::DiffError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Appended to an edge name to name the matching derivative edge.
    pub prime_marker: char,
    /// Upper bound on simplification rounds.
    pub max_simplify_rounds: usize,
    /// Merge sum terms with equal structure.
    pub combine_like_terms: bool,
    /// Absorb 2-edge copies into a neighbouring factor by renaming.
    pub eliminate_identities: bool,
    /// Largest dense tensor, in elements, a contraction may hold.
    pub max_dense_elements: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            prime_marker: PRIME,
            max_simplify_rounds: 16,
            combine_like_terms: true,
            eliminate_identities: true,
            max_dense_elements: 1 << 22,
        }
    }
}

impl Options {
    pub fn from_json(json: &str) -> Result<Self, DiffError> {
        let options: Options = serde_json::from_str(json).map_err(|e| DiffError::Config {
            reason: e.to_string(),
        })?;
        if options.max_simplify_rounds == 0 {
            return Err(DiffError::Config {
                reason: "max_simplify_rounds must be at least 1".to_string(),
            });
        }
        Ok(options)
    }
}
