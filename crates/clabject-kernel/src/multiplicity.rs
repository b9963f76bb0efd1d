//! Association multiplicities.
//!
//! Grammar: `*` | `<uint>` | `<uint>...<uint>` | `<uint>...*`.

use crate::error::{ClabjectError, RuleParseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const RANGE_SEPARATOR: &str = "...";
const WILDCARD: &str = "*";

/// How many targets an association slot takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Multiplicity {
    /// Exactly `n` targets.
    Exact(u32),
    /// Any number of targets.
    Any,
    /// Between `lo` and `hi` targets; `hi = None` is unbounded.
    Range { lo: u32, hi: Option<u32> },
}

impl Multiplicity {
    /// The exact cardinality, if this multiplicity has one.
    pub fn exact(&self) -> Result<u32, ClabjectError> {
        match self {
            Multiplicity::Exact(n) => Ok(*n),
            other => Err(ClabjectError::UnsupportedMultiplicityConversion(
                other.to_string(),
            )),
        }
    }

    /// Whether `count` bound targets satisfy this multiplicity.
    pub fn admits(&self, count: usize) -> bool {
        let count = count as u64;
        match self {
            Multiplicity::Exact(n) => count == u64::from(*n),
            Multiplicity::Any => true,
            Multiplicity::Range { lo, hi } => {
                count >= u64::from(*lo) && hi.is_none_or(|hi| count <= u64::from(hi))
            }
        }
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Multiplicity::Exact(n) => write!(f, "{n}"),
            Multiplicity::Any => f.write_str(WILDCARD),
            Multiplicity::Range { lo, hi: Some(hi) } => write!(f, "{lo}{RANGE_SEPARATOR}{hi}"),
            Multiplicity::Range { lo, hi: None } => write!(f, "{lo}{RANGE_SEPARATOR}{WILDCARD}"),
        }
    }
}

impl FromStr for Multiplicity {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RuleParseError::Multiplicity(s.to_string());
        let bound = |raw: &str| raw.parse::<u32>().map_err(|_| invalid());

        if s == WILDCARD {
            return Ok(Multiplicity::Any);
        }
        match s.split_once(RANGE_SEPARATOR) {
            None => Ok(Multiplicity::Exact(bound(s)?)),
            Some((lo, WILDCARD)) => Ok(Multiplicity::Range {
                lo: bound(lo)?,
                hi: None,
            }),
            Some((lo, hi)) => {
                let (lo, hi) = (bound(lo)?, bound(hi)?);
                if lo > hi {
                    return Err(invalid());
                }
                Ok(Multiplicity::Range { lo, hi: Some(hi) })
            }
        }
    }
}

impl TryFrom<String> for Multiplicity {
    type Error = RuleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Multiplicity> for String {
    fn from(value: Multiplicity) -> Self {
        value.to_string()
    }
}
