use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `barter-pricing`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum PricerError {
    #[error("underlying spot {spot} exceeds maximum interval value {max}")]
    SpotOutOfRange { spot: i64, max: i64 },

    #[error("spot history is full with capacity {capacity}")]
    HistoryFull { capacity: usize },

    #[error("interval search found more overlaps than scratch capacity {capacity}")]
    OverlapCapacityExceeded { capacity: usize },

    #[error("invalid interval: begin {begin} is greater than end {end_exclusive}")]
    InvalidInterval { begin: i64, end_exclusive: i64 },

    #[error("seed interval is missing its {0}")]
    MissingSeed(String),

    #[error("price {price} is outside of the spread table")]
    PriceOutOfRange { price: i64 },

    #[error("tick level {tick} is outside of the spread table")]
    TickOutOfRange { tick: i32 },

    #[error(
        "\
        SpreadTable gap: tier starting at {found} does not follow on from the \
        previous tier ending at {expected} \
    "
    )]
    SpreadTableGap { expected: i32, found: i32 },

    #[error("adjusted delta is zero at underlying spot {spot}")]
    ZeroAdjustedDelta { spot: i64 },

    #[error("invalid pricer configuration: {0}")]
    Config(String),

    #[error("failed to deserialise: {0}")]
    Deserialise(String),
}

impl PricerError {
    /// Determine if an error is raised at the input boundary because the caller broke a
    /// precondition, rather than by internal pricer state.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_caller_error(&self) -> bool {
        match self {
            PricerError::SpotOutOfRange { .. }
            | PricerError::MissingSeed(_)
            | PricerError::SpreadTableGap { .. }
            | PricerError::Config(_)
            | PricerError::Deserialise(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for PricerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Deserialise(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pricer_error_is_caller_error() {
        struct TestCase {
            input: PricerError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: spot above the interval bound is a caller error
                input: PricerError::SpotOutOfRange {
                    spot: 4_294_967_296,
                    max: 4_294_967_295,
                },
                expected: true,
            },
            TestCase {
                // TC1: full spot history is pricer state
                input: PricerError::HistoryFull { capacity: 1024 },
                expected: false,
            },
            TestCase {
                // TC2: zero adjusted delta is pricer state
                input: PricerError::ZeroAdjustedDelta { spot: 11_650_000 },
                expected: false,
            },
            TestCase {
                // TC3: seed without last spot is a caller error
                input: PricerError::MissingSeed("last".to_string()),
                expected: true,
            },
            TestCase {
                // TC4: malformed json is a caller error
                input: PricerError::from(
                    serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
                ),
                expected: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_caller_error();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
