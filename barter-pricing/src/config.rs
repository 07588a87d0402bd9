use crate::{error::PricerError, validator::ValidatorParams, violation::PutOrCall};
use serde::{Deserialize, Serialize};

/// Default minimum time an underlying spot must hold before it is trusted (1ms).
pub const DEFAULT_ISSUER_MAX_LAG_NS: i64 = 1_000_000;

/// Default per-mille allowance applied to the theoretical bucket size.
pub const DEFAULT_DELTA_ALLOWANCE: i64 = 1200;

/// Default per-mille allowance applied to the distance between buckets.
pub const DEFAULT_BUCKET_DISTANCE_ALLOWANCE: i64 = 100;

/// Default per-mille scaling of extrapolated theoretical bids.
pub const DEFAULT_CHECK_PRICING_ALLOWANCE: i64 = 950;

/// Default number of underlying spot samples buffered between scans.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Default number of overlapping buckets a single range search may return.
pub const DEFAULT_OVERLAP_CAPACITY: usize = 64;

/// How a bucket is inferred for a derivative price that has never been observed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtrapolationMode {
    /// Shift the bucket of the closest observed price, preferring the lower price on ties.
    #[default]
    Nearest,
    /// Union of the shifted buckets of every equally close observed price.
    Bracketing,
}

/// Configuration of one [`BucketPricer`](crate::pricer::BucketPricer).
///
/// ### Json Example
/// ```json
/// {
///     "und_instrument": 5,
///     "deriv_instrument": 26525,
///     "put_or_call": "call",
///     "conversion_ratio": 10,
///     "issuer_max_lag_ns": 1000000,
///     "target_spread_in_tick": 1
/// }
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct PricerConfig {
    pub und_instrument: u64,
    pub deriv_instrument: u64,
    pub put_or_call: PutOrCall,
    pub conversion_ratio: i64,
    #[serde(default = "default_issuer_max_lag_ns")]
    pub issuer_max_lag_ns: i64,
    #[serde(default = "default_delta_allowance")]
    pub delta_allowance: i64,
    #[serde(default = "default_bucket_distance_allowance")]
    pub bucket_distance_allowance: i64,
    #[serde(default = "default_check_pricing_allowance")]
    pub check_pricing_allowance: i64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_overlap_capacity")]
    pub overlap_capacity: usize,
    #[serde(default)]
    pub target_spread_in_tick: Option<i32>,
    #[serde(default)]
    pub extrapolation: ExtrapolationMode,
    /// Replace the observed buckets with the theoretical ones extrapolated around the latest
    /// bid whenever those are consistent.
    #[serde(default = "default_theo_interval_swap")]
    pub theo_interval_swap: bool,
}

fn default_issuer_max_lag_ns() -> i64 {
    DEFAULT_ISSUER_MAX_LAG_NS
}

fn default_delta_allowance() -> i64 {
    DEFAULT_DELTA_ALLOWANCE
}

fn default_bucket_distance_allowance() -> i64 {
    DEFAULT_BUCKET_DISTANCE_ALLOWANCE
}

fn default_check_pricing_allowance() -> i64 {
    DEFAULT_CHECK_PRICING_ALLOWANCE
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_overlap_capacity() -> usize {
    DEFAULT_OVERLAP_CAPACITY
}

fn default_theo_interval_swap() -> bool {
    true
}

impl PricerConfig {
    /// Construct a [`PricerConfig`] with every tunable at its default.
    pub fn new(
        und_instrument: u64,
        deriv_instrument: u64,
        put_or_call: PutOrCall,
        conversion_ratio: i64,
    ) -> Self {
        Self {
            und_instrument,
            deriv_instrument,
            put_or_call,
            conversion_ratio,
            issuer_max_lag_ns: DEFAULT_ISSUER_MAX_LAG_NS,
            delta_allowance: DEFAULT_DELTA_ALLOWANCE,
            bucket_distance_allowance: DEFAULT_BUCKET_DISTANCE_ALLOWANCE,
            check_pricing_allowance: DEFAULT_CHECK_PRICING_ALLOWANCE,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            overlap_capacity: DEFAULT_OVERLAP_CAPACITY,
            target_spread_in_tick: None,
            extrapolation: ExtrapolationMode::default(),
            theo_interval_swap: true,
        }
    }

    /// Deserialise a [`PricerConfig`] from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, PricerError> {
        let config = serde_json::from_str::<Self>(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_issuer_max_lag_ns(self, issuer_max_lag_ns: i64) -> Self {
        Self {
            issuer_max_lag_ns,
            ..self
        }
    }

    pub fn with_delta_allowance(self, delta_allowance: i64) -> Self {
        Self {
            delta_allowance,
            ..self
        }
    }

    pub fn with_bucket_distance_allowance(self, bucket_distance_allowance: i64) -> Self {
        Self {
            bucket_distance_allowance,
            ..self
        }
    }

    pub fn with_check_pricing_allowance(self, check_pricing_allowance: i64) -> Self {
        Self {
            check_pricing_allowance,
            ..self
        }
    }

    pub fn with_history_capacity(self, history_capacity: usize) -> Self {
        Self {
            history_capacity,
            ..self
        }
    }

    pub fn with_overlap_capacity(self, overlap_capacity: usize) -> Self {
        Self {
            overlap_capacity,
            ..self
        }
    }

    pub fn with_target_spread_in_tick(self, target_spread_in_tick: i32) -> Self {
        Self {
            target_spread_in_tick: Some(target_spread_in_tick),
            ..self
        }
    }

    pub fn with_extrapolation(self, extrapolation: ExtrapolationMode) -> Self {
        Self {
            extrapolation,
            ..self
        }
    }

    pub fn with_theo_interval_swap(self, theo_interval_swap: bool) -> Self {
        Self {
            theo_interval_swap,
            ..self
        }
    }

    /// Check every field is usable by a pricer.
    pub fn validate(&self) -> Result<(), PricerError> {
        let invalid = |reason: &str| Err(PricerError::Config(reason.to_string()));

        if self.conversion_ratio <= 0 {
            return invalid("conversion_ratio must be positive");
        }
        if self.issuer_max_lag_ns < 0 {
            return invalid("issuer_max_lag_ns must not be negative");
        }
        if self.delta_allowance <= 0 {
            return invalid("delta_allowance must be positive");
        }
        if self.bucket_distance_allowance < 0 || self.check_pricing_allowance < 0 {
            return invalid("allowances must not be negative");
        }
        if self.history_capacity == 0 || self.overlap_capacity == 0 {
            return invalid("capacities must be positive");
        }
        if self.target_spread_in_tick.is_some_and(|target| target <= 0) {
            return invalid("target_spread_in_tick must be positive");
        }
        Ok(())
    }

    pub fn validator_params(&self) -> ValidatorParams {
        ValidatorParams {
            deriv_instrument: self.deriv_instrument,
            conversion_ratio: self.conversion_ratio,
            delta_allowance: self.delta_allowance,
            bucket_distance_allowance: self.bucket_distance_allowance,
            check_pricing_allowance: self.check_pricing_allowance,
        }
    }
}
