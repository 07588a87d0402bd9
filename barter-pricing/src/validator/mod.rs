//! Side specific numeric rules that turn observations into accept / reject decisions.
//!
//! A spot increase raises a call price and lowers a put price, so every rule comes in a
//! mirrored pair. [`CallValidator`] and [`PutValidator`] implement the shared
//! [`PriceValidator`] contract and the [`BucketPricer`](crate::pricer::BucketPricer) is generic
//! over it.
//!
//! Fixed-point scales: spots 6dp, derivative prices 3dp, delta and gamma 5dp, conversion ratio
//! 3dp. Only the quadratic inversion in the underlying spot change uses floating point.

use crate::{
    error::PricerError,
    greeks::ObservedGreeks,
    interval::{Interval, IntervalIndex, SpotRange},
    spread_table::{SpreadTable, SpreadTableDetails},
    violation::{PutOrCall, TickDirection, ViolationType},
};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Call side rules: price increases with spot.
pub mod call;

/// Put side rules: price decreases with spot.
pub mod put;

pub use call::CallValidator;
pub use put::PutValidator;

/// Result of a bucket width calculation. All widths have 6 implicit decimal places.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub struct BucketSizeInfo {
    pub adj_delta: i64,
    pub current_bucket_size: i64,
    pub max_bucket_size: i64,
    pub adj_max_bucket_size: i64,
}

/// Quote observation checked against the last trusted (tight) quote.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub struct DerivPriceCheck {
    pub bid: Option<i32>,
    pub ask: Option<i32>,
    pub is_tight: bool,
    pub last_tight_bid: Option<i32>,
    pub last_tight_ask: Option<i32>,
    pub max_bid_since_tight: Option<i32>,
    pub min_ask_since_tight: Option<i32>,
}

/// Derivative price level to extrapolate, with the spot range registered for it (if any).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct TheoLevel {
    pub data: i32,
    pub current: Option<SpotRange>,
}

/// Per-derivative constants shared by both sides.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct ValidatorParams {
    pub deriv_instrument: u64,
    /// Derivative to underlying conversion ratio (3dp).
    pub conversion_ratio: i64,
    /// Per-mille allowance applied to the theoretical max bucket size.
    pub delta_allowance: i64,
    /// Per-mille allowance applied to the distance between buckets.
    pub bucket_distance_allowance: i64,
    /// Per-mille scaling of the extrapolated theoretical bid.
    pub check_pricing_allowance: i64,
}

/// Contract shared by the [`CallValidator`] and [`PutValidator`].
pub trait PriceValidator {
    fn new(params: ValidatorParams, spread_table: Arc<SpreadTable>) -> Self
    where
        Self: Sized;

    fn put_or_call(&self) -> PutOrCall;

    fn params(&self) -> &ValidatorParams;

    fn spread_table(&self) -> &SpreadTable;

    fn target_spread_in_tick(&self) -> Option<i32>;

    /// Set the quote width, in ticks, considered trustworthy.
    fn set_target_spread_in_tick(&mut self, target: Option<i32>);

    /// Theoretical max width of a bucket for price `data` given the current Greeks. Greeks that
    /// are not ready yield an all-zero [`BucketSizeInfo`].
    fn calculate_bucket_size(
        &self,
        greeks: &ObservedGreeks,
        range: SpotRange,
        data: i32,
    ) -> Result<BucketSizeInfo, PricerError>;

    /// Violation reported when a bucket grown at its end (`extend_end`) or begin is too wide.
    fn bucket_size_violation(&self, extend_end: bool) -> ViolationType;

    /// Violation reported when a same-price bucket would be merged downward past its allowance.
    fn begin_extension_violation(&self) -> ViolationType;

    /// Check the `candidate` against an already registered, non-overlapping `neighbour` for
    /// price monotonicity.
    fn validate_price_consistency(&self, candidate: &Interval, neighbour: &Interval)
    -> ViolationType;

    /// Check the gap between `candidate` and `reference` against the number of ticks between
    /// their prices.
    fn validate_bucket_distance(
        &self,
        candidate: &Interval,
        reference: &Interval,
    ) -> Result<ViolationType, PricerError>;

    /// Check a quote against the spot `direction` observed since the last tight quote.
    fn validate_deriv_price(&self, direction: TickDirection, check: &DerivPriceCheck)
    -> ViolationType;

    /// Check `ask` against the theoretical ask at the `settled` spot range, using the
    /// registered buckets around it.
    fn validate_deriv_ask_price(
        &self,
        greeks: &ObservedGreeks,
        settled: Option<SpotRange>,
        ask: Option<i32>,
        index: &IntervalIndex,
    ) -> Result<ViolationType, PricerError>;

    /// Spot shift that moves `reference` (registered at `ref_price`) to `price` under a
    /// constant gamma model. `None` when the inversion has no real solution.
    fn calculate_und_spot_change(
        &self,
        reference: SpotRange,
        ref_price: i32,
        price: i32,
        greeks: &ObservedGreeks,
    ) -> Option<i64>;

    /// Spot shift for a derivative change of `change_in_deriv` starting from `adj_delta`.
    /// `partial` is `gamma * conversion_ratio`. `None` when the inversion has no real solution.
    fn calculate_und_spot_change_from_delta(
        &self,
        adj_delta: i64,
        change_in_deriv: i32,
        greeks: &ObservedGreeks,
        partial: i64,
    ) -> Option<i64>;

    /// Price levels `begin..=end` in strike order, nearest spot first.
    fn adjacent_buckets(&self, begin: i32, end: i32, out: &mut Vec<TheoLevel>);

    fn validate_bucket_size(
        &self,
        greeks: &ObservedGreeks,
        range: SpotRange,
        data: i32,
        extend_end: bool,
    ) -> Result<(ViolationType, BucketSizeInfo), PricerError> {
        if !greeks.is_ready() {
            return Ok((ViolationType::NoViolation, BucketSizeInfo::default()));
        }

        let info = self.calculate_bucket_size(greeks, range, data)?;
        if info.current_bucket_size <= info.adj_max_bucket_size {
            Ok((ViolationType::NoViolation, info))
        } else {
            Ok((self.bucket_size_violation(extend_end), info))
        }
    }
}

/// State and arithmetic common to both sides.
#[derive(Debug, Clone)]
pub(crate) struct ValidatorCore {
    pub(crate) params: ValidatorParams,
    pub(crate) spread_table: Arc<SpreadTable>,
    pub(crate) target_spread: Option<i32>,
}

impl ValidatorCore {
    pub(crate) fn new(params: ValidatorParams, spread_table: Arc<SpreadTable>) -> Self {
        Self {
            params,
            spread_table,
            target_spread: None,
        }
    }

    /// Width of a bucket spanning `price_gap` at `adj_delta`.
    pub(crate) fn bucket_size_info(
        &self,
        range: SpotRange,
        price_gap: i64,
        adj_delta: i64,
        anchor: i64,
    ) -> Result<BucketSizeInfo, PricerError> {
        let max_bucket_size = (price_gap * 100_000 * self.params.conversion_ratio)
            .checked_div(adj_delta)
            .ok_or(PricerError::ZeroAdjustedDelta { spot: anchor })?
            .abs();

        Ok(BucketSizeInfo {
            adj_delta,
            current_bucket_size: range.width(),
            max_bucket_size,
            adj_max_bucket_size: max_bucket_size * self.params.delta_allowance / 1000,
        })
    }

    /// Lower and upper bounds of the gap between buckets `num_ticks` apart.
    pub(crate) fn distance_bounds(
        &self,
        num_ticks: i64,
        candidate: &Interval,
        reference: &Interval,
    ) -> (i64, i64) {
        let allowance = self.params.bucket_distance_allowance;
        let min_distance = ((num_ticks - 1) * 1000 - allowance)
            * candidate.theo_bucket_size.min(reference.theo_bucket_size)
            / 1000;
        let max_distance = ((num_ticks + 1) * 1000 + allowance)
            * candidate.theo_bucket_size.max(reference.theo_bucket_size)
            / 1000;
        (min_distance, max_distance)
    }

    pub(crate) fn ticks(
        &self,
        candidate: &Interval,
        reference: &Interval,
    ) -> Result<(i64, i64), PricerError> {
        Ok((
            i64::from(self.spread_table.price_to_tick(i64::from(candidate.data))?),
            i64::from(self.spread_table.price_to_tick(i64::from(reference.data))?),
        ))
    }

    /// `DOWN_VOL` if `ask` undercuts the theoretical ask `target` ticks above `bid`.
    pub(crate) fn check_ask(
        &self,
        ask: i32,
        bid: i64,
        target: i32,
    ) -> Result<ViolationType, PricerError> {
        let theo_ask = self
            .spread_table
            .tick_to_price(self.spread_table.price_to_tick(bid)? + target)?;

        if ask < theo_ask {
            Ok(ViolationType::DownVol)
        } else {
            Ok(ViolationType::NoViolation)
        }
    }

    /// Theoretical bid `spot_distance` away from a bucket registered at `data`.
    pub(crate) fn theo_bid(&self, data: i32, spot_distance: i64, adj_delta: i64) -> i64 {
        i64::from(data)
            + spot_distance * adj_delta * self.params.check_pricing_allowance
                / (self.params.conversion_ratio * 100_000_000)
    }

    /// [`Self::check_ask`] against `theo_bid` rounded down onto the grid of `details`.
    pub(crate) fn check_ask_at_theo_bid(
        &self,
        ask: i32,
        theo_bid: i64,
        details: Option<SpreadTableDetails>,
        target: i32,
    ) -> Result<ViolationType, PricerError> {
        let details = details.ok_or(PricerError::PriceOutOfRange { price: theo_bid })?;
        let theo_bid = theo_bid - theo_bid % i64::from(details.spread);
        self.check_ask(ask, theo_bid, target)
    }

    /// First order spot change, `None` when delta is zero.
    pub(crate) fn linear_und_spot_change(
        &self,
        change_in_deriv: i64,
        greeks: &ObservedGreeks,
    ) -> Option<i64> {
        (change_in_deriv * self.params.conversion_ratio * 100_000)
            .checked_div(i64::from(greeks.delta()))
    }

    /// Whether the second order term is material enough to solve the quadratic.
    pub(crate) fn needs_quadratic(
        &self,
        change_in_deriv: i64,
        linear: i64,
        greeks: &ObservedGreeks,
    ) -> bool {
        change_in_deriv != 0 && linear.abs() * i64::from(greeks.gamma()) > 1_000_000
    }
}

/// Root of the constant gamma quadratic, `(-adj ± sqrt(discriminant)) * scale / gamma`.
pub(crate) fn quadratic_root(
    adj_delta: i64,
    discriminant: i64,
    positive_root: bool,
    scale: f64,
    gamma: i32,
) -> Option<i64> {
    if discriminant < 0 {
        return None;
    }

    let root = (discriminant as f64).sqrt();
    let numerator = if positive_root {
        -(adj_delta as f64) + root
    } else {
        -(adj_delta as f64) - root
    };

    ((numerator * scale) as i64).checked_div(i64::from(gamma))
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::greeks::Greeks;

    pub fn params() -> ValidatorParams {
        ValidatorParams {
            deriv_instrument: 12_345,
            conversion_ratio: 10,
            delta_allowance: 1_200,
            bucket_distance_allowance: 100,
            check_pricing_allowance: 950,
        }
    }

    pub fn greeks(delta: i32, gamma: i32, ref_spot: i32) -> ObservedGreeks {
        let mut observed = ObservedGreeks::default();
        observed.merge(
            1,
            Greeks {
                delta,
                gamma,
                ref_spot,
                ..Default::default()
            },
        );
        observed
    }

    pub fn validator<V: PriceValidator>(target: Option<i32>) -> V {
        let mut validator = V::new(params(), Arc::new(SpreadTable::warrant()));
        validator.set_target_spread_in_tick(target);
        validator
    }
}
