use crate::{
    error::PricerError,
    greeks::ObservedGreeks,
    interval::{Interval, IntervalIndex, SpotRange},
    validator::{BucketSizeInfo, PriceValidator, TheoLevel},
    violation::ViolationType,
};
use tracing::{debug, error, warn};

/// Lowest derivative price a theo bucket is extrapolated for.
pub const MIN_THEO_PRICE: i32 = 10;

/// Highest derivative price a theo bucket is extrapolated for.
pub const MAX_THEO_PRICE: i32 = 250;

/// Number of price levels extrapolated on each side of the bid.
pub const THEO_LEVELS: i32 = 2;

/// Buckets further than `ref_spot / MAX_ACCEPTABLE_DISTANCE_FROM_REF_SPOT_PERCENT` from the
/// Greeks' reference spot are too far away to extrapolate from.
pub const MAX_ACCEPTABLE_DISTANCE_FROM_REF_SPOT_PERCENT: i64 = 100;

/// Builds the theoretical buckets of the levels around a bid from the registered buckets and
/// the Greeks.
///
/// Buffers are reused between builds.
#[derive(Debug, Clone)]
pub struct TheoIntervalBuilder {
    levels: Vec<TheoLevel>,
    extras: Vec<Interval>,
}

impl Default for TheoIntervalBuilder {
    fn default() -> Self {
        Self {
            levels: Vec::with_capacity(2 * THEO_LEVELS as usize + 1),
            extras: Vec::new(),
        }
    }
}

impl TheoIntervalBuilder {
    /// Fill `out` with one bucket per price level within [`THEO_LEVELS`] of `bid`, plus every
    /// registered bucket priced outside those levels.
    ///
    /// `out` is left empty when there is not enough information to extrapolate. A
    /// [`ViolationType::PriceOverlapped`] means the extrapolated buckets collide and `out` must
    /// be discarded.
    pub fn build<V>(
        &mut self,
        validator: &V,
        greeks: &ObservedGreeks,
        bid: i32,
        observed: &IntervalIndex,
        out: &mut IntervalIndex,
    ) -> Result<ViolationType, PricerError>
    where
        V: PriceValidator,
    {
        out.clear();
        if bid - THEO_LEVELS > MAX_THEO_PRICE
            || !(greeks.has_ref_spot() && greeks.has_delta())
            || observed.len() <= 1
        {
            return Ok(ViolationType::NoViolation);
        }

        validator.adjacent_buckets(
            (bid - THEO_LEVELS).max(MIN_THEO_PRICE),
            (bid + THEO_LEVELS).min(MAX_THEO_PRICE),
            &mut self.levels,
        );
        self.extras.clear();

        let partial = i64::from(greeks.gamma()) * validator.params().conversion_ratio;
        let Some(bounds) = self.collect(validator, greeks, bid, observed, partial) else {
            return Ok(ViolationType::NoViolation);
        };

        let adj_begin = greeks.calculate_adj_delta(bounds.begin);
        let adj_end = greeks.calculate_adj_delta(bounds.end_exclusive);
        let mut prev_end: Option<i64> = None;
        let mut covered: Option<SpotRange> = None;

        for level in &self.levels {
            let change_in_deriv = level.data - bid;
            let begin_change = validator.calculate_und_spot_change_from_delta(
                adj_begin,
                change_in_deriv,
                greeks,
                partial,
            );
            let end_change = validator.calculate_und_spot_change_from_delta(
                adj_end,
                change_in_deriv,
                greeks,
                partial,
            );

            let range = match (begin_change, end_change, level.current) {
                (Some(begin_change), Some(end_change), current) => widen(
                    current,
                    SpotRange::new(
                        bounds.begin + begin_change,
                        bounds.end_exclusive + end_change,
                    ),
                ),
                (_, _, Some(current)) => current,
                (_, _, None) => {
                    debug!(
                        data = level.data,
                        bid,
                        "Theo interval has neither a solution nor a registered bucket"
                    );
                    out.clear();
                    return Ok(ViolationType::NoViolation);
                }
            };

            if prev_end.is_some_and(|prev_end| range.begin < prev_end) {
                return Ok(ViolationType::PriceOverlapped);
            }
            prev_end = Some(range.end_exclusive);
            covered = Some(widen(covered, range));

            let theo_bucket_size = validator
                .calculate_bucket_size(greeks, range, level.data)
                .unwrap_or_else(|error| {
                    warn!(data = level.data, %error, "Failed to size theo interval");
                    BucketSizeInfo::default()
                })
                .max_bucket_size;

            let interval =
                Interval::new(range.begin, range.end_exclusive, level.data, theo_bucket_size);
            if let Err(error) = out.insert_unchecked(interval) {
                error!(%interval, %error, "Failed to add theo interval");
                out.clear();
                return Ok(ViolationType::NoViolation);
            }
        }

        for extra in &self.extras {
            if covered.is_some_and(|covered| covered.overlaps(&extra.range())) {
                return Ok(ViolationType::PriceOverlapped);
            }
            out.insert_unchecked(*extra)?;
        }

        Ok(ViolationType::NoViolation)
    }

    /// Shift every registered bucket priced at a level onto the bid and return the union of
    /// the shifted buckets with the bid's own bucket. `None` if no level bucket could be
    /// shifted.
    fn collect<V>(
        &mut self,
        validator: &V,
        greeks: &ObservedGreeks,
        bid: i32,
        observed: &IntervalIndex,
        partial: i64,
    ) -> Option<SpotRange>
    where
        V: PriceValidator,
    {
        let ref_spot = 1000 * i64::from(greeks.ref_spot());
        let mut bounds = None;
        let mut sufficient = false;
        let mut next_level = 0;

        for interval in observed.iter() {
            if interval.data == bid {
                bounds = Some(widen(bounds, interval.range()));
                continue;
            }

            let Some(offset) = self.levels[next_level..]
                .iter()
                .position(|level| level.data == interval.data)
            else {
                self.extras.push(interval);
                continue;
            };
            let level = &mut self.levels[next_level + offset];
            next_level += offset + 1;

            if !is_near_ref_spot(ref_spot, interval.range()) {
                continue;
            }

            let change_in_deriv = bid - interval.data;
            let begin_change = validator.calculate_und_spot_change_from_delta(
                greeks.calculate_adj_delta(interval.begin),
                change_in_deriv,
                greeks,
                partial,
            );
            let end_change = validator.calculate_und_spot_change_from_delta(
                greeks.calculate_adj_delta(interval.end_exclusive),
                change_in_deriv,
                greeks,
                partial,
            );
            let (Some(begin_change), Some(end_change)) = (begin_change, end_change) else {
                continue;
            };

            bounds = Some(widen(
                bounds,
                SpotRange::new(
                    interval.begin + begin_change,
                    interval.end_exclusive + end_change,
                ),
            ));
            level.current = Some(interval.range());
            sufficient = true;
        }

        bounds.filter(|_| sufficient)
    }
}

fn is_near_ref_spot(ref_spot: i64, range: SpotRange) -> bool {
    let distance = (range.begin - ref_spot)
        .abs()
        .max((range.end_exclusive - ref_spot).abs());

    ref_spot
        .checked_div(distance)
        .is_none_or(|ratio| ratio >= MAX_ACCEPTABLE_DISTANCE_FROM_REF_SPOT_PERCENT)
}

fn widen(bounds: Option<SpotRange>, range: SpotRange) -> SpotRange {
    match bounds {
        Some(bounds) => SpotRange::new(
            bounds.begin.min(range.begin),
            bounds.end_exclusive.max(range.end_exclusive),
        ),
        None => range,
    }
}
