use super::{
    BucketSizeInfo, DerivPriceCheck, PriceValidator, TheoLevel, ValidatorCore, ValidatorParams,
    quadratic_root,
};
use crate::{
    error::PricerError,
    greeks::ObservedGreeks,
    interval::{Interval, IntervalIndex, SpotRange},
    spread_table::SpreadTable,
    violation::{PutOrCall, TickDirection, ViolationType},
};
use std::sync::Arc;
use tracing::{debug, warn};

/// [`PriceValidator`] for call warrants, whose price rises with the underlying spot.
///
/// Buckets are anchored at their `begin`: bucket widths use the adjusted delta at `begin` and
/// the next tick up, extrapolation walks down from the lowest settled spot.
#[derive(Debug, Clone)]
pub struct CallValidator {
    core: ValidatorCore,
}

impl PriceValidator for CallValidator {
    fn new(params: ValidatorParams, spread_table: Arc<SpreadTable>) -> Self {
        Self {
            core: ValidatorCore::new(params, spread_table),
        }
    }

    fn put_or_call(&self) -> PutOrCall {
        PutOrCall::Call
    }

    fn params(&self) -> &ValidatorParams {
        &self.core.params
    }

    fn spread_table(&self) -> &SpreadTable {
        &self.core.spread_table
    }

    fn target_spread_in_tick(&self) -> Option<i32> {
        self.core.target_spread
    }

    fn set_target_spread_in_tick(&mut self, target: Option<i32>) {
        self.core.target_spread = target;
    }

    fn calculate_bucket_size(
        &self,
        greeks: &ObservedGreeks,
        range: SpotRange,
        data: i32,
    ) -> Result<BucketSizeInfo, PricerError> {
        if !greeks.is_ready() {
            return Ok(BucketSizeInfo::default());
        }

        let tick_size = self.core.spread_table.price_to_tick_size(i64::from(data))?;
        let adj_delta = greeks.calculate_adj_delta(range.begin);
        self.core
            .bucket_size_info(range, i64::from(tick_size), adj_delta, range.begin)
    }

    fn bucket_size_violation(&self, extend_end: bool) -> ViolationType {
        if extend_end {
            ViolationType::DownVol
        } else {
            ViolationType::UpVol
        }
    }

    fn begin_extension_violation(&self) -> ViolationType {
        ViolationType::UpVol
    }

    fn validate_price_consistency(
        &self,
        candidate: &Interval,
        neighbour: &Interval,
    ) -> ViolationType {
        if neighbour.begin < candidate.begin
            && neighbour.end_exclusive < candidate.end_exclusive
            && neighbour.data > candidate.data
        {
            warn!(
                deriv = self.core.params.deriv_instrument,
                %neighbour,
                %candidate,
                "Down vol for call - interval up, data down"
            );
            return ViolationType::DownVol;
        }

        if neighbour.begin > candidate.begin
            && neighbour.end_exclusive > candidate.end_exclusive
            && neighbour.data < candidate.data
        {
            warn!(
                deriv = self.core.params.deriv_instrument,
                %neighbour,
                %candidate,
                "Up vol for call - interval down, data up"
            );
            return ViolationType::UpVol;
        }

        ViolationType::NoViolation
    }

    fn validate_bucket_distance(
        &self,
        candidate: &Interval,
        reference: &Interval,
    ) -> Result<ViolationType, PricerError> {
        let (tick, ref_tick) = self.core.ticks(candidate, reference)?;

        if reference.data < candidate.data {
            let (min_distance, max_distance) =
                self.core.distance_bounds(tick - ref_tick, candidate, reference);

            if candidate.begin - reference.end_exclusive < min_distance {
                debug!(
                    deriv = self.core.params.deriv_instrument,
                    data = candidate.data,
                    ref_data = reference.data,
                    begin = candidate.begin,
                    ref_end = reference.end_exclusive,
                    min_distance,
                    "candidate begins too close above the reference"
                );
                return Ok(ViolationType::UpVol);
            }
            if candidate.end_exclusive - reference.begin > max_distance {
                return Ok(ViolationType::DownVol);
            }
        } else if reference.data > candidate.data {
            let (min_distance, max_distance) =
                self.core.distance_bounds(ref_tick - tick, candidate, reference);

            if reference.begin - candidate.end_exclusive < min_distance {
                debug!(
                    deriv = self.core.params.deriv_instrument,
                    data = candidate.data,
                    ref_data = reference.data,
                    ref_begin = reference.begin,
                    end = candidate.end_exclusive,
                    min_distance,
                    "candidate ends too close below the reference"
                );
                return Ok(ViolationType::DownVol);
            }
            if reference.end_exclusive - candidate.begin > max_distance {
                return Ok(ViolationType::UpVol);
            }
        }

        Ok(ViolationType::NoViolation)
    }

    fn validate_deriv_price(
        &self,
        direction: TickDirection,
        check: &DerivPriceCheck,
    ) -> ViolationType {
        let has_bid = check.bid.is_some();

        if check.is_tight && has_bid && check.bid != check.last_tight_bid {
            if !direction.is_up() && check.bid > check.last_tight_bid {
                return ViolationType::UpVol;
            }
            if !direction.is_down() && check.bid < check.last_tight_bid {
                return ViolationType::DownVol;
            }
        } else {
            if !direction.is_up() && has_bid && check.bid >= check.last_tight_ask {
                return ViolationType::UpVol;
            }
            if !direction.is_down() && check.ask.is_some() && check.ask <= check.last_tight_bid {
                return ViolationType::DownVol;
            }
        }

        ViolationType::NoViolation
    }

    fn validate_deriv_ask_price(
        &self,
        greeks: &ObservedGreeks,
        settled: Option<SpotRange>,
        ask: Option<i32>,
        index: &IntervalIndex,
    ) -> Result<ViolationType, PricerError> {
        let (Some(settled), Some(target), Some(ask)) = (settled, self.core.target_spread, ask)
        else {
            return Ok(ViolationType::NoViolation);
        };
        if !greeks.is_ready() {
            return Ok(ViolationType::NoViolation);
        }

        let min_spot = settled.begin;
        let mut cursor = index.search_exact_and_iterate(min_spot + 1);

        if let Some(interval) = cursor.next() {
            if interval.contains(min_spot) {
                return self.core.check_ask(ask, i64::from(interval.data), target);
            }
            cursor.prev();
        }

        let Some(interval) = cursor.prev() else {
            return Ok(ViolationType::NoViolation);
        };
        if interval.contains(min_spot) {
            return self.core.check_ask(ask, i64::from(interval.data), target);
        }

        let theo_bid = self.core.theo_bid(
            interval.data,
            min_spot - interval.begin,
            greeks.calculate_adj_delta(interval.begin),
        );
        let mut details = self.core.spread_table.details_at_price(theo_bid);
        if min_spot > interval.begin {
            let result = self.core.check_ask_at_theo_bid(ask, theo_bid, details, target)?;
            if result.is_violation() {
                return Ok(result);
            }
        }

        while let Some(interval) = cursor.prev() {
            if min_spot <= interval.begin {
                continue;
            }

            let theo_bid = self.core.theo_bid(
                interval.data,
                min_spot - interval.begin,
                greeks.calculate_adj_delta(interval.begin),
            );
            let current = details.ok_or(PricerError::PriceOutOfRange { price: theo_bid })?;
            if theo_bid < i64::from(current.from_price) {
                details = self.core.spread_table.details_at_price(theo_bid);
            }

            let result = self.core.check_ask_at_theo_bid(ask, theo_bid, details, target)?;
            if result.is_violation() {
                return Ok(result);
            }
        }

        Ok(ViolationType::NoViolation)
    }

    fn calculate_und_spot_change(
        &self,
        reference: SpotRange,
        ref_price: i32,
        price: i32,
        greeks: &ObservedGreeks,
    ) -> Option<i64> {
        let change_in_deriv = i64::from(price) - i64::from(ref_price);
        let linear = self.core.linear_und_spot_change(change_in_deriv, greeks)?;
        if greeks.gamma() == 0 {
            return Some(linear);
        }
        if !self.core.needs_quadratic(change_in_deriv, linear, greeks) {
            return Some(0);
        }

        let adj_delta = greeks.calculate_adj_delta(reference.begin);
        let discriminant = adj_delta * adj_delta
            + 2 * i64::from(greeks.gamma()) * self.core.params.conversion_ratio * change_in_deriv
                / 10;
        quadratic_root(adj_delta, discriminant, true, 1_000_000.0, greeks.gamma())
    }

    fn calculate_und_spot_change_from_delta(
        &self,
        adj_delta: i64,
        change_in_deriv: i32,
        greeks: &ObservedGreeks,
        partial: i64,
    ) -> Option<i64> {
        let change_in_deriv = i64::from(change_in_deriv);
        let linear = self.core.linear_und_spot_change(change_in_deriv, greeks)?;
        if greeks.gamma() == 0 {
            return Some(linear);
        }
        if !self.core.needs_quadratic(change_in_deriv, linear, greeks) {
            return Some(0);
        }

        let discriminant = adj_delta * adj_delta + partial * change_in_deriv / 5000;
        quadratic_root(adj_delta, discriminant, true, 1_000_000_000.0, greeks.gamma())
    }

    fn adjacent_buckets(&self, begin: i32, end: i32, out: &mut Vec<TheoLevel>) {
        out.clear();
        out.extend((begin..=end).map(|data| TheoLevel::new(data, None)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::test_utils::{greeks, validator};

    fn iv(begin: i64, end_exclusive: i64, data: i32, theo_bucket_size: i64) -> Interval {
        Interval::new(begin, end_exclusive, data, theo_bucket_size)
    }

    #[test]
    fn test_validate_price_consistency() {
        struct TestCase {
            candidate: Interval,
            neighbour: Interval,
            expected: ViolationType,
        }

        let tests = vec![
            TestCase {
                // TC0: lower spot with lower price is consistent
                candidate: iv(200, 210, 101, 10),
                neighbour: iv(100, 110, 100, 10),
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC1: lower spot with higher price
                candidate: iv(200, 210, 101, 10),
                neighbour: iv(100, 110, 102, 10),
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC2: higher spot with lower price
                candidate: iv(200, 210, 101, 10),
                neighbour: iv(300, 310, 100, 10),
                expected: ViolationType::UpVol,
            },
            TestCase {
                // TC3: higher spot with higher price is consistent
                candidate: iv(200, 210, 101, 10),
                neighbour: iv(300, 310, 102, 10),
                expected: ViolationType::NoViolation,
            },
        ];

        let validator = validator::<CallValidator>(Some(1));
        for (index, test) in tests.into_iter().enumerate() {
            let actual = validator.validate_price_consistency(&test.candidate, &test.neighbour);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_validate_bucket_distance() {
        struct TestCase {
            candidate: Interval,
            reference: Interval,
            expected: ViolationType,
        }

        let tests = vec![
            TestCase {
                // TC0: one tick above, adjacent buckets
                candidate: iv(1_010, 1_020, 101, 10),
                reference: iv(1_000, 1_010, 100, 10),
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC1: two ticks above but touching the reference
                candidate: iv(1_010, 1_020, 102, 10),
                reference: iv(1_000, 1_010, 100, 10),
                expected: ViolationType::UpVol,
            },
            TestCase {
                // TC2: one tick above but far away
                candidate: iv(1_050, 1_060, 101, 10),
                reference: iv(1_000, 1_010, 100, 10),
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC3: two ticks below but touching the reference
                candidate: iv(990, 1_000, 100, 10),
                reference: iv(1_000, 1_010, 102, 10),
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC4: one tick below but far away
                candidate: iv(940, 950, 100, 10),
                reference: iv(1_000, 1_010, 101, 10),
                expected: ViolationType::UpVol,
            },
            TestCase {
                // TC5: same price is never checked
                candidate: iv(0, 10, 100, 10),
                reference: iv(1_000, 1_010, 100, 10),
                expected: ViolationType::NoViolation,
            },
        ];

        let validator = validator::<CallValidator>(Some(1));
        for (index, test) in tests.into_iter().enumerate() {
            let actual = validator
                .validate_bucket_distance(&test.candidate, &test.reference)
                .unwrap();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_validate_bucket_size() {
        struct TestCase {
            range: SpotRange,
            extend_end: bool,
            expected: ViolationType,
        }

        let tests = vec![
            TestCase {
                // TC0: single spot bucket
                range: SpotRange::new(11_650_000, 11_650_001),
                extend_end: true,
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC1: bucket at the allowance
                range: SpotRange::new(11_650_000, 11_650_026),
                extend_end: true,
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC2: bucket grown at its end past the allowance
                range: SpotRange::new(11_650_000, 11_650_027),
                extend_end: true,
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC3: bucket grown at its begin past the allowance
                range: SpotRange::new(11_650_000, 11_650_027),
                extend_end: false,
                expected: ViolationType::UpVol,
            },
        ];

        let validator = validator::<CallValidator>(Some(1));
        let greeks = greeks(45_229, 12_411, 11_650);
        for (index, test) in tests.into_iter().enumerate() {
            let (actual, info) = validator
                .validate_bucket_size(&greeks, test.range, 100, test.extend_end)
                .unwrap();
            assert_eq!(actual, test.expected, "TC{} failed", index);
            assert_eq!(info.max_bucket_size, 22, "TC{} failed", index);
            assert_eq!(info.adj_max_bucket_size, 26, "TC{} failed", index);
        }
    }

    #[test]
    fn test_accepted_bucket_size_within_calculated_max() {
        let validator = validator::<CallValidator>(Some(1));
        let greeks = greeks(45_229, 12_411, 11_650);

        for width in 1..=40 {
            let range = SpotRange::new(11_650_000, 11_650_000 + width);
            for extend_end in [true, false] {
                let (violation, _) = validator
                    .validate_bucket_size(&greeks, range, 100, extend_end)
                    .unwrap();
                if violation != ViolationType::NoViolation {
                    continue;
                }

                let info = validator.calculate_bucket_size(&greeks, range, 100).unwrap();
                assert!(
                    info.adj_max_bucket_size >= width,
                    "width {width} accepted beyond {}",
                    info.adj_max_bucket_size
                );
            }
        }
    }

    #[test]
    fn test_validate_deriv_price() {
        struct TestCase {
            direction: TickDirection,
            check: DerivPriceCheck,
            expected: ViolationType,
        }

        let base = DerivPriceCheck {
            bid: Some(100),
            ask: Some(101),
            is_tight: true,
            last_tight_bid: Some(100),
            last_tight_ask: Some(101),
            max_bid_since_tight: Some(100),
            min_ask_since_tight: Some(101),
        };

        let tests = vec![
            TestCase {
                // TC0: tight bid up after spot up
                direction: TickDirection::UP,
                check: DerivPriceCheck {
                    bid: Some(101),
                    ask: Some(102),
                    ..base
                },
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC1: tight bid up without spot up
                direction: TickDirection::DOWN,
                check: DerivPriceCheck {
                    bid: Some(101),
                    ask: Some(102),
                    ..base
                },
                expected: ViolationType::UpVol,
            },
            TestCase {
                // TC2: tight bid down without spot down
                direction: TickDirection::UNKNOWN,
                check: DerivPriceCheck {
                    bid: Some(99),
                    ask: Some(100),
                    ..base
                },
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC3: wide quote crossing the last tight ask without spot up
                direction: TickDirection::UNKNOWN,
                check: DerivPriceCheck {
                    bid: Some(101),
                    ask: Some(104),
                    is_tight: false,
                    ..base
                },
                expected: ViolationType::UpVol,
            },
            TestCase {
                // TC4: wide quote crossing the last tight bid without spot down
                direction: TickDirection::UP,
                check: DerivPriceCheck {
                    bid: None,
                    ask: Some(100),
                    is_tight: false,
                    ..base
                },
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC5: unchanged tight quote
                direction: TickDirection::UNKNOWN,
                check: base,
                expected: ViolationType::NoViolation,
            },
        ];

        let validator = validator::<CallValidator>(Some(1));
        for (index, test) in tests.into_iter().enumerate() {
            let actual = validator.validate_deriv_price(test.direction, &test.check);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_validate_deriv_ask_price() {
        struct TestCase {
            settled: Option<SpotRange>,
            ask: Option<i32>,
            expected: ViolationType,
        }

        let mut index = IntervalIndex::default();
        index
            .insert_unchecked(iv(11_650_000, 11_650_022, 100, 22))
            .unwrap();
        index
            .insert_unchecked(iv(11_650_022, 11_650_044, 101, 22))
            .unwrap();

        let tests = vec![
            TestCase {
                // TC0: ask one tick above the containing bucket
                settled: Some(SpotRange::new(11_650_030, 11_650_031)),
                ask: Some(102),
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC1: ask at the containing bucket price
                settled: Some(SpotRange::new(11_650_030, 11_650_031)),
                ask: Some(101),
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC2: spot above every bucket extrapolates from the highest one
                settled: Some(SpotRange::new(11_650_100, 11_650_101)),
                ask: Some(101),
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC3: no settled range
                settled: None,
                ask: Some(1),
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC4: no ask
                settled: Some(SpotRange::new(11_650_030, 11_650_031)),
                ask: None,
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC5: spot below every bucket
                settled: Some(SpotRange::new(11_640_000, 11_640_001)),
                ask: Some(10),
                expected: ViolationType::NoViolation,
            },
        ];

        let validator = validator::<CallValidator>(Some(1));
        let greeks = greeks(45_229, 12_411, 11_650);
        for (index_tc, test) in tests.into_iter().enumerate() {
            let actual = validator
                .validate_deriv_ask_price(&greeks, test.settled, test.ask, &index)
                .unwrap();
            assert_eq!(actual, test.expected, "TC{} failed", index_tc);
        }
    }

    #[test]
    fn test_calculate_und_spot_change() {
        struct TestCase {
            greeks: ObservedGreeks,
            price: i32,
            expected: Option<i64>,
        }

        let reference = SpotRange::new(11_650_000, 11_650_022);

        let tests = vec![
            TestCase {
                // TC0: no change in price
                greeks: greeks(45_229, 12_411, 11_650),
                price: 100,
                expected: Some(0),
            },
            TestCase {
                // TC1: zero gamma is linear
                greeks: greeks(50_000, 0, 11_650),
                price: 101,
                expected: Some(20),
            },
            TestCase {
                // TC2: zero delta has no solution
                greeks: greeks(0, 12_411, 11_650),
                price: 101,
                expected: None,
            },
            TestCase {
                // TC3: small linear change ignores gamma
                greeks: greeks(45_229, 12_411, 11_650),
                price: 101,
                expected: Some(0),
            },
        ];

        let validator = validator::<CallValidator>(Some(1));
        for (index, test) in tests.into_iter().enumerate() {
            let actual =
                validator.calculate_und_spot_change(reference, 100, test.price, &test.greeks);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_calculate_und_spot_change_quadratic() {
        let validator = validator::<CallValidator>(Some(1));
        let greeks = greeks(45_229, 12_411, 11_650);
        let reference = SpotRange::new(11_650_000, 11_650_022);

        let up = validator
            .calculate_und_spot_change(reference, 100, 200, &greeks)
            .unwrap();
        let down = validator
            .calculate_und_spot_change(reference, 100, 50, &greeks)
            .unwrap();

        assert!(up > 0);
        assert!(down < 0);
    }

    #[test]
    fn test_adjacent_buckets_ascend() {
        let validator = validator::<CallValidator>(Some(1));
        let mut levels = vec![TheoLevel::new(1, None)];
        validator.adjacent_buckets(98, 102, &mut levels);

        let actual = levels.iter().map(|level| level.data).collect::<Vec<_>>();
        assert_eq!(actual, vec![98, 99, 100, 101, 102]);
    }
}
