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

/// [`PriceValidator`] for put warrants, whose price falls as the underlying spot rises.
///
/// Buckets are anchored at their `end_exclusive`: bucket widths use the adjusted delta at the
/// end and the previous tick down, extrapolation walks up from the highest settled spot.
#[derive(Debug, Clone)]
pub struct PutValidator {
    core: ValidatorCore,
}

impl PriceValidator for PutValidator {
    fn new(params: ValidatorParams, spread_table: Arc<SpreadTable>) -> Self {
        Self {
            core: ValidatorCore::new(params, spread_table),
        }
    }

    fn put_or_call(&self) -> PutOrCall {
        PutOrCall::Put
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

        let spread_table = &self.core.spread_table;
        let tick = spread_table.price_to_tick(i64::from(data))?;
        let price_gap = if tick > 1 {
            i64::from(data) - i64::from(spread_table.tick_to_price(tick - 1)?)
        } else {
            // Lowest price on the grid has no previous tick
            i64::from(spread_table.price_to_tick_size(i64::from(data))?)
        };
        let adj_delta = greeks.calculate_adj_delta(range.end_exclusive);
        self.core
            .bucket_size_info(range, price_gap, adj_delta, range.end_exclusive)
    }

    fn bucket_size_violation(&self, extend_end: bool) -> ViolationType {
        if extend_end {
            ViolationType::UpVol
        } else {
            ViolationType::DownVol
        }
    }

    fn begin_extension_violation(&self) -> ViolationType {
        ViolationType::DownVol
    }

    fn validate_price_consistency(
        &self,
        candidate: &Interval,
        neighbour: &Interval,
    ) -> ViolationType {
        if neighbour.begin < candidate.begin
            && neighbour.end_exclusive < candidate.end_exclusive
            && neighbour.data < candidate.data
        {
            warn!(
                deriv = self.core.params.deriv_instrument,
                %neighbour,
                %candidate,
                "Up vol for put - interval up, data up"
            );
            return ViolationType::UpVol;
        }

        if neighbour.begin > candidate.begin
            && neighbour.end_exclusive > candidate.end_exclusive
            && neighbour.data > candidate.data
        {
            warn!(
                deriv = self.core.params.deriv_instrument,
                %neighbour,
                %candidate,
                "Down vol for put - interval down, data down"
            );
            return ViolationType::DownVol;
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
                return Ok(ViolationType::UpVol);
            }
            if reference.end_exclusive - candidate.begin > max_distance {
                return Ok(ViolationType::DownVol);
            }
        } else if reference.data > candidate.data {
            let (min_distance, max_distance) =
                self.core.distance_bounds(ref_tick - tick, candidate, reference);

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
                return Ok(ViolationType::DownVol);
            }
            if candidate.end_exclusive - reference.begin > max_distance {
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
            if !direction.is_up() && check.bid < check.last_tight_bid {
                return ViolationType::DownVol;
            }
            if !direction.is_down() && check.bid > check.last_tight_bid {
                return ViolationType::UpVol;
            }
        } else {
            if !direction.is_up() && check.ask.is_some() && check.ask <= check.last_tight_bid {
                return ViolationType::DownVol;
            }
            if !direction.is_down() && has_bid && check.bid >= check.last_tight_ask {
                return ViolationType::UpVol;
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

        let max_spot = settled.end_exclusive;
        let mut cursor = index.search_exact_and_iterate(max_spot - 1);

        let Some(interval) = cursor.next() else {
            return Ok(ViolationType::NoViolation);
        };
        if max_spot >= interval.begin && max_spot <= interval.end_exclusive {
            return self.core.check_ask(ask, i64::from(interval.data), target);
        }

        let theo_bid = self.core.theo_bid(
            interval.data,
            max_spot - interval.end_exclusive,
            greeks.calculate_adj_delta(interval.end_exclusive),
        );
        if max_spot < interval.end_exclusive {
            let details = self.core.spread_table.details_at_price(theo_bid);
            let result = self.core.check_ask_at_theo_bid(ask, theo_bid, details, target)?;
            if result.is_violation() {
                return Ok(result);
            }
        }

        while let Some(interval) = cursor.next() {
            if max_spot >= interval.end_exclusive {
                continue;
            }

            let theo_bid = self.core.theo_bid(
                interval.data,
                max_spot - interval.end_exclusive,
                greeks.calculate_adj_delta(interval.end_exclusive),
            );
            let details = self.core.spread_table.details_at_price(theo_bid);
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

        let adj_delta = greeks.calculate_adj_delta(reference.end_exclusive);
        let discriminant = adj_delta * adj_delta
            + 2 * i64::from(greeks.gamma()) * self.core.params.conversion_ratio * change_in_deriv
                / 10;
        quadratic_root(adj_delta, discriminant, false, 1_000_000.0, greeks.gamma())
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
        quadratic_root(adj_delta, discriminant, false, 1_000_000_000.0, greeks.gamma())
    }

    fn adjacent_buckets(&self, begin: i32, end: i32, out: &mut Vec<TheoLevel>) {
        out.clear();
        out.extend((begin..=end).rev().map(|data| TheoLevel::new(data, None)));
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
                // TC0: lower spot with lower price
                candidate: iv(200, 210, 101, 10),
                neighbour: iv(100, 110, 100, 10),
                expected: ViolationType::UpVol,
            },
            TestCase {
                // TC1: lower spot with higher price is consistent
                candidate: iv(200, 210, 101, 10),
                neighbour: iv(100, 110, 102, 10),
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC2: higher spot with higher price
                candidate: iv(200, 210, 101, 10),
                neighbour: iv(300, 310, 102, 10),
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC3: higher spot with lower price is consistent
                candidate: iv(200, 210, 101, 10),
                neighbour: iv(300, 310, 100, 10),
                expected: ViolationType::NoViolation,
            },
        ];

        let validator = validator::<PutValidator>(Some(1));
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
                // TC0: one tick above, adjacent buckets below the reference
                candidate: iv(1_000, 1_010, 101, 10),
                reference: iv(1_010, 1_020, 100, 10),
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC1: two ticks above but touching the reference
                candidate: iv(1_000, 1_010, 102, 10),
                reference: iv(1_010, 1_020, 100, 10),
                expected: ViolationType::UpVol,
            },
            TestCase {
                // TC2: one tick above but far away
                candidate: iv(950, 960, 101, 10),
                reference: iv(1_010, 1_020, 100, 10),
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC3: two ticks below but touching the reference
                candidate: iv(1_010, 1_020, 100, 10),
                reference: iv(1_000, 1_010, 102, 10),
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC4: one tick below but far away
                candidate: iv(1_060, 1_070, 100, 10),
                reference: iv(1_000, 1_010, 101, 10),
                expected: ViolationType::UpVol,
            },
        ];

        let validator = validator::<PutValidator>(Some(1));
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
            data: i32,
            extend_end: bool,
            expected: ViolationType,
        }

        let tests = vec![
            TestCase {
                // TC0: single spot bucket
                range: SpotRange::new(11_650_000, 11_650_001),
                data: 100,
                extend_end: true,
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC1: bucket grown at its end past the allowance
                range: SpotRange::new(11_650_000, 11_650_027),
                data: 100,
                extend_end: true,
                expected: ViolationType::UpVol,
            },
            TestCase {
                // TC2: bucket grown at its begin past the allowance
                range: SpotRange::new(11_650_000, 11_650_027),
                data: 100,
                extend_end: false,
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC3: lowest price on the grid steps by its tick size
                range: SpotRange::new(11_650_000, 11_650_001),
                data: 10,
                extend_end: true,
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC4: lowest price on the grid still bounds the width
                range: SpotRange::new(11_650_000, 11_650_027),
                data: 10,
                extend_end: true,
                expected: ViolationType::UpVol,
            },
        ];

        let validator = validator::<PutValidator>(Some(1));
        let greeks = greeks(-45_229, 12_411, 11_650);
        for (index, test) in tests.into_iter().enumerate() {
            let (actual, info) = validator
                .validate_bucket_size(&greeks, test.range, test.data, test.extend_end)
                .unwrap();
            assert_eq!(actual, test.expected, "TC{} failed", index);
            assert_eq!(info.max_bucket_size, 22, "TC{} failed", index);
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
                // TC0: tight bid up after spot down
                direction: TickDirection::DOWN,
                check: DerivPriceCheck {
                    bid: Some(101),
                    ask: Some(102),
                    ..base
                },
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC1: tight bid up after spot up
                direction: TickDirection::UP,
                check: DerivPriceCheck {
                    bid: Some(101),
                    ask: Some(102),
                    ..base
                },
                expected: ViolationType::UpVol,
            },
            TestCase {
                // TC2: tight bid down after spot up
                direction: TickDirection::UP,
                check: DerivPriceCheck {
                    bid: Some(99),
                    ask: Some(100),
                    ..base
                },
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC3: tight bid down without spot movement
                direction: TickDirection::UNKNOWN,
                check: DerivPriceCheck {
                    bid: Some(99),
                    ask: Some(100),
                    ..base
                },
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC4: wide quote crossing the last tight bid without spot up
                direction: TickDirection::UNKNOWN,
                check: DerivPriceCheck {
                    bid: None,
                    ask: Some(100),
                    is_tight: false,
                    ..base
                },
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC5: wide quote crossing the last tight ask after spot down
                direction: TickDirection::DOWN,
                check: DerivPriceCheck {
                    bid: Some(101),
                    ask: Some(104),
                    is_tight: false,
                    ..base
                },
                expected: ViolationType::NoViolation,
            },
        ];

        let validator = validator::<PutValidator>(Some(1));
        for (index, test) in tests.into_iter().enumerate() {
            let actual = validator.validate_deriv_price(test.direction, &test.check);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_validate_deriv_ask_price() {
        struct TestCase {
            settled: SpotRange,
            ask: i32,
            expected: ViolationType,
        }

        let mut index = IntervalIndex::default();
        index
            .insert_unchecked(iv(11_650_000, 11_650_022, 101, 22))
            .unwrap();
        index
            .insert_unchecked(iv(11_650_022, 11_650_044, 100, 22))
            .unwrap();

        let tests = vec![
            TestCase {
                // TC0: ask one tick above the containing bucket
                settled: SpotRange::new(11_650_010, 11_650_011),
                ask: 102,
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC1: ask at the containing bucket price
                settled: SpotRange::new(11_650_010, 11_650_011),
                ask: 101,
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC2: spot below every bucket extrapolates a higher theo bid
                settled: SpotRange::new(11_649_900, 11_649_901),
                ask: 106,
                expected: ViolationType::DownVol,
            },
            TestCase {
                // TC3: ask above every extrapolated theo ask
                settled: SpotRange::new(11_649_900, 11_649_901),
                ask: 107,
                expected: ViolationType::NoViolation,
            },
            TestCase {
                // TC4: spot above every bucket
                settled: SpotRange::new(11_650_100, 11_650_101),
                ask: 10,
                expected: ViolationType::NoViolation,
            },
        ];

        let validator = validator::<PutValidator>(Some(1));
        let greeks = greeks(-45_229, 12_411, 11_650);
        for (index_tc, test) in tests.into_iter().enumerate() {
            let actual = validator
                .validate_deriv_ask_price(&greeks, Some(test.settled), Some(test.ask), &index)
                .unwrap();
            assert_eq!(actual, test.expected, "TC{} failed", index_tc);
        }
    }

    #[test]
    fn test_calculate_und_spot_change() {
        let validator = validator::<PutValidator>(Some(1));
        let greeks = greeks(-45_229, 12_411, 11_650);
        let reference = SpotRange::new(11_650_000, 11_650_022);

        assert_eq!(
            validator.calculate_und_spot_change(reference, 100, 100, &greeks),
            Some(0)
        );

        let up = validator
            .calculate_und_spot_change(reference, 100, 200, &greeks)
            .unwrap();
        let down = validator
            .calculate_und_spot_change(reference, 100, 50, &greeks)
            .unwrap();

        assert!(up < 0, "higher put price is lower spot");
        assert!(down > 0, "lower put price is higher spot");
    }

    #[test]
    fn test_adjacent_buckets_descend() {
        let validator = validator::<PutValidator>(Some(1));
        let mut levels = Vec::new();
        validator.adjacent_buckets(98, 102, &mut levels);

        let actual = levels.iter().map(|level| level.data).collect::<Vec<_>>();
        assert_eq!(actual, vec![102, 101, 100, 99, 98]);
    }
}
