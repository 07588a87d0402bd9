//! Exchange price grid for a derivative: converts between prices and tick levels.
//!
//! Prices are integers with three implicit decimal places. Tick level `1` is the lowest
//! price of the first tier and levels increase by one per grid step across every tier.

use crate::error::PricerError;
use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// One contiguous tier of the price grid: prices in `[from_price, to_price_exclusive)` step
/// by `spread`.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct SpreadTableDetails {
    pub from_price: i32,
    pub to_price_exclusive: i32,
    pub spread: i32,
}

impl SpreadTableDetails {
    fn num_levels(&self) -> i32 {
        (self.to_price_exclusive - self.from_price + self.spread - 1) / self.spread
    }

    fn contains(&self, price: i64) -> bool {
        price >= i64::from(self.from_price) && price < i64::from(self.to_price_exclusive)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Tier {
    details: SpreadTableDetails,
    first_tick: i32,
}

/// Read-only price grid shared by every pricer trading on the same exchange board.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SpreadTable {
    tiers: Vec<Tier>,
    max_tick: i32,
}

impl SpreadTable {
    /// Construct a [`SpreadTable`] from contiguous tiers, rejecting gaps, inverted tiers and
    /// non-positive spreads.
    pub fn new(details: impl IntoIterator<Item = SpreadTableDetails>) -> Result<Self, PricerError> {
        let mut tiers: Vec<Tier> = Vec::new();
        let mut next_tick = 1;

        for detail in details {
            if detail.spread <= 0 || detail.from_price >= detail.to_price_exclusive {
                return Err(PricerError::Config(format!("invalid spread table tier: {detail:?}")));
            }

            if let Some(previous) = tiers.last()
                && previous.details.to_price_exclusive != detail.from_price
            {
                return Err(PricerError::SpreadTableGap {
                    expected: previous.details.to_price_exclusive,
                    found: detail.from_price,
                });
            }

            tiers.push(Tier {
                details: detail,
                first_tick: next_tick,
            });
            next_tick += detail.num_levels();
        }

        if tiers.is_empty() {
            return Err(PricerError::Config("spread table has no tiers".to_string()));
        }

        Ok(Self {
            tiers,
            max_tick: next_tick - 1,
        })
    }

    /// HKEX warrant and CBBC spread table.
    pub fn warrant() -> Self {
        const TIERS: [(i32, i32, i32); 11] = [
            (10, 250, 1),
            (250, 500, 5),
            (500, 10_000, 10),
            (10_000, 20_000, 20),
            (20_000, 100_000, 50),
            (100_000, 200_000, 100),
            (200_000, 500_000, 200),
            (500_000, 1_000_000, 500),
            (1_000_000, 2_000_000, 1_000),
            (2_000_000, 5_000_000, 2_000),
            (5_000_000, 9_995_000, 5_000),
        ];

        let mut first_tick = 1;
        let tiers = TIERS
            .iter()
            .map(|(from, to, spread)| {
                let details = SpreadTableDetails::new(*from, *to, *spread);
                let tier = Tier {
                    details,
                    first_tick,
                };
                first_tick += details.num_levels();
                tier
            })
            .collect();

        Self {
            tiers,
            max_tick: first_tick - 1,
        }
    }

    pub fn max_tick(&self) -> i32 {
        self.max_tick
    }

    fn tier_containing(&self, price: i64) -> Result<&Tier, PricerError> {
        let index = self
            .tiers
            .partition_point(|tier| i64::from(tier.details.from_price) <= price);

        index
            .checked_sub(1)
            .and_then(|index| self.tiers.get(index))
            .filter(|tier| tier.details.contains(price))
            .ok_or(PricerError::PriceOutOfRange { price })
    }

    /// Tick level of a price on the grid.
    pub fn price_to_tick(&self, price: i64) -> Result<i32, PricerError> {
        let tier = self.tier_containing(price)?;
        let offset = price - i64::from(tier.details.from_price);
        let spread = i64::from(tier.details.spread);

        if offset % spread != 0 {
            return Err(PricerError::PriceOutOfRange { price });
        }

        Ok(tier.first_tick + (offset / spread) as i32)
    }

    /// Price of a tick level.
    pub fn tick_to_price(&self, tick: i32) -> Result<i32, PricerError> {
        if tick < 1 || tick > self.max_tick {
            return Err(PricerError::TickOutOfRange { tick });
        }

        let index = self.tiers.partition_point(|tier| tier.first_tick <= tick);
        let tier = &self.tiers[index - 1];

        Ok(tier.details.from_price + (tick - tier.first_tick) * tier.details.spread)
    }

    /// Grid step at a price.
    pub fn price_to_tick_size(&self, price: i64) -> Result<i32, PricerError> {
        self.tier_containing(price).map(|tier| tier.details.spread)
    }

    /// Tier whose `from_price` is the greatest not above `price`. Prices above the last tier
    /// resolve to the last tier.
    pub fn details_at_price(&self, price: i64) -> Option<SpreadTableDetails> {
        let index = self
            .tiers
            .partition_point(|tier| i64::from(tier.details.from_price) <= price);

        index
            .checked_sub(1)
            .map(|index| self.tiers[index].details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_table() -> SpreadTable {
        SpreadTable::new([
            SpreadTableDetails::new(10, 15, 1),
            SpreadTableDetails::new(15, 29, 5),
        ])
        .unwrap()
    }

    #[test]
    fn test_price_to_tick() {
        struct TestCase {
            input: i64,
            expected: Result<i32, PricerError>,
        }

        let tests = vec![
            TestCase {
                // TC0: first price is tick one
                input: 10,
                expected: Ok(1),
            },
            TestCase {
                // TC1: last price of first tier
                input: 14,
                expected: Ok(5),
            },
            TestCase {
                // TC2: first price of second tier
                input: 15,
                expected: Ok(6),
            },
            TestCase {
                // TC3: last price of second tier
                input: 25,
                expected: Ok(8),
            },
            TestCase {
                // TC4: price off the grid
                input: 16,
                expected: Err(PricerError::PriceOutOfRange { price: 16 }),
            },
            TestCase {
                // TC5: price below the grid
                input: 9,
                expected: Err(PricerError::PriceOutOfRange { price: 9 }),
            },
            TestCase {
                // TC6: price at the exclusive top of the grid
                input: 29,
                expected: Err(PricerError::PriceOutOfRange { price: 29 }),
            },
        ];

        let table = small_table();
        for (index, test) in tests.into_iter().enumerate() {
            let actual = table.price_to_tick(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_tick_to_price() {
        struct TestCase {
            input: i32,
            expected: Result<i32, PricerError>,
        }

        let tests = vec![
            TestCase {
                // TC0: tick one
                input: 1,
                expected: Ok(10),
            },
            TestCase {
                // TC1: first tick of second tier
                input: 6,
                expected: Ok(15),
            },
            TestCase {
                // TC2: max tick
                input: 8,
                expected: Ok(25),
            },
            TestCase {
                // TC3: tick zero
                input: 0,
                expected: Err(PricerError::TickOutOfRange { tick: 0 }),
            },
            TestCase {
                // TC4: beyond max tick
                input: 9,
                expected: Err(PricerError::TickOutOfRange { tick: 9 }),
            },
        ];

        let table = small_table();
        assert_eq!(table.max_tick(), 8);
        for (index, test) in tests.into_iter().enumerate() {
            let actual = table.tick_to_price(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_warrant_table() {
        let table = SpreadTable::warrant();

        assert_eq!(table.price_to_tick(10), Ok(1));
        assert_eq!(table.price_to_tick(100), Ok(91));
        assert_eq!(table.tick_to_price(92), Ok(101));
        assert_eq!(table.price_to_tick(250), Ok(241));
        assert_eq!(table.tick_to_price(242), Ok(255));
        assert_eq!(table.price_to_tick_size(249), Ok(1));
        assert_eq!(table.price_to_tick_size(250), Ok(5));
        assert_eq!(table.price_to_tick_size(12_340), Ok(20));
        assert_eq!(
            table.details_at_price(253),
            Some(SpreadTableDetails::new(250, 500, 5))
        );
        assert_eq!(table.details_at_price(9), None);
        assert_eq!(
            table.details_at_price(20_000_000),
            Some(SpreadTableDetails::new(5_000_000, 9_995_000, 5_000))
        );
    }

    #[test]
    fn test_new_rejects_gap() {
        let actual = SpreadTable::new([
            SpreadTableDetails::new(10, 250, 1),
            SpreadTableDetails::new(260, 1_000, 10),
        ]);
        assert_eq!(
            actual,
            Err(PricerError::SpreadTableGap {
                expected: 250,
                found: 260
            })
        );

        let actual = SpreadTable::new([SpreadTableDetails::new(1_000, 250, 1)]);
        assert!(matches!(actual, Err(PricerError::Config(_))));
    }
}
