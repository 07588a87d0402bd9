use super::{Interval, SpotRange};
use crate::error::PricerError;
use fnv::FnvHashMap;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    ops::Bound::{Excluded, Unbounded},
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Slot {
    begin: i64,
    data: i32,
    theo_bucket_size: i64,
}

impl Slot {
    fn interval(&self, end_exclusive: i64) -> Interval {
        Interval::new(self.begin, end_exclusive, self.data, self.theo_bucket_size)
    }
}

/// Disjoint [`Interval`]s keyed by `end_exclusive`, with a derivative price lookup kept in
/// sync by every mutation.
///
/// Because intervals never overlap, ordering by `end_exclusive` is also ordering by `begin`.
/// Disjointness is the caller's responsibility: see [`IntervalIndex::insert_unchecked`].
#[derive(Debug, Clone, Default)]
pub struct IntervalIndex {
    by_end: BTreeMap<i64, Slot>,
    by_price: FnvHashMap<i32, SpotRange>,
}

/// Reusable buffer receiving the overlapping intervals of [`IntervalIndex::search_range`].
///
/// The buffer never grows past `capacity`; a search that would exceed it fails instead.
#[derive(Debug, Clone)]
pub struct OverlapScratch {
    overlaps: Vec<Interval>,
    capacity: usize,
}

impl OverlapScratch {
    pub fn new(capacity: usize) -> Self {
        Self {
            overlaps: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn push(&mut self, interval: Interval) -> Result<(), PricerError> {
        if self.overlaps.len() == self.capacity {
            return Err(PricerError::OverlapCapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.overlaps.push(interval);
        Ok(())
    }
}

/// Result of [`IntervalIndex::search_range`], valid until the scratch buffer is reused.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RangeSearch<'s> {
    /// Overlapping intervals, highest spot first.
    pub overlapping: &'s [Interval],
    /// Nearest interval wholly below the searched range.
    pub smaller: Option<Interval>,
    /// Nearest interval wholly above the searched range.
    pub greater: Option<Interval>,
}

/// Interval containing a spot (if any) plus its nearest neighbour on one side.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Neighbours {
    pub overlap: Option<Interval>,
    pub neighbour: Option<Interval>,
}

impl IntervalIndex {
    pub fn len(&self) -> usize {
        self.by_end.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_end.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_end.clear();
        self.by_price.clear();
    }

    /// All intervals in ascending spot order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Interval> + '_ {
        self.by_end
            .iter()
            .map(|(end_exclusive, slot)| slot.interval(*end_exclusive))
    }

    /// Every registered derivative price with its spot range, in no particular order.
    pub fn prices(&self) -> impl Iterator<Item = (i32, SpotRange)> + '_ {
        self.by_price.iter().map(|(price, range)| (*price, *range))
    }

    /// Interval containing `spot`.
    pub fn search_point(&self, spot: i64) -> Option<Interval> {
        self.by_end
            .range((Excluded(spot), Unbounded))
            .next()
            .map(|(end_exclusive, slot)| slot.interval(*end_exclusive))
            .filter(|interval| interval.begin <= spot)
    }

    /// Interval whose `end_exclusive` is exactly `end_exclusive`.
    pub fn search_exact(&self, end_exclusive: i64) -> Option<Interval> {
        self.by_end
            .get(&end_exclusive)
            .map(|slot| slot.interval(end_exclusive))
    }

    /// Interval registered for derivative price `price`.
    pub fn search_price(&self, price: i32) -> Option<Interval> {
        self.by_price
            .get(&price)
            .and_then(|range| self.search_exact(range.end_exclusive))
    }

    /// Find every interval overlapping `range`, plus the nearest non-overlapping neighbour on
    /// each side. An empty index or an invalid `range` yields no overlaps and no neighbours.
    pub fn search_range<'s>(
        &self,
        range: SpotRange,
        scratch: &'s mut OverlapScratch,
    ) -> Result<RangeSearch<'s>, PricerError> {
        scratch.overlaps.clear();

        if !range.is_valid() || self.is_empty() {
            return Ok(RangeSearch {
                overlapping: &scratch.overlaps,
                smaller: None,
                greater: None,
            });
        }

        let mut above = self
            .by_end
            .range((Excluded(range.end_exclusive), Unbounded))
            .map(|(end_exclusive, slot)| slot.interval(*end_exclusive));

        let greater = match above.next() {
            Some(first) if first.begin < range.end_exclusive => {
                scratch.push(first)?;
                above.next()
            }
            other => other,
        };

        let mut smaller = None;
        for (end_exclusive, slot) in self.by_end.range(..=range.end_exclusive).rev() {
            let interval = slot.interval(*end_exclusive);
            if interval.end_exclusive > range.begin {
                scratch.push(interval)?;
            } else {
                smaller = Some(interval);
                break;
            }
        }

        Ok(RangeSearch {
            overlapping: &scratch.overlaps,
            smaller,
            greater,
        })
    }

    /// Interval containing `spot` and the nearest interval above it.
    ///
    /// Returns `None` when no interval ends above `spot`.
    pub fn search_overlap_and_greater(&self, spot: i64) -> Option<Neighbours> {
        let mut above = self
            .by_end
            .range((Excluded(spot), Unbounded))
            .map(|(end_exclusive, slot)| slot.interval(*end_exclusive));

        let first = above.next()?;
        if first.begin <= spot {
            Some(Neighbours {
                overlap: Some(first),
                neighbour: above.next(),
            })
        } else {
            Some(Neighbours {
                overlap: None,
                neighbour: Some(first),
            })
        }
    }

    /// Interval containing `spot` and the nearest interval below it.
    ///
    /// Returns `None` when `spot` is not contained and no interval lies below it.
    pub fn search_overlap_and_smaller(&self, spot: i64) -> Option<Neighbours> {
        let below = self
            .by_end
            .range(..=spot)
            .next_back()
            .map(|(end_exclusive, slot)| slot.interval(*end_exclusive));

        match self.search_point(spot) {
            Some(overlap) => Some(Neighbours {
                overlap: Some(overlap),
                neighbour: below,
            }),
            None => below.map(|neighbour| Neighbours {
                overlap: None,
                neighbour: Some(neighbour),
            }),
        }
    }

    /// Bidirectional cursor positioned between the intervals ending at or below `key` and those
    /// ending above it.
    pub fn cursor(&self, key: i64) -> IndexCursor<'_> {
        IndexCursor {
            intervals: &self.by_end,
            boundary: key,
        }
    }

    /// Cursor positioned just after the interval ending exactly at `value + 1`, if any.
    pub fn search_exact_and_iterate(&self, value: i64) -> IndexCursor<'_> {
        self.cursor(value + 1)
    }

    /// Insert `interval` without checking it against existing intervals.
    pub fn insert_unchecked(&mut self, interval: Interval) -> Result<(), PricerError> {
        if interval.begin > interval.end_exclusive {
            return Err(PricerError::InvalidInterval {
                begin: interval.begin,
                end_exclusive: interval.end_exclusive,
            });
        }

        self.by_end.insert(
            interval.end_exclusive,
            Slot {
                begin: interval.begin,
                data: interval.data,
                theo_bucket_size: interval.theo_bucket_size,
            },
        );
        self.by_price.insert(interval.data, interval.range());
        Ok(())
    }

    /// Remove the interval ending at `end_exclusive`.
    pub fn remove(&mut self, end_exclusive: i64) -> Option<Interval> {
        let removed = self.by_end.remove(&end_exclusive)?.interval(end_exclusive);
        if self
            .by_price
            .get(&removed.data)
            .is_some_and(|range| range.end_exclusive == end_exclusive)
        {
            self.by_price.remove(&removed.data);
        }
        Some(removed)
    }

    /// Move the begin of the interval ending at `end_exclusive`, keeping its key.
    pub fn update_begin(&mut self, end_exclusive: i64, begin: i64, theo_bucket_size: i64) -> bool {
        match self.by_end.get_mut(&end_exclusive) {
            Some(slot) => {
                slot.begin = begin;
                slot.theo_bucket_size = theo_bucket_size;
                self.by_price
                    .insert(slot.data, SpotRange::new(begin, end_exclusive));
                true
            }
            None => false,
        }
    }
}

impl Display for IntervalIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for interval in self.iter() {
            write!(f, "{interval}|")?;
        }
        Ok(())
    }
}

/// Bidirectional walk over an [`IntervalIndex`].
///
/// `next` yields the first interval ending above the cursor and moves past it. `prev` yields
/// the last interval ending at or below the cursor and moves before it. Calling `prev` right
/// after `next` yields the same interval again.
#[derive(Debug, Clone)]
pub struct IndexCursor<'a> {
    intervals: &'a BTreeMap<i64, Slot>,
    boundary: i64,
}

impl IndexCursor<'_> {
    pub fn next(&mut self) -> Option<Interval> {
        let (end_exclusive, slot) = self
            .intervals
            .range((Excluded(self.boundary), Unbounded))
            .next()?;
        self.boundary = *end_exclusive;
        Some(slot.interval(*end_exclusive))
    }

    pub fn prev(&mut self) -> Option<Interval> {
        let (end_exclusive, slot) = self.intervals.range(..=self.boundary).next_back()?;
        self.boundary = end_exclusive - 1;
        Some(slot.interval(*end_exclusive))
    }
}
