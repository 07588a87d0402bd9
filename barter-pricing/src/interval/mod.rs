use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Ordered, disjoint set of [`Interval`]s indexed by underlying spot and by derivative price.
pub mod index;

pub use index::{IndexCursor, IntervalIndex, Neighbours, OverlapScratch, RangeSearch};

/// Half-open range `[begin, end_exclusive)` of underlying spot (6 implicit decimal places).
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct SpotRange {
    pub begin: i64,
    pub end_exclusive: i64,
}

impl SpotRange {
    pub fn contains(&self, spot: i64) -> bool {
        spot >= self.begin && spot < self.end_exclusive
    }

    pub fn overlaps(&self, other: &SpotRange) -> bool {
        self.begin < other.end_exclusive && other.begin < self.end_exclusive
    }

    pub fn width(&self) -> i64 {
        self.end_exclusive - self.begin
    }

    pub fn is_valid(&self) -> bool {
        self.begin < self.end_exclusive
    }

    pub fn shift(&self, change: i64) -> Self {
        Self::new(self.begin + change, self.end_exclusive + change)
    }
}

/// Bucket of underlying spot inferred to correspond to derivative price `data` (3 implicit
/// decimal places).
///
/// `theo_bucket_size` is the widest this bucket may legally be given the Greeks at the time it
/// was registered. It is advisory: merges may leave the actual width below it.
///
/// The most recent settled spot is not stored here. It is carried by the scan's
/// [`SettledInterval::last`](crate::extractor::SettledInterval) and seeds
/// [`BucketPricer::reset_and_register`](crate::pricer::BucketPricer::reset_and_register).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct Interval {
    pub begin: i64,
    pub end_exclusive: i64,
    pub data: i32,
    pub theo_bucket_size: i64,
}

impl Interval {
    pub fn range(&self) -> SpotRange {
        SpotRange::new(self.begin, self.end_exclusive)
    }

    pub fn contains(&self, spot: i64) -> bool {
        self.range().contains(spot)
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{},{}]->[{}, theoBucketSize: {}]",
            self.begin, self.end_exclusive, self.data, self.theo_bucket_size
        )
    }
}
