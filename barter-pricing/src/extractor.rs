//! Reduction of recent underlying spot samples into one "settled" spot interval.
//!
//! A spot price is only trusted once it has held unchanged for the issuer's maximum lag
//! while the underlying was quoted tight and after the latest derivative quote update. The
//! [`IntervalExtractor`] walks the [`SpotHistory`] oldest first, carrying the last price and
//! the time it last changed in an [`ExtractorState`] that persists across scans.

use crate::{error::PricerError, interval::SpotRange};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, ops::ControlFlow};
use tracing::debug;

/// Underlying spot sample and whether the underlying book was tight when it was observed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct TimedSpot {
    pub time_ns: i64,
    pub spot: i64,
    pub is_tight: bool,
}

/// Bounded FIFO of [`TimedSpot`]s awaiting settlement.
#[derive(Debug, Clone)]
pub struct SpotHistory {
    samples: VecDeque<TimedSpot>,
    capacity: usize,
}

impl SpotHistory {
    /// Construct a [`SpotHistory`] holding up to `capacity` samples, rounded up to the next
    /// power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: TimedSpot) -> Result<(), PricerError> {
        if self.samples.len() == self.capacity {
            return Err(PricerError::HistoryFull {
                capacity: self.capacity,
            });
        }
        self.samples.push_back(sample);
        Ok(())
    }

    pub fn front(&self) -> Option<&TimedSpot> {
        self.samples.front()
    }

    pub fn pop_front(&mut self) -> Option<TimedSpot> {
        self.samples.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimedSpot> {
        self.samples.iter()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = TimedSpot> + '_ {
        self.samples.drain(..)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Carried-forward price state of an [`IntervalExtractor`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct ExtractorState {
    pub last_price: Option<i64>,
    pub last_price_tight: bool,
    pub last_price_changed_ns: Option<i64>,
}

impl ExtractorState {
    /// Carry `sample` forward as the latest price.
    pub fn carry(&mut self, sample: &TimedSpot) {
        if self.last_price != Some(sample.spot) {
            self.last_price_changed_ns = Some(sample.time_ns);
        }
        self.last_price = Some(sample.spot);
        self.last_price_tight = sample.is_tight;
    }
}

/// Spot range covering every price settled during one scan, plus the most recent one.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct SettledInterval {
    pub range: SpotRange,
    pub last: i64,
}

#[derive(Debug, Clone)]
pub struct IntervalExtractor {
    expected_lag_ns: i64,
    state: ExtractorState,
    cutoff_ns: i64,
    deriv_price_ns: Option<i64>,
    settled: Option<SettledInterval>,
    earliest_effective_ns: Option<i64>,
}

impl IntervalExtractor {
    pub fn new(expected_lag_ns: i64) -> Self {
        Self {
            expected_lag_ns,
            state: ExtractorState::default(),
            cutoff_ns: i64::MIN,
            deriv_price_ns: None,
            settled: None,
            earliest_effective_ns: None,
        }
    }

    pub fn expected_lag_ns(&self) -> i64 {
        self.expected_lag_ns
    }

    pub fn set_expected_lag_ns(&mut self, expected_lag_ns: i64) {
        if self.expected_lag_ns != expected_lag_ns {
            debug!(
                from = self.expected_lag_ns,
                to = expected_lag_ns,
                "IntervalExtractor updated expected lag"
            );
            self.expected_lag_ns = expected_lag_ns;
        }
    }

    pub fn state(&self) -> &ExtractorState {
        &self.state
    }

    pub fn set_state(&mut self, state: ExtractorState) {
        self.state = state;
    }

    /// Interval settled by the latest scan.
    pub fn settled(&self) -> Option<SettledInterval> {
        self.settled
    }

    /// Time from which a new scan could settle a sample the latest scan stopped at. `None`
    /// when the latest scan consumed every sample.
    pub fn earliest_effective_ns(&self) -> Option<i64> {
        self.earliest_effective_ns
    }

    /// Start a fresh scan at `time_ns` against the derivative quote updated at `deriv_price_ns`.
    /// The carried-forward [`ExtractorState`] is kept.
    pub fn init(&mut self, time_ns: i64, deriv_price_ns: Option<i64>) {
        self.settled = None;
        self.cutoff_ns = time_ns - self.expected_lag_ns;
        self.deriv_price_ns = deriv_price_ns;
        self.earliest_effective_ns = None;
    }

    /// Feed one sample. Breaks once a sample at or after the cutoff has been seen, in which
    /// case that sample must stay in the history for the next scan.
    pub fn on_sample(&mut self, sample: &TimedSpot) -> ControlFlow<()> {
        if let (Some(changed_ns), Some(price)) =
            (self.state.last_price_changed_ns, self.state.last_price)
            && self.state.last_price_tight
            && self
                .deriv_price_ns
                .is_none_or(|deriv_price_ns| sample.time_ns > deriv_price_ns)
            && sample.time_ns - changed_ns >= self.expected_lag_ns
        {
            self.settle(price);
        }

        self.state.carry(sample);

        if sample.time_ns >= self.cutoff_ns {
            self.earliest_effective_ns = Some(sample.time_ns + self.expected_lag_ns);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// Carry `sample` forward without settling it.
    pub fn absorb(&mut self, sample: &TimedSpot) {
        self.state.carry(sample);
    }

    /// Consume samples from the front of `history` until one breaks the scan.
    pub fn scan(&mut self, history: &mut SpotHistory) {
        while let Some(sample) = history.front().copied() {
            if self.on_sample(&sample).is_break() {
                break;
            }
            history.pop_front();
        }
    }

    /// Start a fresh scan and run it over `history`.
    pub fn extract(
        &mut self,
        time_ns: i64,
        deriv_price_ns: Option<i64>,
        history: &mut SpotHistory,
    ) -> Option<SettledInterval> {
        self.init(time_ns, deriv_price_ns);
        self.scan(history);
        self.settled
    }

    fn settle(&mut self, price: i64) {
        let range = match self.settled {
            Some(settled) => SpotRange::new(
                settled.range.begin.min(price),
                settled.range.end_exclusive.max(price + 1),
            ),
            None => SpotRange::new(price, price + 1),
        };
        self.settled = Some(SettledInterval::new(range, price));
    }
}
