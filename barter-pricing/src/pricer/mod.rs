//! Per-derivative state machine inferring underlying spot buckets from quote and spot ticks.
//!
//! A [`BucketPricer`] is fed the market maker's own derivative quotes ([`DerivTick`]), the
//! underlying spot ([`UndTick`]) and [`Greeks`] snapshots. While the derivative quote is tight,
//! every spot that holds for the issuer's lag is "settled" into a bucket for the current bid.
//! Buckets live in an [`IntervalIndex`] and every new fact is validated against them before it
//! mutates any state: inconsistencies are reported as [`ViolationType`] values.
//!
//! One pricer is owned by one event loop. Greeks, quote ticks and spot ticks must all be
//! delivered through the same `&mut self` sequence.

use crate::{
    MAX_INTERVAL_VALUE,
    config::{ExtrapolationMode, PricerConfig},
    error::PricerError,
    extractor::{IntervalExtractor, SettledInterval, SpotHistory, TimedSpot},
    greeks::{Greeks, ObservedGreeks},
    interval::{Interval, IntervalIndex, Neighbours, OverlapScratch, SpotRange},
    spread_table::SpreadTable,
    validator::{CallValidator, DerivPriceCheck, PriceValidator, PutValidator},
    violation::{TickDirection, TriggerInfo, ViolationType},
};
use derive_more::Constructor;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};
use tracing::{debug, error, trace};

/// Merge of settled spot intervals into the registered buckets.
mod register;

/// Speculative buckets extrapolated around the latest bid.
pub mod theo;

pub use register::Registration;
pub use theo::TheoIntervalBuilder;

/// [`BucketPricer`] for call warrants.
pub type CallBucketPricer = BucketPricer<CallValidator>;

/// [`BucketPricer`] for put warrants.
pub type PutBucketPricer = BucketPricer<PutValidator>;

/// Market maker's own derivative quote. Prices have 3 implicit decimal places, a zero market
/// maker price is treated as absent.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize, Constructor)]
pub struct DerivTick {
    pub time_ns: i64,
    #[serde(default)]
    pub bid: Option<i32>,
    #[serde(default)]
    pub ask: Option<i32>,
    #[serde(default)]
    pub mm_bid: Option<i32>,
    #[serde(default)]
    pub mm_ask: Option<i32>,
    #[serde(default)]
    pub spread_in_tick: Option<i32>,
}

/// Underlying spot (6 implicit decimal places) and whether its book was tight.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct UndTick {
    pub time_ns: i64,
    pub spot: i64,
    pub is_tight: bool,
}

/// Outcome of the latest spot scan of an [`BucketPricer::observe_und_tick`].
///
/// `data` is only present if the pricer was allowed to register the settled interval, and
/// `theo_bucket_size` only once its width was checked.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub struct ObservedInterval {
    pub settled: Option<SettledInterval>,
    pub data: Option<i32>,
    pub theo_bucket_size: Option<i64>,
}

impl ObservedInterval {
    pub fn is_empty(&self) -> bool {
        self.settled.is_none()
    }
}

/// Spot bucket of a derivative price, either registered or inferred from the Greeks.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum Bucket {
    Observed(Interval),
    Extrapolated {
        range: SpotRange,
        reference_price: i32,
    },
}

impl Bucket {
    pub fn range(&self) -> SpotRange {
        match self {
            Bucket::Observed(interval) => interval.range(),
            Bucket::Extrapolated { range, .. } => *range,
        }
    }

    pub fn is_observed(&self) -> bool {
        matches!(self, Bucket::Observed(_))
    }
}

/// Last quote whose spread met the target, kept as the reference for later quotes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct TightQuote {
    bid: Option<i32>,
    ask: Option<i32>,
    time_ns: Option<i64>,
    und_spot: Option<i64>,
}

/// Bucket pricer of one (underlying, derivative) pair, generic over the side specific
/// [`PriceValidator`].
#[derive(Debug)]
pub struct BucketPricer<V> {
    config: PricerConfig,
    validator: V,
    greeks: ObservedGreeks,
    history: SpotHistory,
    extractor: IntervalExtractor,
    intervals: IntervalIndex,
    theo_intervals: IntervalIndex,
    theo_builder: TheoIntervalBuilder,
    scratch: OverlapScratch,
    trigger: TriggerInfo,

    target_spread_in_tick: Option<i32>,
    last_bid: Option<i32>,
    last_ask: Option<i32>,
    last_deriv_ns: Option<i64>,
    last_spread_in_tick: Option<i32>,
    last_non_verified_spread_in_tick: Option<i32>,
    last_tight: Option<TightQuote>,
    should_register: bool,
    max_bid_since_tight: Option<i32>,
    min_ask_since_tight: Option<i32>,

    last_und_spot: Option<i64>,
    min_spot: Option<i64>,
    max_spot: Option<i64>,
    scanned_deriv_ns: Option<Option<i64>>,
    prev_observed: Option<(SpotRange, i32)>,
    last_observation: ObservedInterval,
}

impl<V> BucketPricer<V>
where
    V: PriceValidator,
{
    /// Construct a [`BucketPricer`] from a validated [`PricerConfig`].
    pub fn new(config: PricerConfig, spread_table: Arc<SpreadTable>) -> Result<Self, PricerError> {
        config.validate()?;

        let mut validator = V::new(config.validator_params(), spread_table);
        if validator.put_or_call() != config.put_or_call {
            return Err(PricerError::Config(format!(
                "{} pricer cannot be configured for a {} derivative",
                validator.put_or_call(),
                config.put_or_call
            )));
        }
        validator.set_target_spread_in_tick(config.target_spread_in_tick);

        Ok(Self {
            validator,
            greeks: ObservedGreeks::default(),
            history: SpotHistory::new(config.history_capacity),
            extractor: IntervalExtractor::new(config.issuer_max_lag_ns),
            intervals: IntervalIndex::default(),
            theo_intervals: IntervalIndex::default(),
            theo_builder: TheoIntervalBuilder::default(),
            scratch: OverlapScratch::new(config.overlap_capacity),
            trigger: TriggerInfo::default(),
            target_spread_in_tick: config.target_spread_in_tick,
            last_bid: None,
            last_ask: None,
            last_deriv_ns: None,
            last_spread_in_tick: None,
            last_non_verified_spread_in_tick: None,
            last_tight: None,
            should_register: false,
            max_bid_since_tight: None,
            min_ask_since_tight: None,
            last_und_spot: None,
            min_spot: None,
            max_spot: None,
            scanned_deriv_ns: None,
            prev_observed: None,
            last_observation: ObservedInterval::default(),
            config,
        })
    }

    pub fn config(&self) -> &PricerConfig {
        &self.config
    }

    pub fn validator(&self) -> &V {
        &self.validator
    }

    pub fn greeks(&self) -> &ObservedGreeks {
        &self.greeks
    }

    /// Registered buckets, in ascending spot order.
    pub fn intervals(&self) -> &IntervalIndex {
        &self.intervals
    }

    /// Outcome of the latest spot scan.
    pub fn last_observation(&self) -> ObservedInterval {
        self.last_observation
    }

    pub fn target_spread_in_tick(&self) -> Option<i32> {
        self.target_spread_in_tick
    }

    pub fn observe_greeks(&mut self, time_ns: i64, greeks: Greeks) {
        self.greeks.merge(time_ns, greeks);
    }

    /// Validate a derivative quote against the spot moves since the last tight quote. The
    /// quote only updates pricer state if it raises no violation.
    pub fn observe_deriv_tick(&mut self, tick: DerivTick, trigger: TriggerInfo) -> ViolationType {
        self.trigger = trigger;

        let is_tight =
            tick.spread_in_tick.is_some() && tick.spread_in_tick == self.target_spread_in_tick;
        let mm_bid = tick.mm_bid.filter(|price| *price != 0);
        let mm_ask = tick.mm_ask.filter(|price| *price != 0);
        self.last_non_verified_spread_in_tick = tick.spread_in_tick;

        let violation = self.validate_deriv_price(mm_bid, mm_ask, is_tight);
        if !violation.is_violation() {
            self.process_deriv_tick(tick.time_ns, mm_bid, mm_ask, tick.spread_in_tick, is_tight);
        }
        violation
    }

    /// Record a spot sample and, when due, settle the recent samples into a bucket for the
    /// current bid.
    ///
    /// A spot above [`MAX_INTERVAL_VALUE`] is rejected with [`PricerError::SpotOutOfRange`].
    /// Every other failure is logged and reported as [`ViolationType::Error`].
    pub fn observe_und_tick(
        &mut self,
        tick: UndTick,
        trigger: TriggerInfo,
    ) -> Result<ViolationType, PricerError> {
        self.trigger = trigger;
        self.last_observation = ObservedInterval::default();

        if tick.spot > MAX_INTERVAL_VALUE {
            return Err(PricerError::SpotOutOfRange {
                spot: tick.spot,
                max: MAX_INTERVAL_VALUE,
            });
        }

        match self.process_und_tick(tick) {
            Ok(violation) => Ok(violation),
            Err(error) => {
                error!(
                    deriv = self.config.deriv_instrument,
                    seq = self.trigger.seq_num,
                    time_ns = tick.time_ns,
                    spot = tick.spot,
                    %error,
                    "BucketPricer failed to process underlying tick"
                );
                Ok(ViolationType::Error)
            }
        }
    }

    /// Clear the registered buckets, keeping the Greeks, and restart tight quote tracking with
    /// the spread of the latest quote as target.
    pub fn reset(&mut self, time_ns: i64) {
        debug!(
            deriv = self.config.deriv_instrument,
            seq = self.trigger.seq_num,
            time_ns,
            "Reset pricer"
        );
        self.clear_intervals();
        self.reset_and_set_target_spread_in_tick(self.last_non_verified_spread_in_tick);
    }

    /// [`Self::reset`] with an explicit target spread.
    pub fn reset_target_spread(&mut self, time_ns: i64, target_spread_in_tick: i32) {
        debug!(
            deriv = self.config.deriv_instrument,
            seq = self.trigger.seq_num,
            time_ns,
            target_spread_in_tick,
            "Reset pricer with target spread"
        );
        self.clear_intervals();
        self.reset_and_set_target_spread_in_tick(Some(target_spread_in_tick));
    }

    /// [`Self::reset`], then register the `last` settled spot of `seed` as the single bucket
    /// for its price.
    pub fn reset_and_register(
        &mut self,
        time_ns: i64,
        seed: ObservedInterval,
    ) -> Result<(), PricerError> {
        let last = seed
            .settled
            .map(|settled| settled.last)
            .ok_or_else(|| PricerError::MissingSeed("last".to_string()))?;
        let data = seed
            .data
            .ok_or_else(|| PricerError::MissingSeed("data".to_string()))?;

        self.clear_intervals();
        self.reset_and_set_target_spread_in_tick(self.last_non_verified_spread_in_tick);

        let range = SpotRange::new(last, last + 1);
        let theo_bucket_size = match seed.theo_bucket_size {
            Some(theo_bucket_size) => theo_bucket_size,
            None => {
                self.validator
                    .calculate_bucket_size(&self.greeks, range, data)?
                    .max_bucket_size
            }
        };
        self.intervals.insert_unchecked(Interval::new(
            range.begin,
            range.end_exclusive,
            data,
            theo_bucket_size,
        ))?;

        debug!(
            deriv = self.config.deriv_instrument,
            seq = self.trigger.seq_num,
            time_ns,
            intervals = %self.intervals,
            "Reset pricer and register"
        );
        Ok(())
    }

    /// Set the target spread and restart tight quote tracking. If the latest quote already
    /// meets the new target it becomes the tight reference straight away.
    pub fn reset_and_set_target_spread_in_tick(&mut self, target_spread_in_tick: Option<i32>) {
        self.target_spread_in_tick = target_spread_in_tick;
        self.clear_observed_und_spots();
        self.validator.set_target_spread_in_tick(target_spread_in_tick);

        if target_spread_in_tick.is_some() && target_spread_in_tick == self.last_spread_in_tick {
            self.last_tight = Some(TightQuote {
                bid: self.last_bid,
                ask: self.last_ask,
                time_ns: self.last_deriv_ns,
                und_spot: self.last_und_spot,
            });
            self.should_register = true;
        }
    }

    /// Whether the latest accepted quote spread differs from the target.
    pub fn has_target_spread_in_tick_been_changed(&self) -> bool {
        self.target_spread_in_tick != self.last_spread_in_tick
    }

    /// [`Self::has_target_spread_in_tick_been_changed`], then record `tick` without validating
    /// it.
    pub fn has_target_spread_in_tick_been_changed_and_register(&mut self, tick: DerivTick) -> bool {
        let changed = self.has_target_spread_in_tick_been_changed();
        let is_tight =
            tick.spread_in_tick.is_some() && tick.spread_in_tick == self.target_spread_in_tick;
        self.process_deriv_tick(
            tick.time_ns,
            tick.mm_bid.filter(|price| *price != 0),
            tick.mm_ask.filter(|price| *price != 0),
            tick.spread_in_tick,
            is_tight,
        );
        changed
    }

    pub fn set_issuer_max_lag_ns(&mut self, issuer_max_lag_ns: i64) {
        self.config.issuer_max_lag_ns = issuer_max_lag_ns;
        self.extractor.set_expected_lag_ns(issuer_max_lag_ns);
    }

    /// Session teardown: [`Self::reset`], then wipe the Greeks.
    pub fn clear(&mut self) {
        debug!(
            deriv = self.config.deriv_instrument,
            seq = self.trigger.seq_num,
            "Clear pricer"
        );
        self.clear_intervals();
        self.reset_and_set_target_spread_in_tick(self.last_non_verified_spread_in_tick);
        self.theo_intervals.clear();
        self.greeks.clear();
    }

    pub fn interval_by_und_spot(&self, spot: i64) -> Option<Interval> {
        self.intervals.search_point(spot)
    }

    pub fn overlap_and_greater_by_und_spot(&self, spot: i64) -> Option<Neighbours> {
        self.intervals.search_overlap_and_greater(spot)
    }

    pub fn overlap_and_smaller_by_und_spot(&self, spot: i64) -> Option<Neighbours> {
        self.intervals.search_overlap_and_smaller(spot)
    }

    pub fn interval_by_deriv_price(&self, price: i32) -> Option<Interval> {
        self.intervals.search_price(price)
    }

    /// Registered bucket of `price`, or one extrapolated from the nearest registered prices
    /// once the Greeks are ready.
    pub fn interval_by_deriv_price_with_extrapolation(&self, price: i32) -> Option<Bucket> {
        if let Some(interval) = self.intervals.search_price(price) {
            return Some(Bucket::Observed(interval));
        }
        if !self.greeks.is_ready() {
            return None;
        }

        let bucket = match self.config.extrapolation {
            ExtrapolationMode::Nearest => self.extrapolate_from_nearest(price),
            ExtrapolationMode::Bracketing => self.extrapolate_from_bracketing(price),
        }?;

        debug!(
            deriv = self.config.deriv_instrument,
            price,
            ?bucket,
            "Extrapolated interval"
        );
        Some(bucket)
    }

    fn extrapolate_from_nearest(&self, price: i32) -> Option<Bucket> {
        let (reference_price, reference) = self
            .intervals
            .prices()
            .min_by_key(|(reference_price, _)| {
                ((reference_price - price).abs(), *reference_price)
            })?;

        let change = self.validator.calculate_und_spot_change(
            reference,
            reference_price,
            price,
            &self.greeks,
        )?;

        Some(Bucket::Extrapolated {
            range: reference.shift(change),
            reference_price,
        })
    }

    fn extrapolate_from_bracketing(&self, price: i32) -> Option<Bucket> {
        let references = self
            .intervals
            .prices()
            .min_set_by_key(|(reference_price, _)| (reference_price - price).abs());

        let reference_price = references.iter().map(|(reference_price, _)| *reference_price).min()?;
        let range = references
            .into_iter()
            .filter_map(|(reference_price, reference)| {
                self.validator
                    .calculate_und_spot_change(reference, reference_price, price, &self.greeks)
                    .map(|change| reference.shift(change))
            })
            .reduce(|union, range| {
                SpotRange::new(
                    union.begin.min(range.begin),
                    union.end_exclusive.max(range.end_exclusive),
                )
            })?;

        Some(Bucket::Extrapolated {
            range,
            reference_price,
        })
    }

    fn validate_deriv_price(
        &self,
        bid: Option<i32>,
        ask: Option<i32>,
        is_tight: bool,
    ) -> ViolationType {
        let Some(tight) = self.last_tight else {
            return ViolationType::NoViolation;
        };

        let mut direction = TickDirection::UNKNOWN;
        let bucket = tight
            .bid
            .and_then(|bid| self.interval_by_deriv_price_with_extrapolation(bid));

        match bucket {
            Some(bucket) => {
                let range = bucket.range();
                if self.min_spot.is_some_and(|min| min < range.begin) {
                    direction |= TickDirection::DOWN;
                }
                if self.max_spot.is_some_and(|max| max >= range.end_exclusive) {
                    direction |= TickDirection::UP;
                }
            }
            None => {
                // Without a bucket only spot moves after the tight quote are meaningful
                let changed_ns = self.extractor.state().last_price_changed_ns;
                if !(changed_ns.is_some() && tight.time_ns < changed_ns) {
                    return ViolationType::NoViolation;
                }

                if let (Some(min), Some(at_tight)) = (self.min_spot, tight.und_spot)
                    && min < at_tight
                {
                    direction |= TickDirection::DOWN;
                }
                if self.max_spot.is_some() && self.max_spot > tight.und_spot {
                    direction |= TickDirection::UP;
                }
                self.history
                    .iter()
                    .for_each(|sample| direction.observe(sample.spot, tight.und_spot));
            }
        }

        let check = DerivPriceCheck {
            bid,
            ask,
            is_tight,
            last_tight_bid: tight.bid,
            last_tight_ask: tight.ask,
            max_bid_since_tight: self.max_bid_since_tight,
            min_ask_since_tight: self.min_ask_since_tight,
        };
        let violation = self.validator.validate_deriv_price(direction, &check);
        if violation.is_violation() {
            debug!(
                deriv = self.config.deriv_instrument,
                seq = self.trigger.seq_num,
                %violation,
                ?direction,
                ?check,
                "Derivative quote contradicts underlying direction"
            );
        }
        violation
    }

    fn process_deriv_tick(
        &mut self,
        time_ns: i64,
        bid: Option<i32>,
        ask: Option<i32>,
        spread_in_tick: Option<i32>,
        is_tight: bool,
    ) {
        if is_tight {
            let unchanged = bid.is_some()
                && ask.is_some()
                && bid == self.last_bid
                && ask == self.last_ask;
            if !unchanged {
                self.clear_observed_und_spots();
                self.prev_observed = None;
                trace!(
                    deriv = self.config.deriv_instrument,
                    seq = self.trigger.seq_num,
                    last_price = ?self.extractor.state().last_price,
                    last_price_changed_ns = ?self.extractor.state().last_price_changed_ns,
                    "Clear observed underlying spots"
                );
            }
            self.last_tight = Some(TightQuote {
                bid,
                ask,
                time_ns: Some(time_ns),
                und_spot: self.last_und_spot,
            });
            self.should_register = true;
        } else {
            self.should_register = false;
        }

        self.max_bid_since_tight = self.max_bid_since_tight.max(bid);
        if let Some(ask) = ask {
            self.min_ask_since_tight =
                Some(self.min_ask_since_tight.map_or(ask, |min| min.min(ask)));
        }

        self.last_bid = bid;
        self.last_ask = ask;
        self.last_spread_in_tick = spread_in_tick;
        self.last_deriv_ns = Some(time_ns);
    }

    fn process_und_tick(&mut self, tick: UndTick) -> Result<ViolationType, PricerError> {
        self.last_und_spot = Some(tick.spot);
        self.history
            .push(TimedSpot::new(tick.time_ns, tick.spot, tick.is_tight))?;
        self.min_spot = Some(self.min_spot.map_or(tick.spot, |min| min.min(tick.spot)));
        self.max_spot = Some(self.max_spot.map_or(tick.spot, |max| max.max(tick.spot)));

        if !self.should_rescan(tick.time_ns) {
            return Ok(ViolationType::NoViolation);
        }

        let settled = self
            .extractor
            .extract(tick.time_ns, self.last_deriv_ns, &mut self.history);
        self.scanned_deriv_ns = Some(self.last_deriv_ns);

        let mut violation = self.validator.validate_deriv_ask_price(
            &self.greeks,
            settled.map(|settled| settled.range),
            self.last_ask,
            &self.intervals,
        )?;

        let data = self.last_bid.filter(|_| self.should_register);
        self.last_observation = ObservedInterval {
            settled,
            data,
            theo_bucket_size: None,
        };

        let (Some(settled), Some(data)) = (settled, data) else {
            return Ok(violation);
        };
        if violation.is_violation() || self.prev_observed == Some((settled.range, data)) {
            return Ok(violation);
        }

        let registration = self.register(
            tick.time_ns,
            settled.range,
            data,
            settled.last > settled.range.begin,
        )?;
        violation = registration.violation;

        if !violation.is_violation() && registration.changed && self.config.theo_interval_swap {
            let theo = self.theo_builder.build(
                &self.validator,
                &self.greeks,
                data,
                &self.intervals,
                &mut self.theo_intervals,
            )?;
            if !theo.is_violation() && !self.theo_intervals.is_empty() {
                std::mem::swap(&mut self.intervals, &mut self.theo_intervals);
                debug!(
                    deriv = self.config.deriv_instrument,
                    seq = self.trigger.seq_num,
                    data,
                    delta = self.greeks.delta(),
                    gamma = self.greeks.gamma(),
                    ref_spot = self.greeks.ref_spot(),
                    intervals = %self.intervals,
                    "Use extrapolated intervals"
                );
            }
        }

        self.prev_observed = Some((settled.range, data));
        Ok(violation)
    }

    /// Rescan when the quote moved since the last scan, or when a held sample or price change
    /// may have matured.
    fn should_rescan(&self, time_ns: i64) -> bool {
        let lag = self.extractor.expected_lag_ns();
        self.scanned_deriv_ns != Some(self.last_deriv_ns)
            || self
                .extractor
                .earliest_effective_ns()
                .is_none_or(|earliest| time_ns >= earliest)
            || self
                .extractor
                .state()
                .last_price_changed_ns
                .is_none_or(|changed| time_ns >= changed + lag)
    }

    fn clear_observed_und_spots(&mut self) {
        for sample in self.history.drain() {
            self.extractor.absorb(&sample);
        }

        self.last_tight = None;
        self.min_spot = None;
        self.max_spot = None;
        self.max_bid_since_tight = None;
        self.min_ask_since_tight = None;
    }

    fn clear_intervals(&mut self) {
        self.intervals.clear();
        self.prev_observed = None;
    }
}

impl<V> Display for BucketPricer<V>
where
    V: PriceValidator,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[secSid:{}, undSecSid:{}, putOrCall:{}, delta:{}, gamma:{} refSpot:{}",
            self.config.deriv_instrument,
            self.config.und_instrument,
            self.config.put_or_call,
            self.greeks.delta(),
            self.greeks.gamma(),
            self.greeks.ref_spot(),
        )?;

        if self.intervals.is_empty() {
            write!(f, ", intervals: none]")
        } else {
            write!(f, ", intervals: {}]", self.intervals)
        }
    }
}
