use super::BucketPricer;
use crate::{
    error::PricerError,
    interval::{Interval, SpotRange},
    validator::{BucketSizeInfo, PriceValidator},
    violation::ViolationType,
};
use std::cmp::Ordering;
use tracing::{debug, error};

/// Result of registering a settled interval.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Registration {
    pub violation: ViolationType,
    /// Whether the registered buckets were mutated.
    pub changed: bool,
}

impl Registration {
    pub fn changed() -> Self {
        Self {
            violation: ViolationType::NoViolation,
            changed: true,
        }
    }

    pub fn unchanged(violation: ViolationType) -> Self {
        Self {
            violation,
            changed: false,
        }
    }
}

/// Copy of a range search, so the buckets can be mutated after the search.
#[derive(Debug, Copy, Clone, Default)]
struct Overlaps {
    count: usize,
    highest: Option<Interval>,
    lowest: Option<Interval>,
    smaller: Option<Interval>,
    greater: Option<Interval>,
}

impl<V> BucketPricer<V>
where
    V: PriceValidator,
{
    /// Register `range` as the bucket of `data`, merging it with any bucket already registered
    /// for `data`. Nothing is mutated unless the returned [`Registration`] has no violation.
    pub(super) fn register(
        &mut self,
        observed_ns: i64,
        range: SpotRange,
        data: i32,
        extend_end: bool,
    ) -> Result<Registration, PricerError> {
        let (violation, info) =
            self.validator
                .validate_bucket_size(&self.greeks, range, data, extend_end)?;
        self.last_observation.theo_bucket_size = Some(info.max_bucket_size);

        if violation.is_violation() {
            debug!(
                deriv = self.config.deriv_instrument,
                seq = self.trigger.seq_num,
                observed_ns,
                begin = range.begin,
                end = range.end_exclusive,
                data,
                ?info,
                %violation,
                "Settled interval is wider than its bucket allows"
            );
            return Ok(Registration::unchanged(violation));
        }

        self.register_sized(observed_ns, range, data, info, true)
    }

    /// Register the end extension of a bucket that has just been removed.
    fn register_extension(
        &mut self,
        observed_ns: i64,
        range: SpotRange,
        data: i32,
    ) -> Result<Registration, PricerError> {
        let (violation, info) =
            self.validator
                .validate_bucket_size(&self.greeks, range, data, true)?;
        if violation.is_violation() {
            return Ok(Registration::unchanged(violation));
        }

        self.register_sized(observed_ns, range, data, info, true)
    }

    fn register_sized(
        &mut self,
        observed_ns: i64,
        range: SpotRange,
        data: i32,
        info: BucketSizeInfo,
        validate_distance: bool,
    ) -> Result<Registration, PricerError> {
        let overlaps = self.search(range)?;

        match overlaps.count {
            0 => match self.intervals.search_price(data) {
                Some(existing) => {
                    self.merge_with_validation(observed_ns, existing, range, data, info)
                }
                None => {
                    let candidate = Interval::new(
                        range.begin,
                        range.end_exclusive,
                        data,
                        info.max_bucket_size,
                    );

                    for neighbour in [overlaps.smaller, overlaps.greater].into_iter().flatten() {
                        let violation =
                            self.validator.validate_price_consistency(&candidate, &neighbour);
                        if violation.is_violation() {
                            return Ok(Registration::unchanged(violation));
                        }
                    }

                    if validate_distance {
                        let violation = self.validate_distance(&candidate, None)?;
                        if violation.is_violation() {
                            return Ok(Registration::unchanged(violation));
                        }
                    }

                    self.intervals.insert_unchecked(candidate)?;
                    debug!(
                        deriv = self.config.deriv_instrument,
                        seq = self.trigger.seq_num,
                        observed_ns,
                        begin = range.begin,
                        end = range.end_exclusive,
                        data,
                        delta = self.greeks.delta(),
                        gamma = self.greeks.gamma(),
                        ref_spot = self.greeks.ref_spot(),
                        intervals = %self.intervals,
                        "Added interval into pricer"
                    );
                    Ok(Registration::changed())
                }
            },
            1 => {
                let Some(overlap) = overlaps.highest else {
                    return Ok(Registration::unchanged(ViolationType::Error));
                };
                match data.cmp(&overlap.data) {
                    Ordering::Greater => Ok(Registration::unchanged(ViolationType::UpVol)),
                    Ordering::Less => Ok(Registration::unchanged(ViolationType::DownVol)),
                    Ordering::Equal => self.merge(observed_ns, overlap, range, info),
                }
            }
            _ => Ok(Registration::unchanged(
                self.validate_overlapped(&overlaps, data),
            )),
        }
    }

    /// Merge `range` into `existing`, the disjoint bucket already registered for the same price.
    fn merge_with_validation(
        &mut self,
        observed_ns: i64,
        existing: Interval,
        range: SpotRange,
        data: i32,
        info: BucketSizeInfo,
    ) -> Result<Registration, PricerError> {
        let theo_bucket_size = info.max_bucket_size;

        if range.end_exclusive <= existing.end_exclusive {
            if range.begin >= existing.begin {
                return Ok(Registration::unchanged(ViolationType::NoViolation));
            }

            // Widen existing down to the new begin, covering the gap in between
            let widened = SpotRange::new(range.begin, existing.end_exclusive);
            let overlaps = self.search(widened)?;
            if overlaps.count != 1 {
                return Ok(Registration::unchanged(
                    self.validate_overlapped(&overlaps, data),
                ));
            }

            let candidate =
                Interval::new(widened.begin, widened.end_exclusive, data, theo_bucket_size);
            let violation = self.validate_distance(&candidate, Some(data))?;
            if violation.is_violation() {
                return Ok(Registration::unchanged(violation));
            }
            if widened.width() > info.adj_max_bucket_size {
                return Ok(Registration::unchanged(
                    self.validator.begin_extension_violation(),
                ));
            }

            self.intervals
                .update_begin(existing.end_exclusive, widened.begin, theo_bucket_size);
            self.log_changed(observed_ns, widened, data);
            return Ok(Registration::changed());
        }

        if range.begin < existing.begin {
            let overlaps = self.search(range)?;
            if overlaps.count != 1 {
                return Ok(Registration::unchanged(
                    self.validate_overlapped(&overlaps, data),
                ));
            }

            self.intervals.remove(existing.end_exclusive);
            self.intervals.insert_unchecked(Interval::new(
                range.begin,
                range.end_exclusive,
                data,
                theo_bucket_size,
            ))?;
            self.log_changed(observed_ns, range, data);
            return Ok(Registration::changed());
        }

        let overlaps = self.search(SpotRange::new(existing.begin, range.end_exclusive))?;
        if overlaps.count != 1 {
            return Ok(Registration::unchanged(
                self.validate_overlapped(&overlaps, data),
            ));
        }
        self.reregister_extended(observed_ns, existing, range.end_exclusive)
    }

    /// Merge `range` into `existing`, the one bucket it overlaps, registered at the same price.
    fn merge(
        &mut self,
        observed_ns: i64,
        existing: Interval,
        range: SpotRange,
        info: BucketSizeInfo,
    ) -> Result<Registration, PricerError> {
        let data = existing.data;
        let theo_bucket_size = info.max_bucket_size;

        if range.end_exclusive <= existing.end_exclusive {
            if range.begin >= existing.begin {
                return Ok(Registration::unchanged(ViolationType::NoViolation));
            }

            let widened = SpotRange::new(range.begin, existing.end_exclusive);
            if widened.width() > info.adj_max_bucket_size {
                return Ok(Registration::unchanged(
                    self.validator.begin_extension_violation(),
                ));
            }

            let candidate =
                Interval::new(widened.begin, widened.end_exclusive, data, theo_bucket_size);
            let violation = self.validate_distance(&candidate, Some(data))?;
            if violation.is_violation() {
                return Ok(Registration::unchanged(violation));
            }

            self.intervals
                .update_begin(existing.end_exclusive, widened.begin, theo_bucket_size);
            self.log_changed(observed_ns, widened, data);
            return Ok(Registration::changed());
        }

        if range.begin <= existing.begin {
            let candidate =
                Interval::new(range.begin, range.end_exclusive, data, theo_bucket_size);
            let violation = self.validate_distance(&candidate, Some(data))?;
            if violation.is_violation() {
                return Ok(Registration::unchanged(violation));
            }

            self.intervals.remove(existing.end_exclusive);
            self.intervals.insert_unchecked(candidate)?;
            self.log_changed(observed_ns, range, data);
            return Ok(Registration::changed());
        }

        self.reregister_extended(observed_ns, existing, range.end_exclusive)
    }

    /// Remove `existing` and register it again with its end moved to `end_exclusive`. The
    /// original bucket is restored if the extension is rejected.
    fn reregister_extended(
        &mut self,
        observed_ns: i64,
        existing: Interval,
        end_exclusive: i64,
    ) -> Result<Registration, PricerError> {
        self.intervals.remove(existing.end_exclusive);

        let range = SpotRange::new(existing.begin, end_exclusive);
        match self.register_extension(observed_ns, range, existing.data) {
            Ok(registration) if !registration.violation.is_violation() => Ok(registration),
            result => {
                self.intervals.insert_unchecked(existing)?;
                debug!(
                    deriv = self.config.deriv_instrument,
                    seq = self.trigger.seq_num,
                    observed_ns,
                    %existing,
                    ?result,
                    "Restored interval after rejected extension"
                );
                result.map(|registration| Registration::unchanged(registration.violation))
            }
        }
    }

    fn search(&mut self, range: SpotRange) -> Result<Overlaps, PricerError> {
        let search = self.intervals.search_range(range, &mut self.scratch)?;
        Ok(Overlaps {
            count: search.overlapping.len(),
            highest: search.overlapping.first().copied(),
            lowest: search.overlapping.last().copied(),
            smaller: search.smaller,
            greater: search.greater,
        })
    }

    /// First distance violation of `candidate` against every bucket not priced at `skip_data`.
    fn validate_distance(
        &self,
        candidate: &Interval,
        skip_data: Option<i32>,
    ) -> Result<ViolationType, PricerError> {
        for reference in self
            .intervals
            .iter()
            .filter(|reference| Some(reference.data) != skip_data)
        {
            let violation = self.validator.validate_bucket_distance(candidate, &reference)?;
            if violation.is_violation() {
                return Ok(violation);
            }
        }
        Ok(ViolationType::NoViolation)
    }

    /// Classify `data` against the highest and lowest priced buckets it overlaps.
    fn validate_overlapped(&self, overlaps: &Overlaps, data: i32) -> ViolationType {
        let (mut lower, mut higher) = (false, false);
        for overlap in [overlaps.highest, overlaps.lowest].into_iter().flatten() {
            match data.cmp(&overlap.data) {
                Ordering::Less => lower = true,
                Ordering::Greater => higher = true,
                Ordering::Equal => {}
            }
        }

        match (lower, higher) {
            (true, false) => ViolationType::DownVol,
            (true, true) => ViolationType::PriceOverlapped,
            (false, true) => ViolationType::UpVol,
            (false, false) => {
                error!(
                    deriv = self.config.deriv_instrument,
                    seq = self.trigger.seq_num,
                    data,
                    overlaps = overlaps.count,
                    "Impossible overlap: every overlapped interval has the candidate price"
                );
                ViolationType::Error
            }
        }
    }

    fn log_changed(&self, observed_ns: i64, range: SpotRange, data: i32) {
        debug!(
            deriv = self.config.deriv_instrument,
            seq = self.trigger.seq_num,
            observed_ns,
            begin = range.begin,
            end = range.end_exclusive,
            data,
            intervals = %self.intervals,
            "Changed interval in pricer"
        );
    }
}
