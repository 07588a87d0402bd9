//! # Barter-Pricing
//! Warrant bucket pricer for market making. For every derivative price level it infers the
//! range ("bucket") of underlying spot that the issuer associates with that price, by watching
//! which underlying spots hold while the derivative quote is tight.
//!
//! Every quote and spot observation is validated against the buckets already learned. The
//! outcome is a [`ViolationType`]: a contradiction means the issuer has repriced volatility
//! ([`ViolationType::UpVol`] / [`ViolationType::DownVol`]) or the buckets are inconsistent.
//!
//! ## Overview
//! * [`BucketPricer`] is the per derivative state machine, generic over a side specific
//!   [`PriceValidator`] ([`CallValidator`] or [`PutValidator`]).
//! * [`IntervalIndex`] stores the disjoint, price monotonic buckets.
//! * [`IntervalExtractor`](extractor::IntervalExtractor) settles spots that held for the
//!   issuer's lag.
//! * [`SpreadTable`] maps derivative prices to exchange ticks.
//! * [`PricerConfig`] carries the per derivative tunables and is deserialised from JSON.
//!
//! All prices and spots are fixed-point integers: underlying spots have 6 implicit decimal
//! places, derivative prices 3, delta and gamma 5.
//!
//! ## Example
//! ```rust,no_run
//! use barter_pricing::{
//!     CallBucketPricer, PricerConfig, PutOrCall, SpreadTable,
//!     pricer::{DerivTick, UndTick},
//!     violation::TriggerInfo,
//! };
//! use std::sync::Arc;
//!
//! let config = PricerConfig::new(5, 26525, PutOrCall::Call, 10).with_target_spread_in_tick(1);
//! let mut pricer = CallBucketPricer::new(config, Arc::new(SpreadTable::warrant())).unwrap();
//!
//! let quote = DerivTick::new(0, Some(100), Some(101), Some(100), Some(101), Some(1));
//! let violation = pricer.observe_deriv_tick(quote, TriggerInfo::default());
//! assert!(!violation.is_violation());
//!
//! let spot = UndTick::new(0, 11_650_000, true);
//! let result = pricer.observe_und_tick(spot, TriggerInfo::default());
//! println!("{result:?}: {pricer}");
//! ```

/// All [`Error`](std::error::Error)s generated in Barter-Pricing.
pub mod error;

/// Violation outcomes, option side and underlying tick direction.
pub mod violation;

/// Exchange spread table mapping derivative prices to ticks.
pub mod spread_table;

/// Spot ranges, buckets and the [`IntervalIndex`] storing them.
pub mod interval;

/// Option sensitivities and the adjusted delta derived from them.
pub mod greeks;

/// Spot history and the extraction of settled spot intervals.
pub mod extractor;

/// Call and put specific validation rules.
pub mod validator;

/// The [`BucketPricer`] state machine.
pub mod pricer;

/// Serde [`PricerConfig`].
pub mod config;

pub use config::{ExtrapolationMode, PricerConfig};
pub use error::PricerError;
pub use interval::{Interval, IntervalIndex, SpotRange};
pub use pricer::{BucketPricer, CallBucketPricer, PutBucketPricer};
pub use spread_table::SpreadTable;
pub use validator::{CallValidator, PriceValidator, PutValidator};
pub use violation::{PutOrCall, ViolationType};

/// Largest underlying spot a [`BucketPricer`] accepts.
pub const MAX_INTERVAL_VALUE: i64 = 4_294_967_295;
