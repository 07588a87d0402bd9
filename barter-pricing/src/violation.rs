use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// Outcome of every observation fed into a [`BucketPricer`](crate::pricer::BucketPricer).
///
/// Violations are values: only [`ViolationType::Error`] signals that the pricer caught an
/// unexpected failure and its state should not be trusted for decisions right now.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    #[default]
    #[display("NO_VIOLATION")]
    NoViolation,
    #[display("INCONSISTENT")]
    Inconsistent,
    #[display("DOWN_VOL")]
    DownVol,
    #[display("UP_VOL")]
    UpVol,
    #[display("PRICE_OVERLAPPED")]
    PriceOverlapped,
    #[display("BUCKET_TOO_BIG")]
    BucketTooBig,
    #[display("ERROR")]
    Error,
}

impl ViolationType {
    pub fn is_violation(&self) -> bool {
        *self != ViolationType::NoViolation
    }
}

/// Option side of the derivative, which determines the direction of every monotonicity rule.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum PutOrCall {
    #[display("CALL")]
    Call,
    #[display("PUT")]
    Put,
}

/// Two bit mask of the underlying spot directions observed since the last trusted quote.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub struct TickDirection(u8);

impl TickDirection {
    pub const UNKNOWN: Self = Self(0);
    pub const UP: Self = Self(1);
    pub const DOWN: Self = Self(2);

    pub fn is_up(&self) -> bool {
        self.0 & Self::UP.0 != 0
    }

    pub fn is_down(&self) -> bool {
        self.0 & Self::DOWN.0 != 0
    }

    /// Fold in the direction of `spot` relative to `reference`. An absent reference sits below
    /// every spot.
    pub fn observe(&mut self, spot: i64, reference: Option<i64>) {
        if Some(spot) < reference {
            *self |= Self::DOWN;
        }
        if Some(spot) > reference {
            *self |= Self::UP;
        }
    }
}

impl BitOr for TickDirection {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TickDirection {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Identifies the upstream event that caused an observation, carried into every audit log line.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
    Constructor,
)]
pub struct TriggerInfo {
    pub seq_num: u64,
    pub time_ns: i64,
}
