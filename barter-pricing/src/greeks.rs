use serde::{Deserialize, Serialize};

/// Option sensitivities supplied by the pricing model, all fixed-point.
///
/// `delta` and `gamma` carry 5 implicit decimal places, `ref_spot`, `bid` and `ask` carry 3.
/// Zero means "not available".
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Greeks {
    pub delta: i32,
    pub gamma: i32,
    pub vega: i32,
    pub implied_vol: i32,
    pub bid_implied_vol: i32,
    pub ask_implied_vol: i32,
    pub ref_spot: i32,
    pub bid: i32,
    pub ask: i32,
}

/// Latest [`Greeks`] snapshot plus the gamma correction used for every bucket width and
/// extrapolation distance.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct ObservedGreeks {
    greeks: Greeks,
    updated_ns: i64,
    partial_adj_delta: i64,
    ready: bool,
}

impl ObservedGreeks {
    /// Replace the snapshot. The snapshot is ready for use only while its delta is non-zero.
    pub fn merge(&mut self, time_ns: i64, greeks: Greeks) {
        self.greeks = greeks;
        self.updated_ns = time_ns;
        self.partial_adj_delta = -i64::from(greeks.ref_spot) * 1000 * i64::from(greeks.gamma)
            + i64::from(greeks.delta) * 1_000_000;
        self.ready = greeks.delta != 0;
    }

    /// Delta linearised by gamma around the reference spot, evaluated at underlying `spot`
    /// (6dp). Result has 5 implicit decimal places.
    pub fn calculate_adj_delta(&self, spot: i64) -> i64 {
        (spot * i64::from(self.greeks.gamma) + self.partial_adj_delta) / 1_000_000
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn has_ref_spot(&self) -> bool {
        self.greeks.ref_spot != 0
    }

    pub fn has_delta(&self) -> bool {
        self.greeks.delta != 0
    }

    pub fn greeks(&self) -> &Greeks {
        &self.greeks
    }

    pub fn delta(&self) -> i32 {
        self.greeks.delta
    }

    pub fn gamma(&self) -> i32 {
        self.greeks.gamma
    }

    pub fn ref_spot(&self) -> i32 {
        self.greeks.ref_spot
    }

    pub fn updated_ns(&self) -> i64 {
        self.updated_ns
    }
}
