//! Platform fee computation.
//!
//! Fee rates are held in basis points so that every split is computed exactly in integer arithmetic. A rate is
//! always within `[0%, 30%]`; out-of-range inputs are clamped rather than rejected.
use log::warn;
use serde::{Deserialize, Serialize};

use crate::db_types::{Amount, SupplierTier};

pub const MAX_FEE_BPS: i64 = 3_000;
const BPS_PER_UNIT: i128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeeRate(i64);

impl FeeRate {
    pub fn from_bps(bps: i64) -> Self {
        Self(bps.clamp(0, MAX_FEE_BPS))
    }

    pub fn from_percent(percent: f64) -> Self {
        if !percent.is_finite() {
            warn!("💰️ Fee percentage {percent} is not a number. Using 0%");
            return Self(0);
        }
        let bps = (percent * 100.0).round();
        // Saturate before the integer cast so that absurd inputs still clamp cleanly
        let bps = bps.clamp(0.0, MAX_FEE_BPS as f64) as i64;
        Self::from_bps(bps)
    }

    pub fn bps(&self) -> i64 {
        self.0
    }

    pub fn percent(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub platform_fee: Amount,
    pub supplier_payout: Amount,
}

/// Splits `total` into the platform fee and the supplier payout.
///
/// `fee = round(total * rate)`, rounding halves away from zero, and `payout = total - fee`, so the two parts always
/// add back up to the total.
pub fn calculate_fee(total: Amount, rate: FeeRate) -> FeeSplit {
    let numerator = i128::from(total.value()) * i128::from(rate.bps());
    let magnitude = (numerator.abs() + BPS_PER_UNIT / 2) / BPS_PER_UNIT;
    let fee = if numerator < 0 { -magnitude } else { magnitude };
    // |fee| <= |total| since the rate never exceeds 100%
    let platform_fee = Amount::from(fee as i64);
    FeeSplit { platform_fee, supplier_payout: total - platform_fee }
}

/// The platform's fee settings. Read-only for the lifetime of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub default_rate: FeeRate,
    pub bronze: FeeRate,
    pub silver: FeeRate,
    pub gold: FeeRate,
    pub platinum: FeeRate,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            default_rate: FeeRate::from_percent(10.0),
            bronze: FeeRate::from_percent(10.0),
            silver: FeeRate::from_percent(8.0),
            gold: FeeRate::from_percent(6.0),
            platinum: FeeRate::from_percent(4.0),
        }
    }
}

impl FeeSchedule {
    pub fn tier_rate(&self, tier: SupplierTier) -> FeeRate {
        match tier {
            SupplierTier::Bronze => self.bronze,
            SupplierTier::Silver => self.silver,
            SupplierTier::Gold => self.gold,
            SupplierTier::Platinum => self.platinum,
        }
    }

    /// A per-supplier override wins, then the supplier's tier, then the platform default.
    pub fn resolve(&self, custom: Option<FeeRate>, tier: Option<SupplierTier>) -> FeeRate {
        custom.or_else(|| tier.map(|t| self.tier_rate(t))).unwrap_or(self.default_rate)
    }
}
