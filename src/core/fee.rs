//! Protocol parameters and the ledger fee model
//!
//! fee = minFeeA * size + minFeeB + ceil(priceMem * mem + priceStep * steps)
//!
//! The execution-unit term only applies to transactions that run scripts.
//! All rational arithmetic is done in `u128` so nothing rounds before the
//! final ceiling.

use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Static fallback used when no parameter source is reachable
pub const FALLBACK_MIN_FEE_A: u64 = 44;
pub const FALLBACK_MIN_FEE_B: u64 = 155_381;
pub const FALLBACK_MIN_UTXO_FLOOR: u64 = 2_000_000;
pub const FALLBACK_COLLATERAL_FLOOR: u64 = 5_000_000;
pub const FALLBACK_COINS_PER_UTXO_BYTE: u64 = 4_310;
pub const FALLBACK_MAX_TX_SIZE: u64 = 16_384;
pub const FALLBACK_COLLATERAL_PERCENT: u64 = 150;

/// Serialized size of one vkey witness (`[vkey, signature]`)
pub const VKEY_WITNESS_SIZE: u64 = 101;

/// Fixed per-output overhead the ledger adds before applying coinsPerUtxoByte
pub const UTXO_ENTRY_OVERHEAD: u64 = 160;

// =============================================================================
// Rational
// =============================================================================

/// Non-negative rational used for execution-unit prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: u64,
    pub denominator: u64,
}

impl Rational {
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Best rational approximation of a decimal price as reported by
    /// indexers (e.g. `0.0577`), with a power-of-ten denominator
    pub fn from_decimal(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let mut denominator: u64 = 1;
        let mut scaled = value;
        while (scaled - scaled.round()).abs() > 1e-6 && denominator < 1_000_000_000_000 {
            denominator *= 10;
            scaled = value * denominator as f64;
        }
        Some(Self::new(scaled.round() as u64, denominator))
    }
}

// =============================================================================
// Execution Units
// =============================================================================

/// Script execution budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExUnits {
    pub mem: u64,
    pub steps: u64,
}

impl ExUnits {
    pub const fn new(mem: u64, steps: u64) -> Self {
        Self { mem, steps }
    }

    pub fn saturating_add(self, other: ExUnits) -> ExUnits {
        ExUnits {
            mem: self.mem.saturating_add(other.mem),
            steps: self.steps.saturating_add(other.steps),
        }
    }
}

// =============================================================================
// Protocol Parameters
// =============================================================================

/// The subset of ledger parameters the builder depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    pub min_fee_a: u64,
    pub min_fee_b: u64,
    /// Floor for datum-bearing outputs
    pub min_utxo_floor: u64,
    /// Minimum ADA-only collateral input
    pub collateral_floor: u64,
    pub coins_per_utxo_byte: u64,
    pub max_tx_size: u64,
    pub price_mem: Rational,
    pub price_step: Rational,
    pub collateral_percent: u64,
    /// PlutusV2 cost model, needed for the script integrity hash
    #[serde(default)]
    pub cost_model_v2: Option<Vec<i64>>,
}

impl Default for ProtocolParameters {
    fn default() -> Self {
        Self {
            min_fee_a: FALLBACK_MIN_FEE_A,
            min_fee_b: FALLBACK_MIN_FEE_B,
            min_utxo_floor: FALLBACK_MIN_UTXO_FLOOR,
            collateral_floor: FALLBACK_COLLATERAL_FLOOR,
            coins_per_utxo_byte: FALLBACK_COINS_PER_UTXO_BYTE,
            max_tx_size: FALLBACK_MAX_TX_SIZE,
            price_mem: Rational::new(577, 10_000),
            price_step: Rational::new(721, 10_000_000),
            collateral_percent: FALLBACK_COLLATERAL_PERCENT,
            cost_model_v2: None,
        }
    }
}

impl ProtocolParameters {
    /// Size-dependent part of the fee
    pub fn linear_fee(&self, size_bytes: u64) -> u64 {
        self.min_fee_a
            .saturating_mul(size_bytes)
            .saturating_add(self.min_fee_b)
    }

    /// ceil(priceMem * mem + priceStep * steps)
    pub fn script_fee(&self, units: ExUnits) -> u64 {
        if units.mem == 0 && units.steps == 0 {
            return 0;
        }
        let pm = self.price_mem;
        let ps = self.price_step;
        let denominator = u128::from(pm.denominator.max(1)) * u128::from(ps.denominator.max(1));
        let numerator = u128::from(units.mem)
            * u128::from(pm.numerator)
            * u128::from(ps.denominator.max(1))
            + u128::from(units.steps) * u128::from(ps.numerator) * u128::from(pm.denominator.max(1));
        let fee = numerator.div_ceil(denominator);
        u64::try_from(fee).unwrap_or(u64::MAX)
    }

    /// Minimum fee for a transaction of `size_bytes` spending `units`
    pub fn min_fee(&self, size_bytes: u64, units: ExUnits) -> u64 {
        self.linear_fee(size_bytes)
            .saturating_add(self.script_fee(units))
    }

    /// Minimum lovelace an output of the given serialized size must carry
    pub fn min_ada_for_output(&self, output_size_bytes: u64) -> u64 {
        (UTXO_ENTRY_OVERHEAD + output_size_bytes).saturating_mul(self.coins_per_utxo_byte)
    }

    /// Collateral the ledger demands for a given fee
    pub fn required_collateral(&self, fee: u64) -> u64 {
        let needed = u128::from(fee) * u128::from(self.collateral_percent);
        u64::try_from(needed.div_ceil(100)).unwrap_or(u64::MAX)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_fee() {
        let params = ProtocolParameters::default();
        assert_eq!(params.linear_fee(0), 155_381);
        assert_eq!(params.linear_fee(300), 44 * 300 + 155_381);
    }

    #[test]
    fn test_script_fee_rounds_up() {
        let params = ProtocolParameters::default();
        // 1_400_000 * 0.0577 = 80780, 500_000_000 * 0.0000721 = 36050
        assert_eq!(params.script_fee(ExUnits::new(1_400_000, 500_000_000)), 116_830);
        // 1 * 0.0577 -> 1
        assert_eq!(params.script_fee(ExUnits::new(1, 0)), 1);
        assert_eq!(params.script_fee(ExUnits::default()), 0);
    }

    #[test]
    fn test_min_fee_combines_terms() {
        let params = ProtocolParameters::default();
        let units = ExUnits::new(1_400_000, 500_000_000);
        assert_eq!(
            params.min_fee(500, units),
            params.linear_fee(500) + params.script_fee(units)
        );
    }

    #[test]
    fn test_collateral_requirement() {
        let params = ProtocolParameters::default();
        assert_eq!(params.required_collateral(200_000), 300_000);
        assert_eq!(params.required_collateral(1), 2);
    }

    #[test]
    fn test_rational_from_decimal() {
        assert_eq!(Rational::from_decimal(0.0577), Some(Rational::new(577, 10_000)));
        assert_eq!(
            Rational::from_decimal(0.0000721),
            Some(Rational::new(721, 10_000_000))
        );
        assert!(Rational::from_decimal(-1.0).is_none());
    }

    #[test]
    fn test_min_ada_for_output() {
        let params = ProtocolParameters::default();
        assert_eq!(params.min_ada_for_output(65), 225 * 4_310);
    }
}
