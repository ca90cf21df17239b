//! Deterministic coin selection
//!
//! Largest-first over lovelace with ties broken by output reference, so the
//! same UTXO set always yields the same transaction. Collateral is chosen
//! separately: the smallest ADA-only output that meets the floor.

use super::transaction::{OutRef, Utxo};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;

/// How the builder draws wallet inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Add the largest remaining output until the draft balances
    #[default]
    LargestFirst,
    /// Consume every supplied wallet output, consolidating into one change output
    SpendAll,
}

/// Spendable candidates ordered largest-first, skipping excluded references
pub fn largest_first<'a>(available: &'a [Utxo], exclude: &HashSet<OutRef>) -> Vec<&'a Utxo> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<&Utxo> = available
        .iter()
        .filter(|u| !exclude.contains(&u.out_ref))
        .filter(|u| seen.insert(u.out_ref))
        .collect();
    candidates.sort_by_key(|u| (Reverse(u.value.coin), u.out_ref));
    candidates
}

/// Smallest ADA-only output holding at least `minimum` lovelace
pub fn select_collateral(available: &[Utxo], minimum: u64) -> Option<Utxo> {
    available
        .iter()
        .filter(|u| u.value.is_ada_only() && u.value.coin >= minimum && u.inline_datum.is_none())
        .min_by_key(|u| (u.value.coin, u.out_ref))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::{AssetId, Value};

    fn utxo(seed: u8, coin: u64) -> Utxo {
        Utxo::new(OutRef::new([seed; 32], 0), "addr_test1", Value::lovelace(coin))
    }

    #[test]
    fn test_largest_first_with_tiebreak() {
        let set = vec![utxo(3, 5), utxo(1, 10), utxo(2, 10), utxo(4, 1)];
        let order: Vec<u8> = largest_first(&set, &HashSet::new())
            .iter()
            .map(|u| u.out_ref.tx_hash[0])
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_largest_first_excludes_and_dedups() {
        let set = vec![utxo(1, 10), utxo(1, 10), utxo(2, 3)];
        let exclude: HashSet<OutRef> = [OutRef::new([2; 32], 0)].into_iter().collect();
        let picked = largest_first(&set, &exclude);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].out_ref.tx_hash, [1; 32]);
    }

    #[test]
    fn test_collateral_prefers_smallest_ada_only() {
        let token = AssetId::new([7; 28], b"t".to_vec());
        let mut with_token = utxo(1, 6_000_000);
        with_token.value = with_token.value.with_asset(token, 1);
        let set = vec![with_token, utxo(2, 50_000_000), utxo(3, 5_000_000), utxo(4, 4_999_999)];

        let chosen = select_collateral(&set, 5_000_000).unwrap();
        assert_eq!(chosen.out_ref.tx_hash, [3; 32]);
        assert!(select_collateral(&set, 60_000_000).is_none());
    }
}
