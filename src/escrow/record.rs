//! Escrow record lifecycle
//!
//! One record per session, `pending -> locked -> completed -> settled`.
//! Status only moves forward; triggers from any other state are no-ops
//! that return the current status.

use crate::codec::datum::{EscrowDatum, EscrowRedeemer};
use crate::core::transaction::OutRef;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Locked,
    Completed,
    Settled,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Locked => "locked",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Settled => "settled",
        };
        write!(f, "{}", name)
    }
}

/// How a settled escrow was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    Claimed,
    Refunded,
}

/// A script spend that was built but not yet confirmed. While it is
/// fresh, the escrow output it consumes is reserved for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSpend {
    pub action: EscrowRedeemer,
    pub tx_id: String,
    pub spends: OutRef,
    /// Datum re-locked at output 0 by an attestation
    pub relock: Option<EscrowDatum>,
    pub built_at: DateTime<Utc>,
}

impl PendingSpend {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.built_at >= ttl
    }
}

/// Off-chain view of the escrow bound to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub session_id: Uuid,
    /// Current script output, set once the lock is observed
    pub utxo_ref: Option<OutRef>,
    pub status: EscrowStatus,
    pub learner_address: String,
    pub mentor_address: String,
    pub price_lovelace: u64,
    /// Datum carried by the current script output
    pub datum: EscrowDatum,
    pub lock_tx_id: Option<String>,
    pub pending: Option<PendingSpend>,
    pub settlement: Option<Settlement>,
    pub token_tx_id: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowRecord {
    pub fn pending(
        session_id: Uuid,
        learner_address: impl Into<String>,
        mentor_address: impl Into<String>,
        datum: EscrowDatum,
    ) -> Self {
        Self {
            session_id,
            utxo_ref: None,
            status: EscrowStatus::Pending,
            learner_address: learner_address.into(),
            mentor_address: mentor_address.into(),
            price_lovelace: datum.price_lovelace,
            datum,
            lock_tx_id: None,
            pending: None,
            settlement: None,
            token_tx_id: None,
            locked_at: None,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Only a record whose lock has not been observed may be replaced by
    /// a new init
    pub fn can_reinit(&self) -> bool {
        self.status == EscrowStatus::Pending
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// The lock transaction landed at `out_ref`
    pub fn on_tx_observed(&mut self, out_ref: OutRef) -> EscrowStatus {
        if self.status == EscrowStatus::Pending {
            self.status = EscrowStatus::Locked;
            self.utxo_ref = Some(out_ref);
            self.lock_tx_id = Some(out_ref.tx_hash_hex());
            self.locked_at = Some(Utc::now());
            self.touch();
        }
        self.status
    }

    /// An attestation moved the script output; follow it
    pub fn track_output(&mut self, out_ref: OutRef, datum: EscrowDatum) -> bool {
        if !matches!(self.status, EscrowStatus::Locked | EscrowStatus::Completed) {
            return false;
        }
        self.utxo_ref = Some(out_ref);
        self.datum = datum;
        self.touch();
        true
    }

    pub fn on_dual_attestation(&mut self) -> EscrowStatus {
        if self.status == EscrowStatus::Locked {
            self.status = EscrowStatus::Completed;
            self.completed_at = Some(Utc::now());
            self.touch();
        }
        self.status
    }

    /// Claim or refund consumed the script output
    pub fn on_claim_or_refund_observed(&mut self, settlement: Settlement) -> EscrowStatus {
        if matches!(self.status, EscrowStatus::Locked | EscrowStatus::Completed) {
            self.status = EscrowStatus::Settled;
            self.settlement = Some(settlement);
            self.utxo_ref = None;
            self.touch();
        }
        self.status
    }

    /// The unconfirmed spend currently holding the script output, if any
    pub fn active_reservation(&self, now: DateTime<Utc>, ttl: Duration) -> Option<&PendingSpend> {
        self.pending
            .as_ref()
            .filter(|p| Some(p.spends) == self.utxo_ref && !p.is_expired(now, ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EscrowRecord {
        let id = Uuid::new_v4();
        let datum = EscrowDatum::new([1; 28], [2; 28], 10_000_000, &id, [3; 28]);
        EscrowRecord::pending(id, "addr_test1l", "addr_test1m", datum)
    }

    fn out(seed: u8) -> OutRef {
        OutRef::new([seed; 32], 0)
    }

    #[test]
    fn test_forward_path() {
        let mut r = record();
        assert!(r.can_reinit());
        assert_eq!(r.on_tx_observed(out(1)), EscrowStatus::Locked);
        assert_eq!(r.lock_tx_id, Some(hex::encode([1u8; 32])));
        assert!(!r.can_reinit());
        assert_eq!(r.on_dual_attestation(), EscrowStatus::Completed);
        assert_eq!(
            r.on_claim_or_refund_observed(Settlement::Claimed),
            EscrowStatus::Settled
        );
        assert_eq!(r.settlement, Some(Settlement::Claimed));
    }

    #[test]
    fn test_status_never_regresses() {
        type Step = fn(&mut EscrowRecord) -> EscrowStatus;
        let steps: [Step; 4] = [
            |r| r.on_tx_observed(OutRef::new([9; 32], 0)),
            |r| r.on_dual_attestation(),
            |r| r.on_claim_or_refund_observed(Settlement::Claimed),
            |r| {
                r.track_output(OutRef::new([8; 32], 0), r.datum);
                r.status
            },
        ];

        // every sequence of four steps, repeats allowed
        for code in 0..4usize.pow(4) {
            let mut r = record();
            let mut previous = r.status;
            let mut c = code;
            for _ in 0..4 {
                let status = steps[c % 4](&mut r);
                assert!(status >= previous, "regressed on sequence {}", code);
                previous = status;
                c /= 4;
            }
        }
    }

    #[test]
    fn test_track_output_only_while_live() {
        let mut r = record();
        let datum = r.datum.with_learner_attested();
        assert!(!r.track_output(out(2), datum));

        r.on_tx_observed(out(1));
        assert!(r.track_output(out(2), datum));
        assert_eq!(r.utxo_ref, Some(out(2)));
        assert!(r.datum.learner_attested);
    }

    #[test]
    fn test_reservation_expiry() {
        let mut r = record();
        r.on_tx_observed(out(1));
        let built_at = Utc::now();
        r.pending = Some(PendingSpend {
            action: EscrowRedeemer::AttestByLearner,
            tx_id: "ab".repeat(32),
            spends: out(1),
            relock: None,
            built_at,
        });

        let ttl = Duration::minutes(10);
        assert!(r.active_reservation(built_at, ttl).is_some());
        assert!(r
            .active_reservation(built_at + Duration::minutes(11), ttl)
            .is_none());

        // reservation on an output the record no longer tracks is void
        r.utxo_ref = Some(out(5));
        assert!(r.active_reservation(built_at, ttl).is_none());
    }
}
