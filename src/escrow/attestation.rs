//! Dual attestation gate
//!
//! Flags are always read from the datum of the current script output,
//! never from the order of off-chain calls. An attestation re-encodes that
//! datum with one flag set and every other field carried forward.

use crate::codec::datum::{EscrowDatum, EscrowRedeemer};
use crate::crypto::hash::HASH28_LEN;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A session participant who can attest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Learner,
    Mentor,
}

impl Party {
    pub fn redeemer(&self) -> EscrowRedeemer {
        match self {
            Party::Learner => EscrowRedeemer::AttestByLearner,
            Party::Mentor => EscrowRedeemer::AttestByMentor,
        }
    }

    pub fn has_attested(&self, datum: &EscrowDatum) -> bool {
        match self {
            Party::Learner => datum.learner_attested,
            Party::Mentor => datum.mentor_attested,
        }
    }

    /// Key hash the validator expects as signer
    pub fn key_hash(&self, datum: &EscrowDatum) -> [u8; HASH28_LEN] {
        match self {
            Party::Learner => datum.learner_key_hash,
            Party::Mentor => datum.mentor_key_hash,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Learner => write!(f, "learner"),
            Party::Mentor => write!(f, "mentor"),
        }
    }
}

impl FromStr for Party {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "learner" => Ok(Party::Learner),
            "mentor" | "provider" => Ok(Party::Mentor),
            other => Err(format!("unknown party '{}'", other)),
        }
    }
}

/// Result of recording one attestation against the current datum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attestation {
    /// Datum to re-lock with
    pub datum: EscrowDatum,
    pub both_attested: bool,
    /// The party had already attested; nothing needs to be spent
    pub already_attested: bool,
    /// This attestation is the one that completes the pair
    pub completes_pair: bool,
}

/// Why a settlement is not permitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRefusal {
    ClaimNeedsBothAttestations {
        learner_attested: bool,
        mentor_attested: bool,
    },
    RefundAfterCompletion,
}

impl fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRefusal::ClaimNeedsBothAttestations {
                learner_attested,
                mentor_attested,
            } => write!(
                f,
                "claim requires both attestations (learner: {}, mentor: {})",
                learner_attested, mentor_attested
            ),
            GateRefusal::RefundAfterCompletion => {
                write!(f, "both parties attested; the escrow can only be claimed")
            }
        }
    }
}

pub struct AttestationGate;

impl AttestationGate {
    pub fn record_attestation(current: &EscrowDatum, party: Party) -> Attestation {
        let already_attested = party.has_attested(current);
        let datum = match party {
            Party::Learner => current.with_learner_attested(),
            Party::Mentor => current.with_mentor_attested(),
        };
        Attestation {
            datum,
            both_attested: datum.both_attested(),
            already_attested,
            completes_pair: datum.both_attested() && !current.both_attested(),
        }
    }

    pub fn check_claim(current: &EscrowDatum) -> Result<(), GateRefusal> {
        if current.both_attested() {
            Ok(())
        } else {
            Err(GateRefusal::ClaimNeedsBothAttestations {
                learner_attested: current.learner_attested,
                mentor_attested: current.mentor_attested,
            })
        }
    }

    pub fn check_refund(current: &EscrowDatum) -> Result<(), GateRefusal> {
        if current.both_attested() {
            Err(GateRefusal::RefundAfterCompletion)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn fresh() -> EscrowDatum {
        EscrowDatum::new([1; 28], [2; 28], 10_000_000, &Uuid::new_v4(), [3; 28])
    }

    #[test]
    fn test_learner_then_mentor() {
        let start = fresh();
        let first = AttestationGate::record_attestation(&start, Party::Learner);
        assert!(!first.both_attested);
        assert!(!first.completes_pair);
        assert!(first.datum.learner_attested);

        let second = AttestationGate::record_attestation(&first.datum, Party::Mentor);
        assert!(second.both_attested);
        assert!(second.completes_pair);
        // the learner flag survives the mentor's re-lock
        assert!(second.datum.learner_attested);
        assert_eq!(second.datum.price_lovelace, start.price_lovelace);
        assert_eq!(second.datum.receiver_key_hash, start.receiver_key_hash);
    }

    #[test]
    fn test_repeat_is_harmless() {
        let both = fresh().with_learner_attested().with_mentor_attested();
        let again = AttestationGate::record_attestation(&both, Party::Learner);
        assert!(again.already_attested);
        assert!(again.both_attested);
        assert!(!again.completes_pair);
        assert_eq!(again.datum, both);
    }

    #[test]
    fn test_settlement_gates() {
        let half = fresh().with_mentor_attested();
        assert!(matches!(
            AttestationGate::check_claim(&half),
            Err(GateRefusal::ClaimNeedsBothAttestations {
                learner_attested: false,
                mentor_attested: true
            })
        ));
        assert!(AttestationGate::check_refund(&half).is_ok());

        let both = half.with_learner_attested();
        assert!(AttestationGate::check_claim(&both).is_ok());
        assert_eq!(
            AttestationGate::check_refund(&both),
            Err(GateRefusal::RefundAfterCompletion)
        );
    }

    #[test]
    fn test_party_parsing() {
        assert_eq!("Mentor".parse::<Party>().unwrap(), Party::Mentor);
        assert_eq!("provider".parse::<Party>().unwrap(), Party::Mentor);
        assert!("observer".parse::<Party>().is_err());
        assert_eq!(Party::Learner.redeemer().index(), 0);
        assert_eq!(Party::Mentor.redeemer().index(), 1);
    }
}
