//! Session escrow
//!
//! This module contains:
//! - The session state machine
//! - The off-chain escrow record and its state machine
//! - The attestation gate deciding attest, claim and refund
//! - Per-session locks
//! - `EscrowService`, which ties them to the builder, chain and store

pub mod attestation;
pub mod locks;
pub mod record;
pub mod service;
pub mod session;

pub use attestation::{Attestation, AttestationGate, GateRefusal, Party};
pub use locks::{SessionLocks, DEFAULT_RESERVATION_TTL_SECS};
pub use record::{EscrowRecord, EscrowStatus, PendingSpend, Settlement};
pub use service::{
    AttestResponse, BuiltTransaction, EscrowPhase, EscrowService, EscrowStatusView, InitEscrow,
    MintSessionToken, TxAction,
};
pub use session::{NewSession, Session, SessionStatus, DEFAULT_DURATION_MINUTES};
