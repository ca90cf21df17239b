//! Escrow service
//!
//! The operations the HTTP layer calls. Each build returns an unsigned
//! transaction for an external wallet; nothing is signed or submitted
//! here. State only changes when the caller reports a submitted
//! transaction back (`update_escrow_after_submit`, `confirm_spend`).
//!
//! All work on a session's escrow output runs under that session's lock,
//! and a built-but-unconfirmed spend reserves the output until it is
//! confirmed, abandoned or its reservation expires.

use super::attestation::{AttestationGate, Party};
use super::locks::{SessionLocks, DEFAULT_RESERVATION_TTL_SECS};
use super::record::{EscrowRecord, EscrowStatus, PendingSpend, Settlement};
use super::session::{NewSession, Session, SessionStatus};
use crate::chain::{CachedProvider, Freshness};
use crate::codec::datum::{EscrowDatum, EscrowRedeemer, MintRedeemer};
use crate::codec::metadata::SessionTokenMetadata;
use crate::core::{
    payment_key_hash, select_collateral, BuilderError, MintRequest, OutRef, ProtocolContext,
    Receiver, ScriptSpend, TransactionBuilder, TransactionDraft, TxOutput, Utxo,
};
use crate::crypto::hash::{hex_to_array, HASH32_LEN};
use crate::error::EscrowError;
use crate::storage::EscrowStore;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// Requests and responses
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxAction {
    Lock,
    Attest,
    Claim,
    Refund,
    Mint,
}

/// An unsigned transaction ready for the external signer
#[derive(Debug, Clone, Serialize)]
pub struct BuiltTransaction {
    pub session_id: Uuid,
    pub action: TxAction,
    /// Hex-encoded CBOR of the unsigned transaction
    pub tx_hex: String,
    pub tx_id: String,
    pub fee: u64,
    pub script_address: Option<String>,
    pub datum: Option<EscrowDatum>,
    pub datum_cbor: Option<String>,
    /// Script output consumed, for spends
    pub spends: Option<OutRef>,
    /// The draft itself, for backends that apply transactions locally
    #[serde(skip)]
    pub draft: TransactionDraft,
}

impl BuiltTransaction {
    fn new(session_id: Uuid, action: TxAction, draft: &TransactionDraft) -> Self {
        Self {
            session_id,
            action,
            tx_hex: draft.to_hex(),
            tx_id: draft.tx_id_hex(),
            fee: draft.fee,
            script_address: None,
            datum: None,
            datum_cbor: None,
            spends: None,
            draft: draft.clone(),
        }
    }

    fn with_datum(mut self, script_address: &str, datum: EscrowDatum) -> Self {
        self.script_address = Some(script_address.to_string());
        self.datum_cbor = Some(datum.to_cbor_hex());
        self.datum = Some(datum);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitEscrow {
    pub session_id: Uuid,
    pub learner_address: String,
    pub mentor_address: String,
    pub price_lovelace: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttestResponse {
    pub party: Party,
    pub both_attested: bool,
    pub already_attested: bool,
    /// This attestation is the one that sets the second flag
    pub completes_pair: bool,
    /// Absent when the party had already attested
    pub transaction: Option<BuiltTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintSessionToken {
    pub session_id: Uuid,
    /// Pays for the mint and receives the token
    pub recipient_address: String,
    pub image_cid: Option<String>,
    pub metadata_cid: Option<String>,
}

/// Escrow phase as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowPhase {
    Locked,
    InSession,
    Completed,
    PaidOut,
}

impl EscrowPhase {
    pub fn from_states(session: SessionStatus, escrow: Option<EscrowStatus>) -> Self {
        match (session, escrow) {
            (SessionStatus::Paid, _) => EscrowPhase::PaidOut,
            (SessionStatus::Completed, _) => EscrowPhase::Completed,
            (SessionStatus::Active, Some(EscrowStatus::Locked)) => EscrowPhase::InSession,
            _ => EscrowPhase::Locked,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EscrowStatusView {
    pub session_id: Uuid,
    pub status: EscrowPhase,
    pub session_status: SessionStatus,
    pub escrow_status: Option<EscrowStatus>,
    pub tx_id: Option<String>,
    pub utxo: Option<OutRef>,
    pub learner_attested: bool,
    pub mentor_attested: bool,
    pub settlement: Option<Settlement>,
    pub locked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Service
// =============================================================================

pub struct EscrowService {
    ctx: ProtocolContext,
    utxos: Arc<CachedProvider>,
    store: Arc<dyn EscrowStore>,
    locks: SessionLocks,
    reservation_ttl: Duration,
}

impl EscrowService {
    pub fn new(ctx: ProtocolContext, utxos: Arc<CachedProvider>, store: Arc<dyn EscrowStore>) -> Self {
        Self {
            ctx,
            utxos,
            store,
            locks: SessionLocks::new(),
            reservation_ttl: Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        }
    }

    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    pub fn context(&self) -> &ProtocolContext {
        &self.ctx
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn create_session(&self, request: NewSession) -> Result<Session, EscrowError> {
        request.validate().map_err(EscrowError::Validation)?;
        let session = Session::create(request);
        self.store.put_session(&session).await?;
        info!(
            "Created session {} ({} with {})",
            session.id, session.skill, session.provider_id
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Session, EscrowError> {
        self.store
            .get_session(&session_id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("session {}", session_id)))
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, EscrowError> {
        Ok(self.store.list_sessions().await?)
    }

    async fn get_escrow(&self, session_id: Uuid) -> Result<EscrowRecord, EscrowError> {
        self.store
            .get_escrow(&session_id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("escrow for session {}", session_id)))
    }

    // =========================================================================
    // Escrow lifecycle
    // =========================================================================

    /// Build the transaction locking the session price at the escrow
    /// script. Re-running before the lock is confirmed replaces the
    /// pending record.
    pub async fn init_escrow(&self, request: InitEscrow) -> Result<BuiltTransaction, EscrowError> {
        if request.price_lovelace == 0 {
            return Err(EscrowError::Validation("price must be positive".to_string()));
        }
        let _guard = self.locks.acquire(request.session_id).await;

        let session = self.get_session(request.session_id).await?;
        if session.status >= SessionStatus::Completed {
            return Err(EscrowError::Conflict(format!(
                "session {} is already {}",
                session.id, session.status
            )));
        }
        if let Some(existing) = self.store.get_escrow(&session.id).await? {
            if !existing.can_reinit() {
                return Err(EscrowError::Conflict(format!(
                    "escrow for session {} is already {}",
                    session.id, existing.status
                )));
            }
        }

        let learner_key_hash = payment_key_hash(&request.learner_address)?;
        let mentor_key_hash = payment_key_hash(&request.mentor_address)?;
        let receiver = self.receiver()?;
        let script_address = self.escrow_address()?;

        let datum = EscrowDatum::new(
            learner_key_hash,
            mentor_key_hash,
            request.price_lovelace,
            &session.id,
            receiver.key_hash,
        );

        let wallet = self.wallet_utxos(&request.learner_address).await?;
        let draft = TransactionBuilder::new(&self.ctx).build_lock(
            &wallet,
            &request.learner_address,
            &script_address,
            request.price_lovelace,
            &datum.to_plutus_data(),
        )?;

        let record = EscrowRecord::pending(
            session.id,
            request.learner_address,
            request.mentor_address,
            datum,
        );
        self.store.upsert_escrow(&record).await?;

        info!(
            "Built escrow lock for session {}: {} lovelace, fee {}",
            session.id, request.price_lovelace, draft.fee
        );
        Ok(BuiltTransaction::new(session.id, TxAction::Lock, &draft).with_datum(&script_address, datum))
    }

    /// Record that the lock transaction was submitted. `utxo` defaults to
    /// output 0 of `tx_id`, where the lock output is always placed.
    pub async fn update_escrow_after_submit(
        &self,
        session_id: Uuid,
        tx_id: &str,
        utxo: Option<OutRef>,
    ) -> Result<EscrowRecord, EscrowError> {
        let tx_hash = parse_tx_id(tx_id)?;
        let out_ref = utxo.unwrap_or(OutRef::new(tx_hash, 0));
        if out_ref.tx_hash != tx_hash {
            return Err(EscrowError::Validation(format!(
                "output {} does not belong to transaction {}",
                out_ref, tx_id
            )));
        }

        let _guard = self.locks.acquire(session_id).await;
        let mut session = self.get_session(session_id).await?;
        let mut record = self.get_escrow(session_id).await?;

        self.invalidate(&record.learner_address).await;

        let before = record.status;
        record.on_tx_observed(out_ref);
        if record.status == before {
            debug!("Escrow for {} already {}, ignoring lock report", session_id, before);
            if record.status >= EscrowStatus::Locked {
                self.sync_session(session, Session::on_escrow_locked).await?;
            }
            return Ok(record);
        }

        // Session first: if the record write fails, the report can be retried
        session.on_escrow_locked();
        self.store.put_session(&session).await?;
        self.store.upsert_escrow(&record).await?;
        info!("Escrow for session {} locked at {}", session_id, out_ref);
        Ok(record)
    }

    pub async fn get_escrow_status(&self, session_id: Uuid) -> Result<EscrowStatusView, EscrowError> {
        let session = self.get_session(session_id).await?;
        let record = self.store.get_escrow(&session_id).await?;

        Ok(EscrowStatusView {
            session_id,
            status: EscrowPhase::from_states(session.status, record.as_ref().map(|r| r.status)),
            session_status: session.status,
            escrow_status: record.as_ref().map(|r| r.status),
            tx_id: record.as_ref().and_then(|r| r.lock_tx_id.clone()),
            utxo: record.as_ref().and_then(|r| r.utxo_ref),
            learner_attested: record.as_ref().is_some_and(|r| r.datum.learner_attested),
            mentor_attested: record.as_ref().is_some_and(|r| r.datum.mentor_attested),
            settlement: record.as_ref().and_then(|r| r.settlement),
            locked_at: record.as_ref().and_then(|r| r.locked_at),
            completed_at: record.as_ref().and_then(|r| r.completed_at),
        })
    }

    // =========================================================================
    // Script spends
    // =========================================================================

    /// Build `party`'s attestation: spend the escrow output and re-lock the
    /// same value with that party's flag set
    pub async fn attest(&self, session_id: Uuid, party: Party) -> Result<AttestResponse, EscrowError> {
        let _guard = self.locks.acquire(session_id).await;
        let mut record = self.live_escrow(session_id).await?;
        let (script_utxo, onchain) = self.current_script_output(&record).await?;

        let attestation = AttestationGate::record_attestation(&onchain, party);
        if attestation.already_attested {
            if onchain.both_attested() {
                // confirmation of the completing attestation was missed
                self.mark_completed(&mut record).await?;
            }
            debug!("{} already attested session {}", party, session_id);
            return Ok(AttestResponse {
                party,
                both_attested: attestation.both_attested,
                already_attested: true,
                completes_pair: false,
                transaction: None,
            });
        }

        let script_address = self.escrow_address()?;
        let signer = match party {
            Party::Learner => record.learner_address.clone(),
            Party::Mentor => record.mentor_address.clone(),
        };
        let relock = TxOutput::new(&script_address, script_utxo.value.clone())
            .map_err(BuilderError::from)?
            .with_inline_datum(attestation.datum.to_plutus_data());

        let draft = self
            .build_spend(
                &script_utxo,
                party.redeemer(),
                &signer,
                vec![relock],
                party.key_hash(&onchain),
            )
            .await?;

        self.reserve(&mut record, party.redeemer(), &draft, &script_utxo, Some(attestation.datum))
            .await?;

        info!(
            "Built {} attestation for session {} (both attested: {})",
            party, session_id, attestation.both_attested
        );
        Ok(AttestResponse {
            party,
            both_attested: attestation.both_attested,
            already_attested: false,
            completes_pair: attestation.completes_pair,
            transaction: Some(
                BuiltTransaction::new(session_id, TxAction::Attest, &draft)
                    .with_datum(&script_address, attestation.datum),
            ),
        })
    }

    /// Build the settlement paying the whole escrowed value to the
    /// configured receiver. Requires both attestations on chain.
    pub async fn claim(&self, session_id: Uuid) -> Result<BuiltTransaction, EscrowError> {
        let _guard = self.locks.acquire(session_id).await;
        let mut record = self.live_escrow(session_id).await?;
        let (script_utxo, onchain) = self.current_script_output(&record).await?;

        AttestationGate::check_claim(&onchain)
            .map_err(|refusal| EscrowError::Validation(refusal.to_string()))?;
        let receiver = self.receiver()?;
        if receiver.key_hash != onchain.receiver_key_hash {
            return Err(EscrowError::Validation(
                "configured receiver does not match the receiver in the escrow datum".to_string(),
            ));
        }

        let payout = TxOutput::new(&receiver.address, script_utxo.value.clone())
            .map_err(BuilderError::from)?;
        let mentor = record.mentor_address.clone();
        let draft = self
            .build_spend(
                &script_utxo,
                EscrowRedeemer::ClaimFunds,
                &mentor,
                vec![payout],
                onchain.mentor_key_hash,
            )
            .await?;

        self.reserve(&mut record, EscrowRedeemer::ClaimFunds, &draft, &script_utxo, None)
            .await?;
        info!(
            "Built claim for session {}: {} lovelace to {}",
            session_id, script_utxo.value.coin, receiver.address
        );

        let mut built = BuiltTransaction::new(session_id, TxAction::Claim, &draft);
        built.spends = Some(script_utxo.out_ref);
        Ok(built)
    }

    /// Build the refund returning the escrowed value to the learner.
    /// Refused once both parties have attested.
    pub async fn refund(&self, session_id: Uuid) -> Result<BuiltTransaction, EscrowError> {
        let _guard = self.locks.acquire(session_id).await;
        let mut record = self.live_escrow(session_id).await?;
        let (script_utxo, onchain) = self.current_script_output(&record).await?;

        AttestationGate::check_refund(&onchain)
            .map_err(|refusal| EscrowError::Validation(refusal.to_string()))?;

        let learner = record.learner_address.clone();
        let payback =
            TxOutput::new(&learner, script_utxo.value.clone()).map_err(BuilderError::from)?;
        let draft = self
            .build_spend(
                &script_utxo,
                EscrowRedeemer::Refund,
                &learner,
                vec![payback],
                onchain.learner_key_hash,
            )
            .await?;

        self.reserve(&mut record, EscrowRedeemer::Refund, &draft, &script_utxo, None)
            .await?;
        info!("Built refund for session {}", session_id);

        let mut built = BuiltTransaction::new(session_id, TxAction::Refund, &draft);
        built.spends = Some(script_utxo.out_ref);
        Ok(built)
    }

    /// Record that the reserved spend was submitted and advance the state
    /// machines accordingly
    pub async fn confirm_spend(&self, session_id: Uuid, tx_id: &str) -> Result<EscrowRecord, EscrowError> {
        let tx_hash = parse_tx_id(tx_id)?;
        let _guard = self.locks.acquire(session_id).await;
        let mut record = self.get_escrow(session_id).await?;

        let pending = record.pending.clone().ok_or_else(|| {
            EscrowError::NotFound(format!("no pending spend for session {}", session_id))
        })?;
        if pending.tx_id != hex::encode(tx_hash) {
            return Err(EscrowError::Validation(format!(
                "transaction {} is not the pending {} spend {}",
                tx_id, pending.action, pending.tx_id
            )));
        }
        if record.utxo_ref != Some(pending.spends) {
            record.pending = None;
            self.store.upsert_escrow(&record).await?;
            return Err(EscrowError::Conflict(format!(
                "pending spend consumed {} but the escrow now sits at {:?}",
                pending.spends, record.utxo_ref
            )));
        }

        self.invalidate(&record.learner_address).await;
        self.invalidate(&record.mentor_address).await;

        let mut session = self.get_session(session_id).await?;
        record.pending = None;
        match pending.action {
            EscrowRedeemer::AttestByLearner | EscrowRedeemer::AttestByMentor => {
                let datum = pending.relock.ok_or_else(|| {
                    EscrowError::Validation("attestation spend has no re-locked datum".to_string())
                })?;
                record.track_output(OutRef::new(tx_hash, 0), datum);
                if datum.both_attested() {
                    record.on_dual_attestation();
                    session.on_dual_attestation();
                }
            }
            EscrowRedeemer::ClaimFunds => {
                record.on_claim_or_refund_observed(Settlement::Claimed);
                session.on_settlement();
            }
            EscrowRedeemer::Refund => {
                record.on_claim_or_refund_observed(Settlement::Refunded);
            }
        }

        // Session first: `pending` stays stored until the record write
        // succeeds, so a failed confirmation can be retried
        self.store.put_session(&session).await?;
        self.store.upsert_escrow(&record).await?;
        info!(
            "Confirmed {} for session {}: escrow {}, session {}",
            pending.action, session_id, record.status, session.status
        );
        Ok(record)
    }

    /// Drop an unsubmitted spend, releasing the escrow output
    pub async fn abandon(&self, session_id: Uuid) -> Result<bool, EscrowError> {
        let _guard = self.locks.acquire(session_id).await;
        let mut record = self.get_escrow(session_id).await?;
        let Some(pending) = record.pending.take() else {
            return Ok(false);
        };
        self.store.upsert_escrow(&record).await?;
        info!("Abandoned {} spend {} for session {}", pending.action, pending.tx_id, session_id);
        Ok(true)
    }

    // =========================================================================
    // Session token
    // =========================================================================

    /// Build the proof-of-session token mint for a completed session
    pub async fn mint_session_token(&self, request: MintSessionToken) -> Result<BuiltTransaction, EscrowError> {
        let session = self.get_session(request.session_id).await?;
        if session.status < SessionStatus::Completed {
            return Err(EscrowError::Validation(format!(
                "session {} is {}; tokens are minted after both attestations",
                session.id, session.status
            )));
        }
        let record = self.store.get_escrow(&session.id).await?;

        let policy = self
            .ctx
            .mint_policy
            .as_ref()
            .ok_or(BuilderError::ScriptNotLoaded("session token policy"))?;
        let asset_name = session.id.simple().to_string();
        let metadata = SessionTokenMetadata {
            policy_id: policy.hash(),
            asset_name: asset_name.clone(),
            skill: session.skill.clone(),
            provider: session.provider_id.clone(),
            budget_lovelace: session.budget_lovelace,
            duration_minutes: session.duration_minutes,
            session_date: session.created_at,
            escrow_ref: record
                .as_ref()
                .and_then(|r| r.lock_tx_id.as_ref())
                .map(|tx| format!("{}#0", tx)),
            image_cid: request.image_cid,
            metadata_cid: request.metadata_cid,
        };

        let wallet = self.wallet_utxos(&request.recipient_address).await?;
        let collateral = select_collateral(&wallet, self.ctx.params.collateral_floor);
        let draft = TransactionBuilder::new(&self.ctx).build_mint(MintRequest {
            payer_utxos: &wallet,
            payer_address: &request.recipient_address,
            recipient_address: &request.recipient_address,
            asset_name: asset_name.into_bytes(),
            quantity: 1,
            redeemer: MintRedeemer::new(&session.id).to_plutus_data(),
            collateral,
            metadata: Some(metadata.to_auxiliary_data()),
        })?;

        info!("Built session token mint for {}", session.id);
        Ok(BuiltTransaction::new(session.id, TxAction::Mint, &draft))
    }

    /// Remember the submitted mint on the escrow record
    pub async fn confirm_mint(&self, session_id: Uuid, tx_id: &str) -> Result<EscrowRecord, EscrowError> {
        let tx_hash = parse_tx_id(tx_id)?;
        let _guard = self.locks.acquire(session_id).await;
        let mut record = self.get_escrow(session_id).await?;
        record.token_tx_id = Some(hex::encode(tx_hash));
        self.store.upsert_escrow(&record).await?;
        Ok(record)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn receiver(&self) -> Result<&Receiver, EscrowError> {
        self.ctx.receiver.as_ref().ok_or_else(|| {
            EscrowError::Validation("no settlement receiver address configured".to_string())
        })
    }

    fn escrow_address(&self) -> Result<String, EscrowError> {
        match self.ctx.escrow_address() {
            Some(address) => Ok(address?),
            None => Err(BuilderError::ScriptNotLoaded("escrow validator").into()),
        }
    }

    async fn invalidate(&self, wallet: &str) {
        self.utxos.invalidate(wallet).await;
        if let Ok(script) = self.escrow_address() {
            self.utxos.invalidate(&script).await;
        }
    }

    /// Outputs at `address`. A listing the backend could not produce at
    /// all is an error, never an empty wallet.
    async fn wallet_utxos(&self, address: &str) -> Result<Vec<Utxo>, EscrowError> {
        let listing = self.utxos.fetch(address).await?;
        if listing.freshness == Freshness::Unavailable {
            return Err(EscrowError::ExternalServiceDegraded(format!(
                "no UTXO data available for {}",
                address
            )));
        }
        Ok(listing.utxos)
    }

    /// Escrow record that is locked on chain and not reserved by another build
    async fn live_escrow(&self, session_id: Uuid) -> Result<EscrowRecord, EscrowError> {
        let record = self.get_escrow(session_id).await?;
        match record.status {
            EscrowStatus::Locked | EscrowStatus::Completed => {}
            EscrowStatus::Pending => {
                return Err(EscrowError::Conflict(format!(
                    "escrow for session {} is not locked yet",
                    session_id
                )))
            }
            EscrowStatus::Settled => {
                return Err(EscrowError::Conflict(format!(
                    "escrow for session {} is already settled",
                    session_id
                )))
            }
        }
        if let Some(pending) = record.active_reservation(Utc::now(), self.reservation_ttl) {
            return Err(EscrowError::Conflict(format!(
                "escrow output is reserved by unconfirmed {} transaction {}",
                pending.action, pending.tx_id
            )));
        }
        Ok(record)
    }

    /// The script output the record tracks, with its decoded datum
    async fn current_script_output(&self, record: &EscrowRecord) -> Result<(Utxo, EscrowDatum), EscrowError> {
        let out_ref = record.utxo_ref.ok_or_else(|| {
            EscrowError::Conflict(format!("escrow for {} has no script output", record.session_id))
        })?;
        let script_address = self.escrow_address()?;
        let mut listing = self.utxos.fetch(&script_address).await?;
        if listing.freshness == Freshness::Cached && !listing.utxos.iter().any(|u| u.out_ref == out_ref) {
            // snapshot may predate the output; ask the backend before calling it spent
            debug!("Escrow output {} not in cached listing, refreshing", out_ref);
            self.utxos.invalidate(&script_address).await;
            listing = self.utxos.fetch(&script_address).await?;
        }

        let Some(utxo) = listing.utxos.into_iter().find(|u| u.out_ref == out_ref) else {
            if listing.freshness.is_degraded() {
                return Err(EscrowError::ExternalServiceDegraded(format!(
                    "cannot confirm escrow output {} is unspent",
                    out_ref
                )));
            }
            warn!("Escrow output {} for {} is no longer unspent", out_ref, record.session_id);
            return Err(EscrowError::Conflict(format!(
                "escrow output {} has already been spent",
                out_ref
            )));
        };

        let datum_hex = utxo.inline_datum.as_deref().ok_or_else(|| {
            EscrowError::Codec(crate::codec::CodecError::MalformedDatum(format!(
                "escrow output {} carries no inline datum",
                out_ref
            )))
        })?;
        let datum = EscrowDatum::from_cbor_hex(datum_hex)?;
        if datum.session_uuid() != record.session_id {
            return Err(EscrowError::Validation(format!(
                "escrow output {} belongs to session {}",
                out_ref,
                datum.session_uuid()
            )));
        }
        Ok((utxo, datum))
    }

    async fn build_spend(
        &self,
        script_utxo: &Utxo,
        redeemer: EscrowRedeemer,
        signer_address: &str,
        outputs: Vec<TxOutput>,
        signer_key_hash: [u8; 28],
    ) -> Result<TransactionDraft, EscrowError> {
        let wallet = self.wallet_utxos(signer_address).await?;
        let collateral = select_collateral(&wallet, self.ctx.params.collateral_floor);
        let draft = TransactionBuilder::new(&self.ctx).build_script_spend(ScriptSpend {
            script_utxo,
            redeemer,
            signer_address,
            signer_utxos: &wallet,
            collateral,
            outputs,
            required_signers: vec![signer_key_hash],
        })?;
        Ok(draft)
    }

    async fn reserve(
        &self,
        record: &mut EscrowRecord,
        action: EscrowRedeemer,
        draft: &TransactionDraft,
        script_utxo: &Utxo,
        relock: Option<EscrowDatum>,
    ) -> Result<(), EscrowError> {
        record.pending = Some(PendingSpend {
            action,
            tx_id: draft.tx_id_hex(),
            spends: script_utxo.out_ref,
            relock,
            built_at: Utc::now(),
        });
        self.store.upsert_escrow(record).await?;
        Ok(())
    }

    async fn mark_completed(&self, record: &mut EscrowRecord) -> Result<(), EscrowError> {
        let session = self.get_session(record.session_id).await?;
        self.sync_session(session, Session::on_dual_attestation).await?;
        let before = record.status;
        if record.on_dual_attestation() != before {
            self.store.upsert_escrow(record).await?;
        }
        Ok(())
    }

    /// Apply an idempotent session transition and store it if it moved
    async fn sync_session(
        &self,
        mut session: Session,
        transition: fn(&mut Session) -> SessionStatus,
    ) -> Result<(), EscrowError> {
        let before = session.status;
        if transition(&mut session) != before {
            info!("Session {} caught up to {}", session.id, session.status);
            self.store.put_session(&session).await?;
        }
        Ok(())
    }
}

fn parse_tx_id(tx_id: &str) -> Result<[u8; HASH32_LEN], EscrowError> {
    hex_to_array::<HASH32_LEN>(tx_id)
        .ok_or_else(|| EscrowError::Validation(format!("invalid transaction id '{}'", tx_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_mapping() {
        use EscrowPhase::*;
        assert_eq!(EscrowPhase::from_states(SessionStatus::Initiated, None), Locked);
        assert_eq!(
            EscrowPhase::from_states(SessionStatus::Initiated, Some(EscrowStatus::Pending)),
            Locked
        );
        assert_eq!(
            EscrowPhase::from_states(SessionStatus::Active, Some(EscrowStatus::Locked)),
            InSession
        );
        assert_eq!(
            EscrowPhase::from_states(SessionStatus::Completed, Some(EscrowStatus::Completed)),
            Completed
        );
        assert_eq!(
            EscrowPhase::from_states(SessionStatus::Paid, Some(EscrowStatus::Settled)),
            PaidOut
        );
    }

    #[test]
    fn test_parse_tx_id() {
        assert_eq!(parse_tx_id(&"ab".repeat(32)).unwrap(), [0xab; 32]);
        assert!(matches!(parse_tx_id("abc"), Err(EscrowError::Validation(_))));
    }
}
