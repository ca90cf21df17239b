//! CLI commands for the escrow service
//!
//! Implements all command handlers for the CLI interface. Built
//! transactions are printed as hex for an external wallet to sign; the
//! resulting transaction id is reported back with the `confirm` commands.

use crate::chain::load_parameters;
use crate::codec::{EscrowDatum, PlutusData};
use crate::config::AppConfig;
use crate::core::{Address, OutRef, ProtocolContext};
use crate::escrow::{
    BuiltTransaction, EscrowRecord, EscrowService, InitEscrow, MintSessionToken, NewSession, Party,
    Session,
};
use crate::storage::{JsonFileStore, StorageConfig};
use std::sync::Arc;
use uuid::Uuid;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub config: AppConfig,
    pub service: EscrowService,
    pub store: Arc<JsonFileStore>,
}

impl AppState {
    /// Load scripts, parameters and the store named in `config`
    pub async fn new(config: AppConfig) -> CliResult<Self> {
        let params = match &config.params {
            Some(params) => params.clone(),
            None => {
                let source = config.params_source();
                load_parameters(source.as_deref()).await
            }
        };
        let ctx = ProtocolContext::from_config(&config, params)?;

        let store = Arc::new(JsonFileStore::open(StorageConfig {
            data_dir: config.data_dir.clone(),
            ..Default::default()
        })?);
        let utxos = Arc::new(config.cached_provider()?);

        let service = EscrowService::new(ctx, utxos, store.clone())
            .with_reservation_ttl(config.reservation_ttl());

        Ok(Self {
            config,
            service,
            store,
        })
    }
}

// =============================================================================
// Sessions
// =============================================================================

pub async fn cmd_session_create(state: &AppState, request: NewSession) -> CliResult<()> {
    let session = state.service.create_session(request).await?;
    println!("✅ Session created!");
    print_session(&session);
    Ok(())
}

pub async fn cmd_session_show(state: &AppState, session_id: Uuid) -> CliResult<()> {
    let session = state.service.get_session(session_id).await?;
    print_session(&session);
    Ok(())
}

pub async fn cmd_session_list(state: &AppState) -> CliResult<()> {
    let sessions = state.service.list_sessions().await?;
    if sessions.is_empty() {
        println!("📋 No sessions yet.");
        return Ok(());
    }

    println!("📋 Sessions ({}):", sessions.len());
    for session in sessions {
        println!(
            "   {} {:<10} {} with {} ({} lovelace)",
            session.id, session.status, session.skill, session.provider_id, session.budget_lovelace
        );
    }
    Ok(())
}

fn print_session(session: &Session) {
    println!("📋 Session {}", session.id);
    println!("   ├─ Skill: {}", session.skill);
    println!("   ├─ Learner: {}", session.learner_id);
    println!("   ├─ Provider: {}", session.provider_id);
    println!("   ├─ Budget: {} lovelace", session.budget_lovelace);
    println!("   ├─ Duration: {} min", session.duration_minutes);
    println!("   └─ Status: {}", session.status);
}

// =============================================================================
// Escrow
// =============================================================================

pub async fn cmd_escrow_init(state: &AppState, request: InitEscrow) -> CliResult<()> {
    println!(
        "🔒 Building escrow lock of {} lovelace for session {}...",
        request.price_lovelace, request.session_id
    );
    let built = state.service.init_escrow(request).await?;
    print_built(&built);
    Ok(())
}

pub async fn cmd_escrow_confirm(
    state: &AppState,
    session_id: Uuid,
    tx_id: &str,
    utxo: Option<&str>,
) -> CliResult<()> {
    let utxo = utxo.map(|u| u.parse::<OutRef>()).transpose()?;
    let record = state
        .service
        .update_escrow_after_submit(session_id, tx_id, utxo)
        .await?;
    println!("✅ Escrow recorded as {}", record.status);
    print_record(&record);
    Ok(())
}

pub async fn cmd_escrow_status(state: &AppState, session_id: Uuid) -> CliResult<()> {
    let view = state.service.get_escrow_status(session_id).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

pub async fn cmd_escrow_attest(state: &AppState, session_id: Uuid, party: Party) -> CliResult<()> {
    let response = state.service.attest(session_id, party).await?;
    match &response.transaction {
        Some(built) => {
            println!("✍️  Built {} attestation", party);
            print_built(built);
        }
        None => println!("ℹ️  The {} has already attested this session", party),
    }
    if response.completes_pair {
        println!("   Once submitted, both parties will have attested.");
    } else if response.both_attested {
        println!("   Both parties have attested; the escrow can be claimed.");
    }
    Ok(())
}

pub async fn cmd_escrow_claim(state: &AppState, session_id: Uuid) -> CliResult<()> {
    let built = state.service.claim(session_id).await?;
    println!("💰 Built claim for session {}", session_id);
    print_built(&built);
    Ok(())
}

pub async fn cmd_escrow_refund(state: &AppState, session_id: Uuid) -> CliResult<()> {
    let built = state.service.refund(session_id).await?;
    println!("↩️  Built refund for session {}", session_id);
    print_built(&built);
    Ok(())
}

pub async fn cmd_escrow_confirm_spend(state: &AppState, session_id: Uuid, tx_id: &str) -> CliResult<()> {
    let record = state.service.confirm_spend(session_id, tx_id).await?;
    println!("✅ Spend confirmed, escrow is {}", record.status);
    print_record(&record);
    Ok(())
}

pub async fn cmd_escrow_abandon(state: &AppState, session_id: Uuid) -> CliResult<()> {
    if state.service.abandon(session_id).await? {
        println!("🗑️  Pending spend for session {} dropped", session_id);
    } else {
        println!("ℹ️  Session {} has no pending spend", session_id);
    }
    Ok(())
}

fn print_record(record: &EscrowRecord) {
    println!("   ├─ Session: {}", record.session_id);
    if let Some(utxo) = &record.utxo_ref {
        println!("   ├─ Script output: {}", utxo);
    }
    println!(
        "   ├─ Attested: learner={} mentor={}",
        record.datum.learner_attested, record.datum.mentor_attested
    );
    if let Some(settlement) = &record.settlement {
        println!("   ├─ Settlement: {:?}", settlement);
    }
    println!("   └─ Price: {} lovelace", record.price_lovelace);
}

fn print_built(built: &BuiltTransaction) {
    println!("   ├─ Transaction id: {}", built.tx_id);
    println!("   ├─ Fee: {} lovelace", built.fee);
    if let Some(address) = &built.script_address {
        println!("   ├─ Script address: {}", address);
    }
    if let Some(datum) = &built.datum_cbor {
        println!("   ├─ Datum: {}", datum);
    }
    if let Some(spends) = &built.spends {
        println!("   ├─ Spends: {}", spends);
    }
    println!("   └─ Unsigned transaction ({} bytes):", built.tx_hex.len() / 2);
    println!("{}", built.tx_hex);
}

// =============================================================================
// Session token
// =============================================================================

pub async fn cmd_nft_mint(state: &AppState, request: MintSessionToken) -> CliResult<()> {
    let session_id = request.session_id;
    let built = state.service.mint_session_token(request).await?;
    println!("🎖️  Built session token mint for {}", session_id);
    print_built(&built);
    Ok(())
}

pub async fn cmd_nft_confirm(state: &AppState, session_id: Uuid, tx_id: &str) -> CliResult<()> {
    let record = state.service.confirm_mint(session_id, tx_id).await?;
    println!(
        "✅ Session token recorded: {}",
        record.token_tx_id.as_deref().unwrap_or(tx_id)
    );
    Ok(())
}

// =============================================================================
// Store
// =============================================================================

pub async fn cmd_store_stats(state: &AppState) -> CliResult<()> {
    let stats = state.store.stats().await?;
    println!("💾 Store at {:?}", stats.data_dir);
    println!("   ├─ Sessions: {}", stats.sessions);
    println!("   ├─ Escrows: {}", stats.escrows);
    println!("   ├─ File size: {} bytes", stats.file_size);
    println!("   └─ Backups: {}", stats.backup_count);
    Ok(())
}

pub async fn cmd_store_restore(state: &AppState, index: usize) -> CliResult<()> {
    state.store.restore_backup(index).await?;
    println!("✅ Restored backup {}", index);
    Ok(())
}

// =============================================================================
// Offline inspection
// =============================================================================

pub fn cmd_address_inspect(address: &str) -> CliResult<()> {
    let parsed = Address::from_bech32(address)?;
    println!("🏷️  {}", address);
    println!("   ├─ Kind: {}", parsed.kind());
    println!("   ├─ Network id: {}", parsed.network_id());
    if let Some(payment) = parsed.payment_credential() {
        println!("   ├─ Payment credential: {}", serde_json::to_string(&payment)?);
    }
    if let Some(stake) = parsed.stake_credential() {
        println!("   ├─ Stake credential: {}", serde_json::to_string(&stake)?);
    }
    match parsed.payment_key_hash() {
        Ok(hash) => println!("   └─ Payment key hash: {}", hex::encode(hash)),
        Err(e) => println!("   └─ No payment key hash: {}", e),
    }
    Ok(())
}

/// Decode an escrow datum, falling back to generic Plutus data
pub fn cmd_datum_decode(cbor_hex: &str) -> CliResult<()> {
    match EscrowDatum::from_cbor_hex(cbor_hex) {
        Ok(datum) => {
            println!("📦 Escrow datum for session {}", datum.session_uuid());
            println!("{}", serde_json::to_string_pretty(&datum)?);
        }
        Err(e) => {
            println!("⚠️  Not an escrow datum: {}", e);
            let bytes = hex::decode(cbor_hex.trim())?;
            let data = PlutusData::from_cbor(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&data.to_detailed_json())?);
        }
    }
    Ok(())
}
