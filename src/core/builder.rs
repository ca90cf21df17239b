//! Transaction builder
//!
//! Produces balanced, unsigned drafts for the three shapes the escrow
//! protocol needs:
//! - `build_lock`: pay into the escrow script with an inline datum
//! - `build_script_spend`: consume the escrow output under a redeemer
//! - `build_mint`: mint the session token under the Plutus policy
//!
//! Balancing draws wallet inputs according to the context's
//! [`SelectionStrategy`], then iterates the fee to a fixed point: every
//! change to the output set changes the size, which changes the fee.
//! Nothing here retries or touches persisted state.

use super::address::{Address, AddressError, Credential};
use super::context::ProtocolContext;
use super::fee::ProtocolParameters;
use super::selection::{largest_first, SelectionStrategy};
use super::transaction::{
    OutRef, Redeemer, RedeemerTag, TransactionDraft, TransactionError, TxOutput, Utxo,
};
use super::value::{AssetId, Value, MAX_ASSET_NAME_LEN};
use crate::codec::datum::EscrowRedeemer;
use crate::codec::metadata::AuxiliaryData;
use crate::codec::plutus_data::PlutusData;
use crate::crypto::hash::HASH28_LEN;
use log::{debug, warn};
use std::collections::HashSet;
use thiserror::Error;

/// Upper bound on fee fixed-point iterations
pub const MAX_FEE_ITERATIONS: usize = 8;

/// Builder errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error("Insufficient funds: have {available} lovelace, need {required}")]
    InsufficientFunds { available: u64, required: u64 },
    #[error("Missing collateral: an ADA-only input of at least {floor} lovelace is required")]
    MissingCollateral { floor: u64 },
    #[error("Invalid collateral: {0}")]
    InvalidCollateral(String),
    #[error("Script not loaded: {0}")]
    ScriptNotLoaded(&'static str),
    #[error("Address decode error: {0}")]
    AddressDecode(#[from] AddressError),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Input {0} is not locked by the escrow validator")]
    NotAScriptOutput(String),
    #[error("Fee did not converge after {0} iterations")]
    FeeDidNotConverge(usize),
    #[error("Transaction too large: {size} bytes, limit {max}")]
    TxTooLarge { size: u64, max: u64 },
    #[error("Balance could not be achieved: {0}")]
    Transaction(#[from] TransactionError),
}

// =============================================================================
// Requests
// =============================================================================

/// Spend of the escrow output
#[derive(Debug, Clone)]
pub struct ScriptSpend<'a> {
    pub script_utxo: &'a Utxo,
    pub redeemer: EscrowRedeemer,
    pub signer_address: &'a str,
    pub signer_utxos: &'a [Utxo],
    pub collateral: Option<Utxo>,
    /// Outputs the validator expects (re-lock or payout); change is added
    pub outputs: Vec<TxOutput>,
    pub required_signers: Vec<[u8; HASH28_LEN]>,
}

/// Mint of a single asset under the loaded policy
#[derive(Debug, Clone)]
pub struct MintRequest<'a> {
    pub payer_utxos: &'a [Utxo],
    pub payer_address: &'a str,
    pub recipient_address: &'a str,
    pub asset_name: Vec<u8>,
    pub quantity: u64,
    pub redeemer: PlutusData,
    pub collateral: Option<Utxo>,
    pub metadata: Option<AuxiliaryData>,
}

// =============================================================================
// Transaction Builder
// =============================================================================

pub struct TransactionBuilder<'a> {
    ctx: &'a ProtocolContext,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(ctx: &'a ProtocolContext) -> Self {
        Self { ctx }
    }

    fn params(&self) -> &ProtocolParameters {
        &self.ctx.params
    }

    /// Lock `amount` at `lock_address` with an inline datum.
    ///
    /// The locked output is raised to the datum-output floor when `amount`
    /// is below it.
    pub fn build_lock(
        &self,
        payer_utxos: &[Utxo],
        payer_address: &str,
        lock_address: &str,
        amount: u64,
        datum: &PlutusData,
    ) -> Result<TransactionDraft, BuilderError> {
        if amount == 0 {
            return Err(BuilderError::InvalidAmount(
                "lock amount must be positive".to_string(),
            ));
        }
        let change_address = Address::from_bech32(payer_address)?;

        let mut output = TxOutput {
            address: Address::from_bech32(lock_address)?,
            value: Value::lovelace(amount),
            inline_datum: Some(datum.clone()),
        };
        output.value.coin = amount.max(self.datum_output_floor(&output));
        if output.value.coin > amount {
            debug!(
                "Raised locked output from {} to {} lovelace",
                amount, output.value.coin
            );
        }

        let mut draft = TransactionDraft::new();
        draft.outputs.push(output);
        self.balance(draft, payer_utxos, &change_address, HashSet::new(), None, 1)
    }

    /// Consume the escrow output under `redeemer`, funding the fee from the
    /// signer's wallet. Collateral is mandatory: every escrow redeemer runs
    /// the validator.
    pub fn build_script_spend(&self, spend: ScriptSpend<'_>) -> Result<TransactionDraft, BuilderError> {
        let script = self
            .ctx
            .escrow_script
            .as_ref()
            .ok_or(BuilderError::ScriptNotLoaded("escrow validator"))?;
        let script_hash = script.hash();

        let locked_by = Address::from_bech32(&spend.script_utxo.address)?.payment_credential();
        if locked_by != Some(Credential::Script(script_hash)) {
            return Err(BuilderError::NotAScriptOutput(
                spend.script_utxo.out_ref.to_string(),
            ));
        }

        let collateral = self.check_collateral(spend.collateral)?;
        let change_address = Address::from_bech32(spend.signer_address)?;
        self.warn_without_cost_model();

        let mut required_signers = spend.required_signers;
        required_signers.sort();
        required_signers.dedup();
        let signers = required_signers.len().max(1);

        let script_ref = spend.script_utxo.out_ref;
        let mut draft = TransactionDraft::new();
        draft.inputs.push(spend.script_utxo.clone());
        draft.outputs = spend.outputs;
        draft.collateral.push(collateral.clone());
        draft.required_signers = required_signers;
        draft.scripts.push(script.clone());
        draft.redeemers.push(Redeemer {
            tag: RedeemerTag::Spend,
            index: 0,
            data: spend.redeemer.to_plutus_data(),
            ex_units: self.ctx.budgets.for_redeemer(spend.redeemer),
        });

        let built = self.balance_beside_collateral(
            draft,
            spend.signer_utxos,
            &change_address,
            &collateral,
            Some(script_ref),
            signers,
        )?;
        self.check_collateral_covers_fee(&collateral, built.fee)?;
        debug!(
            "Built {} spend of {} with fee {}",
            spend.redeemer, script_ref, built.fee
        );
        Ok(built)
    }

    /// Mint `quantity` of `asset_name` under the loaded policy and send it to
    /// the recipient at the datum-output floor.
    pub fn build_mint(&self, request: MintRequest<'_>) -> Result<TransactionDraft, BuilderError> {
        let policy = self
            .ctx
            .mint_policy
            .as_ref()
            .ok_or(BuilderError::ScriptNotLoaded("session token policy"))?;
        if request.quantity == 0 {
            return Err(BuilderError::InvalidAmount(
                "mint quantity must be positive".to_string(),
            ));
        }
        let quantity = i64::try_from(request.quantity).map_err(|_| {
            BuilderError::InvalidAmount(format!("mint quantity {} too large", request.quantity))
        })?;
        if request.asset_name.len() > MAX_ASSET_NAME_LEN {
            return Err(BuilderError::InvalidAmount(format!(
                "asset name is {} bytes, limit {}",
                request.asset_name.len(),
                MAX_ASSET_NAME_LEN
            )));
        }

        let collateral = self.check_collateral(request.collateral)?;
        let change_address = Address::from_bech32(request.payer_address)?;
        self.warn_without_cost_model();

        let asset = AssetId::new(policy.hash(), request.asset_name);
        let mut output = TxOutput {
            address: Address::from_bech32(request.recipient_address)?,
            value: Value::lovelace(0).with_asset(asset.clone(), request.quantity),
            inline_datum: None,
        };
        output.value.coin = self.datum_output_floor(&output);

        let mut draft = TransactionDraft::new();
        draft.outputs.push(output);
        draft.mint.insert(asset, quantity);
        draft.collateral.push(collateral.clone());
        draft.scripts.push(policy.clone());
        draft.redeemers.push(Redeemer {
            tag: RedeemerTag::Mint,
            index: 0,
            data: request.redeemer,
            ex_units: self.ctx.budgets.mint,
        });
        draft.auxiliary_data = request.metadata;

        let built = self.balance_beside_collateral(
            draft,
            request.payer_utxos,
            &change_address,
            &collateral,
            None,
            1,
        )?;
        self.check_collateral_covers_fee(&collateral, built.fee)?;
        Ok(built)
    }

    // =========================================================================
    // Balancing
    // =========================================================================

    /// Protocol floor for outputs carrying a datum or tokens
    fn datum_output_floor(&self, output: &TxOutput) -> u64 {
        let params = self.params();
        params
            .min_utxo_floor
            .max(params.min_ada_for_output(output.encoded_size()))
    }

    fn check_collateral(&self, collateral: Option<Utxo>) -> Result<Utxo, BuilderError> {
        let floor = self.params().collateral_floor;
        let collateral = collateral.ok_or(BuilderError::MissingCollateral { floor })?;
        if !collateral.value.is_ada_only() {
            return Err(BuilderError::InvalidCollateral(format!(
                "{} carries native assets",
                collateral.out_ref
            )));
        }
        if collateral.value.coin < floor {
            return Err(BuilderError::InvalidCollateral(format!(
                "{} holds {} lovelace, floor is {}",
                collateral.out_ref, collateral.value.coin, floor
            )));
        }
        Ok(collateral)
    }

    fn check_collateral_covers_fee(&self, collateral: &Utxo, fee: u64) -> Result<(), BuilderError> {
        let required = self.params().required_collateral(fee);
        if collateral.value.coin < required {
            return Err(BuilderError::InvalidCollateral(format!(
                "{} lovelace does not cover {}% of fee {}",
                collateral.value.coin,
                self.params().collateral_percent,
                fee
            )));
        }
        Ok(())
    }

    fn warn_without_cost_model(&self) {
        if self.params().cost_model_v2.is_none() {
            warn!("No PlutusV2 cost model available; script data hash will be omitted");
        }
    }

    /// Balance keeping the collateral out of the inputs when the rest of the
    /// wallet can pay. A wallet that cannot pay without it also spends the
    /// collateral output as a regular input.
    fn balance_beside_collateral(
        &self,
        draft: TransactionDraft,
        wallet: &[Utxo],
        change_address: &Address,
        collateral: &Utxo,
        script_input: Option<OutRef>,
        signers: usize,
    ) -> Result<TransactionDraft, BuilderError> {
        let exclude: HashSet<OutRef> = [collateral.out_ref].into_iter().collect();
        match self.balance(
            draft.clone(),
            wallet,
            change_address,
            exclude,
            script_input,
            signers,
        ) {
            Err(BuilderError::InsufficientFunds { .. })
                if wallet.iter().any(|u| u.out_ref == collateral.out_ref) =>
            {
                debug!(
                    "Wallet short without collateral {}, spending it as an input",
                    collateral.out_ref
                );
                self.balance(
                    draft,
                    wallet,
                    change_address,
                    HashSet::new(),
                    script_input,
                    signers,
                )
            }
            other => other,
        }
    }

    fn balance(
        &self,
        mut draft: TransactionDraft,
        wallet: &[Utxo],
        change_address: &Address,
        mut exclude: HashSet<OutRef>,
        script_input: Option<OutRef>,
        signers: usize,
    ) -> Result<TransactionDraft, BuilderError> {
        exclude.extend(draft.inputs.iter().map(|u| u.out_ref));
        let mut remaining = largest_first(wallet, &exclude).into_iter().peekable();

        if self.ctx.selection == SelectionStrategy::SpendAll {
            draft.inputs.extend(remaining.by_ref().cloned());
        }

        loop {
            let can_grow = remaining.peek().is_some();
            if let Some(done) =
                self.finalize(&draft, change_address, script_input, signers, can_grow)?
            {
                done.verify_balance()?;
                let size = done.estimated_size(signers);
                let max = self.params().max_tx_size;
                if size > max {
                    return Err(BuilderError::TxTooLarge { size, max });
                }
                return Ok(done);
            }
            match remaining.next() {
                Some(utxo) => draft.inputs.push(utxo.clone()),
                None => return Err(self.insufficient(&draft, signers)),
            }
        }
    }

    /// One attempt at closing the draft with its current inputs. `None` means
    /// more inputs are needed.
    fn finalize(
        &self,
        draft: &TransactionDraft,
        change_address: &Address,
        script_input: Option<OutRef>,
        signers: usize,
        can_grow: bool,
    ) -> Result<Option<TransactionDraft>, BuilderError> {
        let params = self.params();
        let (minted, burned) = draft.mint_split();
        let consumed = draft
            .total_input()?
            .checked_add(&minted)
            .ok_or(TransactionError::ValueOverflow("consumed"))?;
        let produced = draft
            .total_output()?
            .checked_add(&burned)
            .ok_or(TransactionError::ValueOverflow("produced"))?;
        let surplus = match consumed.checked_sub(&produced) {
            Some(surplus) => surplus,
            None => return Ok(None),
        };

        let mut fee = 0;
        for _ in 0..MAX_FEE_ITERATIONS {
            let change = match surplus.checked_sub(&Value::lovelace(fee)) {
                Some(change) => change,
                None => return Ok(None),
            };

            let mut candidate = draft.clone();
            candidate.fee = fee;

            if change.coin > 0 || !change.is_ada_only() {
                let output = TxOutput {
                    address: change_address.clone(),
                    value: change.clone(),
                    inline_datum: None,
                };
                let min_change = params.min_ada_for_output(output.encoded_size());
                if change.coin < min_change {
                    if can_grow || !change.is_ada_only() {
                        return Ok(None);
                    }
                    // dust residual goes to the fee
                    candidate.fee = surplus.coin;
                    self.seal(&mut candidate, script_input);
                    let needed =
                        params.min_fee(candidate.estimated_size(signers), candidate.total_ex_units());
                    return Ok((needed <= candidate.fee).then_some(candidate));
                }
                candidate.outputs.push(output);
            }

            self.seal(&mut candidate, script_input);
            let needed = params.min_fee(candidate.estimated_size(signers), candidate.total_ex_units());
            if needed <= fee {
                return Ok(Some(candidate));
            }
            fee = needed;
        }

        Err(BuilderError::FeeDidNotConverge(MAX_FEE_ITERATIONS))
    }

    /// Canonical input order, spend redeemer index and integrity hash
    fn seal(&self, draft: &mut TransactionDraft, script_input: Option<OutRef>) {
        draft.sort_inputs();
        if let Some(script_ref) = script_input {
            if let Some(index) = draft.input_index(&script_ref) {
                for redeemer in draft
                    .redeemers
                    .iter_mut()
                    .filter(|r| r.tag == RedeemerTag::Spend)
                {
                    redeemer.index = index;
                }
            }
        }
        draft.script_data_hash = self
            .params()
            .cost_model_v2
            .as_deref()
            .and_then(|costs| draft.compute_script_data_hash(costs));
    }

    fn insufficient(&self, draft: &TransactionDraft, signers: usize) -> BuilderError {
        let available = draft.total_input().map(|v| v.coin).unwrap_or(u64::MAX);
        let outputs = draft.total_output().map(|v| v.coin).unwrap_or(u64::MAX);
        let fee = self
            .params()
            .min_fee(draft.estimated_size(signers), draft.total_ex_units());
        BuilderError::InsufficientFunds {
            available,
            required: outputs.saturating_add(fee),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::datum::{EscrowDatum, MintRedeemer};
    use crate::codec::cbor::Encoder;
    use crate::core::address::Network;
    use crate::core::fee::ProtocolParameters;
    use crate::core::script::PlutusScript;
    use uuid::Uuid;

    const ADA: u64 = 1_000_000;

    fn wallet_address() -> String {
        Address::base_key([0x11; 28], [0x12; 28], Network::Preprod)
            .to_bech32()
            .unwrap()
    }

    fn receiver_address() -> String {
        Address::base_key([0x33; 28], [0x34; 28], Network::Preprod)
            .to_bech32()
            .unwrap()
    }

    fn script(program: u8) -> PlutusScript {
        let mut inner = Encoder::new();
        inner.bytes(&[0x01, 0x00, program]);
        PlutusScript::from_cbor_hex(&hex::encode(inner.into_bytes())).unwrap()
    }

    fn context() -> ProtocolContext {
        ProtocolContext::new(Network::Preprod, ProtocolParameters::default())
            .with_escrow_script(script(0x01))
            .with_mint_policy(script(0x02))
    }

    fn wallet_utxo(seed: u8, coin: u64) -> Utxo {
        Utxo::new(OutRef::new([seed; 32], 0), wallet_address(), Value::lovelace(coin))
    }

    fn datum() -> EscrowDatum {
        EscrowDatum::new([0x11; 28], [0x22; 28], 10 * ADA, &Uuid::new_v4(), [0x33; 28])
    }

    fn script_utxo(ctx: &ProtocolContext, coin: u64) -> Utxo {
        let address = ctx.escrow_address().unwrap().unwrap();
        Utxo::new(OutRef::new([0xee; 32], 0), address, Value::lovelace(coin))
            .with_inline_datum(datum().to_cbor_hex())
    }

    #[test]
    fn test_lock_balances_with_change() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let lock_address = ctx.escrow_address().unwrap().unwrap();
        let payer = vec![wallet_utxo(1, 100 * ADA), wallet_utxo(2, 50 * ADA)];

        let draft = builder
            .build_lock(&payer, &wallet_address(), &lock_address, 10 * ADA, &datum().to_plutus_data())
            .unwrap();

        assert!(draft.verify_balance().is_ok());
        assert!(draft.fee > 0);
        assert_eq!(draft.inputs.len(), 1);
        assert_eq!(draft.inputs[0].value.coin, 100 * ADA);
        assert_eq!(draft.outputs.len(), 2);
        assert_eq!(draft.outputs[0].value.coin, 10 * ADA);
        assert!(draft.outputs[0].inline_datum.is_some());
        assert_eq!(draft.outputs[1].value.coin, 90 * ADA - draft.fee);
        assert!(draft.fee >= ctx.params.min_fee(draft.estimated_size(1), Default::default()));
    }

    #[test]
    fn test_lock_spend_all_consolidates() {
        let ctx = context().with_selection(SelectionStrategy::SpendAll);
        let builder = TransactionBuilder::new(&ctx);
        let lock_address = ctx.escrow_address().unwrap().unwrap();
        let payer = vec![wallet_utxo(1, 100 * ADA), wallet_utxo(2, 50 * ADA)];

        let draft = builder
            .build_lock(&payer, &wallet_address(), &lock_address, 10 * ADA, &datum().to_plutus_data())
            .unwrap();

        assert_eq!(draft.inputs.len(), 2);
        assert_eq!(draft.outputs[1].value.coin, 140 * ADA - draft.fee);
        assert!(draft.verify_balance().is_ok());
    }

    #[test]
    fn test_lock_raises_to_floor() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let lock_address = ctx.escrow_address().unwrap().unwrap();
        let payer = vec![wallet_utxo(1, 20 * ADA)];

        let draft = builder
            .build_lock(&payer, &wallet_address(), &lock_address, 1, &datum().to_plutus_data())
            .unwrap();
        assert!(draft.outputs[0].value.coin >= ctx.params.min_utxo_floor);
        assert!(draft.verify_balance().is_ok());
    }

    #[test]
    fn test_lock_insufficient_funds() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let lock_address = ctx.escrow_address().unwrap().unwrap();
        let payer = vec![wallet_utxo(1, 5 * ADA), wallet_utxo(2, 5 * ADA)];

        let err = builder
            .build_lock(&payer, &wallet_address(), &lock_address, 10 * ADA, &datum().to_plutus_data())
            .unwrap_err();
        match err {
            BuilderError::InsufficientFunds { available, required } => {
                assert_eq!(available, 10 * ADA);
                assert!(required > 10 * ADA);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lock_folds_dust_into_fee() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let lock_address = ctx.escrow_address().unwrap().unwrap();
        // residual after the fee is far below the change floor
        let payer = vec![wallet_utxo(1, 10 * ADA + 300_000)];

        let draft = builder
            .build_lock(&payer, &wallet_address(), &lock_address, 10 * ADA, &datum().to_plutus_data())
            .unwrap();
        assert_eq!(draft.outputs.len(), 1);
        assert_eq!(draft.fee, 300_000);
        assert!(draft.verify_balance().is_ok());
    }

    #[test]
    fn test_lock_rejects_bad_payer_address() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let lock_address = ctx.escrow_address().unwrap().unwrap();
        let err = builder
            .build_lock(&[], "addr_bogus", &lock_address, ADA, &datum().to_plutus_data())
            .unwrap_err();
        assert!(matches!(err, BuilderError::AddressDecode(_)));
    }

    #[test]
    fn test_script_spend_requires_collateral() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let locked = script_utxo(&ctx, 10 * ADA);
        let wallet = vec![wallet_utxo(1, 20 * ADA)];

        let err = builder
            .build_script_spend(ScriptSpend {
                script_utxo: &locked,
                redeemer: EscrowRedeemer::ClaimFunds,
                signer_address: &wallet_address(),
                signer_utxos: &wallet,
                collateral: None,
                outputs: vec![TxOutput::new(&receiver_address(), Value::lovelace(10 * ADA)).unwrap()],
                required_signers: vec![[0x11; 28]],
            })
            .unwrap_err();
        assert_eq!(err, BuilderError::MissingCollateral { floor: 5 * ADA });
    }

    #[test]
    fn test_script_spend_rejects_token_collateral() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let locked = script_utxo(&ctx, 10 * ADA);
        let mut collateral = wallet_utxo(9, 6 * ADA);
        collateral.value = collateral
            .value
            .with_asset(AssetId::new([1; 28], b"x".to_vec()), 1);

        let err = builder
            .build_script_spend(ScriptSpend {
                script_utxo: &locked,
                redeemer: EscrowRedeemer::Refund,
                signer_address: &wallet_address(),
                signer_utxos: &[],
                collateral: Some(collateral),
                outputs: vec![],
                required_signers: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::InvalidCollateral(_)));
    }

    #[test]
    fn test_script_spend_relock_threads_datum() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let locked = script_utxo(&ctx, 10 * ADA);
        let wallet = vec![wallet_utxo(0xf0, 20 * ADA), wallet_utxo(0x01, 3 * ADA)];
        let collateral = wallet_utxo(0x50, 5 * ADA);
        let relock = TxOutput::new(&locked.address, locked.value.clone())
            .unwrap()
            .with_inline_datum(datum().with_learner_attested().to_plutus_data());

        let draft = builder
            .build_script_spend(ScriptSpend {
                script_utxo: &locked,
                redeemer: EscrowRedeemer::AttestByLearner,
                signer_address: &wallet_address(),
                signer_utxos: &wallet,
                collateral: Some(collateral.clone()),
                outputs: vec![relock],
                required_signers: vec![[0x11; 28]],
            })
            .unwrap();

        assert!(draft.verify_balance().is_ok());
        assert_eq!(draft.outputs[0].value.coin, 10 * ADA);
        assert_eq!(draft.collateral, vec![collateral]);
        assert!(!draft.inputs.iter().any(|u| u.out_ref == draft.collateral[0].out_ref));
        assert_eq!(draft.required_signers, vec![[0x11; 28]]);
        assert_eq!(draft.redeemers.len(), 1);
        assert_eq!(draft.redeemers[0].index, draft.input_index(&locked.out_ref).unwrap());
        assert!(draft.fee > ctx.params.script_fee(ctx.budgets.attest));
    }

    #[test]
    fn test_single_utxo_wallet_spends_its_collateral() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let locked = script_utxo(&ctx, 10 * ADA);
        let only = wallet_utxo(0x07, 90 * ADA);
        let relock = TxOutput::new(&locked.address, locked.value.clone())
            .unwrap()
            .with_inline_datum(datum().with_learner_attested().to_plutus_data());

        let draft = builder
            .build_script_spend(ScriptSpend {
                script_utxo: &locked,
                redeemer: EscrowRedeemer::AttestByLearner,
                signer_address: &wallet_address(),
                signer_utxos: std::slice::from_ref(&only),
                collateral: Some(only.clone()),
                outputs: vec![relock],
                required_signers: vec![[0x11; 28]],
            })
            .unwrap();

        assert!(draft.verify_balance().is_ok());
        assert_eq!(draft.collateral, vec![only.clone()]);
        assert!(draft.inputs.iter().any(|u| u.out_ref == only.out_ref));
        assert_eq!(draft.inputs.len(), 2);
        assert_eq!(draft.redeemers[0].index, draft.input_index(&locked.out_ref).unwrap());

        // an empty wallet still fails rather than using a foreign collateral
        let err = builder
            .build_script_spend(ScriptSpend {
                script_utxo: &locked,
                redeemer: EscrowRedeemer::AttestByLearner,
                signer_address: &wallet_address(),
                signer_utxos: &[],
                collateral: Some(only),
                outputs: vec![TxOutput::new(&locked.address, locked.value.clone()).unwrap()],
                required_signers: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_redeemer_index_follows_sorted_inputs() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let locked = script_utxo(&ctx, 10 * ADA);
        // 0x01.. sorts before the script input 0xee..
        let wallet = vec![wallet_utxo(0x01, 20 * ADA)];

        let draft = builder
            .build_script_spend(ScriptSpend {
                script_utxo: &locked,
                redeemer: EscrowRedeemer::ClaimFunds,
                signer_address: &wallet_address(),
                signer_utxos: &wallet,
                collateral: Some(wallet_utxo(0x50, 5 * ADA)),
                outputs: vec![TxOutput::new(&receiver_address(), Value::lovelace(10 * ADA)).unwrap()],
                required_signers: vec![],
            })
            .unwrap();
        assert_eq!(draft.inputs[0].out_ref.tx_hash, [0x01; 32]);
        assert_eq!(draft.redeemers[0].index, 1);
    }

    #[test]
    fn test_script_spend_without_script() {
        let ctx = ProtocolContext::new(Network::Preprod, ProtocolParameters::default());
        let builder = TransactionBuilder::new(&ctx);
        let locked = wallet_utxo(0xee, 10 * ADA);
        let err = builder
            .build_script_spend(ScriptSpend {
                script_utxo: &locked,
                redeemer: EscrowRedeemer::ClaimFunds,
                signer_address: &wallet_address(),
                signer_utxos: &[],
                collateral: Some(wallet_utxo(0x50, 5 * ADA)),
                outputs: vec![],
                required_signers: vec![],
            })
            .unwrap_err();
        assert_eq!(err, BuilderError::ScriptNotLoaded("escrow validator"));
    }

    #[test]
    fn test_script_spend_rejects_wallet_input() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let not_locked = wallet_utxo(0xee, 10 * ADA);
        let err = builder
            .build_script_spend(ScriptSpend {
                script_utxo: &not_locked,
                redeemer: EscrowRedeemer::Refund,
                signer_address: &wallet_address(),
                signer_utxos: &[],
                collateral: Some(wallet_utxo(0x50, 5 * ADA)),
                outputs: vec![],
                required_signers: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::NotAScriptOutput(_)));
    }

    #[test]
    fn test_script_data_hash_with_cost_model() {
        let mut ctx = context();
        ctx.params.cost_model_v2 = Some(vec![100, 200, 300]);
        let builder = TransactionBuilder::new(&ctx);
        let locked = script_utxo(&ctx, 10 * ADA);
        let draft = builder
            .build_script_spend(ScriptSpend {
                script_utxo: &locked,
                redeemer: EscrowRedeemer::Refund,
                signer_address: &wallet_address(),
                signer_utxos: &[wallet_utxo(1, 20 * ADA)],
                collateral: Some(wallet_utxo(0x50, 5 * ADA)),
                outputs: vec![TxOutput::new(&wallet_address(), Value::lovelace(10 * ADA)).unwrap()],
                required_signers: vec![[0x11; 28]],
            })
            .unwrap();
        assert_eq!(
            draft.script_data_hash,
            draft.compute_script_data_hash(&[100, 200, 300])
        );
        assert!(draft.script_data_hash.is_some());
    }

    #[test]
    fn test_mint_session_token() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let session = Uuid::new_v4();
        let name = session.simple().to_string().into_bytes();
        let wallet = vec![wallet_utxo(1, 20 * ADA)];

        let draft = builder
            .build_mint(MintRequest {
                payer_utxos: &wallet,
                payer_address: &wallet_address(),
                recipient_address: &wallet_address(),
                asset_name: name.clone(),
                quantity: 1,
                redeemer: MintRedeemer::new(&session).to_plutus_data(),
                collateral: Some(wallet_utxo(0x50, 5 * ADA)),
                metadata: None,
            })
            .unwrap();

        let policy = ctx.mint_policy.as_ref().unwrap().hash();
        let asset = AssetId::new(policy, name);
        assert_eq!(draft.mint.get(&asset), Some(&1));
        assert_eq!(draft.outputs[0].value.quantity_of(&asset), 1);
        assert!(draft.outputs[0].value.coin >= ctx.params.min_utxo_floor);
        assert_eq!(draft.redeemers[0].tag, RedeemerTag::Mint);
        assert!(draft.verify_balance().is_ok());
    }

    #[test]
    fn test_mint_rejects_long_asset_name() {
        let ctx = context();
        let builder = TransactionBuilder::new(&ctx);
        let err = builder
            .build_mint(MintRequest {
                payer_utxos: &[],
                payer_address: &wallet_address(),
                recipient_address: &wallet_address(),
                asset_name: vec![b'a'; 33],
                quantity: 1,
                redeemer: PlutusData::unit_constr(0),
                collateral: Some(wallet_utxo(0x50, 5 * ADA)),
                metadata: None,
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::InvalidAmount(_)));
    }
}
