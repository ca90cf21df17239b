//! Protocol context
//!
//! Everything the builder needs to know about the deployment: network,
//! ledger parameters, loaded validator and policy scripts, the settlement
//! receiver and per-redeemer execution budgets. Built once at startup and
//! passed by reference.

use super::address::{payment_key_hash, AddressError, Network};
use super::fee::{ExUnits, ProtocolParameters};
use super::script::{PlutusScript, ScriptError};
use super::selection::SelectionStrategy;
use crate::codec::datum::EscrowRedeemer;
use crate::config::AppConfig;
use crate::crypto::hash::HASH28_LEN;
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Context construction errors
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Failed to load {which}: {source}")]
    Script {
        which: &'static str,
        source: ScriptError,
    },
    #[error("Invalid receiver address: {0}")]
    Receiver(#[from] AddressError),
}

// =============================================================================
// Execution Budgets
// =============================================================================

/// Execution units declared for each script action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionBudgets {
    pub attest: ExUnits,
    pub claim: ExUnits,
    pub refund: ExUnits,
    pub mint: ExUnits,
}

impl Default for ExecutionBudgets {
    fn default() -> Self {
        Self {
            attest: ExUnits::new(1_400_000, 500_000_000),
            claim: ExUnits::new(1_600_000, 600_000_000),
            refund: ExUnits::new(1_600_000, 600_000_000),
            mint: ExUnits::new(1_000_000, 400_000_000),
        }
    }
}

impl ExecutionBudgets {
    pub fn for_redeemer(&self, redeemer: EscrowRedeemer) -> ExUnits {
        match redeemer {
            EscrowRedeemer::AttestByLearner | EscrowRedeemer::AttestByMentor => self.attest,
            EscrowRedeemer::ClaimFunds => self.claim,
            EscrowRedeemer::Refund => self.refund,
        }
    }
}

// =============================================================================
// Receiver
// =============================================================================

/// Settlement receiver: the address claims pay out to and its key hash,
/// written as the last datum field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receiver {
    pub address: String,
    pub key_hash: [u8; HASH28_LEN],
}

impl Receiver {
    pub fn from_address(address: &str) -> Result<Self, AddressError> {
        Ok(Self {
            key_hash: payment_key_hash(address)?,
            address: address.to_string(),
        })
    }
}

// =============================================================================
// Protocol Context
// =============================================================================

#[derive(Debug, Clone)]
pub struct ProtocolContext {
    pub network: Network,
    pub params: ProtocolParameters,
    pub escrow_script: Option<PlutusScript>,
    pub mint_policy: Option<PlutusScript>,
    pub receiver: Option<Receiver>,
    pub budgets: ExecutionBudgets,
    pub selection: SelectionStrategy,
}

impl ProtocolContext {
    pub fn new(network: Network, params: ProtocolParameters) -> Self {
        Self {
            network,
            params,
            escrow_script: None,
            mint_policy: None,
            receiver: None,
            budgets: ExecutionBudgets::default(),
            selection: SelectionStrategy::default(),
        }
    }

    pub fn with_escrow_script(mut self, script: PlutusScript) -> Self {
        self.escrow_script = Some(script);
        self
    }

    pub fn with_mint_policy(mut self, script: PlutusScript) -> Self {
        self.mint_policy = Some(script);
        self
    }

    pub fn with_receiver(mut self, receiver: Receiver) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn with_budgets(mut self, budgets: ExecutionBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    pub fn with_selection(mut self, selection: SelectionStrategy) -> Self {
        self.selection = selection;
        self
    }

    /// Load scripts and receiver named in the configuration. Missing paths
    /// leave the corresponding slot empty; the builder reports it when used.
    pub fn from_config(config: &AppConfig, params: ProtocolParameters) -> Result<Self, ContextError> {
        let mut ctx = Self::new(config.network, params).with_budgets(config.budgets);
        ctx.selection = config.selection;

        if let Some(path) = &config.escrow_script_path {
            let script = PlutusScript::from_file(path).map_err(|source| ContextError::Script {
                which: "escrow validator",
                source,
            })?;
            info!("Loaded escrow validator {} from {}", script.hash_hex(), path.display());
            ctx.escrow_script = Some(script);
        }

        if let Some(path) = &config.nft_policy_script_path {
            let script = PlutusScript::from_file(path).map_err(|source| ContextError::Script {
                which: "session token policy",
                source,
            })?;
            info!("Loaded session token policy {} from {}", script.hash_hex(), path.display());
            ctx.mint_policy = Some(script);
        }

        if let Some(address) = &config.receiver_address {
            ctx.receiver = Some(Receiver::from_address(address)?);
        }

        Ok(ctx)
    }

    /// Bech32 address of the loaded escrow validator
    pub fn escrow_address(&self) -> Option<Result<String, AddressError>> {
        self.escrow_script.as_ref().map(|s| s.address(self.network))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::Address;

    #[test]
    fn test_budget_lookup() {
        let budgets = ExecutionBudgets::default();
        assert_eq!(budgets.for_redeemer(EscrowRedeemer::AttestByMentor), budgets.attest);
        assert_eq!(budgets.for_redeemer(EscrowRedeemer::Refund), budgets.refund);
    }

    #[test]
    fn test_receiver_requires_base_address() {
        let base = Address::base_key([5; 28], [6; 28], Network::Preprod)
            .to_bech32()
            .unwrap();
        assert_eq!(Receiver::from_address(&base).unwrap().key_hash, [5; 28]);

        let enterprise = Address::enterprise_key([5; 28], Network::Preprod)
            .to_bech32()
            .unwrap();
        assert!(Receiver::from_address(&enterprise).is_err());
    }

    #[test]
    fn test_context_without_scripts() {
        let ctx = ProtocolContext::new(Network::Preview, ProtocolParameters::default());
        assert!(ctx.escrow_address().is_none());
        assert!(ctx.receiver.is_none());
    }
}
