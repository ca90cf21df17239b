//! Shelley address handling
//!
//! Parses bech32 addresses into their header and credentials, extracts the
//! payment key hash written into escrow datums, and derives the escrow
//! script address.
//!
//! Header nibble layout (CIP-19):
//!
//! | type  | payment | delegation |
//! |-------|---------|------------|
//! | 0     | key     | key        |
//! | 1     | script  | key        |
//! | 2     | key     | script     |
//! | 3     | script  | script     |
//! | 4, 5  | pointer addresses      |
//! | 6, 7  | enterprise addresses   |
//! | 8     | byron                  |
//! | 14,15 | reward accounts        |

use crate::crypto::hash::HASH28_LEN;
use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Serialized length of a base address: header plus two credentials
pub const BASE_ADDRESS_LEN: usize = 1 + 2 * HASH28_LEN;

const MAINNET_HRP: &str = "addr";
const TESTNET_HRP: &str = "addr_test";

/// Address-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address format: {0}")]
    InvalidAddressFormat(String),
    #[error("Unsupported address type: {0}")]
    UnsupportedAddressType(String),
}

// =============================================================================
// Network
// =============================================================================

/// Cardano network the service operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Preprod,
    Preview,
}

impl Network {
    /// Network id carried in the address header
    pub fn network_id(&self) -> u8 {
        match self {
            Network::Mainnet => 1,
            Network::Preprod | Network::Preview => 0,
        }
    }

    pub fn hrp(&self) -> &'static str {
        hrp_for(self.network_id())
    }

    /// Default Blockfrost endpoint for this network
    pub fn blockfrost_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://cardano-mainnet.blockfrost.io/api/v0",
            Network::Preprod => "https://cardano-preprod.blockfrost.io/api/v0",
            Network::Preview => "https://cardano-preview.blockfrost.io/api/v0",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Preprod => "preprod",
            Network::Preview => "preview",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "preprod" | "testnet" => Ok(Network::Preprod),
            "preview" => Ok(Network::Preview),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

fn hrp_for(network_id: u8) -> &'static str {
    if network_id == 1 {
        MAINNET_HRP
    } else {
        TESTNET_HRP
    }
}

// =============================================================================
// Address
// =============================================================================

/// A payment or stake credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "hash", rename_all = "lowercase")]
pub enum Credential {
    Key(#[serde(with = "crate::crypto::hash::hex_array")] [u8; HASH28_LEN]),
    Script(#[serde(with = "crate::crypto::hash::hex_array")] [u8; HASH28_LEN]),
}

impl Credential {
    pub fn hash(&self) -> &[u8; HASH28_LEN] {
        match self {
            Credential::Key(h) | Credential::Script(h) => h,
        }
    }
}

/// Address category derived from the header type nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Base,
    Pointer,
    Enterprise,
    Byron,
    Reward,
}

impl AddressKind {
    fn from_type(addr_type: u8) -> Option<Self> {
        match addr_type {
            0..=3 => Some(AddressKind::Base),
            4 | 5 => Some(AddressKind::Pointer),
            6 | 7 => Some(AddressKind::Enterprise),
            8 => Some(AddressKind::Byron),
            14 | 15 => Some(AddressKind::Reward),
            _ => None,
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressKind::Base => "base",
            AddressKind::Pointer => "pointer",
            AddressKind::Enterprise => "enterprise",
            AddressKind::Byron => "byron",
            AddressKind::Reward => "reward",
        };
        write!(f, "{}", name)
    }
}

/// A decoded Shelley address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    bytes: Vec<u8>,
}

impl Address {
    /// Parse a bech32 address string
    pub fn from_bech32(value: &str) -> Result<Self, AddressError> {
        let (hrp, bytes) = bech32::decode(value.trim())
            .map_err(|e| AddressError::InvalidAddressFormat(format!("{}: {}", value, e)))?;
        if hrp.as_str() != MAINNET_HRP && hrp.as_str() != TESTNET_HRP {
            return Err(AddressError::InvalidAddressFormat(format!(
                "unexpected prefix '{}'",
                hrp
            )));
        }
        let address = Self::from_bytes(bytes)?;
        // The prefix must agree with the network id in the header
        let expected = hrp_for(address.network_id());
        if hrp.as_str() != expected {
            return Err(AddressError::InvalidAddressFormat(format!(
                "prefix '{}' does not match network id {}, expected '{}'",
                hrp,
                address.network_id(),
                expected
            )));
        }
        Ok(address)
    }

    /// Wrap raw address bytes, checking the header and length
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, AddressError> {
        let header = *bytes
            .first()
            .ok_or_else(|| AddressError::InvalidAddressFormat("empty address".to_string()))?;
        let kind = AddressKind::from_type(header >> 4).ok_or_else(|| {
            AddressError::InvalidAddressFormat(format!("unknown header type {}", header >> 4))
        })?;
        let expected = match kind {
            AddressKind::Base => Some(BASE_ADDRESS_LEN),
            AddressKind::Enterprise | AddressKind::Reward => Some(1 + HASH28_LEN),
            AddressKind::Pointer | AddressKind::Byron => None,
        };
        if let Some(len) = expected {
            if bytes.len() != len {
                return Err(AddressError::InvalidAddressFormat(format!(
                    "{} address must be {} bytes, found {}",
                    kind,
                    len,
                    bytes.len()
                )));
            }
        }
        Ok(Self { bytes })
    }

    /// Base address with key payment and key stake credentials
    pub fn base_key(
        payment: [u8; HASH28_LEN],
        stake: [u8; HASH28_LEN],
        network: Network,
    ) -> Self {
        Self::compose(0x00, network, &payment, Some(&stake))
    }

    /// Script address used for the escrow: the script hash serves as both
    /// payment and delegation credential
    pub fn script(script_hash: [u8; HASH28_LEN], network: Network) -> Self {
        Self::compose(0x30, network, &script_hash, Some(&script_hash))
    }

    /// Enterprise address with a key payment credential
    pub fn enterprise_key(payment: [u8; HASH28_LEN], network: Network) -> Self {
        Self::compose(0x60, network, &payment, None)
    }

    fn compose(
        type_bits: u8,
        network: Network,
        payment: &[u8; HASH28_LEN],
        stake: Option<&[u8; HASH28_LEN]>,
    ) -> Self {
        let mut bytes = Vec::with_capacity(BASE_ADDRESS_LEN);
        bytes.push(type_bits | network.network_id());
        bytes.extend_from_slice(payment);
        if let Some(stake) = stake {
            bytes.extend_from_slice(stake);
        }
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn header(&self) -> u8 {
        self.bytes[0]
    }

    pub fn network_id(&self) -> u8 {
        self.header() & 0x0f
    }

    pub fn kind(&self) -> AddressKind {
        // header validated on construction
        AddressKind::from_type(self.header() >> 4).unwrap_or(AddressKind::Byron)
    }

    /// Payment credential for base and enterprise addresses
    pub fn payment_credential(&self) -> Option<Credential> {
        let addr_type = self.header() >> 4;
        let hash: [u8; HASH28_LEN] = self.bytes.get(1..1 + HASH28_LEN)?.try_into().ok()?;
        match addr_type {
            0 | 2 | 4 | 6 => Some(Credential::Key(hash)),
            1 | 3 | 5 | 7 => Some(Credential::Script(hash)),
            _ => None,
        }
    }

    /// Delegation credential for base addresses
    pub fn stake_credential(&self) -> Option<Credential> {
        let addr_type = self.header() >> 4;
        if addr_type > 3 {
            return None;
        }
        let hash: [u8; HASH28_LEN] = self.bytes.get(1 + HASH28_LEN..)?.try_into().ok()?;
        match addr_type {
            0 | 1 => Some(Credential::Key(hash)),
            _ => Some(Credential::Script(hash)),
        }
    }

    /// The payment key hash used in escrow datums.
    ///
    /// Only base addresses with a key payment credential qualify.
    pub fn payment_key_hash(&self) -> Result<[u8; HASH28_LEN], AddressError> {
        let kind = self.kind();
        if kind != AddressKind::Base {
            return Err(AddressError::UnsupportedAddressType(format!(
                "{} address has no usable payment key hash",
                kind
            )));
        }
        match self.payment_credential() {
            Some(Credential::Key(hash)) => Ok(hash),
            _ => Err(AddressError::UnsupportedAddressType(
                "base address with a script payment credential".to_string(),
            )),
        }
    }

    pub fn to_bech32(&self) -> Result<String, AddressError> {
        let hrp = Hrp::parse(hrp_for(self.network_id()))
            .map_err(|e| AddressError::InvalidAddressFormat(e.to_string()))?;
        bech32::encode::<Bech32>(hrp, &self.bytes)
            .map_err(|e| AddressError::InvalidAddressFormat(e.to_string()))
    }
}

/// Extract the 28-byte payment key hash from a bech32 base address
pub fn payment_key_hash(address: &str) -> Result<[u8; HASH28_LEN], AddressError> {
    Address::from_bech32(address)?.payment_key_hash()
}

/// Bech32 escrow script address for a validator hash
pub fn script_address(
    script_hash: [u8; HASH28_LEN],
    network: Network,
) -> Result<String, AddressError> {
    Address::script(script_hash, network).to_bech32()
}
