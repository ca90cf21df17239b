//! UTXO provider capability
//!
//! Every chain backend normalizes its native listing into [`Utxo`]. The
//! builder and the escrow service only ever see this trait.

use crate::core::transaction::Utxo;
use async_trait::async_trait;
use thiserror::Error;

/// Chain query errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
    #[error("Rate limited or banned by backend (HTTP {status})")]
    RateLimited { status: u16 },
    #[error("Backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Could not decode backend response: {0}")]
    Decode(String),
    #[error("Backend not configured: {0}")]
    NotConfigured(&'static str),
}

impl ProviderError {
    /// Upstream failures a cached listing may paper over
    pub fn is_degraded(&self) -> bool {
        match self {
            ProviderError::Unreachable(_) | ProviderError::RateLimited { .. } => true,
            ProviderError::Http { status, .. } => *status >= 500,
            ProviderError::Decode(_) | ProviderError::NotConfigured(_) => false,
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            // Blockfrost answers 402 for an exhausted daily quota, 418 and 403 for bans
            402 | 403 | 418 | 429 => ProviderError::RateLimited { status },
            _ => ProviderError::Http { status, body },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status.as_u16(), err.to_string())
        } else {
            ProviderError::Unreachable(err.to_string())
        }
    }
}

/// A source of unspent outputs for an address
#[async_trait]
pub trait UtxoProvider: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Every unspent output currently held at `address`
    async fn list(&self, address: &str) -> Result<Vec<Utxo>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            ProviderError::from_status(429, String::new()),
            ProviderError::RateLimited { status: 429 }
        );
        assert!(ProviderError::from_status(418, String::new()).is_degraded());
        assert!(ProviderError::from_status(503, String::new()).is_degraded());
        assert!(!ProviderError::from_status(400, "bad".into()).is_degraded());
        assert!(!ProviderError::Decode("x".into()).is_degraded());
    }
}
