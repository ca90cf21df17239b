//! Service-level errors
//!
//! Every operation exposed by [`crate::escrow::EscrowService`] fails with
//! an [`EscrowError`]. Module errors are wrapped as they are, and
//! [`EscrowError::kind`] gives the machine-readable category the HTTP
//! layer reports.

use crate::chain::ProviderError;
use crate::codec::CodecError;
use crate::core::{AddressError, BuilderError};
use crate::storage::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    InsufficientFunds,
    MissingCollateral,
    CodecError,
    BuilderError,
    ExternalServiceDegraded,
    Conflict,
    StorageError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::MissingCollateral => "missing_collateral",
            ErrorKind::CodecError => "codec_error",
            ErrorKind::BuilderError => "builder_error",
            ErrorKind::ExternalServiceDegraded => "external_service_degraded",
            ErrorKind::Conflict => "conflict",
            ErrorKind::StorageError => "storage_error",
        };
        write!(f, "{}", name)
    }
}

/// Errors surfaced by the escrow service
#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("External service degraded: {0}")]
    ExternalServiceDegraded(String),
    #[error("Address error: {0}")]
    Address(#[from] AddressError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Builder error: {0}")]
    Builder(#[from] BuilderError),
    #[error("Chain backend error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl EscrowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EscrowError::NotFound(_) => ErrorKind::NotFound,
            EscrowError::Validation(_) | EscrowError::Address(_) => ErrorKind::ValidationError,
            EscrowError::Conflict(_) => ErrorKind::Conflict,
            EscrowError::ExternalServiceDegraded(_) => ErrorKind::ExternalServiceDegraded,
            EscrowError::Codec(_) => ErrorKind::CodecError,
            EscrowError::Builder(err) => match err {
                BuilderError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
                BuilderError::MissingCollateral { .. } | BuilderError::InvalidCollateral(_) => {
                    ErrorKind::MissingCollateral
                }
                BuilderError::AddressDecode(_) | BuilderError::InvalidAmount(_) => {
                    ErrorKind::ValidationError
                }
                _ => ErrorKind::BuilderError,
            },
            EscrowError::Provider(err) if err.is_degraded() => ErrorKind::ExternalServiceDegraded,
            EscrowError::Provider(_) => ErrorKind::BuilderError,
            EscrowError::Store(StoreError::Regression { .. }) => ErrorKind::Conflict,
            EscrowError::Store(_) => ErrorKind::StorageError,
        }
    }

    /// JSON body for the HTTP layer: `{"kind": ..., "message": ...}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_kinds() {
        let err: EscrowError = BuilderError::InsufficientFunds {
            available: 1,
            required: 2,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

        let err: EscrowError = BuilderError::MissingCollateral { floor: 5 }.into();
        assert_eq!(err.kind(), ErrorKind::MissingCollateral);

        let err: EscrowError = BuilderError::ScriptNotLoaded("escrow validator").into();
        assert_eq!(err.kind(), ErrorKind::BuilderError);
    }

    #[test]
    fn test_degraded_provider_kind() {
        let err: EscrowError = ProviderError::RateLimited { status: 429 }.into();
        assert_eq!(err.kind(), ErrorKind::ExternalServiceDegraded);
    }

    #[test]
    fn test_json_shape() {
        let body = EscrowError::NotFound("session x".into()).to_json();
        assert_eq!(body["kind"], "not_found");
        assert_eq!(
            serde_json::to_string(&ErrorKind::ExternalServiceDegraded).unwrap(),
            "\"external_service_degraded\""
        );
    }
}
