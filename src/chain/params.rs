//! Protocol parameter sources

use super::provider::ProviderError;
use crate::core::fee::ProtocolParameters;
use async_trait::async_trait;
use log::{info, warn};

/// Anything that can report current ledger parameters
#[async_trait]
pub trait ParamsSource: Send + Sync {
    async fn protocol_parameters(&self) -> Result<ProtocolParameters, ProviderError>;
}

/// Fixed parameters, used for local runs and tests
#[derive(Debug, Clone, Default)]
pub struct StaticParams(pub ProtocolParameters);

#[async_trait]
impl ParamsSource for StaticParams {
    async fn protocol_parameters(&self) -> Result<ProtocolParameters, ProviderError> {
        Ok(self.0.clone())
    }
}

/// Query `source`, falling back to the static defaults when it is missing
/// or fails
pub async fn load_parameters(source: Option<&dyn ParamsSource>) -> ProtocolParameters {
    let Some(source) = source else {
        info!("No protocol parameter source configured, using static fallback");
        return ProtocolParameters::default();
    };

    match source.protocol_parameters().await {
        Ok(params) => {
            info!(
                "Protocol parameters: minFeeA={} minFeeB={} coinsPerUtxoByte={}",
                params.min_fee_a, params.min_fee_b, params.coins_per_utxo_byte
            );
            params
        }
        Err(err) => {
            warn!("Protocol parameters unavailable ({}), using static fallback", err);
            ProtocolParameters::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl ParamsSource for Failing {
        async fn protocol_parameters(&self) -> Result<ProtocolParameters, ProviderError> {
            Err(ProviderError::Unreachable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_fallback() {
        let defaults = ProtocolParameters::default();
        assert_eq!(load_parameters(None).await, defaults);
        assert_eq!(load_parameters(Some(&Failing)).await, defaults);

        let custom = ProtocolParameters {
            min_fee_a: 50,
            ..ProtocolParameters::default()
        };
        let source = StaticParams(custom.clone());
        assert_eq!(load_parameters(Some(&source)).await, custom);
    }
}
