// =============================================================================
// Market-data provider interface
// =============================================================================
//
// The engine consumes exactly two capabilities: a REST fetch of closed
// candles and a lazy WebSocket tick stream. Adapters are selected at startup
// from configuration; the rest of the engine only ever sees the trait
// object.
// =============================================================================

pub mod polygon;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;

use crate::config::Config;
use crate::error::EngineError;
use crate::market_data::Candle;
use crate::types::{Tick, Timeframe};

/// Lazy sequence of parsed ticks. Ends when the underlying session drops;
/// the ingest loop owns reconnection.
pub type TickStream = Pin<Box<dyn Stream<Item = Tick> + Send>>;

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch closed candles for `[from_ms, to_ms)`. Implementations must
    /// only yield closed bars; the consumer drops anything else.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, EngineError>;

    /// Establish a WebSocket session, authenticate, subscribe to `symbols`,
    /// and yield parsed trade ticks.
    async fn stream_ticks(&self, symbols: &[String]) -> Result<TickStream, EngineError>;
}

/// Build the provider adapter named by the configuration.
pub fn build(config: &Config) -> anyhow::Result<Arc<dyn MarketDataProvider>> {
    match config.provider.as_str() {
        "polygon" => Ok(Arc::new(polygon::PolygonProvider::new(
            config.provider_api_key.clone(),
        ))),
        other => anyhow::bail!("unknown provider adapter id: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_id_is_rejected() {
        let mut config = Config::default();
        config.provider = "acme".into();
        assert!(build(&config).is_err());
    }

    #[test]
    fn polygon_provider_builds() {
        let config = Config::default();
        assert!(build(&config).is_ok());
    }
}
