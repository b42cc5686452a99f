// =============================================================================
// Central application state
// =============================================================================
//
// The CandleStore is the only shared mutable collection; everything else in
// here is configuration, counters, and the stateless scoring engine. All
// async tasks hold this behind `Arc<AppState>`.
// =============================================================================

use std::sync::Arc;

use crate::config::Config;
use crate::market_data::{CandleStore, IngestStats};
use crate::scoring::ScoringEngine;

pub struct AppState {
    pub config: Config,
    pub store: Arc<CandleStore>,
    pub ingest_stats: Arc<IngestStats>,
    pub scoring: ScoringEngine,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(CandleStore::new(config.retention));
        let scoring = ScoringEngine::new(config.liquidity_floor_usd);
        Self {
            config,
            store,
            ingest_stats: Arc::new(IngestStats::default()),
            scoring,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
