// =============================================================================
// Engine configuration — environment-driven
// =============================================================================
//
// All options come from the process environment (a `.env` file is honoured in
// development via dotenv). PROVIDER_API_KEY is a credential and is never
// logged; Config deliberately does not derive Debug to keep it out of
// `{:?}` output.
// =============================================================================

use crate::types::Timeframe;

/// The two reference instruments the tape context is derived from. These are
/// always subscribed regardless of `WS_SYMBOLS`.
pub const REFERENCE_SYMBOLS: [&str; 2] = ["SPY", "QQQ"];

/// Per-timeframe retention overrides (closed candles kept per series).
#[derive(Clone, Copy)]
pub struct Retention {
    pub m1: usize,
    pub m5: usize,
    pub m15: usize,
    pub h1: usize,
    pub h4: usize,
    pub d1: usize,
}

impl Retention {
    pub fn for_tf(&self, tf: Timeframe) -> usize {
        match tf {
            Timeframe::M1 => self.m1,
            Timeframe::M5 => self.m5,
            Timeframe::M15 => self.m15,
            Timeframe::H1 => self.h1,
            Timeframe::H4 => self.h4,
            Timeframe::D1 => self.d1,
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            m1: Timeframe::M1.default_retention(),
            m5: Timeframe::M5.default_retention(),
            m15: Timeframe::M15.default_retention(),
            h1: Timeframe::H1.default_retention(),
            h4: Timeframe::H4.default_retention(),
            d1: Timeframe::D1.default_retention(),
        }
    }
}

/// Engine configuration assembled from the environment at startup.
#[derive(Clone)]
pub struct Config {
    /// Provider adapter id (`PROVIDER`, default "polygon").
    pub provider: String,
    /// Provider credential (`PROVIDER_API_KEY`). Never logged.
    pub provider_api_key: String,
    /// Symbols to subscribe on the WS stream (`WS_SYMBOLS`, comma-separated).
    /// Always includes the reference instruments.
    pub ws_symbols: Vec<String>,
    /// Default ticker for requests that omit `?ticker=` (`PRIMARY_TICKER`).
    pub primary_ticker: Option<String>,
    /// Per-timeframe retention (`RETENTION_1M` .. `RETENTION_1D`).
    pub retention: Retention,
    /// REST refresh cadence in milliseconds (`REFRESH_INTERVAL_MS`).
    pub refresh_interval_ms: u64,
    /// Liquidity gate floor in USD of average 5m dollar volume
    /// (`LIQUIDITY_FLOOR_USD`).
    pub liquidity_floor_usd: f64,
    /// HTTP bind address (`BIND_ADDR`).
    pub bind_addr: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Assemble the configuration from the process environment.
    pub fn from_env() -> Self {
        let mut ws_symbols: Vec<String> = std::env::var("WS_SYMBOLS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        for reference in REFERENCE_SYMBOLS {
            if !ws_symbols.iter().any(|s| s == reference) {
                ws_symbols.push(reference.to_string());
            }
        }

        let primary_ticker = std::env::var("PRIMARY_TICKER")
            .ok()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty());

        let retention = Retention {
            m1: env_parse("RETENTION_1M", Timeframe::M1.default_retention()),
            m5: env_parse("RETENTION_5M", Timeframe::M5.default_retention()),
            m15: env_parse("RETENTION_15M", Timeframe::M15.default_retention()),
            h1: env_parse("RETENTION_1H", Timeframe::H1.default_retention()),
            h4: env_parse("RETENTION_4H", Timeframe::H4.default_retention()),
            d1: env_parse("RETENTION_1D", Timeframe::D1.default_retention()),
        };

        Self {
            provider: std::env::var("PROVIDER").unwrap_or_else(|_| "polygon".into()),
            provider_api_key: std::env::var("PROVIDER_API_KEY").unwrap_or_default(),
            ws_symbols,
            primary_ticker,
            retention,
            refresh_interval_ms: env_parse("REFRESH_INTERVAL_MS", 60_000),
            liquidity_floor_usd: env_parse("LIQUIDITY_FLOOR_USD", 1_000_000.0),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3002".into()),
        }
    }

    /// All symbols the engine ingests: WS set plus the primary ticker, if it
    /// is not already subscribed.
    pub fn all_symbols(&self) -> Vec<String> {
        let mut symbols = self.ws_symbols.clone();
        if let Some(primary) = &self.primary_ticker {
            if !symbols.iter().any(|s| s == primary) {
                symbols.push(primary.clone());
            }
        }
        symbols
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "polygon".into(),
            provider_api_key: String::new(),
            ws_symbols: REFERENCE_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            primary_ticker: None,
            retention: Retention::default(),
            refresh_interval_ms: 60_000,
            liquidity_floor_usd: 1_000_000.0,
            bind_addr: "0.0.0.0:3002".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retention_matches_policy() {
        let r = Retention::default();
        assert_eq!(r.for_tf(Timeframe::M1), 240);
        assert_eq!(r.for_tf(Timeframe::M5), 240);
        assert_eq!(r.for_tf(Timeframe::M15), 200);
        assert_eq!(r.for_tf(Timeframe::D1), 400);
    }

    #[test]
    fn default_config_subscribes_references() {
        let cfg = Config::default();
        assert!(cfg.ws_symbols.iter().any(|s| s == "SPY"));
        assert!(cfg.ws_symbols.iter().any(|s| s == "QQQ"));
    }

    #[test]
    fn all_symbols_appends_primary_once() {
        let mut cfg = Config::default();
        cfg.primary_ticker = Some("NVDA".into());
        let all = cfg.all_symbols();
        assert_eq!(all.iter().filter(|s| *s == "NVDA").count(), 1);

        cfg.ws_symbols.push("NVDA".into());
        let all = cfg.all_symbols();
        assert_eq!(all.iter().filter(|s| *s == "NVDA").count(), 1);
    }
}
