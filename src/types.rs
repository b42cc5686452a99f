// =============================================================================
// Shared types used across the MomoScope engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Discrete bar widths the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// All tracked timeframes, shortest first.
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Timeframes populated by the REST refresh loop (the WS path owns 1m/5m).
    pub const REST_REFRESHED: [Timeframe; 4] = [
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Bar width in milliseconds.
    pub fn ms(self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 300_000,
            Timeframe::M15 => 900_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 14_400_000,
            Timeframe::D1 => 86_400_000,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }

    /// Align an epoch-ms timestamp down to the start of its bucket.
    pub fn bucket(self, t_ms: i64) -> i64 {
        t_ms.div_euclid(self.ms()) * self.ms()
    }

    /// Default number of closed candles retained per series.
    pub fn default_retention(self) -> usize {
        match self {
            Timeframe::M1 => 240,
            Timeframe::M5 => 240,
            Timeframe::M15 => 200,
            Timeframe::H1 => 200,
            Timeframe::H4 => 200,
            Timeframe::D1 => 400,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Trading-session classification of a tick or candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionTag {
    #[serde(rename = "RTH")]
    Rth,
    #[serde(rename = "EXT")]
    Ext,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Default for SessionTag {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for SessionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rth => write!(f, "RTH"),
            Self::Ext => write!(f, "EXT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Where a candle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleSource {
    #[serde(rename = "WS")]
    Ws,
    #[serde(rename = "REST")]
    Rest,
    #[serde(rename = "AGG")]
    Agg,
}

impl std::fmt::Display for CandleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ws => write!(f, "WS"),
            Self::Rest => write!(f, "REST"),
            Self::Agg => write!(f, "AGG"),
        }
    }
}

/// A single trade report from the provider WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    /// Trade time, epoch milliseconds UTC.
    pub t_ms: i64,
    pub price: f64,
    pub size: f64,
    pub session: SessionTag,
}

/// Actionable output of the scoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "EXIT")]
    Exit,
    #[serde(rename = "IGNORE")]
    Ignore,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Hold => write!(f, "HOLD"),
            Self::Exit => write!(f, "EXIT"),
            Self::Ignore => write!(f, "IGNORE"),
        }
    }
}

/// Momentum state machine states, ordered roughly from cold to broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MomentumState {
    #[serde(rename = "NO_MOMO")]
    NoMomo,
    #[serde(rename = "BUILDING")]
    Building,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "PAUSE")]
    Pause,
    #[serde(rename = "FAILING")]
    Failing,
    #[serde(rename = "FAILED")]
    Failed,
}

impl Default for MomentumState {
    fn default() -> Self {
        Self::NoMomo
    }
}

impl std::fmt::Display for MomentumState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMomo => write!(f, "NO_MOMO"),
            Self::Building => write!(f, "BUILDING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Pause => write!(f, "PAUSE"),
            Self::Failing => write!(f, "FAILING"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}
