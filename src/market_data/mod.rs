pub mod builder;
pub mod candle;
pub mod store;

pub use builder::{CandleBuilder, IngestStats};
pub use candle::{Candle, CandleKey};
pub use store::{CandleStore, Freshness, TickerView};
