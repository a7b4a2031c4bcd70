//! Core types used throughout PolyTune
//!
//! Defines the market-dataset input model for the replay simulator:
//! assets, timeframes, sides, price ticks and historical markets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported trading assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
    SOL,
    XRP,
}

impl Default for Asset {
    fn default() -> Self {
        Asset::BTC
    }
}

impl Asset {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BTC" => Some(Asset::BTC),
            "ETH" => Some(Asset::ETH),
            "SOL" => Some(Asset::SOL),
            "XRP" => Some(Asset::XRP),
            _ => None,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::BTC => write!(f, "BTC"),
            Asset::ETH => write!(f, "ETH"),
            Asset::SOL => write!(f, "SOL"),
            Asset::XRP => write!(f, "XRP"),
        }
    }
}

/// Supported timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Min15,
    Hour1,
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Min15
    }
}

impl Timeframe {
    /// Get duration in seconds
    pub fn duration_secs(&self) -> u64 {
        match self {
            Timeframe::Min15 => 15 * 60,
            Timeframe::Hour1 => 60 * 60,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "15m" | "15min" => Some(Timeframe::Min15),
            "1h" | "1hour" => Some(Timeframe::Hour1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Min15 => write!(f, "15m"),
            Timeframe::Hour1 => write!(f, "1h"),
        }
    }
}

/// Market side (outcome direction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Up
    }
}

impl Direction {
    /// Convert to Polymarket outcome index
    pub fn outcome_index(&self) -> u8 {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
        }
    }

    /// The opposite side of this one
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "UP" => Some(Direction::Up),
            "DOWN" => Some(Direction::Down),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// One best-bid/best-ask observation for one market side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    /// Timestamp in milliseconds
    pub ts: i64,
    /// Market this tick belongs to
    pub market_id: String,
    /// Token ID of the side being quoted
    pub token_id: String,
    /// Best bid price (0.0 - 1.0)
    pub bid: f64,
    /// Best ask price (0.0 - 1.0)
    pub ask: f64,
    /// Mid price
    pub mid: f64,
}

impl PriceTick {
    /// Quoted spread in price units
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// Historical market record with embedded tick sequences
///
/// Immutable input to the replay simulator. A market is a bounded window with
/// two binary sides; `resolved` is None when the outcome is unknown at
/// evaluation time (still-open or missing resolution data).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalMarket {
    /// Market slug (human-readable ID)
    pub id: String,
    /// Asset (if crypto market)
    pub asset: Option<Asset>,
    /// Timeframe (if crypto market)
    pub timeframe: Option<Timeframe>,
    /// Window start timestamp in milliseconds
    pub window_start_ts: i64,
    /// Window end timestamp in milliseconds
    pub window_end_ts: i64,
    /// Token ID for the UP outcome
    pub token_up: String,
    /// Token ID for the DOWN outcome
    pub token_down: String,
    /// Resolved side, if known
    pub resolved: Option<Direction>,
    /// Ticks for the UP token, in emission order
    pub ticks_up: Vec<PriceTick>,
    /// Ticks for the DOWN token, in emission order
    pub ticks_down: Vec<PriceTick>,
}

impl HistoricalMarket {
    /// Side corresponding to a token ID, if it belongs to this market
    pub fn side_of_token(&self, token_id: &str) -> Option<Direction> {
        if token_id == self.token_up {
            Some(Direction::Up)
        } else if token_id == self.token_down {
            Some(Direction::Down)
        } else {
            None
        }
    }

    /// Milliseconds remaining in the window at `ts`
    pub fn time_remaining_ms(&self, ts: i64) -> i64 {
        self.window_end_ts - ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_roundtrip() {
        assert_eq!(Direction::from_str("up"), Some(Direction::Up));
        assert_eq!(Direction::from_str("DOWN"), Some(Direction::Down));
        assert_eq!(Direction::from_str("sideways"), None);
        assert_eq!(Direction::Up.opposite(), Direction::Down);
        assert_eq!(Direction::Up.to_string(), "UP");
    }

    #[test]
    fn test_timeframe_durations() {
        assert_eq!(Timeframe::Min15.duration_secs(), 900);
        assert_eq!(Timeframe::Hour1.duration_secs(), 3600);
        assert_eq!(Timeframe::from_str("15min"), Some(Timeframe::Min15));
    }

    #[test]
    fn test_side_of_token() {
        let market = HistoricalMarket {
            id: "btc-updown-15m-1700000000".to_string(),
            asset: Some(Asset::BTC),
            timeframe: Some(Timeframe::Min15),
            window_start_ts: 1_700_000_000_000,
            window_end_ts: 1_700_000_900_000,
            token_up: "tok-up".to_string(),
            token_down: "tok-down".to_string(),
            resolved: Some(Direction::Up),
            ticks_up: Vec::new(),
            ticks_down: Vec::new(),
        };

        assert_eq!(market.side_of_token("tok-up"), Some(Direction::Up));
        assert_eq!(market.side_of_token("tok-down"), Some(Direction::Down));
        assert_eq!(market.side_of_token("other"), None);
        assert_eq!(market.time_remaining_ms(1_700_000_600_000), 300_000);
    }
}
