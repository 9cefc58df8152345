//! Data model for the odds store: bookmakers, snapshots, movement history and
//! best-line aggregates. In-process structs rather than ORM-mapped rows —
//! the store in `odds_store.rs` is the only code that mutates these directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookmakerStatus {
    Active,
    Inactive,
    Suspended,
    Maintenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmaker {
    pub id: u64,
    pub canonical_name: String,
    pub display_name: String,
    pub short_name: String,
    pub status: BookmakerStatus,
    pub is_trusted: bool,
    pub reliability_score: Option<f64>,
    pub priority_weight: f64,
    pub include_in_consensus: bool,
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bookmaker {
    fn new(id: u64, canonical_name: &str, display_name: &str, short_name: &str, priority_weight: f64) -> Self {
        let now = Utc::now();
        Self {
            id,
            canonical_name: canonical_name.to_string(),
            display_name: display_name.to_string(),
            short_name: short_name.to_string(),
            status: BookmakerStatus::Active,
            is_trusted: true,
            reliability_score: None,
            priority_weight,
            include_in_consensus: true,
            last_successful_fetch: None,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The five reference sportsbooks seeded into a fresh store so best-line
/// aggregation has bookmaker rows to resolve ids/short-names against.
pub fn default_bookmakers() -> Vec<Bookmaker> {
    vec![
        Bookmaker::new(1, "draftkings", "DraftKings", "DK", 1.0),
        Bookmaker::new(2, "fanduel", "FanDuel", "FD", 1.0),
        Bookmaker::new(3, "betmgm", "BetMGM", "MGM", 0.9),
        Bookmaker::new(4, "caesars", "Caesars", "CZR", 0.9),
        Bookmaker::new(5, "barstool", "Barstool", "BST", 0.8),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmakerQuote {
    pub bookmaker_id: u64,
    pub line: Option<f64>,
    pub over_american: Option<i32>,
    pub under_american: Option<i32>,
    pub is_available: bool,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub volume_indicator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub id: u64,
    pub prop_id: String,
    pub bookmaker_id: u64,
    pub sport: String,
    pub market_type: String,
    pub line: Option<f64>,
    pub over_american: Option<i32>,
    pub under_american: Option<i32>,
    pub over_decimal: Option<f64>,
    pub under_decimal: Option<f64>,
    pub over_no_vig_prob: Option<f64>,
    pub under_no_vig_prob: Option<f64>,
    pub is_available: bool,
    pub captured_at: DateTime<Utc>,
    pub source_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementDirection {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsHistory {
    pub prop_id: String,
    pub bookmaker_id: u64,
    pub line_movement: Option<f64>,
    pub odds_movement_over: Option<i32>,
    pub odds_movement_under: Option<i32>,
    pub movement_magnitude: f64,
    pub movement_direction: MovementDirection,
    pub is_significant: bool,
    pub is_steam_move: bool,
    pub steam_confidence: Option<f64>,
    pub concurrent_book_moves: u32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestLineAggregate {
    pub prop_id: String,
    pub sport: String,
    pub best_over_american: Option<i32>,
    pub best_over_bookmaker_id: Option<u64>,
    pub best_over_bookmaker_name: Option<String>,
    pub best_under_american: Option<i32>,
    pub best_under_bookmaker_id: Option<u64>,
    pub best_under_bookmaker_name: Option<String>,
    pub consensus_line: Option<f64>,
    pub consensus_over_prob: Option<f64>,
    pub consensus_under_prob: Option<f64>,
    pub num_bookmakers: usize,
    pub line_spread: f64,
    pub arbitrage_opportunity: bool,
    pub arbitrage_profit_pct: f64,
    pub last_updated: DateTime<Utc>,
    pub data_age_minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementPoint {
    pub bookmaker_id: u64,
    pub captured_at: DateTime<Utc>,
    pub line: Option<f64>,
    pub over_american: Option<i32>,
    pub under_american: Option<i32>,
    pub line_movement: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteamEvent {
    pub prop_id: String,
    pub detected_at: DateTime<Utc>,
    pub concurrent_book_moves: u32,
    pub steam_confidence: f64,
}
