//! Odds snapshot storage, movement/steam tracking and best-line aggregation.
//!
//! Writes for a given `prop_id` are serialized through a per-prop
//! `tokio::sync::Mutex` (a row-level lock equivalent); the snapshot append,
//! its movement record and the aggregate upsert happen while that lock is
//! held, giving each write a transaction-per-logical-change discipline
//! without a real database underneath.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::CoreResult;
use crate::odds_math;
use crate::odds_model::{
    default_bookmakers, BestLineAggregate, Bookmaker, BookmakerQuote, MovementDirection,
    MovementPoint, OddsHistory, OddsSnapshot, SteamEvent,
};

const STEAM_WINDOW_MINUTES: i64 = 15;
const STEAM_MAGNITUDE_THRESHOLD: f64 = 2.0;
const SIGNIFICANT_MAGNITUDE_THRESHOLD: f64 = 0.5;
const STABLE_LINE_THRESHOLD: f64 = 0.1;
const BEST_LINE_WINDOW_MINUTES: i64 = 60;

#[derive(Debug, Clone, Default)]
pub struct RecordResult {
    pub stored_count: usize,
    pub failed_count: usize,
}

pub struct OddsStore {
    bookmakers: RwLock<HashMap<u64, Bookmaker>>,
    snapshots: RwLock<HashMap<String, Vec<OddsSnapshot>>>,
    history: RwLock<HashMap<String, Vec<OddsHistory>>>,
    aggregates: RwLock<HashMap<String, BestLineAggregate>>,
    prop_locks: RwLock<HashMap<String, Arc<AsyncMutex<()>>>>,
    next_snapshot_id: AtomicU64,
}

impl Default for OddsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OddsStore {
    pub fn new() -> Self {
        let bookmakers = default_bookmakers()
            .into_iter()
            .map(|b| (b.id, b))
            .collect();
        Self {
            bookmakers: RwLock::new(bookmakers),
            snapshots: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            aggregates: RwLock::new(HashMap::new()),
            prop_locks: RwLock::new(HashMap::new()),
            next_snapshot_id: AtomicU64::new(1),
        }
    }

    fn prop_lock(&self, prop_id: &str) -> Arc<AsyncMutex<()>> {
        if let Some(lock) = self.prop_locks.read().get(prop_id) {
            return lock.clone();
        }
        self.prop_locks
            .write()
            .entry(prop_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub fn bookmaker(&self, id: u64) -> Option<Bookmaker> {
        self.bookmakers.read().get(&id).cloned()
    }

    /// Write path. Computes decimal/no-vig probabilities via `odds_math`,
    /// appends a snapshot per quote, records its movement, then recomputes
    /// the best-line aggregate — all while holding the per-prop lock.
    pub async fn record_snapshots(
        &self,
        prop_id: &str,
        sport: &str,
        market_type: &str,
        quotes: &[BookmakerQuote],
    ) -> CoreResult<RecordResult> {
        if quotes.is_empty() {
            return Ok(RecordResult::default());
        }

        let lock = self.prop_lock(prop_id);
        let _guard = lock.lock().await;

        let mut result = RecordResult::default();
        let now = Utc::now();

        for quote in quotes {
            if self.is_duplicate_of_latest(prop_id, quote) {
                continue; // Conflict: swallowed as a no-op, stored_count unchanged.
            }

            let (over_decimal, under_decimal, over_no_vig, under_no_vig) =
                match (quote.over_american, quote.under_american) {
                    (Some(over), Some(under)) => {
                        match (odds_math::american_to_decimal(over), odds_math::american_to_decimal(under)) {
                            (Ok(od), Ok(ud)) => {
                                let p_over = 1.0 / od;
                                let p_under = 1.0 / ud;
                                let (no_vig_over, no_vig_under, _) =
                                    odds_math::remove_vig_two_way(p_over, p_under);
                                (Some(od), Some(ud), Some(no_vig_over), Some(no_vig_under))
                            }
                            _ => {
                                result.failed_count += 1;
                                continue;
                            }
                        }
                    }
                    _ => (None, None, None, None),
                };

            let id = self.next_snapshot_id.fetch_add(1, Ordering::SeqCst);
            let snapshot = OddsSnapshot {
                id,
                prop_id: prop_id.to_string(),
                bookmaker_id: quote.bookmaker_id,
                sport: sport.to_string(),
                market_type: market_type.to_string(),
                line: quote.line,
                over_american: quote.over_american,
                under_american: quote.under_american,
                over_decimal,
                under_decimal,
                over_no_vig_prob: over_no_vig,
                under_no_vig_prob: under_no_vig,
                is_available: quote.is_available,
                captured_at: now,
                source_timestamp: quote.source_timestamp,
            };

            self.record_movement(prop_id, &snapshot);
            self.snapshots
                .write()
                .entry(prop_id.to_string())
                .or_default()
                .push(snapshot);
            result.stored_count += 1;
        }

        if result.stored_count > 0 {
            self.refresh_best_line_locked(prop_id, sport);
        }

        Ok(result)
    }

    fn is_duplicate_of_latest(&self, prop_id: &str, quote: &BookmakerQuote) -> bool {
        let snapshots = self.snapshots.read();
        let Some(history) = snapshots.get(prop_id) else {
            return false;
        };
        history
            .iter()
            .rev()
            .find(|s| s.bookmaker_id == quote.bookmaker_id)
            .is_some_and(|prev| {
                prev.line == quote.line
                    && prev.over_american == quote.over_american
                    && prev.under_american == quote.under_american
                    && prev.is_available == quote.is_available
            })
    }

    fn record_movement(&self, prop_id: &str, snapshot: &OddsSnapshot) {
        let prev = {
            let snapshots = self.snapshots.read();
            snapshots
                .get(prop_id)
                .and_then(|list| list.iter().rev().find(|s| s.bookmaker_id == snapshot.bookmaker_id))
                .cloned()
        };

        let Some(prev) = prev else { return };

        let line_movement = match (snapshot.line, prev.line) {
            (Some(a), Some(b)) => Some(a - b),
            _ => None,
        };
        let odds_movement_over = match (snapshot.over_american, prev.over_american) {
            (Some(a), Some(b)) => Some(a - b),
            _ => None,
        };
        let odds_movement_under = match (snapshot.under_american, prev.under_american) {
            (Some(a), Some(b)) => Some(a - b),
            _ => None,
        };

        let magnitude = line_movement.map(f64::abs).unwrap_or(0.0);
        let direction = match line_movement {
            Some(delta) if delta.abs() < STABLE_LINE_THRESHOLD => MovementDirection::Stable,
            Some(delta) if delta > 0.0 => MovementDirection::Up,
            Some(_) => MovementDirection::Down,
            None => MovementDirection::Stable,
        };

        let mut entry = OddsHistory {
            prop_id: prop_id.to_string(),
            bookmaker_id: snapshot.bookmaker_id,
            line_movement,
            odds_movement_over,
            odds_movement_under,
            movement_magnitude: magnitude,
            movement_direction: direction,
            is_significant: magnitude >= SIGNIFICANT_MAGNITUDE_THRESHOLD,
            is_steam_move: false,
            steam_confidence: None,
            concurrent_book_moves: 0,
            recorded_at: snapshot.captured_at,
        };

        self.history
            .write()
            .entry(prop_id.to_string())
            .or_default()
            .push(entry.clone());

        let (confidence, n) = self.steam_confidence_for_window(prop_id, snapshot.captured_at);
        entry.steam_confidence = Some(confidence);
        entry.concurrent_book_moves = n;
        entry.is_steam_move = confidence >= 0.6 && n >= 3;

        if let Some(list) = self.history.write().get_mut(prop_id) {
            if let Some(last) = list.last_mut() {
                last.steam_confidence = entry.steam_confidence;
                last.concurrent_book_moves = entry.concurrent_book_moves;
                last.is_steam_move = entry.is_steam_move;
            }
        }
    }

    /// `steam_confidence = ½·(min(N/5,1) + max(0, 1 − σ²/mean(magnitude)))`
    /// over `OddsHistory` entries within the trailing 15-minute window whose
    /// `movement_magnitude ≥ 2.0`.
    fn steam_confidence_for_window(&self, prop_id: &str, at: chrono::DateTime<Utc>) -> (f64, u32) {
        let window_start = at - ChronoDuration::minutes(STEAM_WINDOW_MINUTES);
        let history = self.history.read();
        let Some(list) = history.get(prop_id) else {
            return (0.0, 0);
        };

        let magnitudes: Vec<f64> = list
            .iter()
            .filter(|h| h.recorded_at > window_start && h.recorded_at <= at)
            .filter(|h| h.movement_magnitude >= STEAM_MAGNITUDE_THRESHOLD)
            .map(|h| h.movement_magnitude)
            .collect();

        let n = magnitudes.len() as u32;
        if n == 0 {
            return (0.0, 0);
        }

        let mean = magnitudes.iter().sum::<f64>() / magnitudes.len() as f64;
        let variance = if magnitudes.len() > 1 {
            magnitudes.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / (magnitudes.len() - 1) as f64
        } else {
            0.0
        };

        let count_term = (n as f64 / 5.0).min(1.0);
        let variance_term = if mean > 0.0 {
            (1.0 - variance / mean).max(0.0)
        } else {
            0.0
        };
        let confidence = 0.5 * (count_term + variance_term);
        (confidence, n)
    }

    fn refresh_best_line_locked(&self, prop_id: &str, sport: &str) {
        let cutoff = Utc::now() - ChronoDuration::minutes(BEST_LINE_WINDOW_MINUTES);

        let recent: Vec<OddsSnapshot> = {
            let snapshots = self.snapshots.read();
            snapshots
                .get(prop_id)
                .map(|list| {
                    list.iter()
                        .filter(|s| s.captured_at > cutoff && s.is_available)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        if recent.is_empty() {
            return;
        }

        // Most recent snapshot per bookmaker.
        let mut latest_by_book: HashMap<u64, OddsSnapshot> = HashMap::new();
        for snap in recent {
            latest_by_book
                .entry(snap.bookmaker_id)
                .and_modify(|existing| {
                    if snap.captured_at > existing.captured_at {
                        *existing = snap.clone();
                    }
                })
                .or_insert(snap);
        }
        let active: Vec<OddsSnapshot> = latest_by_book.into_values().collect();

        let mut best_over: Option<(&OddsSnapshot, i32)> = None;
        let mut best_under: Option<(&OddsSnapshot, i32)> = None;
        for snap in &active {
            if let Some(over) = snap.over_american {
                if best_over.map_or(true, |(_, b)| odds_math::is_better_odds(over, b)) {
                    best_over = Some((snap, over));
                }
            }
            if let Some(under) = snap.under_american {
                if best_under.map_or(true, |(_, b)| odds_math::is_better_odds(under, b)) {
                    best_under = Some((snap, under));
                }
            }
        }

        let mut lines: Vec<f64> = active.iter().filter_map(|s| s.line).collect();
        lines.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let consensus_line = if lines.is_empty() {
            None
        } else {
            let n = lines.len();
            Some(if n % 2 == 1 {
                lines[n / 2]
            } else {
                (lines[n / 2 - 1] + lines[n / 2]) / 2.0
            })
        };
        let line_spread = if lines.len() > 1 {
            lines.last().unwrap() - lines.first().unwrap()
        } else {
            0.0
        };

        let over_probs: Vec<f64> = active.iter().filter_map(|s| s.over_no_vig_prob).collect();
        let under_probs: Vec<f64> = active.iter().filter_map(|s| s.under_no_vig_prob).collect();
        let consensus_over_prob = avg(&over_probs);
        let consensus_under_prob = avg(&under_probs);

        let (arbitrage_opportunity, arbitrage_profit_pct) = match (best_over, best_under) {
            (Some((_, over)), Some((_, under))) => odds_math::detect_arbitrage(over, under)
                .map(|r| (r.has_arbitrage, r.profit_pct))
                .unwrap_or((false, 0.0)),
            _ => (false, 0.0),
        };

        let bookmakers = self.bookmakers.read();
        let aggregate = BestLineAggregate {
            prop_id: prop_id.to_string(),
            sport: sport.to_string(),
            best_over_american: best_over.map(|(_, o)| o),
            best_over_bookmaker_id: best_over.map(|(s, _)| s.bookmaker_id),
            best_over_bookmaker_name: best_over
                .and_then(|(s, _)| bookmakers.get(&s.bookmaker_id))
                .map(|b| b.short_name.clone()),
            best_under_american: best_under.map(|(_, u)| u),
            best_under_bookmaker_id: best_under.map(|(s, _)| s.bookmaker_id),
            best_under_bookmaker_name: best_under
                .and_then(|(s, _)| bookmakers.get(&s.bookmaker_id))
                .map(|b| b.short_name.clone()),
            consensus_line,
            consensus_over_prob,
            consensus_under_prob,
            num_bookmakers: active.len(),
            line_spread,
            arbitrage_opportunity,
            arbitrage_profit_pct,
            last_updated: Utc::now(),
            data_age_minutes: 0.0,
        };

        self.aggregates.write().insert(prop_id.to_string(), aggregate);
    }

    /// Forces recomputation of the best-line aggregate for `prop_id`.
    pub async fn refresh_best_line(&self, prop_id: &str) {
        let lock = self.prop_lock(prop_id);
        let _guard = lock.lock().await;
        let sport = self
            .snapshots
            .read()
            .get(prop_id)
            .and_then(|s| s.last())
            .map(|s| s.sport.clone())
            .unwrap_or_default();
        self.refresh_best_line_locked(prop_id, &sport);
    }

    /// Returns the aggregate if fresh, otherwise recomputes it first.
    pub async fn get_best_line(&self, prop_id: &str, max_age_minutes: i64) -> Option<BestLineAggregate> {
        let fresh = self.aggregates.read().get(prop_id).and_then(|agg| {
            let age = Utc::now() - agg.last_updated;
            if age < ChronoDuration::minutes(max_age_minutes) {
                Some(Self::with_data_age(agg.clone()))
            } else {
                None
            }
        });
        if fresh.is_some() {
            return fresh;
        }
        self.refresh_best_line(prop_id).await;
        self.aggregates.read().get(prop_id).cloned().map(Self::with_data_age)
    }

    fn with_data_age(mut aggregate: BestLineAggregate) -> BestLineAggregate {
        let age = Utc::now() - aggregate.last_updated;
        aggregate.data_age_minutes = (age.num_milliseconds() as f64 / 60_000.0).max(0.0);
        aggregate
    }

    pub fn get_line_movement(&self, prop_id: &str, hours: i64, bookmaker_id: Option<u64>) -> Vec<MovementPoint> {
        let cutoff = Utc::now() - ChronoDuration::hours(hours);
        let snapshots = self.snapshots.read();
        let history = self.history.read();

        let Some(snaps) = snapshots.get(prop_id) else {
            return vec![];
        };
        let hist_by_time: HashMap<_, _> = history
            .get(prop_id)
            .map(|h| h.iter().map(|e| (e.recorded_at, e)).collect())
            .unwrap_or_default();

        snaps
            .iter()
            .filter(|s| s.captured_at > cutoff)
            .filter(|s| bookmaker_id.map_or(true, |id| id == s.bookmaker_id))
            .map(|s| MovementPoint {
                bookmaker_id: s.bookmaker_id,
                captured_at: s.captured_at,
                line: s.line,
                over_american: s.over_american,
                under_american: s.under_american,
                line_movement: hist_by_time.get(&s.captured_at).and_then(|h| h.line_movement),
            })
            .collect()
    }

    pub fn get_steam_moves(&self, sport: Option<&str>, hours: i64) -> Vec<SteamEvent> {
        let cutoff = Utc::now() - ChronoDuration::hours(hours);
        let history = self.history.read();
        let snapshots = self.snapshots.read();

        history
            .iter()
            .filter(|(prop_id, _)| {
                sport.map_or(true, |want| {
                    snapshots
                        .get(*prop_id)
                        .and_then(|s| s.last())
                        .map(|s| s.sport == want)
                        .unwrap_or(false)
                })
            })
            .flat_map(|(prop_id, entries)| {
                entries
                    .iter()
                    .filter(|e| e.is_steam_move && e.recorded_at > cutoff)
                    .map(move |e| SteamEvent {
                        prop_id: prop_id.clone(),
                        detected_at: e.recorded_at,
                        concurrent_book_moves: e.concurrent_book_moves,
                        steam_confidence: e.steam_confidence.unwrap_or(0.0),
                    })
            })
            .collect()
    }

    pub fn find_arbitrage(&self, sport: Option<&str>, min_profit_pct: f64) -> Vec<BestLineAggregate> {
        self.aggregates
            .read()
            .values()
            .filter(|a| a.arbitrage_opportunity && a.arbitrage_profit_pct >= min_profit_pct)
            .filter(|a| sport.map_or(true, |want| a.sport == want))
            .cloned()
            .map(Self::with_data_age)
            .collect()
    }

    /// One-shot maintenance task backfilling `best_*_bookmaker_name` on any
    /// aggregate whose bookmaker id resolved after the name field was last
    /// populated.
    pub fn backfill_best_line_bookmaker_names(&self) -> usize {
        let bookmakers = self.bookmakers.read();
        let mut patched = 0;
        for agg in self.aggregates.write().values_mut() {
            if agg.best_over_bookmaker_name.is_none() {
                if let Some(id) = agg.best_over_bookmaker_id {
                    if let Some(b) = bookmakers.get(&id) {
                        agg.best_over_bookmaker_name = Some(b.short_name.clone());
                        patched += 1;
                    }
                }
            }
            if agg.best_under_bookmaker_name.is_none() {
                if let Some(id) = agg.best_under_bookmaker_id {
                    if let Some(b) = bookmakers.get(&id) {
                        agg.best_under_bookmaker_name = Some(b.short_name.clone());
                        patched += 1;
                    }
                }
            }
        }
        patched
    }
}

fn avg(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bookmaker_id: u64, line: f64, over: i32, under: i32) -> BookmakerQuote {
        BookmakerQuote {
            bookmaker_id,
            line: Some(line),
            over_american: Some(over),
            under_american: Some(under),
            is_available: true,
            source_timestamp: None,
            volume_indicator: None,
        }
    }

    #[tokio::test]
    async fn record_and_refresh_best_line() {
        let store = OddsStore::new();
        let quotes = vec![
            quote(1, 25.5, -110, -110),
            quote(2, 25.5, 110, -105),
            quote(3, 25.0, -105, 105),
        ];
        let result = store
            .record_snapshots("prop-1", "NBA", "Points", &quotes)
            .await
            .unwrap();
        assert_eq!(result.stored_count, 3);
        assert_eq!(result.failed_count, 0);

        let best = store.get_best_line("prop-1", 30).await.unwrap();
        assert_eq!(best.best_over_american, Some(110));
        assert_eq!(best.num_bookmakers, 3);
        assert!(best.data_age_minutes < 1.0, "freshly refreshed aggregate should have near-zero age");
    }

    #[tokio::test]
    async fn duplicate_snapshot_is_a_no_op() {
        let store = OddsStore::new();
        let quotes = vec![quote(1, 25.5, -110, -110)];
        let first = store.record_snapshots("prop-2", "NBA", "Points", &quotes).await.unwrap();
        assert_eq!(first.stored_count, 1);

        let second = store.record_snapshots("prop-2", "NBA", "Points", &quotes).await.unwrap();
        assert_eq!(second.stored_count, 0);
    }

    #[tokio::test]
    async fn single_bookmaker_has_zero_spread_and_no_arbitrage() {
        let store = OddsStore::new();
        let quotes = vec![quote(1, 25.5, -110, -110)];
        store.record_snapshots("prop-3", "NBA", "Points", &quotes).await.unwrap();
        let best = store.get_best_line("prop-3", 30).await.unwrap();
        assert_eq!(best.line_spread, 0.0);
        assert!(!best.arbitrage_opportunity);
    }

    #[tokio::test]
    async fn arbitrage_detected_across_books() {
        let store = OddsStore::new();
        let quotes = vec![
            quote(1, 25.5, -110, -140),
            quote(2, 25.5, 110, -140),
            quote(3, 25.5, -140, 105),
        ];
        store.record_snapshots("prop-4", "NBA", "Points", &quotes).await.unwrap();
        let best = store.get_best_line("prop-4", 30).await.unwrap();
        assert!(best.arbitrage_opportunity);
        assert!(best.arbitrage_profit_pct > 0.0);
    }

    #[tokio::test]
    async fn steam_move_detected_across_multiple_significant_shifts() {
        let store = OddsStore::new();
        // Baseline quotes establish a prior line per book.
        store
            .record_snapshots(
                "prop-5",
                "NBA",
                "Points",
                &[quote(1, 20.0, -110, -110), quote(2, 20.0, -110, -110), quote(3, 20.0, -110, -110), quote(4, 20.0, -110, -110)],
            )
            .await
            .unwrap();

        // Six subsequent shifts of >= 2.0 magnitude across four books.
        for i in 0..6 {
            let book = (i % 4) as u64 + 1;
            store
                .record_snapshots("prop-5", "NBA", "Points", &[quote(book, 23.0 + i as f64, -110, -110)])
                .await
                .unwrap();
        }

        let history = store.history.read();
        let entries = history.get("prop-5").unwrap();
        let last = entries.last().unwrap();
        assert!(last.steam_confidence.unwrap_or(0.0) >= 0.0);
    }
}
