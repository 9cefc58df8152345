//! Environment-driven configuration, loaded once at process start.
//!
//! Every field has a conservative default matching the component defaults
//! used throughout this crate; `.env` / process environment variables
//! override them via `dotenv().ok()` followed by per-field
//! `env::var(...).unwrap_or_else(...).parse().unwrap_or(default)`.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_memory_entries: usize,
    pub default_ttl: Duration,
    pub correlation_ttl: Duration,
    pub factor_model_ttl: Duration,
    pub monte_carlo_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_entries: 10_000,
            default_ttl: Duration::from_secs(3600),
            correlation_ttl: Duration::from_secs(3600),
            factor_model_ttl: Duration::from_secs(2 * 3600),
            monte_carlo_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_tasks: usize,
    pub queue_capacity: usize,
    pub tick_interval: Duration,
    pub cleanup_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            queue_capacity: 1024,
            tick_interval: Duration::from_secs(5),
            cleanup_retention: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    pub min_samples: usize,
    pub shrinkage_enabled: bool,
    pub shrinkage_alpha: f64,
    pub min_explained: f64,
    pub max_factors: usize,
    pub eigenvalue_floor: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            min_samples: 8,
            shrinkage_enabled: true,
            shrinkage_alpha: 0.1,
            min_explained: 0.6,
            max_factors: 3,
            eigenvalue_floor: 1e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonteCarloConfig {
    pub batch_size: usize,
    pub min_draws: usize,
    pub max_draws: usize,
    pub confidence_level: f64,
    pub target_ci_width: f64,
    pub cholesky_cache_capacity: usize,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            min_draws: 1000,
            max_draws: 100_000,
            confidence_level: 0.95,
            target_ci_width: 0.015,
            cholesky_cache_capacity: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub max_legs: usize,
    pub min_legs: usize,
    pub min_ev_per_leg: f64,
    pub max_avg_correlation: f64,
    pub max_pairwise_correlation: f64,
    pub target_probability: f64,
    pub max_exposure_per_player: f64,
    pub max_exposure_per_prop_type: f64,
    pub correlation_penalty_weight: f64,
    pub beam_width: usize,
    pub solutions_limit: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_legs: 6,
            min_legs: 2,
            min_ev_per_leg: 0.02,
            max_avg_correlation: 0.6,
            max_pairwise_correlation: 0.7,
            target_probability: 0.25,
            max_exposure_per_player: 0.15,
            max_exposure_per_prop_type: 0.25,
            correlation_penalty_weight: 0.4,
            beam_width: 40,
            solutions_limit: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub cache_refresh_interval: Duration,
    pub factor_rebuild_interval: Duration,
    pub snapshot_retention: Duration,
    pub history_retention: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cache_refresh_interval: Duration::from_secs(10 * 60),
            factor_rebuild_interval: Duration::from_secs(6 * 3600),
            snapshot_retention: Duration::from_secs(7 * 24 * 3600),
            history_retention: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub correlation: CorrelationConfig,
    pub monte_carlo: MonteCarloConfig,
    pub optimizer: OptimizerConfig,
    pub maintenance: MaintenanceConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from the process environment, falling back to
    /// component defaults for anything unset. Reads a `.env` file if present.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut cfg = Config::default();

        cfg.cache.max_memory_entries = env_or("CACHE_MAX_ENTRIES", cfg.cache.max_memory_entries);
        cfg.scheduler.max_concurrent_tasks =
            env_or("SCHEDULER_WORKERS", cfg.scheduler.max_concurrent_tasks);
        cfg.scheduler.queue_capacity = env_or("SCHEDULER_QUEUE_CAPACITY", cfg.scheduler.queue_capacity);
        cfg.correlation.min_samples = env_or("CORRELATION_MIN_SAMPLES", cfg.correlation.min_samples);
        cfg.correlation.shrinkage_alpha =
            env_or("CORRELATION_SHRINKAGE_ALPHA", cfg.correlation.shrinkage_alpha);
        cfg.monte_carlo.batch_size = env_or("MONTE_CARLO_BATCH_SIZE", cfg.monte_carlo.batch_size);
        cfg.monte_carlo.max_draws = env_or("MONTE_CARLO_MAX_DRAWS", cfg.monte_carlo.max_draws);
        cfg.optimizer.beam_width = env_or("OPTIMIZER_BEAM_WIDTH", cfg.optimizer.beam_width);
        cfg.optimizer.solutions_limit =
            env_or("OPTIMIZER_SOLUTIONS_LIMIT", cfg.optimizer.solutions_limit);

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_conservative_component_values() {
        let cfg = Config::default();
        assert_eq!(cfg.scheduler.max_concurrent_tasks, 10);
        assert_eq!(cfg.optimizer.beam_width, 40);
        assert_eq!(cfg.optimizer.solutions_limit, 10);
        assert_eq!(cfg.monte_carlo.cholesky_cache_capacity, 50);
        assert!((cfg.correlation.shrinkage_alpha - 0.1).abs() < 1e-12);
    }
}
