//! Correlated Monte Carlo parlay simulation with adaptive stopping,
//! Cholesky caching and numerical regularization when the correlation
//! matrix is too close to singular to factorize directly.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{info, warn};

use crate::cache::{Cache, Namespace};
use crate::error::{CoreError, CoreResult};

const EIGENVALUE_FLOOR: f64 = 1e-8;
const PROB_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    pub edge_id: String,
    pub prop_id: String,
    pub prob_over: f64,
}

#[derive(Debug, Clone)]
pub struct MonteCarloParams {
    pub draws_requested: usize,
    pub adaptive: bool,
    pub seed: Option<u64>,
    pub confidence_level: f64,
    pub target_ci_width: f64,
    pub batch_size: usize,
    pub min_draws: usize,
    pub max_draws: usize,
}

impl Default for MonteCarloParams {
    fn default() -> Self {
        Self {
            draws_requested: 50_000,
            adaptive: true,
            seed: None,
            confidence_level: 0.95,
            target_ci_width: 0.015,
            batch_size: 5_000,
            min_draws: 1_000,
            max_draws: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionSnapshot {
    pub mean: f64,
    pub variance: f64,
    pub std_error: f64,
    pub skewness: f64,
    pub kurtosis: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub prob_joint: f64,
    pub draws_executed: usize,
    pub ci_low: f64,
    pub ci_high: f64,
    pub variance_estimate: f64,
    pub ev_independent: f64,
    pub ev_adjusted: f64,
    pub distribution_snapshot: DistributionSnapshot,
    pub adaptive_stopped: bool,
    pub regularization_applied: Option<f64>,
}

/// Approximate-LRU cache of Cholesky lower-triangular factors keyed by a
/// stable hash of the (rounded) correlation matrix, mirroring the eviction
/// shape of `cache::Cache` but specialized to avoid (de)serializing
/// `DMatrix` through `serde_json`.
struct CholeskyCache {
    capacity: usize,
    entries: SyncRwLock<HashMap<String, DMatrix<f64>>>,
    order: SyncMutex<VecDeque<String>>,
}

impl CholeskyCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: SyncRwLock::new(HashMap::new()),
            order: SyncMutex::new(VecDeque::new()),
        }
    }

    fn get(&self, key: &str) -> Option<DMatrix<f64>> {
        let hit = self.entries.read().get(key).cloned();
        if hit.is_some() {
            let mut order = self.order.lock();
            order.retain(|k| k != key);
            order.push_back(key.to_string());
        }
        hit
    }

    fn insert(&self, key: String, value: DMatrix<f64>) {
        let mut entries = self.entries.write();
        let mut order = self.order.lock();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            if let Some(oldest) = order.pop_front() {
                entries.remove(&oldest);
            }
        }
        order.retain(|k| k != &key);
        order.push_back(key.clone());
        entries.insert(key, value);
    }
}

pub struct MonteCarloEngine {
    cholesky_cache: CholeskyCache,
}

impl Default for MonteCarloEngine {
    fn default() -> Self {
        Self::new(50)
    }
}

impl MonteCarloEngine {
    pub fn new(cholesky_cache_capacity: usize) -> Self {
        Self { cholesky_cache: CholeskyCache::new(cholesky_cache_capacity) }
    }

    pub fn from_config(config: &crate::config::MonteCarloConfig) -> Self {
        Self::new(config.cholesky_cache_capacity)
    }

    /// Draws correlated outcomes by thresholding a standard-normal sample
    /// against each leg's inverse-CDF threshold, with adaptive stopping on
    /// the running confidence-interval half-width.
    pub fn simulate(
        &self,
        legs: &[Leg],
        correlation: &[Vec<f64>],
        params: &MonteCarloParams,
        factor_loadings: Option<&[Vec<f64>]>,
    ) -> CoreResult<MonteCarloResult> {
        let n = legs.len();
        if n == 0 {
            return Err(CoreError::InsufficientData("no legs supplied".into()));
        }
        if correlation.len() != n || correlation.iter().any(|row| row.len() != n) {
            return Err(CoreError::InsufficientData(format!(
                "correlation matrix shape does not match {n} legs"
            )));
        }

        let mut thresholds = Vec::with_capacity(n);
        let normal = Normal::new(0.0, 1.0).map_err(|e| CoreError::internal(e.to_string()))?;
        for leg in legs {
            if !(0.0..=1.0).contains(&leg.prob_over) {
                return Err(CoreError::InvalidProbability(format!(
                    "leg {} has prob_over {} outside [0,1]",
                    leg.edge_id, leg.prob_over
                )));
            }
            let p = leg.prob_over.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            thresholds.push(normal.inverse_cdf(p));
        }

        let matrix = from_rows(correlation);
        let (sampler, regularization_applied) = self.sampler_for(&matrix, factor_loadings)?;

        let confidence_level = params.confidence_level.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
        let z = normal.inverse_cdf(0.5 + confidence_level / 2.0);

        let seed = params.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut draws_executed = 0usize;
        let mut successes = 0u64;
        let mut adaptive_stopped = false;
        let target_draws = params.draws_requested.min(params.max_draws).max(1);

        loop {
            let remaining = target_draws.saturating_sub(draws_executed);
            if remaining == 0 {
                break;
            }
            let batch = remaining.min(params.batch_size.max(1));
            for _ in 0..batch {
                let x = sampler.draw(&mut rng);
                let success = (0..n).all(|i| x[i] > -thresholds[i]);
                if success {
                    successes += 1;
                }
            }
            draws_executed += batch;

            let p_hat = successes as f64 / draws_executed as f64;
            let variance = p_hat * (1.0 - p_hat) / draws_executed as f64;
            let half_width = z * variance.sqrt();

            if params.adaptive
                && 2.0 * half_width <= params.target_ci_width
                && draws_executed >= params.min_draws
            {
                adaptive_stopped = true;
                break;
            }
        }

        let p_hat = successes as f64 / draws_executed as f64;
        let variance = p_hat * (1.0 - p_hat) / draws_executed as f64;
        let half_width = z * variance.sqrt();
        let ev_independent: f64 = legs.iter().map(|l| l.prob_over).product();
        let kurtosis = if p_hat > 0.0 { 1.0 / p_hat - 1.0 } else { f64::INFINITY };

        Ok(MonteCarloResult {
            prob_joint: p_hat,
            draws_executed,
            ci_low: (p_hat - half_width).max(0.0),
            ci_high: (p_hat + half_width).min(1.0),
            variance_estimate: variance,
            ev_independent,
            ev_adjusted: p_hat,
            distribution_snapshot: DistributionSnapshot {
                mean: p_hat,
                variance,
                std_error: variance.sqrt(),
                skewness: 0.0,
                kurtosis,
            },
            adaptive_stopped,
            regularization_applied,
        })
    }

    fn sampler_for(
        &self,
        matrix: &DMatrix<f64>,
        factor_loadings: Option<&[Vec<f64>]>,
    ) -> CoreResult<(Sampler, Option<f64>)> {
        if let Some(loadings) = factor_loadings {
            let n = matrix.nrows();
            let k = loadings.first().map(|r| r.len()).unwrap_or(0);
            if loadings.len() == n && k > 0 {
                return Ok((Sampler::Factor(from_rows(loadings), k), None));
            }
        }

        let key = matrix_hash(matrix);
        if let Some(l) = self.cholesky_cache.get(&key) {
            return Ok((Sampler::Cholesky(l), None));
        }

        let (prepared, regularization) = regularize_if_needed(matrix);
        match Cholesky::new(prepared.clone()) {
            Some(chol) => {
                let l = chol.l();
                self.cholesky_cache.insert(key, l.clone());
                Ok((Sampler::Cholesky(l), regularization))
            }
            None => {
                warn!("cholesky factorization failed after regularization; falling back to independence");
                Err(CoreError::NumericalInstability(
                    "correlation matrix is not positive definite after regularization".into(),
                ))
            }
        }
    }
}

enum Sampler {
    Cholesky(DMatrix<f64>),
    Factor(DMatrix<f64>, usize),
}

impl Sampler {
    fn draw(&self, rng: &mut ChaCha8Rng) -> DVector<f64> {
        match self {
            Sampler::Cholesky(l) => {
                let n = l.nrows();
                let xi = DVector::from_iterator(n, (0..n).map(|_| standard_normal(rng)));
                l * xi
            }
            Sampler::Factor(loadings, k) => {
                let xi = DVector::from_iterator(*k, (0..*k).map(|_| standard_normal(rng)));
                loadings * xi
            }
        }
    }
}

fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-12);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// If the minimum eigenvalue is at or below the floor, adds
/// `max(1e-6, |min_eig| + 1e-8)·I` before Cholesky, returning the
/// regularization magnitude applied (for the caller to log).
fn regularize_if_needed(matrix: &DMatrix<f64>) -> (DMatrix<f64>, Option<f64>) {
    let eig = SymmetricEigen::new(matrix.clone());
    let min_eig = eig.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    if min_eig > EIGENVALUE_FLOOR {
        return (matrix.clone(), None);
    }
    let magnitude = (1e-6_f64).max(min_eig.abs() + 1e-8);
    info!(magnitude, min_eig, "regularizing correlation matrix before Cholesky");
    let n = matrix.nrows();
    let regularized = matrix + DMatrix::<f64>::identity(n, n) * magnitude;
    (regularized, Some(magnitude))
}

fn matrix_hash(matrix: &DMatrix<f64>) -> String {
    let mut hasher = Sha256::new();
    for value in matrix.iter() {
        hasher.update(format!("{:.4}|", value).as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn from_rows(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let n = rows.len();
    let k = rows.first().map(|r| r.len()).unwrap_or(0);
    let mut matrix = DMatrix::<f64>::zeros(n, k);
    for (i, row) in rows.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            matrix[(i, j)] = *value;
        }
    }
    matrix
}

/// Cache key for a simulation run: `SHA-256(sorted(edge_id, p_i), matrix_hash, draws, seed)`.
pub fn run_key(legs: &[Leg], correlation: &[Vec<f64>], draws: usize, seed: Option<u64>) -> String {
    let mut pairs: Vec<(String, f64)> =
        legs.iter().map(|l| (l.edge_id.clone(), l.prob_over)).collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = Sha256::new();
    for (id, p) in &pairs {
        hasher.update(id.as_bytes());
        hasher.update(format!(":{:.4}|", p).as_bytes());
    }
    hasher.update(matrix_hash(&from_rows(correlation)).as_bytes());
    hasher.update(format!("|{draws}|{:?}", seed).as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn cached_simulate(
    cache: &Cache,
    engine: &MonteCarloEngine,
    legs: &[Leg],
    correlation: &[Vec<f64>],
    params: &MonteCarloParams,
    factor_loadings: Option<&[Vec<f64>]>,
) -> CoreResult<MonteCarloResult> {
    let key = run_key(legs, correlation, params.draws_requested, params.seed);
    let ttl = Duration::from_secs(24 * 3600);
    let legs = legs.to_vec();
    let correlation = correlation.to_vec();
    let params = params.clone();
    let loadings = factor_loadings.map(|l| l.to_vec());
    cache
        .get_or_set(&key, ttl, Namespace::MonteCarlo, move || async move {
            engine.simulate(&legs, &correlation, &params, loadings.as_deref())
        })
        .await
}
