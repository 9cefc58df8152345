//! Pairwise correlation matrices, PSD enforcement, PCA factor models and
//! Gaussian copula parameter extraction.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::{Cache, Namespace};
use crate::error::{CoreError, CoreResult};

const MIN_SAMPLES_DEFAULT: usize = 8;
const EIGENVALUE_FLOOR: f64 = 1e-8;
const OFF_DIAGONAL_CLAMP: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationDiagnostics {
    pub is_symmetric: bool,
    pub is_psd: bool,
    pub min_eigenvalue: f64,
    pub condition_number: f64,
    pub max_off_diagonal: f64,
    pub mean_correlation: f64,
    pub rank_deficiency: usize,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub prop_ids: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
    pub diagnostics: CorrelationDiagnostics,
    pub num_observations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorModel {
    pub prop_ids: Vec<String>,
    pub loadings: Vec<Vec<f64>>,
    pub eigenvalues: Vec<f64>,
    pub explained_variance_ratio: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropMarginal {
    pub prop_id: String,
    pub mean: f64,
    pub std: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopulaParams {
    pub prop_ids: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
    pub marginals: Vec<PropMarginal>,
}

pub struct CorrelationEngine {
    pub min_samples: usize,
    pub shrinkage_enabled: bool,
    pub shrinkage_alpha: f64,
    pub min_explained: f64,
    pub max_factors: usize,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self {
            min_samples: MIN_SAMPLES_DEFAULT,
            shrinkage_enabled: true,
            shrinkage_alpha: 0.1,
            min_explained: 0.6,
            max_factors: 3,
        }
    }
}

impl CorrelationEngine {
    pub fn new(min_samples: usize, shrinkage_enabled: bool, shrinkage_alpha: f64, min_explained: f64, max_factors: usize) -> Self {
        Self { min_samples, shrinkage_enabled, shrinkage_alpha, min_explained, max_factors }
    }

    pub fn from_config(config: &crate::config::CorrelationConfig) -> Self {
        Self::new(
            config.min_samples,
            config.shrinkage_enabled,
            config.shrinkage_alpha,
            config.min_explained,
            config.max_factors,
        )
    }

    /// Computes the pairwise correlation matrix for `series`, a map of
    /// `prop_id -> historical outcome series`. Series not meeting
    /// `min_samples` are dropped silently (degraded result, not an error).
    pub fn compute_correlation(
        &self,
        series: &BTreeMap<String, Vec<f64>>,
        method: CorrelationMethod,
    ) -> CoreResult<CorrelationResult> {
        let usable: Vec<(&String, &Vec<f64>)> = series
            .iter()
            .filter(|(_, values)| values.len() >= self.min_samples)
            .collect();

        if usable.is_empty() {
            return Err(CoreError::InsufficientData(
                "no prop series meet min_samples".into(),
            ));
        }

        if usable.len() < 2 {
            let prop_ids = vec![usable[0].0.clone()];
            return Ok(CorrelationResult {
                prop_ids,
                matrix: vec![vec![1.0]],
                diagnostics: CorrelationDiagnostics {
                    is_symmetric: true,
                    is_psd: true,
                    min_eigenvalue: 1.0,
                    condition_number: 1.0,
                    max_off_diagonal: 0.0,
                    mean_correlation: 1.0,
                    rank_deficiency: 0,
                    degraded: true,
                },
                num_observations: usable[0].1.len(),
            });
        }

        let prop_ids: Vec<String> = usable.iter().map(|(id, _)| (*id).clone()).collect();
        let n = prop_ids.len();
        let min_len = usable.iter().map(|(_, v)| v.len()).min().unwrap();

        let mut raw = DMatrix::<f64>::from_element(n, n, 0.0);
        for i in 0..n {
            raw[(i, i)] = 1.0;
            for j in (i + 1)..n {
                let a = &usable[i].1[..min_len];
                let b = &usable[j].1[..min_len];
                let rho = match method {
                    CorrelationMethod::Pearson => pearson(a, b),
                    CorrelationMethod::Spearman => spearman(a, b),
                };
                let rho = if rho.is_finite() { rho.clamp(-1.0, 1.0) } else { 0.0 };
                raw[(i, j)] = rho;
                raw[(j, i)] = rho;
            }
        }

        let shrunk = if self.shrinkage_enabled {
            shrink(&raw, self.shrinkage_alpha)
        } else {
            raw
        };

        let (psd, min_eig, eigenvalue_decomp_available) = enforce_psd(&shrunk);

        let diagnostics = diagnostics_for(&psd, min_eig, eigenvalue_decomp_available);

        Ok(CorrelationResult {
            prop_ids,
            matrix: to_vec2(&psd),
            diagnostics,
            num_observations: min_len,
        })
    }

    pub fn factor_model(&self, result: &CorrelationResult) -> CoreResult<FactorModel> {
        let n = result.prop_ids.len();
        if n == 0 {
            return Err(CoreError::InsufficientData("no props for factor model".into()));
        }
        let matrix = from_vec2(&result.matrix);
        let eig = SymmetricEigen::new(matrix);

        let mut pairs: Vec<(f64, usize)> = eig.eigenvalues.iter().copied().enumerate().map(|(i, v)| (v, i)).collect();
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

        let total: f64 = eig.eigenvalues.iter().map(|v| v.max(0.0)).sum();
        let mut cumulative = 0.0;
        let mut k = 0;
        for (value, _) in pairs.iter() {
            if k >= self.max_factors {
                break;
            }
            k += 1;
            cumulative += value.max(0.0);
            if total > 0.0 && cumulative / total >= self.min_explained {
                break;
            }
        }
        let k = k.max(1).min(n);

        let mut loadings = vec![vec![0.0; k]; n];
        let mut eigenvalues = Vec::with_capacity(k);
        for (col, (value, idx)) in pairs.iter().take(k).enumerate() {
            let scale = value.max(0.0).sqrt();
            eigenvalues.push(*value);
            for row in 0..n {
                loadings[row][col] = eig.eigenvectors[(row, *idx)] * scale;
            }
        }

        let explained_variance_ratio = if total > 0.0 { cumulative / total } else { 0.0 };

        Ok(FactorModel {
            prop_ids: result.prop_ids.clone(),
            loadings,
            eigenvalues,
            explained_variance_ratio,
            sample_size: result.num_observations,
        })
    }

    pub fn copula_params(
        &self,
        result: &CorrelationResult,
        series: &BTreeMap<String, Vec<f64>>,
    ) -> CopulaParams {
        let marginals = result
            .prop_ids
            .iter()
            .map(|id| {
                let values = series.get(id).cloned().unwrap_or_default();
                let n = values.len().max(1);
                let mean = values.iter().sum::<f64>() / n as f64;
                let variance = if values.len() > 1 {
                    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
                } else {
                    0.0
                };
                PropMarginal { prop_id: id.clone(), mean, std: variance.sqrt(), samples: values.len() }
            })
            .collect();

        CopulaParams { prop_ids: result.prop_ids.clone(), matrix: result.matrix.clone(), marginals }
    }
}

pub fn correlation_cache_key(prop_ids: &[String], method: CorrelationMethod, shrinkage: bool, alpha: f64) -> String {
    let mut sorted = prop_ids.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    for id in &sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"|");
    }
    hasher.update(format!("{method:?}|{shrinkage}|{alpha:.4}").as_bytes());
    hex::encode(hasher.finalize())
}

pub fn factor_cache_key(prop_ids: &[String], method: &str, version_tag: &str) -> String {
    let mut sorted = prop_ids.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    for id in &sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"|");
    }
    hasher.update(method.as_bytes());
    hasher.update(b"|");
    hasher.update(version_tag.as_bytes());
    hex::encode(hasher.finalize())
}

/// Computes (or retrieves from cache) the correlation matrix for `prop_ids`,
/// caching the result in the `correlation` namespace.
pub async fn cached_correlation(
    cache: &Cache,
    prop_ids: &[String],
    method: CorrelationMethod,
    shrinkage: bool,
    alpha: f64,
    compute: impl FnOnce() -> CoreResult<CorrelationResult> + Send + 'static,
) -> CoreResult<CorrelationResult> {
    let key = correlation_cache_key(prop_ids, method, shrinkage, alpha);
    let ttl = std::time::Duration::from_secs(3600);
    cache
        .get_or_set(&key, ttl, Namespace::Correlation, move || async move { compute() })
        .await
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

fn spearman(a: &[f64], b: &[f64]) -> f64 {
    pearson(&rank(a), &rank(b))
}

fn rank(values: &[f64]) -> Vec<f64> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&i, &j| values[i].partial_cmp(&values[j]).unwrap());
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < idx.len() {
        let mut j = i;
        while j + 1 < idx.len() && values[idx[j + 1]] == values[idx[i]] {
            j += 1;
        }
        let avg_rank = ((i + j) as f64 / 2.0) + 1.0;
        for pos in idx.iter().take(j + 1).skip(i) {
            ranks[*pos] = avg_rank;
        }
        i = j + 1;
    }
    ranks
}

fn shrink(matrix: &DMatrix<f64>, alpha: f64) -> DMatrix<f64> {
    let n = matrix.nrows();
    let identity = DMatrix::<f64>::identity(n, n);
    matrix * (1.0 - alpha) + identity * alpha
}

/// Spectral clip to PSD: clamp eigenvalues to the floor, reconstruct, force
/// unit diagonal. Falls back to off-diagonal clamping if decomposition fails
/// (practically unreachable for a real symmetric matrix, but the fallback
/// keeps this function total rather than panicking on pathological input).
fn enforce_psd(matrix: &DMatrix<f64>) -> (DMatrix<f64>, f64, bool) {
    let n = matrix.nrows();
    let eig = SymmetricEigen::new(matrix.clone());
    let min_eig = eig.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);

    if !eig.eigenvalues.iter().all(|v| v.is_finite()) {
        let mut fallback = matrix.clone();
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    fallback[(i, j)] = fallback[(i, j)].clamp(-OFF_DIAGONAL_CLAMP, OFF_DIAGONAL_CLAMP);
                } else {
                    fallback[(i, j)] = 1.0;
                }
            }
        }
        return (fallback, min_eig, false);
    }

    let clipped: Vec<f64> = eig.eigenvalues.iter().map(|v| v.max(EIGENVALUE_FLOOR)).collect();
    let clipped_diag = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(clipped));
    let mut reconstructed = &eig.eigenvectors * clipped_diag * eig.eigenvectors.transpose();

    for i in 0..n {
        reconstructed[(i, i)] = 1.0;
    }
    // Symmetrize to kill floating point drift from the reconstruction.
    let reconstructed = (&reconstructed + &reconstructed.transpose()) * 0.5;

    (reconstructed, min_eig, true)
}

fn diagnostics_for(matrix: &DMatrix<f64>, min_eigenvalue: f64, decomposed: bool) -> CorrelationDiagnostics {
    let n = matrix.nrows();
    let mut is_symmetric = true;
    let mut max_off_diagonal = 0.0_f64;
    let mut sum_off_diagonal = 0.0;
    let mut count_off_diagonal = 0usize;
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            if (matrix[(i, j)] - matrix[(j, i)]).abs() > 1e-9 {
                is_symmetric = false;
            }
            if i < j {
                max_off_diagonal = max_off_diagonal.max(matrix[(i, j)].abs());
                sum_off_diagonal += matrix[(i, j)];
                count_off_diagonal += 1;
            }
        }
    }

    let eig = SymmetricEigen::new(matrix.clone());
    let min_eig_final = eig.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    let max_eig = eig.eigenvalues.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let is_psd = min_eig_final >= -1e-6;
    let condition_number = if min_eig_final.abs() > 1e-12 { max_eig / min_eig_final } else { f64::INFINITY };
    let rank_deficiency = eig.eigenvalues.iter().filter(|v| v.abs() < 1e-8).count();
    let mean_correlation = if count_off_diagonal > 0 { sum_off_diagonal / count_off_diagonal as f64 } else { 0.0 };

    CorrelationDiagnostics {
        is_symmetric,
        is_psd,
        min_eigenvalue: if decomposed { min_eig_final } else { min_eigenvalue },
        condition_number,
        max_off_diagonal,
        mean_correlation,
        rank_deficiency,
        degraded: false,
    }
}

fn to_vec2(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    (0..matrix.nrows())
        .map(|i| (0..matrix.ncols()).map(|j| matrix[(i, j)]).collect())
        .collect()
}

fn from_vec2(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let n = rows.len();
    let mut matrix = DMatrix::<f64>::zeros(n, n);
    for (i, row) in rows.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            matrix[(i, j)] = *value;
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<f64> {
        values.to_vec()
    }

    #[test]
    fn matrix_is_symmetric_and_psd() {
        let engine = CorrelationEngine::default();
        let mut data = BTreeMap::new();
        data.insert("a".to_string(), series(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]));
        data.insert("b".to_string(), series(&[2.0, 3.0, 2.5, 5.0, 4.0, 7.0, 6.5, 9.0]));
        data.insert("c".to_string(), series(&[8.0, 7.0, 6.0, 5.0, 4.0, 3.0, 2.0, 1.0]));

        let result = engine.compute_correlation(&data, CorrelationMethod::Pearson).unwrap();
        assert!(result.diagnostics.is_symmetric);
        assert!(result.diagnostics.is_psd);
        for row in &result.matrix {
            for value in row {
                assert!(*value >= -1.0 - 1e-9 && *value <= 1.0 + 1e-9);
            }
        }
        for i in 0..result.matrix.len() {
            assert!((result.matrix[i][i] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn fewer_than_two_props_degrades_to_identity() {
        let engine = CorrelationEngine::default();
        let mut data = BTreeMap::new();
        data.insert("a".to_string(), series(&[1.0; 10]));
        let result = engine.compute_correlation(&data, CorrelationMethod::Pearson).unwrap();
        assert!(result.diagnostics.degraded);
        assert_eq!(result.matrix, vec![vec![1.0]]);
    }

    #[test]
    fn zero_usable_props_is_insufficient_data() {
        let engine = CorrelationEngine::default();
        let mut data = BTreeMap::new();
        data.insert("a".to_string(), series(&[1.0, 2.0]));
        let err = engine.compute_correlation(&data, CorrelationMethod::Pearson).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InsufficientData);
    }

    #[test]
    fn factor_model_explains_majority_variance() {
        let engine = CorrelationEngine::default();
        let mut data = BTreeMap::new();
        data.insert("a".to_string(), series(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]));
        data.insert("b".to_string(), series(&[1.1, 2.1, 2.9, 4.2, 4.8, 6.3, 6.9, 8.2]));
        data.insert("c".to_string(), series(&[1.2, 1.9, 3.2, 3.8, 5.3, 5.8, 7.2, 7.9]));

        let corr = engine.compute_correlation(&data, CorrelationMethod::Pearson).unwrap();
        let factors = engine.factor_model(&corr).unwrap();
        assert!(factors.explained_variance_ratio >= 0.6 - 1e-9);
        assert!(!factors.loadings.is_empty());
    }

    #[test]
    fn correlation_cache_key_is_order_independent() {
        let a = correlation_cache_key(&["x".into(), "y".into()], CorrelationMethod::Pearson, true, 0.1);
        let b = correlation_cache_key(&["y".into(), "x".into()], CorrelationMethod::Pearson, true, 0.1);
        assert_eq!(a, b);
    }
}
