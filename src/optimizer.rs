//! Beam search over edge subsets under pairwise/average correlation caps
//! and exposure limits, scored by a configurable objective. Expansion
//! scoring at each depth is parallelized with `rayon` since it is
//! CPU-bound batch work with no I/O to overlap.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::OptimizerConfig;
use crate::correlation::CorrelationResult;
use crate::error::{CoreError, CoreResult};
use crate::monte_carlo::{Leg, MonteCarloEngine, MonteCarloParams, MonteCarloResult};
use crate::scheduler::CancelToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub edge_id: String,
    pub prop_id: String,
    pub prob_over: f64,
    pub offered_line: f64,
    pub fair_line: f64,
    pub volatility_score: f64,
    pub ev: f64,
    pub correlation_cluster_id: Option<String>,
    pub player_id: Option<String>,
    pub prop_type: Option<String>,
}

impl Edge {
    pub fn prob_under(&self) -> f64 {
        1.0 - self.prob_over
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    Ev,
    EvVarRatio,
    TargetProb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationStatus {
    Running,
    Success,
    Failed,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactType {
    Trace,
    IntermediatePop,
    HeuristicStep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationArtifact {
    pub id: Uuid,
    pub optimization_run_id: Uuid,
    pub artifact_type: ArtifactType,
    pub content: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSolution {
    pub edge_ids: Vec<String>,
    pub score: f64,
    pub sum_ev: f64,
    pub avg_correlation: f64,
    pub max_pairwise_correlation: f64,
    pub portfolio_volatility: f64,
    pub prob_joint: Option<f64>,
    pub ci_low: Option<f64>,
    pub ci_high: Option<f64>,
    pub ev_adjusted: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRun {
    pub id: Uuid,
    pub objective: Objective,
    pub input_edge_ids: Vec<String>,
    pub status: OptimizationStatus,
    pub solution_ticket_sets: Vec<TicketSolution>,
    pub best_score: Option<f64>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
struct BeamState {
    indices: Vec<usize>,
    score: f64,
}

pub struct Optimizer<'a> {
    pub config: &'a OptimizerConfig,
}

impl<'a> Optimizer<'a> {
    pub fn new(config: &'a OptimizerConfig) -> Self {
        Self { config }
    }

    /// Runs the beam search over candidate edges. `correlation` must cover
    /// (a superset of) the candidate edges' `prop_id`s; edges whose prop was
    /// dropped by the correlation engine (too few samples) are excluded from
    /// the candidate pool, not just from the matrix.
    pub fn optimize(
        &self,
        edges: &[Edge],
        objective: Objective,
        correlation: &CorrelationResult,
        mc_engine: Option<&MonteCarloEngine>,
        cancel: Option<&CancelToken>,
    ) -> (OptimizationRun, Vec<OptimizationArtifact>) {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut artifacts = Vec::new();

        let result = self.run_inner(run_id, edges, objective, correlation, mc_engine, cancel, &mut artifacts);

        let duration_ms = started.elapsed().as_millis() as u64;
        let run = match result {
            Ok((solutions, status)) => {
                let best_score = solutions.first().map(|s| s.score);
                OptimizationRun {
                    id: run_id,
                    objective,
                    input_edge_ids: edges.iter().map(|e| e.edge_id.clone()).collect(),
                    status,
                    solution_ticket_sets: solutions,
                    best_score,
                    error_message: None,
                    duration_ms,
                    created_at: chrono::Utc::now(),
                }
            }
            Err(err) => OptimizationRun {
                id: run_id,
                objective,
                input_edge_ids: edges.iter().map(|e| e.edge_id.clone()).collect(),
                status: OptimizationStatus::Failed,
                solution_ticket_sets: vec![],
                best_score: None,
                error_message: Some(err.to_string()),
                duration_ms,
                created_at: chrono::Utc::now(),
            },
        };
        (run, artifacts)
    }

    fn run_inner(
        &self,
        run_id: Uuid,
        edges: &[Edge],
        objective: Objective,
        correlation: &CorrelationResult,
        mc_engine: Option<&MonteCarloEngine>,
        cancel: Option<&CancelToken>,
        artifacts: &mut Vec<OptimizationArtifact>,
    ) -> CoreResult<(Vec<TicketSolution>, OptimizationStatus)> {
        artifacts.push(trace(run_id, "candidates_loaded", serde_json::json!({"count": edges.len()})));

        let prop_index: std::collections::HashMap<&str, usize> = correlation
            .prop_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let candidates: Vec<Edge> = edges
            .iter()
            .filter(|e| e.ev >= self.config.min_ev_per_leg)
            .filter(|e| prop_index.contains_key(e.prop_id.as_str()))
            .cloned()
            .collect();

        artifacts.push(trace(
            run_id,
            "correlation_ready",
            serde_json::json!({"props": correlation.prop_ids.len(), "candidates": candidates.len()}),
        ));

        if candidates.len() < self.config.min_legs {
            return Err(CoreError::InsufficientData(format!(
                "only {} candidates meet min_ev_per_leg, need {}",
                candidates.len(),
                self.config.min_legs
            )));
        }

        let rho = |a: usize, b: usize| -> f64 {
            let ia = prop_index[candidates[a].prop_id.as_str()];
            let ib = prop_index[candidates[b].prop_id.as_str()];
            correlation.matrix[ia][ib]
        };

        let mut beam: Vec<BeamState> = (0..candidates.len())
            .map(|i| BeamState { indices: vec![i], score: self.score(&candidates, &[i], objective, &rho) })
            .collect();
        beam.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        beam.truncate(self.config.beam_width);

        let mut harvested: Vec<BeamState> = Vec::new();
        if self.config.min_legs <= 1 {
            harvested.extend(beam.iter().cloned());
        }

        let mut cancelled = false;
        for _depth in 1..self.config.max_legs {
            if cancel.map_or(false, |c| c.is_cancelled()) {
                cancelled = true;
                break;
            }

            let expansions: Vec<BeamState> = beam
                .par_iter()
                .flat_map(|state| {
                    let in_set: HashSet<usize> = state.indices.iter().copied().collect();
                    (0..candidates.len())
                        .into_par_iter()
                        .filter(|cand| !in_set.contains(cand))
                        .filter_map(|cand| self.try_expand(&candidates, state, cand, objective, &rho))
                        .collect::<Vec<_>>()
                })
                .collect();

            if expansions.is_empty() {
                break;
            }

            let mut ranked = expansions;
            ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            ranked.truncate(self.config.beam_width);

            artifacts.push(heuristic_step(run_id, &candidates, &ranked));

            if ranked.iter().any(|s| s.indices.len() >= self.config.min_legs) {
                harvested.extend(ranked.iter().filter(|s| s.indices.len() >= self.config.min_legs).cloned());
            }
            beam = ranked;
        }

        let mut solutions = self.finalize_solutions(&candidates, harvested, &rho, mc_engine);

        if objective == Objective::TargetProb {
            solutions = self.rescore_target_prob(&candidates, solutions, &rho, mc_engine);
        }

        solutions.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        solutions.truncate(self.config.solutions_limit);

        let status = if cancelled {
            if solutions.is_empty() { OptimizationStatus::Failed } else { OptimizationStatus::Partial }
        } else {
            OptimizationStatus::Success
        };

        Ok((solutions, status))
    }

    fn try_expand(
        &self,
        candidates: &[Edge],
        state: &BeamState,
        cand: usize,
        objective: Objective,
        rho: &impl Fn(usize, usize) -> f64,
    ) -> Option<BeamState> {
        for &member in &state.indices {
            if rho(member, cand).abs() > self.config.max_pairwise_correlation {
                return None;
            }
        }
        let mut indices = state.indices.clone();
        indices.push(cand);

        let avg_corr = avg_abs_correlation(&indices, rho);
        if avg_corr > self.config.max_avg_correlation {
            return None;
        }
        if !self.within_exposure_caps(candidates, &indices) {
            return None;
        }

        let score = self.score(candidates, &indices, objective, rho);
        Some(BeamState { indices, score })
    }

    fn within_exposure_caps(&self, candidates: &[Edge], indices: &[usize]) -> bool {
        let n = indices.len() as f64;
        let mut player_mass: std::collections::HashMap<&str, f64> = std::collections::HashMap::new();
        let mut prop_type_mass: std::collections::HashMap<&str, f64> = std::collections::HashMap::new();
        for &i in indices {
            if let Some(player) = candidates[i].player_id.as_deref() {
                *player_mass.entry(player).or_insert(0.0) += 1.0 / n;
            }
            if let Some(prop_type) = candidates[i].prop_type.as_deref() {
                *prop_type_mass.entry(prop_type).or_insert(0.0) += 1.0 / n;
            }
        }
        player_mass.values().all(|&share| share <= self.config.max_exposure_per_player + 1e-9)
            && prop_type_mass.values().all(|&share| share <= self.config.max_exposure_per_prop_type + 1e-9)
    }

    fn score(
        &self,
        candidates: &[Edge],
        indices: &[usize],
        objective: Objective,
        rho: &impl Fn(usize, usize) -> f64,
    ) -> f64 {
        let sum_ev: f64 = indices.iter().map(|&i| candidates[i].ev).sum();
        let avg_corr = avg_abs_correlation(indices, rho);
        match objective {
            Objective::Ev => sum_ev * (1.0 - avg_corr * self.config.correlation_penalty_weight),
            Objective::EvVarRatio => {
                let mut variance_sum = 0.0;
                for &i in indices {
                    for &j in indices {
                        let vol_i = candidates[i].volatility_score;
                        let vol_j = candidates[j].volatility_score;
                        let r = if i == j { 1.0 } else { rho(i, j) };
                        variance_sum += vol_i * vol_j * r;
                    }
                }
                sum_ev / variance_sum.max(0.0).sqrt().max(1e-8)
            }
            Objective::TargetProb => {
                // Deliberately a flat 0.3 correlation discount rather than the
                // beam-search penalty weight; kept separate from EV scoring.
                let approx_joint: f64 = indices.iter().map(|&i| candidates[i].prob_over).product::<f64>()
                    * (1.0 - avg_corr * 0.3);
                if approx_joint >= self.config.target_probability {
                    sum_ev
                } else {
                    0.0
                }
            }
        }
    }

    fn finalize_solutions(
        &self,
        candidates: &[Edge],
        harvested: Vec<BeamState>,
        rho: &impl Fn(usize, usize) -> f64,
        mc_engine: Option<&MonteCarloEngine>,
    ) -> Vec<TicketSolution> {
        let mut seen = HashSet::new();
        let mut solutions = Vec::new();
        for state in harvested {
            let mut sorted_ids: Vec<String> =
                state.indices.iter().map(|&i| candidates[i].edge_id.clone()).collect();
            sorted_ids.sort();
            let key = sorted_ids.join(",");
            if !seen.insert(key) {
                continue;
            }

            let sum_ev: f64 = state.indices.iter().map(|&i| candidates[i].ev).sum();
            let avg_corr = avg_abs_correlation(&state.indices, rho);
            let max_pairwise = max_abs_correlation(&state.indices, rho);
            let portfolio_volatility = portfolio_vol(candidates, &state.indices, rho);

            let mut solution = TicketSolution {
                edge_ids: sorted_ids,
                score: state.score,
                sum_ev,
                avg_correlation: avg_corr,
                max_pairwise_correlation: max_pairwise,
                portfolio_volatility,
                prob_joint: None,
                ci_low: None,
                ci_high: None,
                ev_adjusted: None,
            };

            if let Some(engine) = mc_engine {
                if let Some(mc) = self.annotate(engine, candidates, &state.indices, rho, 5_000) {
                    solution.prob_joint = Some(mc.prob_joint);
                    solution.ci_low = Some(mc.ci_low);
                    solution.ci_high = Some(mc.ci_high);
                    solution.ev_adjusted = Some(mc.ev_adjusted);
                }
            }

            solutions.push(solution);
        }
        solutions
    }

    fn rescore_target_prob(
        &self,
        candidates: &[Edge],
        mut solutions: Vec<TicketSolution>,
        rho: &impl Fn(usize, usize) -> f64,
        mc_engine: Option<&MonteCarloEngine>,
    ) -> Vec<TicketSolution> {
        let Some(engine) = mc_engine else { return solutions };
        solutions.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        solutions.truncate(20);

        let id_to_idx: std::collections::HashMap<&str, usize> =
            candidates.iter().enumerate().map(|(i, e)| (e.edge_id.as_str(), i)).collect();

        solutions
            .into_iter()
            .filter_map(|mut solution| {
                let indices: Vec<usize> = solution
                    .edge_ids
                    .iter()
                    .filter_map(|id| id_to_idx.get(id.as_str()).copied())
                    .collect();
                if indices.len() != solution.edge_ids.len() {
                    return None;
                }
                let legs: Vec<Leg> = indices
                    .iter()
                    .map(|&i| Leg {
                        edge_id: candidates[i].edge_id.clone(),
                        prop_id: candidates[i].prop_id.clone(),
                        prob_over: candidates[i].prob_over,
                    })
                    .collect();
                let n = indices.len();
                let mut matrix = vec![vec![0.0; n]; n];
                for a in 0..n {
                    matrix[a][a] = 1.0;
                    for b in (a + 1)..n {
                        let r = rho(indices[a], indices[b]);
                        matrix[a][b] = r;
                        matrix[b][a] = r;
                    }
                }
                let params = MonteCarloParams { draws_requested: 10_000, adaptive: false, ..Default::default() };
                let mc = engine.simulate(&legs, &matrix, &params, None).ok()?;
                if mc.prob_joint >= self.config.target_probability {
                    solution.score = solution.sum_ev;
                    solution.prob_joint = Some(mc.prob_joint);
                    solution.ci_low = Some(mc.ci_low);
                    solution.ci_high = Some(mc.ci_high);
                    solution.ev_adjusted = Some(mc.ev_adjusted);
                    Some(solution)
                } else {
                    None
                }
            })
            .collect()
    }

    fn annotate(
        &self,
        engine: &MonteCarloEngine,
        candidates: &[Edge],
        indices: &[usize],
        rho: &impl Fn(usize, usize) -> f64,
        draws: usize,
    ) -> Option<MonteCarloResult> {
        let legs: Vec<Leg> = indices
            .iter()
            .map(|&i| Leg {
                edge_id: candidates[i].edge_id.clone(),
                prop_id: candidates[i].prop_id.clone(),
                prob_over: candidates[i].prob_over,
            })
            .collect();
        let n = indices.len();
        let mut matrix = vec![vec![0.0; n]; n];
        for a in 0..n {
            matrix[a][a] = 1.0;
            for b in (a + 1)..n {
                let r = rho(indices[a], indices[b]);
                matrix[a][b] = r;
                matrix[b][a] = r;
            }
        }
        let params = MonteCarloParams { draws_requested: draws, adaptive: false, ..Default::default() };
        engine.simulate(&legs, &matrix, &params, None).ok()
    }
}

fn avg_abs_correlation(indices: &[usize], rho: &impl Fn(usize, usize) -> f64) -> f64 {
    if indices.len() < 2 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut count = 0;
    for a in 0..indices.len() {
        for b in (a + 1)..indices.len() {
            sum += rho(indices[a], indices[b]).abs();
            count += 1;
        }
    }
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn max_abs_correlation(indices: &[usize], rho: &impl Fn(usize, usize) -> f64) -> f64 {
    let mut max = 0.0_f64;
    for a in 0..indices.len() {
        for b in (a + 1)..indices.len() {
            max = max.max(rho(indices[a], indices[b]).abs());
        }
    }
    max
}

fn portfolio_vol(candidates: &[Edge], indices: &[usize], rho: &impl Fn(usize, usize) -> f64) -> f64 {
    let mut sum = 0.0;
    for &i in indices {
        for &j in indices {
            let vol_i = candidates[i].volatility_score;
            let vol_j = candidates[j].volatility_score;
            let r = if i == j { 1.0 } else { rho(i, j) };
            sum += vol_i * vol_j * r;
        }
    }
    sum.max(0.0).sqrt()
}

fn trace(run_id: Uuid, label: &str, content: serde_json::Value) -> OptimizationArtifact {
    OptimizationArtifact {
        id: Uuid::new_v4(),
        optimization_run_id: run_id,
        artifact_type: ArtifactType::Trace,
        content: serde_json::json!({"stage": label, "detail": content}),
        created_at: chrono::Utc::now(),
    }
}

fn heuristic_step(run_id: Uuid, candidates: &[Edge], ranked: &[BeamState]) -> OptimizationArtifact {
    let best = ranked.first();
    OptimizationArtifact {
        id: Uuid::new_v4(),
        optimization_run_id: run_id,
        artifact_type: ArtifactType::HeuristicStep,
        content: serde_json::json!({
            "depth": best.map(|b| b.indices.len()).unwrap_or(0),
            "beam_size": ranked.len(),
            "best_score": best.map(|b| b.score),
            "best_edges": best.map(|b| b.indices.iter().map(|&i| candidates[i].edge_id.clone()).collect::<Vec<_>>()),
        }),
        created_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationDiagnostics;

    fn edge(id: &str, ev: f64) -> Edge {
        Edge {
            edge_id: id.into(),
            prop_id: format!("{id}-prop"),
            prob_over: 0.5,
            offered_line: 0.0,
            fair_line: 0.0,
            volatility_score: 1.0,
            ev,
            correlation_cluster_id: None,
            player_id: None,
            prop_type: None,
        }
    }

    fn correlation_result(prop_ids: &[&str], matrix: Vec<Vec<f64>>) -> CorrelationResult {
        CorrelationResult {
            prop_ids: prop_ids.iter().map(|s| s.to_string()).collect(),
            matrix,
            diagnostics: CorrelationDiagnostics {
                is_symmetric: true,
                is_psd: true,
                min_eigenvalue: 0.0,
                condition_number: 1.0,
                max_off_diagonal: 0.0,
                mean_correlation: 0.0,
                rank_deficiency: 0,
                degraded: false,
            },
            num_observations: 100,
        }
    }

    fn identity_matrix(n: usize, off_diag: f64) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { off_diag }).collect())
            .collect()
    }

    #[test]
    fn insufficient_candidates_is_error() {
        let config = OptimizerConfig { min_legs: 4, ..Default::default() };
        let edges = vec![edge("a", 0.1), edge("b", 0.1)];
        let corr = correlation_result(&["a-prop", "b-prop"], identity_matrix(2, 0.0));
        let opt = Optimizer::new(&config);
        let (run, _artifacts) = opt.optimize(&edges, Objective::Ev, &corr, None, None);
        assert_eq!(run.status, OptimizationStatus::Failed);
        assert!(run.error_message.is_some());
    }

    #[test]
    fn drops_negative_ev_edges_below_min_ev_per_leg() {
        let config = OptimizerConfig {
            min_ev_per_leg: 0.02,
            min_legs: 2,
            max_legs: 3,
            correlation_penalty_weight: 0.4,
            ..Default::default()
        };
        let edges = vec![
            edge("a", 0.10),
            edge("b", 0.15),
            edge("c", -0.07),
            edge("d", 0.12),
            edge("e", -0.11),
        ];
        let prop_ids: Vec<&str> = edges.iter().map(|e| e.prop_id.as_str()).collect();
        let corr = correlation_result(&prop_ids, identity_matrix(5, 0.1));
        let opt = Optimizer::new(&config);
        let (run, _artifacts) = opt.optimize(&edges, Objective::Ev, &corr, None, None);
        assert_eq!(run.status, OptimizationStatus::Success);
        let top = &run.solution_ticket_sets[0];
        assert!(top.edge_ids.iter().all(|id| id == "a" || id == "b" || id == "d"));
    }

    #[test]
    fn best_ev_solution_uses_correlation_penalty_weight() {
        let config = OptimizerConfig {
            min_ev_per_leg: 0.0,
            min_legs: 2,
            max_legs: 3,
            correlation_penalty_weight: 0.4,
            max_avg_correlation: 1.0,
            max_pairwise_correlation: 1.0,
            beam_width: 40,
            ..Default::default()
        };
        let edges = vec![edge("a", 0.10), edge("b", 0.15), edge("d", 0.12)];
        let prop_ids: Vec<&str> = edges.iter().map(|e| e.prop_id.as_str()).collect();
        let rho = 0.2;
        let corr = correlation_result(&prop_ids, identity_matrix(3, rho));
        let opt = Optimizer::new(&config);
        let (run, _artifacts) = opt.optimize(&edges, Objective::Ev, &corr, None, None);
        let top = &run.solution_ticket_sets[0];
        let expected_sum_ev = 0.10 + 0.15 + 0.12;
        let expected_score = expected_sum_ev * (1.0 - rho * config.correlation_penalty_weight);
        assert!(top.edge_ids.len() == 3);
        assert!((top.score - expected_score).abs() < 1e-9, "got {}", top.score);
    }

    #[test]
    fn pairwise_correlation_cap_excludes_tightly_linked_pair() {
        let config = OptimizerConfig {
            min_ev_per_leg: 0.0,
            min_legs: 2,
            max_legs: 2,
            max_pairwise_correlation: 0.5,
            max_avg_correlation: 1.0,
            ..Default::default()
        };
        let edges = vec![edge("a", 0.10), edge("b", 0.20)];
        let prop_ids: Vec<&str> = edges.iter().map(|e| e.prop_id.as_str()).collect();
        let corr = correlation_result(&prop_ids, identity_matrix(2, 0.9));
        let opt = Optimizer::new(&config);
        let (run, _artifacts) = opt.optimize(&edges, Objective::Ev, &corr, None, None);
        assert!(run.solution_ticket_sets.is_empty(), "pairwise cap should block the only 2-leg combination");
    }

    #[test]
    fn exposure_cap_blocks_overweight_player() {
        let config = OptimizerConfig {
            min_ev_per_leg: 0.0,
            min_legs: 2,
            max_legs: 2,
            max_exposure_per_player: 0.5,
            max_avg_correlation: 1.0,
            max_pairwise_correlation: 1.0,
            ..Default::default()
        };
        let mut a = edge("a", 0.10);
        a.player_id = Some("p1".into());
        let mut b = edge("b", 0.10);
        b.player_id = Some("p1".into());
        let mut c = edge("c", 0.10);
        c.player_id = Some("p2".into());
        let edges = vec![a, b, c];
        let prop_ids: Vec<&str> = edges.iter().map(|e| e.prop_id.as_str()).collect();
        let corr = correlation_result(&prop_ids, identity_matrix(3, 0.0));
        let opt = Optimizer::new(&config);
        let (run, _artifacts) = opt.optimize(&edges, Objective::Ev, &corr, None, None);
        assert!(run
            .solution_ticket_sets
            .iter()
            .all(|s| !(s.edge_ids.contains(&"a".to_string()) && s.edge_ids.contains(&"b".to_string()))));
        assert!(!run.solution_ticket_sets.is_empty());
    }

    #[test]
    fn cancellation_before_any_depth_yields_partial_or_failed() {
        let config = OptimizerConfig { min_legs: 2, max_legs: 4, ..Default::default() };
        let edges = vec![edge("a", 0.1), edge("b", 0.1), edge("c", 0.1)];
        let prop_ids: Vec<&str> = edges.iter().map(|e| e.prop_id.as_str()).collect();
        let corr = correlation_result(&prop_ids, identity_matrix(3, 0.0));
        let opt = Optimizer::new(&config);
        let token = crate::scheduler::CancelToken::from_flag(true);
        let (run, _artifacts) = opt.optimize(&edges, Objective::Ev, &corr, None, Some(&token));
        assert!(matches!(run.status, OptimizationStatus::Failed | OptimizationStatus::Partial));
    }
}
