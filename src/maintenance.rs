//! Periodic and one-shot upkeep jobs, wired at startup onto a `Scheduler`
//! instance. Bodies call real core operations (cache invalidation,
//! correlation recompute, optimizer runs) rather than logging placeholders.
//!
//! The core does not own proposition history or edge candidates, so the
//! batch tasks that need them take a thin provider trait instead.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cache::{Cache, Namespace};
use crate::config::MaintenanceConfig;
use crate::correlation::{correlation_cache_key, factor_cache_key, CorrelationEngine, CorrelationMethod};
use crate::optimizer::{Edge, Objective, Optimizer};
use crate::scheduler::Scheduler;

/// Supplies the historical outcome series the correlation engine needs.
/// The core has no opinion on where these come from (database, feed
/// replay, warehouse query) — only that they arrive keyed by `prop_id`.
pub trait HistoryProvider: Send + Sync {
    fn load_series(&self) -> BTreeMap<String, Vec<f64>>;
}

/// Supplies the current pool of model-scored edges for batch optimization
/// and revaluation jobs.
pub trait EdgeProvider: Send + Sync {
    fn load_edges(&self) -> Vec<Edge>;
}

pub struct MaintenanceHandles {
    pub cache: Arc<Cache>,
    pub cache_config: crate::config::CacheConfig,
    pub correlation_engine: Arc<CorrelationEngine>,
    pub history: Arc<dyn HistoryProvider>,
    pub edges: Arc<dyn EdgeProvider>,
    pub optimizer_config: crate::config::OptimizerConfig,
}

/// Registers the four periodic maintenance tasks at the intervals carried
/// in `config`. `revalue_edges_batch` shares `cache_refresh_interval` with
/// cache refresh (both are cheap, frequent reads); `batch_portfolio_optimization`
/// shares `factor_rebuild_interval` with factor rebuilding (both are
/// expensive and infrequent). This pairing is a judgment call recorded in
/// DESIGN.md.
pub fn register_default_tasks(scheduler: &Arc<Scheduler>, handles: Arc<MaintenanceHandles>, config: &MaintenanceConfig) {
    scheduler.register(
        "refresh_correlation_cache",
        refresh_correlation_cache_task(handles.clone()),
        2,
        Duration::from_secs(30),
        Some(Duration::from_secs(60)),
    );
    scheduler.register(
        "rebuild_factor_models",
        rebuild_factor_models_task(handles.clone()),
        2,
        Duration::from_secs(60),
        Some(Duration::from_secs(300)),
    );
    scheduler.register(
        "batch_portfolio_optimization",
        batch_portfolio_optimization_task(handles.clone()),
        1,
        Duration::from_secs(60),
        Some(Duration::from_secs(600)),
    );
    scheduler.register(
        "revalue_edges_batch",
        revalue_edges_batch_task(handles.clone()),
        2,
        Duration::from_secs(15),
        Some(Duration::from_secs(120)),
    );

    let _ = scheduler.schedule_periodic(
        "refresh_correlation_cache",
        config.cache_refresh_interval,
        Duration::ZERO,
        Duration::from_secs(5),
    );
    let _ = scheduler.schedule_periodic(
        "rebuild_factor_models",
        config.factor_rebuild_interval,
        Duration::from_secs(30),
        Duration::from_secs(30),
    );
    let _ = scheduler.schedule_periodic(
        "batch_portfolio_optimization",
        config.factor_rebuild_interval,
        Duration::from_secs(60),
        Duration::from_secs(60),
    );
    let _ = scheduler.schedule_periodic(
        "revalue_edges_batch",
        config.cache_refresh_interval,
        Duration::from_secs(10),
        Duration::from_secs(5),
    );
}

fn refresh_correlation_cache_task(handles: Arc<MaintenanceHandles>) -> crate::scheduler::TaskFn {
    Arc::new(move |_cancel| {
        let handles = handles.clone();
        Box::pin(async move {
            let series = handles.history.load_series();
            if series.is_empty() {
                return Ok(serde_json::json!({"refreshed": false, "reason": "no series"}));
            }
            let result = handles.correlation_engine.compute_correlation(&series, CorrelationMethod::Pearson)?;
            let key = correlation_cache_key(&result.prop_ids, CorrelationMethod::Pearson, true, 0.1);
            handles.cache.set(&key, &result, handles.cache_config.correlation_ttl, Namespace::Correlation)?;
            info!(props = result.prop_ids.len(), "refreshed correlation cache");
            Ok(serde_json::json!({"refreshed": true, "props": result.prop_ids.len()}))
        })
    })
}

fn rebuild_factor_models_task(handles: Arc<MaintenanceHandles>) -> crate::scheduler::TaskFn {
    Arc::new(move |_cancel| {
        let handles = handles.clone();
        Box::pin(async move {
            let series = handles.history.load_series();
            if series.is_empty() {
                return Ok(serde_json::json!({"rebuilt": false, "reason": "no series"}));
            }
            let correlation = handles.correlation_engine.compute_correlation(&series, CorrelationMethod::Pearson)?;
            let factor = handles.correlation_engine.factor_model(&correlation)?;
            let key = factor_cache_key(&factor.prop_ids, "pca", "v1");
            handles.cache.set(&key, &factor, handles.cache_config.factor_model_ttl, Namespace::Factor)?;
            info!(props = factor.prop_ids.len(), "rebuilt factor model");
            Ok(serde_json::json!({"rebuilt": true, "props": factor.prop_ids.len()}))
        })
    })
}

fn batch_portfolio_optimization_task(handles: Arc<MaintenanceHandles>) -> crate::scheduler::TaskFn {
    Arc::new(move |cancel| {
        let handles = handles.clone();
        Box::pin(async move {
            let edges = handles.edges.load_edges();
            if edges.is_empty() {
                return Ok(serde_json::json!({"ran": false, "reason": "no edges"}));
            }
            let series = handles.history.load_series();
            let correlation = handles.correlation_engine.compute_correlation(&series, CorrelationMethod::Pearson)?;
            let optimizer = Optimizer::new(&handles.optimizer_config);
            let (run, _artifacts) = optimizer.optimize(&edges, Objective::Ev, &correlation, None, Some(&cancel));
            let key = run.id.to_string();
            handles.cache.set(&key, &run, handles.cache_config.default_ttl, Namespace::Optimization)?;
            info!(run_id = %run.id, solutions = run.solution_ticket_sets.len(), "batch optimization run complete");
            Ok(serde_json::json!({"run_id": run.id, "solutions": run.solution_ticket_sets.len()}))
        })
    })
}

fn revalue_edges_batch_task(handles: Arc<MaintenanceHandles>) -> crate::scheduler::TaskFn {
    Arc::new(move |_cancel| {
        let handles = handles.clone();
        Box::pin(async move {
            let edges = handles.edges.load_edges();
            let mut revalued = 0;
            for edge in &edges {
                let market_prob = 1.0 - edge.prob_over;
                match crate::odds_math::calculate_edge(edge.prob_over, market_prob) {
                    Ok(ev) => {
                        handles.cache.set(
                            &format!("revalued:{}", edge.edge_id),
                            &ev,
                            handles.cache_config.default_ttl,
                            Namespace::Edge,
                        )?;
                        revalued += 1;
                    }
                    Err(err) => warn!(edge_id = %edge.edge_id, %err, "skipping edge revaluation"),
                }
            }
            Ok(serde_json::json!({"revalued": revalued, "total": edges.len()}))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::OptimizerConfig;
    use crate::scheduler::CancelToken;

    struct FixedHistory(BTreeMap<String, Vec<f64>>);
    impl HistoryProvider for FixedHistory {
        fn load_series(&self) -> BTreeMap<String, Vec<f64>> {
            self.0.clone()
        }
    }

    struct FixedEdges(Vec<Edge>);
    impl EdgeProvider for FixedEdges {
        fn load_edges(&self) -> Vec<Edge> {
            self.0.clone()
        }
    }

    fn handles_with(series: BTreeMap<String, Vec<f64>>, edges: Vec<Edge>) -> Arc<MaintenanceHandles> {
        Arc::new(MaintenanceHandles {
            cache: Arc::new(Cache::new(1000)),
            cache_config: crate::config::CacheConfig::default(),
            correlation_engine: Arc::new(CorrelationEngine::new(3, true, 0.1, 0.6, 3)),
            history: Arc::new(FixedHistory(series)),
            edges: Arc::new(FixedEdges(edges)),
            optimizer_config: OptimizerConfig::default(),
        })
    }

    fn sample_edge(id: &str, prop_id: &str, prob_over: f64, ev: f64) -> Edge {
        Edge {
            edge_id: id.into(),
            prop_id: prop_id.into(),
            prob_over,
            offered_line: 1.0,
            fair_line: 1.0,
            volatility_score: 0.2,
            ev,
            correlation_cluster_id: None,
            player_id: None,
            prop_type: None,
        }
    }

    #[tokio::test]
    async fn refresh_correlation_cache_skips_when_history_is_empty() {
        let handles = handles_with(BTreeMap::new(), vec![]);

        let task = refresh_correlation_cache_task(handles.clone());
        let cancel = CancelToken::from_flag(false);
        let output = (task)(cancel).await.unwrap();
        assert_eq!(output["refreshed"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn refresh_correlation_cache_populates_cache_from_history() {
        let mut series = BTreeMap::new();
        series.insert("p1".to_string(), vec![0.1, 0.2, 0.15, 0.3, 0.25]);
        series.insert("p2".to_string(), vec![0.2, 0.1, 0.3, 0.1, 0.2]);
        let handles = handles_with(series, vec![]);

        let task = refresh_correlation_cache_task(handles.clone());
        let cancel = CancelToken::from_flag(false);
        let output = (task)(cancel).await.unwrap();
        assert_eq!(output["refreshed"], serde_json::json!(true));
        assert_eq!(output["props"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn revalue_edges_batch_writes_one_entry_per_edge() {
        let edges = vec![sample_edge("e1", "p1", 0.6, 0.1), sample_edge("e2", "p2", 0.55, 0.05)];
        let handles = handles_with(BTreeMap::new(), edges);

        let task = revalue_edges_batch_task(handles.clone());
        let cancel = CancelToken::from_flag(false);
        let output = (task)(cancel).await.unwrap();
        assert_eq!(output["revalued"], serde_json::json!(2));
        assert_eq!(output["total"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn batch_portfolio_optimization_skips_when_no_edges() {
        let handles = handles_with(BTreeMap::new(), vec![]);
        let task = batch_portfolio_optimization_task(handles.clone());
        let cancel = CancelToken::from_flag(false);
        let output = (task)(cancel).await.unwrap();
        assert_eq!(output["ran"], serde_json::json!(false));
    }
}
