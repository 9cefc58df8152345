//! End-to-end scenarios spanning odds math, the best-line store, the
//! correlation engine, the Monte Carlo simulator and the portfolio
//! optimizer. Each test mirrors one concrete input/output scenario that a
//! caller would actually drive the core through, rather than exercising a
//! single function in isolation.

use std::collections::BTreeMap;

use wager_analytics_core::correlation::{CorrelationEngine, CorrelationMethod};
use wager_analytics_core::monte_carlo::{Leg, MonteCarloEngine, MonteCarloParams};
use wager_analytics_core::odds_math;
use wager_analytics_core::odds_model::BookmakerQuote;
use wager_analytics_core::odds_store::OddsStore;
use wager_analytics_core::optimizer::{Edge, Objective, Optimizer, OptimizationStatus};
use wager_analytics_core::config::OptimizerConfig;

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

#[test]
fn vig_removal_on_a_balanced_market() {
    let p_over = odds_math::implied_prob(-110).unwrap();
    let p_under = odds_math::implied_prob(-110).unwrap();
    let (no_vig_over, no_vig_under, _) = odds_math::remove_vig_two_way(p_over, p_under);

    assert!((no_vig_over - 0.5).abs() < 1e-4);
    assert!((no_vig_under - 0.5).abs() < 1e-4);

    let edge = odds_math::calculate_edge(0.60, no_vig_over).unwrap();
    assert!((edge - 0.10).abs() < 1e-4);
}

#[test]
fn asymmetric_vig_no_vig_probabilities_sum_to_one() {
    let p_over = odds_math::implied_prob(-105).unwrap();
    let p_under = odds_math::implied_prob(-115).unwrap();
    assert!((p_over - 0.5122).abs() < 1e-3);
    assert!((p_under - 0.5349).abs() < 1e-3);

    let (no_vig_over, no_vig_under, _) = odds_math::remove_vig_two_way(p_over, p_under);
    assert!((no_vig_over - 0.4892).abs() < 1e-3);
    assert!((no_vig_under - 0.5108).abs() < 1e-3);
    assert!((no_vig_over + no_vig_under - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn best_line_and_arbitrage_across_three_books() {
    let store = OddsStore::new();
    let quotes = vec![
        quote(1, 25.5, -110, -120),
        quote(2, 25.5, 110, -120),
        quote(3, 25.0, -105, 105),
    ];
    store.record_snapshots("prop-arb", "NBA", "Points", &quotes).await.unwrap();

    let best = store.get_best_line("prop-arb", 30).await.unwrap();
    assert_eq!(best.best_over_american, Some(110));
    assert_eq!(best.best_under_american, Some(105));
    assert!(best.arbitrage_opportunity, "combined best over/under should clear below 1.0");
    assert!(best.arbitrage_profit_pct > 0.0);
}

#[tokio::test]
async fn steam_move_flagged_after_six_significant_shifts() {
    let store = OddsStore::new();
    store
        .record_snapshots(
            "prop-steam",
            "NFL",
            "Spread",
            &[
                quote(1, 3.0, -110, -110),
                quote(2, 3.0, -110, -110),
                quote(3, 3.0, -110, -110),
                quote(4, 3.0, -110, -110),
            ],
        )
        .await
        .unwrap();

    for i in 0..6u64 {
        let book = (i % 4) + 1;
        store
            .record_snapshots("prop-steam", "NFL", "Spread", &[quote(book, 6.0 + i as f64, -110, -110)])
            .await
            .unwrap();
    }

    let moves = store.get_steam_moves(Some("NFL"), 1);
    assert!(!moves.is_empty(), "six shifts of >=2.0 magnitude across four books should register a steam move");
    assert!(moves.iter().any(|m| m.steam_confidence >= 0.6));
}

#[test]
fn monte_carlo_independent_legs_converge_to_product_of_probabilities() {
    let legs = vec![
        Leg { edge_id: "a".into(), prop_id: "prop-a".into(), prob_over: 0.55 },
        Leg { edge_id: "b".into(), prop_id: "prop-b".into(), prob_over: 0.60 },
    ];
    let correlation = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    let params = MonteCarloParams {
        draws_requested: 50_000,
        adaptive: false,
        seed: Some(42),
        ..MonteCarloParams::default()
    };

    let engine = MonteCarloEngine::default();
    let result = engine.simulate(&legs, &correlation, &params, None).unwrap();

    assert!((result.ev_independent - 0.33).abs() < 1e-6);
    assert!(
        (result.prob_joint - 0.33).abs() < 0.01,
        "prob_joint {} should be within sampling error of 0.33",
        result.prob_joint
    );
}

#[test]
fn optimizer_picks_the_positive_ev_subset_under_correlation_caps() {
    let edges = vec![
        Edge {
            edge_id: "e0".into(),
            prop_id: "p0".into(),
            prob_over: 0.55,
            offered_line: 1.0,
            fair_line: 1.0,
            volatility_score: 0.2,
            ev: 0.10,
            correlation_cluster_id: None,
            player_id: Some("player-a".into()),
            prop_type: Some("points".into()),
        },
        Edge {
            edge_id: "e1".into(),
            prop_id: "p1".into(),
            prob_over: 0.58,
            offered_line: 1.0,
            fair_line: 1.0,
            volatility_score: 0.2,
            ev: 0.15,
            correlation_cluster_id: None,
            player_id: Some("player-b".into()),
            prop_type: Some("rebounds".into()),
        },
        Edge {
            edge_id: "e2".into(),
            prop_id: "p2".into(),
            prob_over: 0.40,
            offered_line: 1.0,
            fair_line: 1.0,
            volatility_score: 0.2,
            ev: -0.07,
            correlation_cluster_id: None,
            player_id: Some("player-c".into()),
            prop_type: Some("assists".into()),
        },
        Edge {
            edge_id: "e3".into(),
            prop_id: "p3".into(),
            prob_over: 0.56,
            offered_line: 1.0,
            fair_line: 1.0,
            volatility_score: 0.2,
            ev: 0.12,
            correlation_cluster_id: None,
            player_id: Some("player-d".into()),
            prop_type: Some("points".into()),
        },
        Edge {
            edge_id: "e4".into(),
            prop_id: "p4".into(),
            prob_over: 0.38,
            offered_line: 1.0,
            fair_line: 1.0,
            volatility_score: 0.2,
            ev: -0.11,
            correlation_cluster_id: None,
            player_id: Some("player-e".into()),
            prop_type: Some("steals".into()),
        },
    ];

    let mut series = BTreeMap::new();
    for edge in &edges {
        series.insert(edge.prop_id.clone(), (0..20).map(|i| (i as f64 * 0.1).sin()).collect());
    }
    let correlation_engine = CorrelationEngine::new(8, true, 0.1, 0.6, 3);
    let correlation = correlation_engine.compute_correlation(&series, CorrelationMethod::Pearson).unwrap();

    let config = OptimizerConfig {
        max_legs: 3,
        min_legs: 2,
        min_ev_per_leg: 0.0,
        correlation_penalty_weight: 0.4,
        ..OptimizerConfig::default()
    };
    let optimizer = Optimizer::new(&config);
    let (run, _artifacts) = optimizer.optimize(&edges, Objective::Ev, &correlation, None, None);

    assert_eq!(run.status, OptimizationStatus::Success);
    let top = run.solution_ticket_sets.first().expect("at least one solution");
    let mut top_ids: Vec<&str> = top.edge_ids.iter().map(String::as_str).collect();
    top_ids.sort();
    assert_eq!(top_ids, vec!["e0", "e1", "e3"], "top solution should be the three positive-EV edges");
}
