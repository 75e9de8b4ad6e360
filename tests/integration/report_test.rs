//! Report generation from real runs

use crate::common::{config, memory_source};
use quant_replay::analytics::{ReportConfig, ReportFormat, Reporter};
use quant_replay::backtest::{BacktestEngine, BacktestResult};
use quant_replay::strategy::StrategyRegistry;

fn run(strategy: &str) -> BacktestResult {
    let n = 1_200;
    let cfg = config(strategy, n);
    let instance = StrategyRegistry::with_builtins()
        .create(&cfg.strategy_name, &cfg.parameters)
        .unwrap();
    BacktestEngine::run_to_completion(cfg, instance, memory_source(n)).unwrap()
}

#[test]
fn test_json_report_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let result = run("sma_cross");
    let path = dir.path().join("nested").join("report.json");

    let reporter = Reporter::default();
    reporter.write(&result, ReportFormat::Json, &path).unwrap();
    let parsed = Reporter::parse_json(&std::fs::read_to_string(&path).unwrap()).unwrap();

    assert_eq!(parsed.trades, result.trades);
    assert_eq!(parsed.trade_count, result.trade_count);
    assert_eq!(parsed.final_balance, result.final_balance);
    assert!((parsed.total_return - result.total_return).abs() < 1e-12);
}

#[test]
fn test_all_formats_render() {
    let result = run("sma_cross");
    assert!(result.trade_count > 0);
    let reporter = Reporter::new(ReportConfig {
        include_monthly_returns: true,
        include_trade_analysis: true,
        include_risk_metrics: true,
        ..Default::default()
    });

    let html = reporter.render(&result, ReportFormat::Html).unwrap();
    assert!(html.contains("<html"));
    assert!(html.contains("Trade History"));

    let csv = reporter.render(&result, ReportFormat::Csv).unwrap();
    assert_eq!(csv.lines().count(), result.trade_count + 1);

    let markdown = reporter.render(&result, ReportFormat::Markdown).unwrap();
    assert!(markdown.starts_with("# Backtest Report"));

    let json: serde_json::Value =
        serde_json::from_str(&reporter.render(&result, ReportFormat::Json).unwrap()).unwrap();
    assert!(json.get("risk_metrics").is_some());
    assert!(json.get("monthly_returns").is_some());
}

#[test]
fn test_comparison_lists_every_run() {
    let results = vec![run("sma_cross"), run("mean_reversion")];
    let markdown = Reporter::default()
        .render_comparison(&results, ReportFormat::Markdown)
        .unwrap();
    assert!(markdown.contains("| sma_cross |"));
    assert!(markdown.contains("| mean_reversion |"));
}
