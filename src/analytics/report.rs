//! Report rendering
//!
//! Renders a [`BacktestResult`] as HTML, JSON, CSV or Markdown. JSON output
//! parses back into a `BacktestResult` with [`Reporter::parse_json`].

use super::extended::ExtendedMetrics;
use crate::backtest::{BacktestResult, CurvePoint, TradeRecord};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Report errors
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unknown report format: {0}")]
    UnknownFormat(String),
    #[error("comparison needs at least one result")]
    EmptyComparison,
    #[error("result has no {0} curve")]
    MissingCurve(&'static str),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Html,
    Json,
    Csv,
    Markdown,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Markdown => "md",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "html" | "htm" => Ok(ReportFormat::Html),
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            other => Err(ReportError::UnknownFormat(other.to_string())),
        }
    }
}

fn default_title() -> String {
    "Backtest Report".to_string()
}
fn default_true() -> bool {
    true
}

/// What a report includes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_true")]
    pub include_equity_curve: bool,
    #[serde(default = "default_true")]
    pub include_drawdown_curve: bool,
    #[serde(default = "default_true")]
    pub include_trades: bool,
    #[serde(default)]
    pub include_monthly_returns: bool,
    #[serde(default)]
    pub include_trade_analysis: bool,
    #[serde(default)]
    pub include_risk_metrics: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            include_equity_curve: true,
            include_drawdown_curve: true,
            include_trades: true,
            include_monthly_returns: false,
            include_trade_analysis: false,
            include_risk_metrics: false,
        }
    }
}

impl ReportConfig {
    fn wants_extended(&self) -> bool {
        self.include_monthly_returns || self.include_trade_analysis || self.include_risk_metrics
    }
}

/// One CSV trade row
#[derive(Serialize)]
struct TradeRow<'a> {
    timestamp: i64,
    datetime: String,
    symbol: &'a str,
    side: String,
    price: Decimal,
    quantity: Decimal,
    fee: Decimal,
    pnl: Decimal,
    strategy_id: &'a str,
}

/// One comparison row
#[derive(Serialize)]
struct SummaryRow<'a> {
    strategy: &'a str,
    symbol: &'a str,
    total_return: f64,
    sharpe_ratio: f64,
    max_drawdown: f64,
    win_rate: f64,
    profit_factor: f64,
    trade_count: usize,
    final_balance: Decimal,
}

impl<'a> From<&'a BacktestResult> for SummaryRow<'a> {
    fn from(r: &'a BacktestResult) -> Self {
        Self {
            strategy: &r.strategy_name,
            symbol: &r.symbol,
            total_return: r.total_return,
            sharpe_ratio: r.sharpe_ratio,
            max_drawdown: r.max_drawdown,
            win_rate: r.win_rate,
            profit_factor: r.profit_factor,
            trade_count: r.trade_count,
            final_balance: r.final_balance,
        }
    }
}

/// Renders backtest results
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    config: ReportConfig,
}

impl Reporter {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    pub fn render(&self, result: &BacktestResult, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Html => Ok(self.render_html(result)),
            ReportFormat::Json => self.render_json(result),
            ReportFormat::Csv => render_trades_csv(&result.trades),
            ReportFormat::Markdown => Ok(self.render_markdown(result)),
        }
    }

    /// Render and write to `path`, creating parent directories
    pub fn write(&self, result: &BacktestResult, format: ReportFormat, path: &Path) -> Result<(), ReportError> {
        let body = self.render(result, format)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, body)?;
        tracing::info!(path = %path.display(), format = format.extension(), "Report written");
        Ok(())
    }

    /// Side-by-side summary of several runs
    pub fn render_comparison(&self, results: &[BacktestResult], format: ReportFormat) -> Result<String, ReportError> {
        if results.is_empty() {
            return Err(ReportError::EmptyComparison);
        }
        let rows: Vec<SummaryRow<'_>> = results.iter().map(SummaryRow::from).collect();
        match format {
            ReportFormat::Json => Ok(serde_json::to_string_pretty(&json!({
                "title": self.config.title,
                "results": rows,
            }))?),
            ReportFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                for row in &rows {
                    writer.serialize(row)?;
                }
                csv_string(writer)
            }
            ReportFormat::Markdown => {
                let mut out = format!("# {}\n\n", self.config.title);
                out.push_str("| Strategy | Symbol | Return | Sharpe | Max DD | Win Rate | Profit Factor | Trades |\n");
                out.push_str("|---|---|---|---|---|---|---|---|\n");
                for r in &rows {
                    let _ = writeln!(
                        out,
                        "| {} | {} | {:.2}% | {:.2} | {:.2}% | {:.1}% | {:.2} | {} |",
                        r.strategy,
                        r.symbol,
                        r.total_return * 100.0,
                        r.sharpe_ratio,
                        r.max_drawdown * 100.0,
                        r.win_rate * 100.0,
                        r.profit_factor,
                        r.trade_count
                    );
                }
                Ok(out)
            }
            ReportFormat::Html => {
                let mut body = String::from(
                    "<h2>Comparison</h2>\n<table>\n<tr><th>Strategy</th><th>Symbol</th><th>Return</th><th>Sharpe</th><th>Max DD</th><th>Win Rate</th><th>Profit Factor</th><th>Trades</th></tr>\n",
                );
                for r in &rows {
                    let _ = writeln!(
                        body,
                        "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{:.2}%</td><td>{:.2}</td><td>{:.2}%</td><td>{:.1}%</td><td>{:.2}</td><td>{}</td></tr>",
                        sign_class(r.total_return > 0.0),
                        escape_html(r.strategy),
                        escape_html(r.symbol),
                        r.total_return * 100.0,
                        r.sharpe_ratio,
                        r.max_drawdown * 100.0,
                        r.win_rate * 100.0,
                        r.profit_factor,
                        r.trade_count
                    );
                }
                body.push_str("</table>\n");
                Ok(html_page(&self.config.title, &body))
            }
        }
    }

    pub fn export_equity_csv(&self, result: &BacktestResult, path: &Path) -> Result<(), ReportError> {
        let curve = result
            .equity_curve
            .as_deref()
            .ok_or(ReportError::MissingCurve("equity"))?;
        write_curve_csv(curve, "equity", path)
    }

    pub fn export_drawdown_csv(&self, result: &BacktestResult, path: &Path) -> Result<(), ReportError> {
        let curve = result
            .drawdown_curve
            .as_deref()
            .ok_or(ReportError::MissingCurve("drawdown"))?;
        write_curve_csv(curve, "drawdown", path)
    }

    /// Parse a JSON report back into a result
    pub fn parse_json(input: &str) -> Result<BacktestResult, ReportError> {
        Ok(serde_json::from_str(input)?)
    }

    fn render_json(&self, result: &BacktestResult) -> Result<String, ReportError> {
        let mut value = serde_json::to_value(result)?;
        if let Value::Object(map) = &mut value {
            if !self.config.include_trades {
                map.remove("trades");
            }
            if !self.config.include_equity_curve {
                map.remove("equity_curve");
            }
            if !self.config.include_drawdown_curve {
                map.remove("drawdown_curve");
            }
            map.insert("title".to_string(), json!(self.config.title));
            if self.config.wants_extended() {
                let extended = ExtendedMetrics::compute(result);
                if self.config.include_monthly_returns {
                    map.insert("monthly_returns".to_string(), serde_json::to_value(&extended.monthly_returns)?);
                }
                if self.config.include_trade_analysis {
                    map.insert("trade_analysis".to_string(), serde_json::to_value(&extended.trade_analysis)?);
                }
                if self.config.include_risk_metrics {
                    map.insert("risk_metrics".to_string(), serde_json::to_value(&extended.risk_metrics)?);
                }
            }
        }
        Ok(serde_json::to_string_pretty(&value)?)
    }

    fn render_html(&self, result: &BacktestResult) -> String {
        let mut body = String::new();
        let _ = writeln!(
            body,
            "<h2>{} on {}</h2>",
            escape_html(&result.strategy_name),
            escape_html(&result.symbol)
        );

        body.push_str("<h3>Summary</h3>\n<table>\n");
        for (label, value) in summary_pairs(result) {
            let _ = writeln!(body, "<tr><th>{}</th><td>{}</td></tr>", label, escape_html(&value));
        }
        body.push_str("</table>\n");

        if self.config.wants_extended() {
            let extended = ExtendedMetrics::compute(result);
            if self.config.include_risk_metrics {
                let r = &extended.risk_metrics;
                body.push_str("<h3>Risk Metrics</h3>\n<table>\n");
                let _ = writeln!(body, "<tr><th>Sortino Ratio</th><td>{:.2}</td></tr>", r.sortino_ratio);
                let _ = writeln!(body, "<tr><th>Calmar Ratio</th><td>{:.2}</td></tr>", r.calmar_ratio);
                let _ = writeln!(body, "<tr><th>Volatility</th><td>{:.2}%</td></tr>", r.volatility * 100.0);
                let _ = writeln!(body, "<tr><th>VaR (95%)</th><td>{:.2}%</td></tr>", r.var_95 * 100.0);
                let _ = writeln!(body, "<tr><th>CVaR (95%)</th><td>{:.2}%</td></tr>", r.cvar_95 * 100.0);
                body.push_str("</table>\n");
            }
            if self.config.include_trade_analysis {
                let a = &extended.trade_analysis;
                body.push_str("<h3>Trade Analysis</h3>\n<table>\n");
                let _ = writeln!(body, "<tr><th>Buys / Sells</th><td>{} / {}</td></tr>", a.buy_count, a.sell_count);
                let _ = writeln!(body, "<tr><th>Largest Win</th><td>{:.2}</td></tr>", a.largest_win);
                let _ = writeln!(body, "<tr><th>Largest Loss</th><td>{:.2}</td></tr>", a.largest_loss);
                let _ = writeln!(body, "<tr><th>Average Trade</th><td>{:.4}</td></tr>", a.average_trade);
                let _ = writeln!(
                    body,
                    "<tr><th>Max Streak (W/L)</th><td>{} / {}</td></tr>",
                    a.max_consecutive_wins, a.max_consecutive_losses
                );
                let _ = writeln!(body, "<tr><th>Total Fees</th><td>{:.4}</td></tr>", a.total_fees);
                body.push_str("</table>\n");
            }
            if self.config.include_monthly_returns && !extended.monthly_returns.is_empty() {
                body.push_str("<h3>Monthly Returns</h3>\n<table>\n<tr><th>Month</th><th>Return</th><th>Trades</th></tr>\n");
                for m in &extended.monthly_returns {
                    let _ = writeln!(
                        body,
                        "<tr class=\"{}\"><td>{:04}-{:02}</td><td>{:.2}%</td><td>{}</td></tr>",
                        sign_class(m.return_pct > 0.0),
                        m.year,
                        m.month,
                        m.return_pct * 100.0,
                        m.trades
                    );
                }
                body.push_str("</table>\n");
            }
        }

        if self.config.include_equity_curve {
            if let Some(curve) = &result.equity_curve {
                body.push_str(&curve_table("Equity Curve", "Equity", curve, false));
            }
        }
        if self.config.include_drawdown_curve {
            if let Some(curve) = &result.drawdown_curve {
                body.push_str(&curve_table("Drawdown", "Drawdown", curve, true));
            }
        }

        if self.config.include_trades {
            body.push_str("<h3>Trade History</h3>\n<table>\n<tr><th>Time</th><th>Symbol</th><th>Side</th><th>Price</th><th>Quantity</th><th>Fee</th><th>P&amp;L</th></tr>\n");
            for trade in &result.trades {
                let _ = writeln!(
                    body,
                    "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    sign_class(trade.is_win()),
                    format_timestamp(trade.timestamp),
                    escape_html(&trade.symbol),
                    trade.side,
                    trade.price,
                    trade.quantity,
                    trade.fee,
                    trade.pnl
                );
            }
            body.push_str("</table>\n");
        }

        html_page(&self.config.title, &body)
    }

    fn render_markdown(&self, result: &BacktestResult) -> String {
        let mut out = format!(
            "# {}\n\n## {} on {}\n\n| Metric | Value |\n|---|---|\n",
            self.config.title, result.strategy_name, result.symbol
        );
        for (label, value) in summary_pairs(result) {
            let _ = writeln!(out, "| {} | {} |", label, value);
        }

        if self.config.wants_extended() {
            let extended = ExtendedMetrics::compute(result);
            if self.config.include_risk_metrics {
                let r = &extended.risk_metrics;
                out.push_str("\n## Risk Metrics\n\n| Metric | Value |\n|---|---|\n");
                let _ = writeln!(out, "| Sortino Ratio | {:.2} |", r.sortino_ratio);
                let _ = writeln!(out, "| Calmar Ratio | {:.2} |", r.calmar_ratio);
                let _ = writeln!(out, "| Volatility | {:.2}% |", r.volatility * 100.0);
                let _ = writeln!(out, "| VaR (95%) | {:.2}% |", r.var_95 * 100.0);
            }
            if self.config.include_trade_analysis {
                let a = &extended.trade_analysis;
                out.push_str("\n## Trade Analysis\n\n");
                let _ = writeln!(out, "- Buys / sells: {} / {}", a.buy_count, a.sell_count);
                let _ = writeln!(out, "- Largest win: {:.2}", a.largest_win);
                let _ = writeln!(out, "- Largest loss: {:.2}", a.largest_loss);
                let _ = writeln!(out, "- Longest streaks: {} wins, {} losses", a.max_consecutive_wins, a.max_consecutive_losses);
                let _ = writeln!(out, "- Total fees: {:.4}", a.total_fees);
            }
            if self.config.include_monthly_returns && !extended.monthly_returns.is_empty() {
                out.push_str("\n## Monthly Returns\n\n| Month | Return | Trades |\n|---|---|---|\n");
                for m in &extended.monthly_returns {
                    let _ = writeln!(out, "| {:04}-{:02} | {:.2}% | {} |", m.year, m.month, m.return_pct * 100.0, m.trades);
                }
            }
        }

        if self.config.include_trades && !result.trades.is_empty() {
            out.push_str("\n## Trade History\n\n| Time | Side | Price | Quantity | Fee | P&L |\n|---|---|---|---|---|---|\n");
            for t in &result.trades {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {} |",
                    format_timestamp(t.timestamp),
                    t.side,
                    t.price,
                    t.quantity,
                    t.fee,
                    t.pnl
                );
            }
        }
        out
    }
}

fn summary_pairs(result: &BacktestResult) -> Vec<(&'static str, String)> {
    vec![
        ("Period", format!("{} to {}", format_timestamp(result.start_time), format_timestamp(result.end_time))),
        ("Initial Balance", format!("{:.2}", result.initial_balance)),
        ("Final Balance", format!("{:.2}", result.final_balance)),
        ("Total Return", format!("{:.2}%", result.total_return * 100.0)),
        ("Max Drawdown", format!("{:.2}%", result.max_drawdown * 100.0)),
        ("Sharpe Ratio", format!("{:.2}", result.sharpe_ratio)),
        ("Win Rate", format!("{:.1}%", result.win_rate * 100.0)),
        ("Profit Factor", format!("{:.2}", result.profit_factor)),
        ("Trades", format!("{} ({} won / {} lost)", result.trade_count, result.win_count, result.lose_count)),
        ("Avg Win", format!("{:.2}", result.avg_win)),
        ("Avg Loss", format!("{:.2}", result.avg_lose)),
        ("Events", result.events_processed.to_string()),
    ]
}

fn render_trades_csv(trades: &[TradeRecord]) -> Result<String, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for t in trades {
        writer.serialize(TradeRow {
            timestamp: t.timestamp,
            datetime: format_timestamp(t.timestamp),
            symbol: &t.symbol,
            side: t.side.to_string(),
            price: t.price,
            quantity: t.quantity,
            fee: t.fee,
            pnl: t.pnl,
            strategy_id: &t.strategy_id,
        })?;
    }
    csv_string(writer)
}

fn write_curve_csv(curve: &[CurvePoint], column: &str, path: &Path) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["timestamp", "datetime", column])?;
    for point in curve {
        writer.write_record([
            point.timestamp.to_string(),
            format_timestamp(point.timestamp),
            point.value.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_string(writer: csv::Writer<Vec<u8>>) -> Result<String, ReportError> {
    let bytes = writer
        .into_inner()
        .map_err(|e| ReportError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn curve_table(title: &str, column: &str, curve: &[CurvePoint], percent: bool) -> String {
    let mut out = format!("<h3>{}</h3>\n<table>\n<tr><th>Time</th><th>{}</th></tr>\n", title, column);
    for point in curve {
        let value = if percent {
            format!("{:.2}%", point.value * 100.0)
        } else {
            format!("{:.2}", point.value)
        };
        let _ = writeln!(out, "<tr><td>{}</td><td>{}</td></tr>", format_timestamp(point.timestamp), value);
    }
    out.push_str("</table>\n");
    out
}

fn html_page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
table {{ border-collapse: collapse; margin-bottom: 1.5em; }}
th, td {{ border: 1px solid #ccc; padding: 4px 8px; text-align: right; }}
th {{ background: #f4f4f4; }}
tr.positive td {{ color: #1a7f37; }}
tr.negative td {{ color: #cf222e; }}
</style>
</head>
<body>
<h1>{title}</h1>
{body}</body>
</html>
"#,
        title = escape_html(title),
        body = body
    )
}

fn sign_class(positive: bool) -> &'static str {
    if positive {
        "positive"
    } else {
        "negative"
    }
}

/// RFC 3339 UTC rendering of a millisecond timestamp
pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
