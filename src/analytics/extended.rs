//! Extended metrics: monthly returns, trade statistics, risk ratios

use super::analyzer::{mean_and_sample_std, to_f64, Analyzer, TRADING_DAYS_PER_YEAR};
use crate::backtest::{BacktestResult, Side, TradeRecord};
use chrono::{DateTime, Datelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cap for ratios whose denominator vanishes
pub const MAX_RATIO: f64 = 1000.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Realized return of one calendar month (UTC)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReturn {
    pub year: i32,
    pub month: u32,
    pub start_equity: Decimal,
    pub end_equity: Decimal,
    /// Fractional return over the month
    pub return_pct: f64,
    pub trades: usize,
}

/// Trade list statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeAnalysis {
    pub total_trades: usize,
    pub buy_count: usize,
    pub sell_count: usize,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub average_trade: Decimal,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub total_fees: Decimal,
    /// Sum of traded notional
    pub total_volume: Decimal,
}

/// Risk-adjusted ratios over per-trade returns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    /// Annualized standard deviation of returns
    pub volatility: f64,
    /// 95% historical value at risk, as a positive fraction
    pub var_95: f64,
    /// Mean loss beyond VaR
    pub cvar_95: f64,
    pub annualized_return: f64,
}

/// Everything beyond the core summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedMetrics {
    pub monthly_returns: Vec<MonthlyReturn>,
    pub trade_analysis: TradeAnalysis,
    pub risk_metrics: RiskMetrics,
}

impl ExtendedMetrics {
    pub fn compute(result: &BacktestResult) -> Self {
        Self {
            monthly_returns: monthly_returns(result.initial_balance, &result.trades),
            trade_analysis: analyze_trades(&result.trades),
            risk_metrics: risk_metrics(result),
        }
    }
}

/// Group realized pnl by UTC calendar month, in chronological order
pub fn monthly_returns(initial_balance: Decimal, trades: &[TradeRecord]) -> Vec<MonthlyReturn> {
    let mut by_month: BTreeMap<(i32, u32), (Decimal, usize)> = BTreeMap::new();
    for trade in trades {
        let Some(dt) = DateTime::from_timestamp_millis(trade.timestamp) else {
            continue;
        };
        let entry = by_month
            .entry((dt.year(), dt.month()))
            .or_insert((Decimal::ZERO, 0));
        entry.0 += trade.pnl;
        entry.1 += 1;
    }

    let mut equity = initial_balance;
    by_month
        .into_iter()
        .map(|((year, month), (pnl, count))| {
            let start_equity = equity;
            equity += pnl;
            let return_pct = if start_equity > Decimal::ZERO {
                to_f64(pnl / start_equity)
            } else {
                0.0
            };
            MonthlyReturn {
                year,
                month,
                start_equity,
                end_equity: equity,
                return_pct,
                trades: count,
            }
        })
        .collect()
}

pub fn analyze_trades(trades: &[TradeRecord]) -> TradeAnalysis {
    let mut analysis = TradeAnalysis {
        total_trades: trades.len(),
        ..Default::default()
    };
    let mut win_streak = 0;
    let mut loss_streak = 0;
    let mut total_pnl = Decimal::ZERO;

    for trade in trades {
        match trade.side {
            Side::Buy => analysis.buy_count += 1,
            Side::Sell => analysis.sell_count += 1,
        }
        analysis.largest_win = analysis.largest_win.max(trade.pnl);
        analysis.largest_loss = analysis.largest_loss.min(trade.pnl);
        analysis.total_fees += trade.fee;
        analysis.total_volume += trade.price * trade.quantity;
        total_pnl += trade.pnl;

        if trade.is_win() {
            win_streak += 1;
            loss_streak = 0;
        } else {
            loss_streak += 1;
            win_streak = 0;
        }
        analysis.max_consecutive_wins = analysis.max_consecutive_wins.max(win_streak);
        analysis.max_consecutive_losses = analysis.max_consecutive_losses.max(loss_streak);
    }

    if !trades.is_empty() {
        analysis.average_trade = total_pnl / Decimal::from(trades.len());
    }
    analysis
}

pub fn risk_metrics(result: &BacktestResult) -> RiskMetrics {
    let returns = Analyzer::new(result.initial_balance).trade_returns(&result.trades);
    let annualization = TRADING_DAYS_PER_YEAR.sqrt();

    let volatility = mean_and_sample_std(&returns)
        .map(|(_, std)| std * annualization)
        .unwrap_or(0.0);

    let days = (result.end_time - result.start_time) as f64 / MS_PER_DAY;
    let annualized_return = if days >= 1.0 && result.total_return > -1.0 {
        (1.0 + result.total_return).powf(365.0 / days) - 1.0
    } else {
        result.total_return
    };
    let calmar_ratio = if result.max_drawdown > 0.0 {
        (annualized_return / result.max_drawdown).clamp(-MAX_RATIO, MAX_RATIO)
    } else {
        0.0
    };

    let (var_95, cvar_95) = value_at_risk(&returns, 0.95);

    RiskMetrics {
        sortino_ratio: sortino(&returns, annualization),
        calmar_ratio,
        volatility,
        var_95,
        cvar_95,
        annualized_return,
    }
}

fn sortino(returns: &[f64], annualization: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return if mean > 0.0 { MAX_RATIO } else { 0.0 };
    }
    let downside_dev = (downside.iter().map(|r| r * r).sum::<f64>() / downside.len() as f64).sqrt();
    if downside_dev <= f64::EPSILON {
        return 0.0;
    }
    (mean / downside_dev * annualization).clamp(-MAX_RATIO, MAX_RATIO)
}

/// Historical VaR and CVaR as positive loss fractions
fn value_at_risk(returns: &[f64], confidence: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    let index = ((returns.len() as f64) * (1.0 - confidence)).floor() as usize;
    let index = index.min(sorted.len() - 1);
    let var = (-sorted[index]).max(0.0);
    let tail = &sorted[..=index];
    let cvar = (-(tail.iter().sum::<f64>() / tail.len() as f64)).max(0.0);
    (var, cvar)
}
