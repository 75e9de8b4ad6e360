//! Performance metrics over a trade list

use crate::backtest::{BacktestResult, CurvePoint, TradeRecord};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Annualization factor for per-period returns
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Profit factor reported when there are gains but no losses
pub const MAX_PROFIT_FACTOR: f64 = 1000.0;

/// Pure metric calculations anchored to a starting balance
#[derive(Debug, Clone, Copy)]
pub struct Analyzer {
    initial_balance: Decimal,
}

impl Analyzer {
    pub fn new(initial_balance: Decimal) -> Self {
        Self { initial_balance }
    }

    pub fn initial_balance(&self) -> Decimal {
        self.initial_balance
    }

    /// Realized equity after each trade, preceded by the starting point
    ///
    /// The first point carries the first trade's timestamp (0 with no trades).
    pub fn calculate_equity_curve(&self, trades: &[TradeRecord]) -> Vec<CurvePoint> {
        let mut curve = Vec::with_capacity(trades.len() + 1);
        let start_ts = trades.first().map(|t| t.timestamp).unwrap_or(0);
        let mut equity = self.initial_balance;
        curve.push(CurvePoint::new(start_ts, to_f64(equity)));
        for trade in trades {
            equity += trade.pnl;
            curve.push(CurvePoint::new(trade.timestamp, to_f64(equity)));
        }
        curve
    }

    /// Fractional decline from the running peak at each point
    pub fn calculate_drawdown(&self, equity_curve: &[CurvePoint]) -> Vec<CurvePoint> {
        let mut peak = f64::MIN;
        equity_curve
            .iter()
            .map(|point| {
                peak = peak.max(point.value);
                let drawdown = if peak > 0.0 {
                    ((peak - point.value) / peak).max(0.0)
                } else {
                    0.0
                };
                CurvePoint::new(point.timestamp, drawdown)
            })
            .collect()
    }

    pub fn calculate_max_drawdown(&self, equity_curve: &[CurvePoint]) -> f64 {
        self.calculate_drawdown(equity_curve)
            .iter()
            .map(|p| p.value)
            .fold(0.0, f64::max)
    }

    /// Per-trade returns on the equity held before each trade
    pub fn trade_returns(&self, trades: &[TradeRecord]) -> Vec<f64> {
        let mut equity = self.initial_balance;
        let mut returns = Vec::with_capacity(trades.len());
        for trade in trades {
            if equity > Decimal::ZERO {
                returns.push(to_f64(trade.pnl / equity));
            }
            equity += trade.pnl;
        }
        returns
    }

    /// Annualized mean/std of per-trade returns
    ///
    /// 0.0 with fewer than two returns or zero variance.
    pub fn calculate_sharpe_ratio(&self, trades: &[TradeRecord]) -> f64 {
        let returns = self.trade_returns(trades);
        let Some((mean, std)) = mean_and_sample_std(&returns) else {
            return 0.0;
        };
        if std <= f64::EPSILON {
            return 0.0;
        }
        mean / std * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Fraction of trades with positive pnl
    pub fn calculate_win_rate(&self, trades: &[TradeRecord]) -> f64 {
        if trades.is_empty() {
            return 0.0;
        }
        let wins = trades.iter().filter(|t| t.is_win()).count();
        wins as f64 / trades.len() as f64
    }

    /// Gross profit over gross loss
    pub fn calculate_profit_factor(&self, trades: &[TradeRecord]) -> f64 {
        let (profit, loss) = trades.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(profit, loss), t| {
                if t.pnl > Decimal::ZERO {
                    (profit + t.pnl, loss)
                } else {
                    (profit, loss - t.pnl)
                }
            },
        );
        if loss.is_zero() {
            return if profit > Decimal::ZERO {
                MAX_PROFIT_FACTOR
            } else {
                0.0
            };
        }
        to_f64(profit / loss).min(MAX_PROFIT_FACTOR)
    }

    /// Full result from a trade list
    ///
    /// Final balance is initial balance plus realized pnl; callers holding
    /// open positions should overwrite it with marked equity.
    pub fn analyze(&self, trades: &[TradeRecord]) -> BacktestResult {
        let equity_curve = self.calculate_equity_curve(trades);
        let drawdown_curve = self.calculate_drawdown(&equity_curve);
        let max_drawdown = drawdown_curve.iter().map(|p| p.value).fold(0.0, f64::max);

        let (wins, losses): (Vec<&TradeRecord>, Vec<&TradeRecord>) =
            trades.iter().partition(|t| t.is_win());
        let avg_win = mean(wins.iter().map(|t| t.pnl_f64()));
        let avg_lose = mean(losses.iter().map(|t| t.pnl_f64().abs()));

        let realized: Decimal = trades.iter().map(|t| t.pnl).sum();
        let final_balance = self.initial_balance + realized;
        let total_return = if self.initial_balance > Decimal::ZERO {
            to_f64(realized / self.initial_balance)
        } else {
            0.0
        };

        BacktestResult {
            start_time: trades.first().map(|t| t.timestamp).unwrap_or(0),
            end_time: trades.last().map(|t| t.timestamp).unwrap_or(0),
            initial_balance: self.initial_balance,
            final_balance,
            total_return,
            max_drawdown,
            sharpe_ratio: self.calculate_sharpe_ratio(trades),
            win_rate: self.calculate_win_rate(trades),
            profit_factor: self.calculate_profit_factor(trades),
            trade_count: trades.len(),
            win_count: wins.len(),
            lose_count: losses.len(),
            avg_win,
            avg_lose,
            trades: trades.to_vec(),
            equity_curve: Some(equity_curve),
            drawdown_curve: Some(drawdown_curve),
            ..Default::default()
        }
    }
}

pub(crate) fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Mean and sample standard deviation; `None` below two samples
pub(crate) fn mean_and_sample_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, variance.sqrt()))
}
