//! Spot portfolio accounting

use super::types::{FillReport, OrderRequest, Position, Side, TradeRecord};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Quantities committed by fills that are queued but not yet applied
#[derive(Debug, Clone, Default)]
struct Reservation {
    buy_qty: Decimal,
    sell_qty: Decimal,
}

/// Long-only cash + positions ledger
#[derive(Debug, Clone)]
pub struct Portfolio {
    initial_cash: Decimal,
    cash: Decimal,
    max_position_size: Decimal,
    positions: BTreeMap<String, Position>,
    total_fees: Decimal,
    reserved_cash: Decimal,
    reserved: BTreeMap<String, Reservation>,
}

impl Portfolio {
    pub fn new(initial_cash: Decimal, max_position_size: Decimal) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            max_position_size,
            positions: BTreeMap::new(),
            total_fees: Decimal::ZERO,
            reserved_cash: Decimal::ZERO,
            reserved: BTreeMap::new(),
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn initial_cash(&self) -> Decimal {
        self.initial_cash
    }

    pub fn total_fees(&self) -> Decimal {
        self.total_fees
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Cash not committed to pending buys
    pub fn available_cash(&self) -> Decimal {
        self.cash - self.reserved_cash
    }

    /// Cash plus marked value of every open position
    pub fn equity(&self) -> Decimal {
        self.cash + self.positions.values().map(Position::market_value).sum::<Decimal>()
    }

    /// Check an order against cash, holdings and the position cap
    ///
    /// `price` is the expected execution price; `fee` the expected fee.
    /// Pending reservations count against the limits.
    pub fn check_order(&self, request: &OrderRequest, price: Decimal, fee: Decimal) -> Result<(), String> {
        let held = self
            .positions
            .get(&request.symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);
        let pending = self.reserved.get(&request.symbol).cloned().unwrap_or_default();
        match request.side {
            Side::Buy => {
                let cost = price * request.quantity + fee;
                let available = self.available_cash();
                if cost > available {
                    return Err(format!(
                        "insufficient cash: need {} have {}",
                        cost.round_dp(8),
                        available.round_dp(8)
                    ));
                }
                let projected = held + pending.buy_qty + request.quantity;
                if projected > self.max_position_size {
                    return Err(format!(
                        "position limit: {} + {} exceeds {}",
                        held + pending.buy_qty,
                        request.quantity,
                        self.max_position_size
                    ));
                }
            }
            Side::Sell => {
                let held = held - pending.sell_qty;
                if request.quantity > held {
                    return Err(format!(
                        "insufficient position: sell {} holding {}",
                        request.quantity, held
                    ));
                }
            }
        }
        Ok(())
    }

    /// Commit cash or quantity for a fill that will be applied later
    pub fn reserve(&mut self, fill: &FillReport) {
        let entry = self.reserved.entry(fill.symbol.clone()).or_default();
        match fill.side {
            Side::Buy => {
                entry.buy_qty += fill.quantity;
                self.reserved_cash += fill.price * fill.quantity + fill.fee;
            }
            Side::Sell => entry.sell_qty += fill.quantity,
        }
    }

    fn release(&mut self, fill: &FillReport) {
        if let Some(entry) = self.reserved.get_mut(&fill.symbol) {
            match fill.side {
                Side::Buy => {
                    entry.buy_qty = (entry.buy_qty - fill.quantity).max(Decimal::ZERO);
                    self.reserved_cash = (self.reserved_cash
                        - (fill.price * fill.quantity + fill.fee))
                        .max(Decimal::ZERO);
                }
                Side::Sell => entry.sell_qty = (entry.sell_qty - fill.quantity).max(Decimal::ZERO),
            }
        }
    }

    /// Mark a symbol to a new price
    pub fn mark(&mut self, symbol: &str, price: Decimal) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.last_price = price;
            position.unrealized_pnl = (price - position.avg_price) * position.quantity;
        }
    }

    /// Apply a fill and return the resulting trade record
    ///
    /// Buys carry `-fee` as pnl; sells realize `(price - avg) * qty - fee`.
    /// Any reservation made for the fill is released.
    pub fn apply_fill(&mut self, fill: &FillReport, strategy_id: &str) -> TradeRecord {
        self.release(fill);
        let position = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::flat(fill.symbol.clone()));

        let notional = fill.price * fill.quantity;
        let pnl = match fill.side {
            Side::Buy => {
                let new_qty = position.quantity + fill.quantity;
                if !new_qty.is_zero() {
                    position.avg_price =
                        (position.avg_price * position.quantity + notional) / new_qty;
                }
                position.quantity = new_qty;
                self.cash -= notional + fill.fee;
                -fill.fee
            }
            Side::Sell => {
                let closed = fill.quantity.min(position.quantity);
                let gross = (fill.price - position.avg_price) * closed;
                position.quantity -= fill.quantity;
                if position.quantity <= Decimal::ZERO {
                    position.quantity = Decimal::ZERO;
                    position.avg_price = Decimal::ZERO;
                }
                self.cash += notional - fill.fee;
                gross - fill.fee
            }
        };

        position.realized_pnl += pnl;
        position.last_price = fill.price;
        position.unrealized_pnl = (fill.price - position.avg_price) * position.quantity;
        self.total_fees += fill.fee;

        TradeRecord {
            timestamp: fill.timestamp,
            symbol: fill.symbol.clone(),
            side: fill.side,
            price: fill.price,
            quantity: fill.quantity,
            fee: fill.fee,
            pnl,
            strategy_id: strategy_id.to_string(),
        }
    }
}
