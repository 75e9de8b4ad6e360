//! Order validation and fill simulation

use super::types::{FillReport, OrderRequest, OrderType, Side};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// Basis points per unit
const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// A limit order waiting for the market to cross it
#[derive(Debug, Clone)]
pub struct RestingOrder {
    pub order_id: u64,
    pub request: OrderRequest,
    /// Timestamp (ms) the order was accepted
    pub accepted_at: i64,
}

/// Outcome of submitting an order
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Filled immediately
    Filled(FillReport),
    /// Accepted and resting on the simulated book
    Resting(u64),
    /// Rejected with a reason
    Rejected(String),
}

/// Simulates fills against the last observed price per symbol
pub struct ExecutionModel {
    fee_rate: Decimal,
    slippage_bps: Decimal,
    next_order_id: u64,
    last_prices: HashMap<String, Decimal>,
    /// Resting limit orders by id; ordered so fills are deterministic
    resting: BTreeMap<u64, RestingOrder>,
}

impl ExecutionModel {
    pub fn new(fee_rate: Decimal, slippage_bps: Decimal) -> Self {
        Self {
            fee_rate,
            slippage_bps,
            next_order_id: 1,
            last_prices: HashMap::new(),
            resting: BTreeMap::new(),
        }
    }

    /// Record the latest price for a symbol
    pub fn update_price(&mut self, symbol: &str, price: Decimal) {
        match self.last_prices.get_mut(symbol) {
            Some(p) => *p = price,
            None => {
                self.last_prices.insert(symbol.to_string(), price);
            }
        }
    }

    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_prices.get(symbol).copied()
    }

    pub fn last_prices(&self) -> &HashMap<String, Decimal> {
        &self.last_prices
    }

    /// Number of resting limit orders
    pub fn resting_count(&self) -> usize {
        self.resting.len()
    }

    /// Price an order would execute at right now, if it is marketable
    ///
    /// Resting limit orders are priced at their limit.
    pub fn expected_price(&self, request: &OrderRequest) -> Option<Decimal> {
        match request.order_type {
            OrderType::Market => self
                .last_price(&request.symbol)
                .map(|last| self.apply_slippage(request.side, last)),
            OrderType::Limit => request.limit_price,
        }
    }

    /// Validate shape and price availability, then fill or rest the order
    pub fn submit(&mut self, request: OrderRequest, timestamp_ms: i64) -> SubmitOutcome {
        if request.quantity <= Decimal::ZERO {
            return SubmitOutcome::Rejected(format!(
                "quantity must be positive, got {}",
                request.quantity
            ));
        }
        let Some(last) = self.last_price(&request.symbol) else {
            return SubmitOutcome::Rejected(format!("no market price for {}", request.symbol));
        };

        let order_id = self.next_order_id;
        self.next_order_id += 1;

        match request.order_type {
            OrderType::Market => {
                let price = self.apply_slippage(request.side, last);
                SubmitOutcome::Filled(self.fill(order_id, &request, price, timestamp_ms))
            }
            OrderType::Limit => {
                let Some(limit) = request.limit_price.filter(|p| *p > Decimal::ZERO) else {
                    return SubmitOutcome::Rejected("limit order without a positive price".into());
                };
                if Self::crosses(request.side, limit, last) {
                    SubmitOutcome::Filled(self.fill(order_id, &request, limit, timestamp_ms))
                } else {
                    self.resting.insert(
                        order_id,
                        RestingOrder {
                            order_id,
                            request,
                            accepted_at: timestamp_ms,
                        },
                    );
                    SubmitOutcome::Resting(order_id)
                }
            }
        }
    }

    /// Fill every resting order on `symbol` crossed by `price`
    pub fn match_resting(&mut self, symbol: &str, price: Decimal, timestamp_ms: i64) -> Vec<FillReport> {
        if self.resting.is_empty() {
            return Vec::new();
        }
        let crossed: Vec<u64> = self
            .resting
            .values()
            .filter(|o| o.request.symbol == symbol)
            .filter(|o| {
                o.request
                    .limit_price
                    .map(|limit| Self::crosses(o.request.side, limit, price))
                    .unwrap_or(false)
            })
            .map(|o| o.order_id)
            .collect();

        let mut fills = Vec::with_capacity(crossed.len());
        for id in crossed {
            if let Some(order) = self.resting.remove(&id) {
                let limit = order.request.limit_price.unwrap_or(price);
                fills.push(self.fill(order.order_id, &order.request, limit, timestamp_ms));
            }
        }
        fills
    }

    /// Drop all resting orders, returning them
    pub fn cancel_all(&mut self) -> Vec<RestingOrder> {
        std::mem::take(&mut self.resting).into_values().collect()
    }

    /// Fee charged for a notional amount
    pub fn fee_for(&self, notional: Decimal) -> Decimal {
        (notional * self.fee_rate).round_dp(10)
    }

    fn fill(&self, order_id: u64, request: &OrderRequest, price: Decimal, timestamp_ms: i64) -> FillReport {
        FillReport {
            order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            price,
            quantity: request.quantity,
            fee: self.fee_for(price * request.quantity),
            timestamp: timestamp_ms,
        }
    }

    fn apply_slippage(&self, side: Side, price: Decimal) -> Decimal {
        if self.slippage_bps.is_zero() {
            return price;
        }
        let adj = price * self.slippage_bps / BPS;
        match side {
            Side::Buy => price + adj,
            Side::Sell => price - adj,
        }
    }

    fn crosses(side: Side, limit: Decimal, market: Decimal) -> bool {
        match side {
            Side::Buy => market <= limit,
            Side::Sell => market >= limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn model() -> ExecutionModel {
        let mut m = ExecutionModel::new(dec!(0.001), dec!(0));
        m.update_price("BTCUSDT", dec!(100));
        m
    }

    #[test]
    fn test_market_order_fills_at_last_price() {
        let mut m = model();
        let outcome = m.submit(OrderRequest::market("BTCUSDT", Side::Buy, dec!(2)), 10);
        match outcome {
            SubmitOutcome::Filled(fill) => {
                assert_eq!(fill.order_id, 1);
                assert_eq!(fill.price, dec!(100));
                assert_eq!(fill.fee, dec!(0.2));
                assert_eq!(fill.timestamp, 10);
            }
            other => panic!("expected fill, got {:?}", other),
        }
    }

    #[test]
    fn test_slippage_is_adverse() {
        let mut m = ExecutionModel::new(dec!(0), dec!(10));
        m.update_price("X", dec!(100));
        let buy = m.submit(OrderRequest::market("X", Side::Buy, dec!(1)), 0);
        let sell = m.submit(OrderRequest::market("X", Side::Sell, dec!(1)), 0);
        assert!(matches!(buy, SubmitOutcome::Filled(ref f) if f.price == dec!(100.1)));
        assert!(matches!(sell, SubmitOutcome::Filled(ref f) if f.price == dec!(99.9)));
    }

    #[test]
    fn test_expected_price() {
        let mut m = ExecutionModel::new(dec!(0), dec!(100));
        m.update_price("X", dec!(100));
        let market = OrderRequest::market("X", Side::Buy, dec!(1));
        assert_eq!(m.expected_price(&market), Some(dec!(101)));
        let limit = OrderRequest::limit("X", Side::Buy, dec!(1), dec!(90));
        assert_eq!(m.expected_price(&limit), Some(dec!(90)));
        let unknown = OrderRequest::market("Y", Side::Buy, dec!(1));
        assert_eq!(m.expected_price(&unknown), None);
    }

    #[test]
    fn test_rejects_without_price() {
        let mut m = model();
        let outcome = m.submit(OrderRequest::market("ETHUSDT", Side::Buy, dec!(1)), 0);
        assert!(matches!(outcome, SubmitOutcome::Rejected(_)));
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let mut m = model();
        let outcome = m.submit(OrderRequest::market("BTCUSDT", Side::Buy, dec!(0)), 0);
        assert!(matches!(outcome, SubmitOutcome::Rejected(_)));
    }

    #[test]
    fn test_limit_order_rests_then_fills() {
        let mut m = model();
        let outcome = m.submit(OrderRequest::limit("BTCUSDT", Side::Buy, dec!(1), dec!(95)), 0);
        assert_eq!(outcome, SubmitOutcome::Resting(1));
        assert_eq!(m.resting_count(), 1);

        assert!(m.match_resting("BTCUSDT", dec!(97), 1).is_empty());
        let fills = m.match_resting("BTCUSDT", dec!(94), 2);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(95));
        assert_eq!(fills[0].timestamp, 2);
        assert_eq!(m.resting_count(), 0);
    }

    #[test]
    fn test_marketable_limit_fills_immediately() {
        let mut m = model();
        let outcome = m.submit(OrderRequest::limit("BTCUSDT", Side::Sell, dec!(1), dec!(99)), 0);
        assert!(matches!(outcome, SubmitOutcome::Filled(ref f) if f.price == dec!(99)));
    }

    #[test]
    fn test_cancel_all() {
        let mut m = model();
        m.submit(OrderRequest::limit("BTCUSDT", Side::Buy, dec!(1), dec!(50)), 0);
        m.submit(OrderRequest::limit("BTCUSDT", Side::Sell, dec!(1), dec!(150)), 0);
        assert_eq!(m.cancel_all().len(), 2);
        assert_eq!(m.resting_count(), 0);
    }
}
