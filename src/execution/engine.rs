//! Simulated execution engine.
//!
//! Owns the order log, the position table and the trade ledger. Every
//! order resolves through one function ([`ExecutionEngine::resolve`]),
//! so the fill rules stay auditable in a single place:
//! - market orders fill immediately in full at a slippage-adjusted price;
//! - limit orders fill in full at the limit price only while marketable
//!   against the reference price, otherwise they stay pending;
//! - stop-family orders stay pending here (a live venue resolves them;
//!   the replay loop expresses exits through explicit risk checks).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::{Order, OrderKind, OrderSide, OrderStatus, Position, Trade};

/// Parameters of an order request.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub kind: OrderKind,
    pub side: OrderSide,
    pub quantity: Decimal,

    /// Limit price for limit orders; execution reference price for
    /// market orders
    pub price: Option<Decimal>,

    /// Stop/reference price (the marketability reference for limit
    /// orders, the trigger level for stop-family orders)
    pub stop_price: Option<Decimal>,

    /// Trailing distance as a fraction, for trailing stops
    pub trailing_percent: Option<Decimal>,
}

impl OrderRequest {
    /// Market order at the given reference price.
    pub fn market(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            kind: OrderKind::Market,
            side,
            quantity,
            price: Some(price),
            stop_price: None,
            trailing_percent: None,
        }
    }

    /// Limit order at `limit` with marketability judged against
    /// `reference`.
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        limit: Decimal,
        reference: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            kind: OrderKind::Limit,
            side,
            quantity,
            price: Some(limit),
            stop_price: Some(reference),
            trailing_percent: None,
        }
    }
}

/// Simulated execution engine: order lifecycle, position table, ledger.
pub struct ExecutionEngine {
    commission_rate: Decimal,
    slippage_rate: Decimal,
    positions: HashMap<String, Position>,
    orders: Vec<Order>,
    trades: Vec<Trade>,
}

impl ExecutionEngine {
    /// Create an engine with the given per-fill commission and slippage
    /// rates (both fractions of notional).
    pub fn new(commission_rate: Decimal, slippage_rate: Decimal) -> Self {
        Self {
            commission_rate,
            slippage_rate,
            positions: HashMap::new(),
            orders: Vec::new(),
            trades: Vec::new(),
        }
    }

    /// Create an order and resolve it through the simulated fill path.
    ///
    /// Returns the order in its post-resolution state. A market order
    /// without a usable reference price fails with an execution error and
    /// mutates no position state; the failed order is still recorded in
    /// the order log.
    pub fn create_order(
        &mut self,
        request: OrderRequest,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<Order> {
        if request.quantity <= Decimal::ZERO {
            return Err(EngineError::invalid_input(format!(
                "order quantity must be positive, got {}",
                request.quantity
            )));
        }

        let mut order = Order::new(
            request.symbol,
            request.kind,
            request.side,
            request.quantity,
            request.price,
            request.stop_price,
            request.trailing_percent,
        );
        order.created_at = timestamp;

        match self.resolve(&mut order) {
            Ok(()) => {
                self.orders.push(order.clone());
                Ok(order)
            }
            Err(e) => {
                order.fail();
                self.orders.push(order);
                Err(e)
            }
        }
    }

    /// Resolve a pending order against the simulated market. Fills update
    /// the position table and append to the ledger; anything else leaves
    /// the order pending.
    fn resolve(&mut self, order: &mut Order) -> EngineResult<()> {
        match order.kind {
            OrderKind::Market => {
                let reference = order.price.ok_or_else(|| {
                    EngineError::execution(&order.symbol, "market order without reference price")
                })?;
                if reference <= Decimal::ZERO {
                    return Err(EngineError::execution(
                        &order.symbol,
                        format!("unusable reference price {reference}"),
                    ));
                }

                let fill_price = self.apply_slippage(reference, order.side);
                order.fill(fill_price);
                self.apply_fill(order);
            }
            OrderKind::Limit => {
                let limit = order.price.ok_or_else(|| {
                    EngineError::execution(&order.symbol, "limit order without limit price")
                })?;
                let reference = order.stop_price.ok_or_else(|| {
                    EngineError::execution(&order.symbol, "limit order without reference price")
                })?;

                // Marketable limit fills at the limit price, no slippage;
                // otherwise the order rests.
                let marketable = match order.side {
                    OrderSide::Buy => limit >= reference,
                    OrderSide::Sell => limit <= reference,
                };
                if marketable {
                    order.fill(limit);
                    self.apply_fill(order);
                } else {
                    debug!(
                        symbol = %order.symbol,
                        limit = %limit,
                        reference = %reference,
                        "Limit order resting"
                    );
                }
            }
            OrderKind::StopLoss | OrderKind::TakeProfit | OrderKind::TrailingStop => {
                // Stop-family orders are not simulated here; they rest
                // until cancelled or routed to a live venue.
                debug!(
                    symbol = %order.symbol,
                    kind = order.kind.as_str(),
                    "Stop-family order resting"
                );
            }
        }
        Ok(())
    }

    /// Apply a filled order to the position table and record the ledger
    /// row. The update rule:
    /// - same direction (or no position): quantity accumulates and the
    ///   average price becomes the quantity-weighted blend;
    /// - opposite direction: gross realized PnL on the closed quantity is
    ///   (fill - average) * closed * position sign; a fill larger than
    ///   the position closes it and opens the excess as a new position in
    ///   the fill's direction (the same rule applied twice);
    /// - a position whose quantity reaches exactly zero is deleted.
    fn apply_fill(&mut self, order: &Order) {
        debug_assert_eq!(order.status, OrderStatus::Filled);

        let fill_qty = order.filled_quantity;
        let fill_price = order.filled_price;
        let commission = fill_qty * fill_price * self.commission_rate;
        let fill_sign = Decimal::from(order.side.sign());

        let mut realized_net = Decimal::ZERO;

        match self.positions.remove(&order.symbol) {
            None => {
                self.positions.insert(
                    order.symbol.clone(),
                    Position::open(&order.symbol, fill_qty * fill_sign, fill_price, commission),
                );
            }
            Some(mut position) if position.sign() == order.side.sign() => {
                // Same direction: weighted-average add
                let old_abs = position.abs_quantity();
                let new_abs = old_abs + fill_qty;
                position.average_price =
                    (position.average_price * old_abs + fill_price * fill_qty) / new_abs;
                position.quantity += fill_qty * fill_sign;
                position.entry_commission += commission;
                self.positions.insert(order.symbol.clone(), position);
            }
            Some(mut position) => {
                // Opposite direction: reduce, possibly flip
                let held_abs = position.abs_quantity();
                let closed_qty = fill_qty.min(held_abs);
                let excess = fill_qty - closed_qty;

                let gross = (fill_price - position.average_price)
                    * closed_qty
                    * Decimal::from(position.sign());

                // Pro-rate the stored entry commission over the closed
                // quantity, and this fill's commission over its closing
                // portion, so the ledger row reports net economics.
                let entry_commission_share = if held_abs > Decimal::ZERO {
                    position.entry_commission * closed_qty / held_abs
                } else {
                    Decimal::ZERO
                };
                let closing_commission = if fill_qty > Decimal::ZERO {
                    commission * closed_qty / fill_qty
                } else {
                    Decimal::ZERO
                };
                realized_net = gross - entry_commission_share - closing_commission;

                position.realized_pnl += gross;
                position.entry_commission -= entry_commission_share;
                position.quantity += closed_qty * fill_sign;

                if position.quantity != Decimal::ZERO {
                    // Partially reduced: the remainder stays open
                    self.positions.insert(order.symbol.clone(), position);
                } else if excess > Decimal::ZERO {
                    // Fully closed with quantity left over: the excess
                    // opens a new position in the fill's direction,
                    // carrying its share of the commission.
                    self.positions.insert(
                        order.symbol.clone(),
                        Position::open(
                            &order.symbol,
                            excess * fill_sign,
                            fill_price,
                            commission - closing_commission,
                        ),
                    );
                }
            }
        }

        self.trades.push(Trade {
            order_id: order.id,
            timestamp: order.created_at,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: fill_qty,
            price: fill_price,
            commission,
            realized_pnl: realized_net,
        });

        debug!(
            symbol = %order.symbol,
            side = order.side.as_str(),
            quantity = %fill_qty,
            price = %fill_price,
            commission = %commission,
            realized = %realized_net,
            "Fill applied"
        );
    }

    /// Slippage-adjusted execution price: buys pay up, sells receive
    /// less.
    fn apply_slippage(&self, price: Decimal, side: OrderSide) -> Decimal {
        match side {
            OrderSide::Buy => price * (Decimal::ONE + self.slippage_rate),
            OrderSide::Sell => price * (Decimal::ONE - self.slippage_rate),
        }
    }

    /// Cancel a pending order by id. Returns false (with no state change)
    /// for unknown ids and for orders already in a terminal status.
    pub fn cancel_order(&mut self, order_id: uuid::Uuid) -> bool {
        let Some(order) = self.orders.iter_mut().find(|o| o.id == order_id) else {
            warn!(%order_id, "Cancel requested for unknown order");
            return false;
        };
        order.cancel()
    }

    /// Current position for a symbol, if one is open.
    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// All open positions.
    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    /// Pending orders, optionally filtered by symbol.
    pub fn get_open_orders(&self, symbol: Option<&str>) -> Vec<&Order> {
        self.orders
            .iter()
            .filter(|o| o.is_pending())
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .collect()
    }

    /// Full order log, including terminal orders.
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// The append-only trade ledger, in fill order.
    pub fn get_trade_history(&self) -> &[Trade] {
        &self.trades
    }

    /// Signed market value of all open positions at the given prices.
    /// Symbols without a quote contribute nothing.
    pub fn calculate_portfolio_value(&self, current_prices: &HashMap<String, Decimal>) -> Decimal {
        self.positions
            .iter()
            .filter_map(|(symbol, position)| {
                current_prices
                    .get(symbol)
                    .map(|price| position.market_value(*price))
            })
            .sum()
    }

    /// Total commission charged across the ledger.
    pub fn total_commission(&self) -> Decimal {
        self.trades.iter().map(|t| t.commission).sum()
    }
}
