//! Strategy Harness
//!
//! The strategy boundary: callbacks for market-data and position updates,
//! order-state notifications, and timers, plus the context through which a
//! strategy reaches the engine. Strategies must never consult wall-clock
//! time; `StrategyContext::now()` is the only clock.

use std::collections::HashMap;

use crate::clock::Nanos;
use crate::event_loop::EventLoop;
use crate::events::{Order, OrderId, OrderStatus, Position, Price, Qty, Side, Tif, TopOfBook};
use crate::gateway::{GatewayError, LpGateway, ObserverId, OrderSender};
use crate::portfolio::Portfolio;
use crate::pubsub::TopicCache;
use crate::risk::RiskModel;

/// Observer slot the session registers its strategy under.
pub const STRATEGY_OBSERVER: ObserverId = 0;

/// Engine access handed to every strategy callback.
pub struct StrategyContext<'a> {
    pub(crate) events: &'a mut EventLoop,
    pub(crate) gateway: &'a mut LpGateway,
    pub(crate) books: &'a TopicCache<TopOfBook>,
    pub(crate) positions: &'a TopicCache<Position>,
    pub(crate) portfolio: &'a Portfolio,
    pub(crate) risk: &'a RiskModel,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        events: &'a mut EventLoop,
        gateway: &'a mut LpGateway,
        books: &'a TopicCache<TopOfBook>,
        positions: &'a TopicCache<Position>,
        portfolio: &'a Portfolio,
        risk: &'a RiskModel,
    ) -> Self {
        Self {
            events,
            gateway,
            books,
            positions,
            portfolio,
            risk,
        }
    }

    /// Current simulation time.
    #[inline]
    pub fn now(&self) -> Nanos {
        self.events.now()
    }

    /// Schedule an `on_timer` callback `delay` nanoseconds from now.
    pub fn schedule_timer(&mut self, delay: Nanos) -> u64 {
        self.events.schedule_timer(delay)
    }

    /// Order sender for `symbol`, memoized per symbol for this strategy.
    pub fn order_sender(&mut self, symbol: &str) -> Result<OrderSender, GatewayError> {
        self.gateway
            .order_sender(self.events, symbol, STRATEGY_OBSERVER)
    }

    /// Submit an order; acknowledgment, fills, and the terminal status
    /// arrive asynchronously through the strategy callbacks.
    pub fn send_order(
        &mut self,
        sender: OrderSender,
        side: Side,
        price: Price,
        qty: Qty,
        tif: Tif,
    ) -> OrderId {
        self.gateway
            .send_order(self.events, self.books, sender, side, price, qty, tif)
    }

    /// Latest top-of-book for `symbol`, if any has been seen.
    pub fn book(&self, symbol: &str) -> Option<&TopOfBook> {
        self.books.get(symbol)
    }

    /// Committed position for `asset` (zero before the first fill).
    pub fn position(&self, asset: &str) -> Qty {
        self.portfolio.get(asset)
    }

    /// Portfolio PnL at fair prices, in numeraire terms.
    pub fn pnl(&self) -> Price {
        self.risk.pnl(self.portfolio.iter(), self.books)
    }

    /// Portfolio net open position at fair prices, in numeraire terms.
    pub fn nop(&self) -> Price {
        self.risk.nop(self.portfolio.iter(), self.books)
    }

    pub fn risk(&self) -> &RiskModel {
        self.risk
    }
}

/// The core strategy trait. All callbacks default to no-ops; implement the
/// ones the strategy cares about.
pub trait Strategy {
    /// A top-of-book update for `symbol`.
    fn on_quote(&mut self, _ctx: &mut StrategyContext, _symbol: &str, _book: &TopOfBook) {}

    /// A batch of concurrent top-of-book updates is complete.
    fn on_quote_batch_end(&mut self, _ctx: &mut StrategyContext) {}

    /// A position update for `asset`.
    fn on_position(&mut self, _ctx: &mut StrategyContext, _asset: &str, _position: &Position) {}

    /// Both legs of a fill (and any concurrent position updates) have been
    /// applied; consistent multi-asset reads are safe here.
    fn on_position_batch_end(&mut self, _ctx: &mut StrategyContext) {}

    /// A timer scheduled through the context has fired.
    fn on_timer(&mut self, _ctx: &mut StrategyContext, _timer_id: u64) {}

    /// The venue acknowledged an order (after the inbound delay).
    fn on_order_ack(&mut self, _ctx: &mut StrategyContext, _symbol: &str, _order: &Order) {}

    /// An execution occurred: `dealt` base units against `contra` quote
    /// units, both signed.
    fn on_fill(
        &mut self,
        _ctx: &mut StrategyContext,
        _symbol: &str,
        _order_id: OrderId,
        _dealt: Qty,
        _contra: Qty,
    ) {
    }

    /// The order reached a terminal state.
    fn on_order_terminated(
        &mut self,
        _ctx: &mut StrategyContext,
        _symbol: &str,
        _order_id: OrderId,
        _status: OrderStatus,
    ) {
    }

    /// Called once after the strategy is wired in, at the warmed-up clock.
    fn on_start(&mut self, _ctx: &mut StrategyContext) {}

    /// Strategy name for logging.
    fn name(&self) -> &str;
}

/// Strategy parameters (from config or CLI).
#[derive(Debug, Clone, Default)]
pub struct StrategyParams {
    params: HashMap<String, f64>,
    strings: HashMap<String, String>,
}

impl StrategyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.strings.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.params.get(key).copied()
    }

    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).copied().unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.strings.get(key).map(|s| s.as_str())
    }
}
