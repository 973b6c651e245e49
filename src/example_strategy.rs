//! Example Strategies
//!
//! Demo strategies exercising the full engine surface. None of them carries
//! any alpha; they exist as wiring references and simulation smoke tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::clock::NANOS_PER_SEC;
use crate::events::{Order, OrderId, OrderStatus, Position, Qty, Side, Tif};
use crate::gateway::OrderSender;
use crate::strategy::{Strategy, StrategyContext, StrategyParams};

/// Does nothing. Baseline for smoke runs: final PnL and NOP must be zero.
pub struct NoopStrategy;

impl Strategy for NoopStrategy {
    fn name(&self) -> &str {
        "noop"
    }
}

/// Fires a triangular round trip when top-of-book prices imply one.
///
/// Every second: convert a notional dollar amount through
/// EUR/USD → EUR/JPY → USD/JPY at the currently quoted top and, if the trip
/// ends with more dollars than it started with and no orders are open, send
/// the three IOC legs.
pub struct TriangleStrategy {
    notional_usd: Qty,
    interval: i64,
    eur_usd: Option<OrderSender>,
    eur_jpy: Option<OrderSender>,
    usd_jpy: Option<OrderSender>,
    open_orders: usize,
}

impl TriangleStrategy {
    pub fn new(params: &StrategyParams) -> Self {
        Self {
            notional_usd: params.get_or("notional_usd", 1e6),
            interval: params.get_or("interval_sec", 1.0) as i64 * NANOS_PER_SEC,
            eur_usd: None,
            eur_jpy: None,
            usd_jpy: None,
            open_orders: 0,
        }
    }

    fn check_triangle(&mut self, ctx: &mut StrategyContext) {
        let (Some(eur_usd), Some(eur_jpy), Some(usd_jpy)) = (
            ctx.book("EUR/USD").copied(),
            ctx.book("EUR/JPY").copied(),
            ctx.book("USD/JPY").copied(),
        ) else {
            return;
        };
        if self.open_orders > 0 {
            return;
        }

        // USD -> EUR -> JPY -> USD at the quoted top.
        let euros = self.notional_usd / eur_usd.ask_price;
        let yen = euros * eur_jpy.bid_price;
        let dollars_back = yen / usd_jpy.ask_price;

        if dollars_back > self.notional_usd {
            info!(
                now = ctx.now(),
                edge = dollars_back - self.notional_usd,
                "triangle round trip quoted above par"
            );
            let legs = [
                (self.eur_usd, Side::Buy, eur_usd.ask_price, euros),
                (self.eur_jpy, Side::Sell, eur_jpy.bid_price, euros),
                (self.usd_jpy, Side::Buy, usd_jpy.ask_price, dollars_back),
            ];
            for (sender, side, price, qty) in legs {
                if let Some(sender) = sender {
                    ctx.send_order(sender, side, price, qty, Tif::Ioc);
                    self.open_orders += 1;
                }
            }
        }
    }
}

impl Strategy for TriangleStrategy {
    fn on_start(&mut self, ctx: &mut StrategyContext) {
        self.eur_usd = ctx.order_sender("EUR/USD").ok();
        self.eur_jpy = ctx.order_sender("EUR/JPY").ok();
        self.usd_jpy = ctx.order_sender("USD/JPY").ok();
        self.check_triangle(ctx);
        ctx.schedule_timer(self.interval);
    }

    fn on_timer(&mut self, ctx: &mut StrategyContext, _timer_id: u64) {
        debug!(now = ctx.now(), pnl = ctx.pnl(), "triangle mark");
        self.check_triangle(ctx);
        ctx.schedule_timer(self.interval);
    }

    fn on_fill(
        &mut self,
        ctx: &mut StrategyContext,
        symbol: &str,
        order_id: OrderId,
        dealt: Qty,
        contra: Qty,
    ) {
        debug!(now = ctx.now(), symbol, order_id, dealt, contra, "fill");
    }

    fn on_order_terminated(
        &mut self,
        _ctx: &mut StrategyContext,
        _symbol: &str,
        _order_id: OrderId,
        _status: OrderStatus,
    ) {
        self.open_orders = self.open_orders.saturating_sub(1);
    }

    fn on_position_batch_end(&mut self, ctx: &mut StrategyContext) {
        debug!(now = ctx.now(), nop = ctx.nop(), "positions updated");
    }

    fn name(&self) -> &str {
        "triangle"
    }
}

/// Seeded coin-flip taker: every interval, buy or sell a fixed clip at the
/// far touch. Useful as a zero-edge reference run.
pub struct RandomTakerStrategy {
    symbol: String,
    qty: Qty,
    interval: i64,
    rng: StdRng,
    sender: Option<OrderSender>,
}

impl RandomTakerStrategy {
    pub fn new(params: &StrategyParams) -> Self {
        Self {
            symbol: params
                .get_string("symbol")
                .unwrap_or("EUR/USD")
                .to_owned(),
            qty: params.get_or("qty", 100_000.0),
            interval: params.get_or("interval_sec", 30.0) as i64 * NANOS_PER_SEC,
            rng: StdRng::seed_from_u64(params.get_or("seed", 42.0) as u64),
            sender: None,
        }
    }
}

impl Strategy for RandomTakerStrategy {
    fn on_start(&mut self, ctx: &mut StrategyContext) {
        self.sender = ctx.order_sender(&self.symbol).ok();
        ctx.schedule_timer(self.interval);
    }

    fn on_timer(&mut self, ctx: &mut StrategyContext, _timer_id: u64) {
        if let (Some(sender), Some(book)) = (self.sender, ctx.book(&self.symbol).copied()) {
            let (side, price) = if self.rng.gen_bool(0.5) {
                (Side::Buy, book.ask_price)
            } else {
                (Side::Sell, book.bid_price)
            };
            let order_id = ctx.send_order(sender, side, price, self.qty, Tif::Ioc);
            debug!(now = ctx.now(), order_id, side = side.as_str(), "random clip");
        }
        ctx.schedule_timer(self.interval);
    }

    fn on_order_ack(&mut self, ctx: &mut StrategyContext, symbol: &str, order: &Order) {
        debug!(now = ctx.now(), symbol, order_id = order.order_id, "ack");
    }

    fn on_position(&mut self, _ctx: &mut StrategyContext, _asset: &str, _position: &Position) {}

    fn name(&self) -> &str {
        "random_taker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_params() {
        let params = StrategyParams::new()
            .with_param("notional_usd", 5e5)
            .with_param("interval_sec", 2.0);
        let strategy = TriangleStrategy::new(&params);
        assert_eq!(strategy.notional_usd, 5e5);
        assert_eq!(strategy.interval, 2 * NANOS_PER_SEC);
        assert_eq!(strategy.name(), "triangle");
    }

    #[test]
    fn test_random_taker_is_seed_deterministic() {
        let params = StrategyParams::new().with_param("seed", 7.0);
        let mut a = RandomTakerStrategy::new(&params);
        let mut b = RandomTakerStrategy::new(&params);
        for _ in 0..32 {
            assert_eq!(a.rng.gen_bool(0.5), b.rng.gen_bool(0.5));
        }
    }

    #[test]
    fn test_noop_name() {
        assert_eq!(NoopStrategy.name(), "noop");
    }
}
