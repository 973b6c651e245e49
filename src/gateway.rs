//! LP Simulator Gateway
//!
//! Simulated liquidity-provider venue. Orders travel through a fixed
//! inbound delay, are validated and matched against the cached top-of-book,
//! and their effects travel back through a fixed outbound delay: position
//! mutations and terminal statuses become visible only when the outbound
//! event fires, never at submission time.
//!
//! Matching is deliberately simple: IOC only, liquidity taken at the top of
//! book with price improvement, remainder cancelled. A net-open-position
//! check runs before any fill is scheduled; NOP-reducing trades always pass,
//! NOP-increasing trades pass up to the configured cap.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Nanos, NANOS_PER_MILLI, NANOS_PER_SEC};
use crate::event_loop::EventLoop;
use crate::events::{
    split_symbol, Action, Asset, ExecId, Order, OrderId, OrderStatus, Price, Qty, Side, Symbol,
    Tif, TopOfBook,
};
use crate::portfolio::Portfolio;
use crate::pubsub::TopicCache;
use crate::risk::RiskModel;

/// An order whose limit is worse than the top by more than this never
/// matches.
pub const PRICE_TOLERANCE: Price = 1e-8;

/// Venue timing and risk settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LpConfig {
    /// Order transit time from strategy to venue.
    pub inbound_delay: Nanos,
    /// Fill/status transit time from venue back to the observer.
    pub outbound_delay: Nanos,
    /// Minimum spacing between accepted orders per executor.
    pub min_order_gap: Nanos,
    /// Net-open-position cap in numeraire terms.
    pub max_nop: Qty,
    /// Match at the top price rather than the order's limit.
    pub price_improvement: bool,
}

impl Default for LpConfig {
    fn default() -> Self {
        Self {
            inbound_delay: NANOS_PER_MILLI,
            outbound_delay: NANOS_PER_MILLI,
            min_order_gap: 10 * NANOS_PER_SEC,
            max_nop: 10e6,
            price_improvement: true,
        }
    }
}

/// Handle for submitting orders on one (symbol, observer) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderSender {
    exec: ExecId,
}

impl OrderSender {
    #[inline]
    pub fn exec(&self) -> ExecId {
        self.exec
    }
}

/// Observer handle; observers are registered by the session.
pub type ObserverId = usize;

#[derive(Debug)]
pub enum GatewayError {
    /// Symbol is not a "CCY1/CCY2" pair.
    BadSymbol(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSymbol(symbol) => write!(f, "not a currency pair: {:?}", symbol),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Scheduled fill legs, in base and quote units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub dealt: Qty,
    pub contra: Qty,
}

/// Result of the arrival-time state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalOutcome {
    pub fill: Option<Fill>,
    pub status: OrderStatus,
}

struct Executor {
    symbol: Symbol,
    base: Asset,
    quote: Asset,
    observer: ObserverId,
    /// Set once a top-of-book record for the symbol exists in the cache.
    book_bound: bool,
    last_order_send_time: Nanos,
}

/// The gateway: executor registry, order-id counter, and matching rules.
pub struct LpGateway {
    config: LpConfig,
    executors: Vec<Executor>,
    index: HashMap<(Symbol, ObserverId), ExecId>,
    last_order_id: OrderId,
}

impl LpGateway {
    pub fn new(config: LpConfig) -> Self {
        Self {
            config,
            executors: Vec::new(),
            index: HashMap::new(),
            last_order_id: 0,
        }
    }

    pub fn config(&self) -> &LpConfig {
        &self.config
    }

    /// Memoized executor handle for a (symbol, observer) pair. First
    /// creation posts a zero-delay chore that registers position publisher
    /// entries for the pair's assets.
    pub fn order_sender(
        &mut self,
        events: &mut EventLoop,
        symbol: &str,
        observer: ObserverId,
    ) -> Result<OrderSender, GatewayError> {
        if let Some(&exec) = self.index.get(&(symbol.to_owned(), observer)) {
            return Ok(OrderSender { exec });
        }

        let (base, quote) =
            split_symbol(symbol).ok_or_else(|| GatewayError::BadSymbol(symbol.to_owned()))?;

        let exec = self.executors.len();
        self.executors.push(Executor {
            symbol: symbol.to_owned(),
            base: base.to_owned(),
            quote: quote.to_owned(),
            observer,
            book_bound: false,
            last_order_send_time: 0,
        });
        self.index.insert((symbol.to_owned(), observer), exec);

        events.post(
            0,
            Action::BindPositions {
                base: base.to_owned(),
                quote: quote.to_owned(),
            },
        );
        debug!(symbol, exec, "executor created");
        Ok(OrderSender { exec })
    }

    /// Submit an order. Binds the executor's book reference if the cache
    /// now holds the symbol, allocates the next order id, and stages the
    /// arrival after the inbound delay. Always returns a valid id;
    /// acknowledgment and rejection arrive through the observer.
    pub fn send_order(
        &mut self,
        events: &mut EventLoop,
        books: &TopicCache<TopOfBook>,
        sender: OrderSender,
        side: Side,
        price: Price,
        qty: Qty,
        tif: Tif,
    ) -> OrderId {
        let executor = &mut self.executors[sender.exec];
        if !executor.book_bound && books.get(&executor.symbol).is_some() {
            executor.book_bound = true;
        }

        self.last_order_id += 1;
        let order_id = self.last_order_id;
        events.post(
            self.config.inbound_delay,
            Action::OrderArrival {
                exec: sender.exec,
                order: Order {
                    order_id,
                    side,
                    price,
                    qty,
                    tif,
                },
            },
        );
        order_id
    }

    /// Arrival-time state machine (runs after the inbound delay; the ack has
    /// already been emitted). Decides the terminal status and the fill to
    /// schedule, if any. Position state is untouched here; the session
    /// commits fills when the outbound event fires.
    pub fn process_arrival(
        &mut self,
        now: Nanos,
        exec: ExecId,
        order: &Order,
        books: &TopicCache<TopOfBook>,
        portfolio: &Portfolio,
        risk: &RiskModel,
    ) -> ArrivalOutcome {
        let executor = &mut self.executors[exec];

        let valid = executor.book_bound
            && order.tif == Tif::Ioc
            && order.qty > 0.0
            && now - executor.last_order_send_time >= self.config.min_order_gap;
        if !valid {
            debug!(
                symbol = %executor.symbol,
                order_id = order.order_id,
                "order failed validation"
            );
            return ArrivalOutcome {
                fill: None,
                status: OrderStatus::InternalReject,
            };
        }
        executor.last_order_send_time = now;

        let Some(book) = books.get(&executor.symbol) else {
            return ArrivalOutcome {
                fill: None,
                status: OrderStatus::InternalReject,
            };
        };

        let (top_qty, top_price) = book.top_for(order.side);
        let sign = order.side.sign();

        // Limit worse than the market beyond tolerance: done, no fill.
        if top_price.is_nan() || order.price * sign < top_price * sign - PRICE_TOLERANCE {
            return ArrivalOutcome {
                fill: None,
                status: OrderStatus::Done,
            };
        }

        let matched_price = if order.price.is_nan() || self.config.price_improvement {
            top_price
        } else {
            order.price
        };
        let matched_qty = top_qty.min(order.qty);

        if matched_qty > 0.0 {
            let dealt = sign * matched_qty;
            let contra = -dealt * matched_price;

            let (base, quote) = (self.executors[exec].base.clone(), self.executors[exec].quote.clone());
            if !self.nop_change_ok(&base, &quote, dealt, contra, portfolio, books, risk) {
                debug!(
                    order_id = order.order_id,
                    dealt, contra, "order rejected by NOP check"
                );
                return ArrivalOutcome {
                    fill: None,
                    status: OrderStatus::InternalReject,
                };
            }
            return ArrivalOutcome {
                fill: Some(Fill { dealt, contra }),
                status: OrderStatus::Done,
            };
        }

        // A matched-zero pass is still Done.
        ArrivalOutcome {
            fill: None,
            status: OrderStatus::Done,
        }
    }

    /// Pre-trade check: hypothetically apply the fill legs and accept iff
    /// the resulting NOP shrinks or stays within the cap. NaN in either leg
    /// rejects.
    fn nop_change_ok(
        &self,
        base: &str,
        quote: &str,
        dealt: Qty,
        contra: Qty,
        portfolio: &Portfolio,
        books: &TopicCache<TopOfBook>,
        risk: &RiskModel,
    ) -> bool {
        if dealt.is_nan() || contra.is_nan() {
            return false;
        }

        let current = risk.nop(portfolio.iter(), books);
        let mut hypothetical = portfolio.clone();
        hypothetical.apply(base, dealt);
        hypothetical.apply(quote, contra);
        let new = risk.nop(hypothetical.iter(), books);

        new < current || new <= self.config.max_nop
    }

    pub fn exec_symbol(&self, exec: ExecId) -> &str {
        &self.executors[exec].symbol
    }

    pub fn exec_assets(&self, exec: ExecId) -> (&str, &str) {
        let executor = &self.executors[exec];
        (&executor.base, &executor.quote)
    }

    pub fn exec_observer(&self, exec: ExecId) -> ObserverId {
        self.executors[exec].observer
    }
}
