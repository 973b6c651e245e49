//! Event Model
//!
//! Canonical domain types for the simulator: order vocabulary, top-of-book
//! records, position records, and the tagged actions the event loop defers.
//! Actions carry their captured state explicitly so every pending event is
//! inspectable, which keeps replays reproducible.

use crate::clock::Nanos;
use serde::{Deserialize, Serialize};

/// Unique identifier for orders within one LP simulator instance.
pub type OrderId = u64;

/// Price in quote-currency units.
pub type Price = f64;

/// Quantity of base or quote asset.
pub type Qty = f64;

/// Currency pair in "CCY1/CCY2" form (e.g. "EUR/USD").
pub type Symbol = String;

/// Single currency code (e.g. "EUR").
pub type Asset = String;

/// Handle of a per-(symbol, observer) executor inside the gateway.
pub type ExecId = usize;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[inline]
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Sign convention: Buy = +1, Sell = -1.
    #[inline]
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

/// Time-in-force. Only IOC is accepted by the LP simulator; GTC submissions
/// terminate as internal rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tif {
    /// Good til cancelled
    Gtc,
    /// Immediate or cancel
    Ioc,
}

/// Terminal state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Cancelled or fully processed without error (a miss is still Done).
    Done,
    /// Rejected by the venue.
    Rejected,
    /// Rejected before reaching the venue (validation or risk).
    InternalReject,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Done => "Done",
            OrderStatus::Rejected => "Rejected",
            OrderStatus::InternalReject => "InternalReject",
        }
    }
}

/// Top-of-book market data for one symbol.
///
/// Prices may be NaN to signify "no quote on that side". The simulator does
/// not enforce any ordering between bid and ask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopOfBook {
    pub bid_size: Qty,
    pub bid_price: Price,
    pub ask_size: Qty,
    pub ask_price: Price,
}

impl TopOfBook {
    #[inline]
    pub fn new(bid_size: Qty, bid_price: Price, ask_size: Qty, ask_price: Price) -> Self {
        Self {
            bid_size,
            bid_price,
            ask_size,
            ask_price,
        }
    }

    /// Mid price; NaN when either side is missing.
    #[inline]
    pub fn mid(&self) -> Price {
        (self.bid_price + self.ask_price) / 2.0
    }

    /// (size, price) a taker on `side` would hit: the ask for a Buy,
    /// the bid for a Sell.
    #[inline]
    pub fn top_for(&self, side: Side) -> (Qty, Price) {
        match side {
            Side::Buy => (self.ask_size, self.ask_price),
            Side::Sell => (self.bid_size, self.bid_price),
        }
    }
}

/// Per-asset position record published on the position fabric.
/// Positive = long the asset, negative = short.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub qty: Qty,
}

impl Position {
    #[inline]
    pub fn new(qty: Qty) -> Self {
        Self { qty }
    }
}

/// An order as staged inside the LP simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Order {
    pub order_id: OrderId,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub tif: Tif,
}

/// Deferred work executed by the event loop.
///
/// Each variant captures its state explicitly instead of closing over it;
/// the session owns all component state and applies popped actions to it.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Pull the next same-timestamp batch from replay source `slot`,
    /// then reschedule or retire the source.
    ReplayNext { slot: usize },

    /// Register position publisher entries for a new executor's assets.
    /// Runs as a zero-delay chore so observer callbacks are not reentered.
    BindPositions { base: Asset, quote: Asset },

    /// An order reaches the venue after the inbound delay.
    OrderArrival { exec: ExecId, order: Order },

    /// A fill commits to the portfolio after the outbound delay.
    FillDelivery {
        exec: ExecId,
        order_id: OrderId,
        dealt: Qty,
        contra: Qty,
    },

    /// A terminal order status reaches the observer after the outbound delay.
    OrderTerminated {
        exec: ExecId,
        order_id: OrderId,
        status: OrderStatus,
    },

    /// Strategy timer callback.
    Timer { timer_id: u64 },

    /// Ask the loop to halt `delay` nanoseconds from now. The stop itself is
    /// scheduled with the maximum tie-break id so co-timed events run first.
    RequestStop { delay: Nanos },

    /// Halt the dispatch loop.
    Stop,
}

/// Split a "CCY1/CCY2" symbol into (base, quote) assets.
/// Returns None unless the symbol is exactly two 3-character codes.
pub fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    if symbol.len() == 7 && symbol.as_bytes()[3] == b'/' {
        Some((&symbol[..3], &symbol[4..]))
    } else {
        None
    }
}

/// Base currency of a pair ("EUR" for "EUR/USD").
pub fn base_asset(symbol: &str) -> Option<&str> {
    split_symbol(symbol).map(|(base, _)| base)
}

/// Quote currency of a pair ("USD" for "EUR/USD").
pub fn quote_asset(symbol: &str) -> Option<&str> {
    split_symbol(symbol).map(|(_, quote)| quote)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_operations() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
        assert_eq!(Side::Buy.sign(), 1.0);
        assert_eq!(Side::Sell.sign(), -1.0);
    }

    #[test]
    fn test_top_for_side() {
        let book = TopOfBook::new(1e6, 1.1000, 2e6, 1.1002);
        assert_eq!(book.top_for(Side::Buy), (2e6, 1.1002));
        assert_eq!(book.top_for(Side::Sell), (1e6, 1.1000));
        assert!((book.mid() - 1.1001).abs() < 1e-12);
    }

    #[test]
    fn test_mid_with_missing_side() {
        let book = TopOfBook::new(0.0, f64::NAN, 2e6, 1.1002);
        assert!(book.mid().is_nan());
    }

    #[test]
    fn test_split_symbol() {
        assert_eq!(split_symbol("EUR/USD"), Some(("EUR", "USD")));
        assert_eq!(base_asset("USD/JPY"), Some("USD"));
        assert_eq!(quote_asset("USD/JPY"), Some("JPY"));
        assert_eq!(split_symbol("EURUSD"), None);
        assert_eq!(split_symbol("EU/USD"), None);
        assert_eq!(split_symbol("EUR/US"), None);
        assert_eq!(split_symbol("EUR/USD/X"), None);
        assert_eq!(split_symbol(""), None);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(OrderStatus::Done.as_str(), "Done");
        assert_eq!(OrderStatus::InternalReject.as_str(), "InternalReject");
    }
}
