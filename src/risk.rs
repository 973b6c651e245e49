//! Risk Model
//!
//! Fair-price lookup from the cached top-of-book plus PnL and NOP
//! computation over positions. All valuations are expressed in the
//! numeraire currency (USD by default). A missing quote surfaces as NaN in
//! the results; it is not an error.

use crate::events::{Price, Qty, TopOfBook};
use crate::pubsub::TopicCache;

/// Valuation model over the market-data cache.
#[derive(Debug, Clone)]
pub struct RiskModel {
    numeraire: String,
}

impl RiskModel {
    pub fn new(numeraire: impl Into<String>) -> Self {
        Self {
            numeraire: numeraire.into(),
        }
    }

    pub fn numeraire(&self) -> &str {
        &self.numeraire
    }

    /// Fair price of one unit of `asset` in numeraire terms.
    ///
    /// The numeraire itself is worth 1. Otherwise the direct pair
    /// `"{asset}/{numeraire}"` prices at its mid; failing that the inverted
    /// pair `"{numeraire}/{asset}"` prices at `2 / (bid + ask)`; failing
    /// both the price is NaN.
    pub fn fair_price(&self, asset: &str, books: &TopicCache<TopOfBook>) -> Price {
        if asset == self.numeraire {
            return 1.0;
        }

        if let Some(book) = books.get(&format!("{}/{}", asset, self.numeraire)) {
            return (book.bid_price + book.ask_price) / 2.0;
        }

        if let Some(book) = books.get(&format!("{}/{}", self.numeraire, asset)) {
            return 2.0 / (book.bid_price + book.ask_price);
        }

        f64::NAN
    }

    /// Signed valuation of all positions at fair price.
    pub fn pnl<'a, I>(&self, positions: I, books: &TopicCache<TopOfBook>) -> Price
    where
        I: IntoIterator<Item = (&'a str, Qty)>,
    {
        let mut pnl = 0.0;
        for (asset, qty) in positions {
            pnl += qty * self.fair_price(asset, books);
        }
        pnl
    }

    /// Net open position: the larger of total long value and total short
    /// value at fair price.
    pub fn nop<'a, I>(&self, positions: I, books: &TopicCache<TopOfBook>) -> Price
    where
        I: IntoIterator<Item = (&'a str, Qty)>,
    {
        let mut longs = 0.0;
        let mut shorts = 0.0;
        for (asset, qty) in positions {
            if qty >= 0.0 {
                longs += qty * self.fair_price(asset, books);
            } else {
                shorts -= qty * self.fair_price(asset, books);
            }
        }
        longs.max(shorts)
    }
}

impl Default for RiskModel {
    fn default() -> Self {
        Self::new("USD")
    }
}
