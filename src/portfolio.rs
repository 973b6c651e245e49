//! Portfolio
//!
//! Signed per-asset positions, keyed globally by asset (not per symbol).
//! Positions are created lazily on first mutation and persist for the run.
//! BTreeMap keeps iteration deterministic for valuation sums.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::events::Qty;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Portfolio {
    positions: BTreeMap<String, Qty>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position for an asset; implicitly zero.
    #[inline]
    pub fn get(&self, asset: &str) -> Qty {
        self.positions.get(asset).copied().unwrap_or(0.0)
    }

    /// Apply a signed quantity change.
    pub fn apply(&mut self, asset: &str, delta: Qty) {
        *self.positions.entry(asset.to_owned()).or_insert(0.0) += delta;
    }

    /// (asset, quantity) pairs in asset order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Qty)> {
        self.positions.iter().map(|(asset, qty)| (asset.as_str(), *qty))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
