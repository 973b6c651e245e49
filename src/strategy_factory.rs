//! Strategy Factory
//!
//! Name-based registry used by the runner.

use crate::example_strategy::{NoopStrategy, RandomTakerStrategy, TriangleStrategy};
use crate::strategy::{Strategy, StrategyParams};

/// Available strategies as (name, description) pairs.
pub fn available_strategies() -> Vec<(&'static str, &'static str)> {
    vec![
        ("noop", "Does nothing (smoke test baseline)"),
        (
            "triangle",
            "Fires a triangular FX round trip when quoted above par",
        ),
        (
            "random_taker",
            "Seeded coin-flip taker at the far touch (zero-edge reference)",
        ),
    ]
}

/// Create a strategy by name.
pub fn make_strategy(
    name: &str,
    params: &StrategyParams,
) -> Result<Box<dyn Strategy>, String> {
    match name {
        "noop" => Ok(Box::new(NoopStrategy)),
        "triangle" => Ok(Box::new(TriangleStrategy::new(params))),
        "random_taker" => Ok(Box::new(RandomTakerStrategy::new(params))),
        other => Err(format!("unknown strategy: {}", other)),
    }
}
