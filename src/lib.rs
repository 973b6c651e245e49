//! fxsim - Deterministic FX Market-Making Simulator
//!
//! Replays time-ordered top-of-book market data through a pub/sub fan-out,
//! feeds a pluggable trading strategy, and routes its orders through a
//! latency-modeled liquidity-provider simulator that maintains positions
//! and risk figures.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Session                            │
//! │   (owns clock + queues, applies actions, enforces order)    │
//! └─────────────────────────────────────────────────────────────┘
//!        │                    │                     │
//!        ▼                    ▼                     ▼
//! ┌────────────┐      ┌──────────────┐      ┌──────────────┐
//! │ Replay     │─────▶│ Market-data  │─────▶│ Cache +      │
//! │ (CSV)      │      │ proxy fanout │      │ Strategy     │
//! └────────────┘      └──────────────┘      └──────┬───────┘
//!                                                  │ orders
//!                                                  ▼
//! ┌────────────┐      ┌──────────────┐      ┌──────────────┐
//! │ Risk model │◀─────│ Position     │◀─────│ LP gateway   │
//! │ (PnL/NOP)  │      │ proxy fanout │      │ (delays+NOP) │
//! └────────────┘      └──────────────┘      └──────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - All time comes from the virtual clock; wall-clock is never consulted
//! - Chores run FIFO before the clock advances; future events order by
//!   `(expire_time, event_id)`
//! - Fan-out honors downstream registration order (cache before strategy)
//! - Deferred work is tagged data, not closures: identical inputs replay to
//!   identical outputs

pub mod clock;
pub mod config;
pub mod event_loop;
pub mod events;
pub mod example_strategy;
pub mod gateway;
pub mod portfolio;
pub mod pubsub;
pub mod replay;
pub mod risk;
pub mod session;
pub mod strategy;
pub mod strategy_factory;

// Re-exports for convenience
pub use clock::{Nanos, SimClock, NANOS_PER_MILLI, NANOS_PER_SEC};
pub use config::{ConfigError, SimConfig};
pub use event_loop::{EventId, EventLoop, LoopError, TimedEvent, MAX_REPLAY_SOURCES};
pub use events::{
    base_asset, quote_asset, split_symbol, Action, Asset, ExecId, Order, OrderId, OrderStatus,
    Position, Price, Qty, Side, Symbol, Tif, TopOfBook,
};
pub use example_strategy::{NoopStrategy, RandomTakerStrategy, TriangleStrategy};
pub use gateway::{
    ArrivalOutcome, Fill, GatewayError, LpConfig, LpGateway, ObserverId, OrderSender,
    PRICE_TOLERANCE,
};
pub use portfolio::Portfolio;
pub use pubsub::{
    Callback, ChannelId, EntryId, Hub, ProxyId, RecordSink, SinkId, SubscriberOf, Topic,
    TopicCache,
};
pub use replay::{
    load_quotes_csv, read_quotes, FeedError, QuoteRecord, QuoteReplayer, QuoteSink, Replayable,
};
pub use risk::RiskModel;
pub use session::{Session, SessionSummary};
pub use strategy::{Strategy, StrategyContext, StrategyParams, STRATEGY_OBSERVER};
pub use strategy_factory::{available_strategies, make_strategy};
