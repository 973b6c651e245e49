//! Session
//!
//! Composition root and dispatcher. The session owns every component
//! (event loop, both pub/sub hubs, caches, portfolio, gateway, risk model,
//! and the strategy) and applies the actions the loop pops to them. All
//! cross-component callbacks route through sink adapters built from split
//! borrows of the session, so no component stores a pointer to another.
//!
//! Wiring (cache always registered ahead of the strategy so strategy
//! callbacks observe cache-consistent state):
//!
//! ```text
//! replay -> md channel -> md proxy -> { md cache, strategy }
//! gateway fills -> position channel -> position proxy -> { position cache, strategy }
//! ```
//!
//! The run protocol mirrors the reference composition: attach sources, warm
//! up (a zero-delay stop request plus one dispatch, which fast-forwards the
//! clock to the first record and publishes the first batch), create and
//! attach the strategy, dispatch to completion, then report
//! `{last_event_time, pnl, nop}` over the position cache.

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::clock::Nanos;
use crate::config::SimConfig;
use crate::event_loop::{EventLoop, LoopError};
use crate::events::{Action, Asset, Order, OrderId, Position, Price, Symbol, TopOfBook};
use crate::gateway::LpGateway;
use crate::portfolio::Portfolio;
use crate::pubsub::{ChannelId, EntryId, Hub, ProxyId, RecordSink, SinkId, SubscriberOf, TopicCache};
use crate::replay::{QuoteRecord, QuoteReplayer, QuoteSink, Replayable};
use crate::risk::RiskModel;
use crate::strategy::{Strategy, StrategyContext};

/// Sink handle of the topic cache on each hub.
const SINK_CACHE: SinkId = 0;
/// Sink handle of the strategy on each hub.
const SINK_STRATEGY: SinkId = 1;

/// End-of-run report.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub last_event_time: Nanos,
    pub pnl: Price,
    pub nop: Price,
}

impl SessionSummary {
    /// The canonical stdout line.
    pub fn stdout_line(&self) -> String {
        format!(
            "lastEventTime:{},pnl:{},nop:{}",
            self.last_event_time, self.pnl, self.nop
        )
    }
}

/// Sink that drops everything; used while wiring, before any topic exists.
struct NullSink;

impl<R> RecordSink<R> for NullSink {
    fn on_notify(&mut self, _sink: SinkId, _topic: &str, _record: &R) {}
    fn on_record(&mut self, _sink: SinkId, _topic: &str, _record: &R) {}
    fn on_batch_end(&mut self, _sink: SinkId) {}
}

/// Routes market-data fabric callbacks to the cache and the strategy.
struct MdSink<'a> {
    cache: &'a mut TopicCache<TopOfBook>,
    strategy: Option<&'a mut (dyn Strategy + 'static)>,
    events: &'a mut EventLoop,
    gateway: &'a mut LpGateway,
    pos_cache: &'a TopicCache<Position>,
    portfolio: &'a Portfolio,
    risk: &'a RiskModel,
}

impl MdSink<'_> {
    fn deliver(&mut self, sink: SinkId, topic: &str, record: &TopOfBook) {
        match sink {
            SINK_CACHE => self.cache.insert(topic, *record),
            SINK_STRATEGY => {
                if let Some(strategy) = self.strategy.as_deref_mut() {
                    let mut ctx = StrategyContext::new(
                        self.events,
                        self.gateway,
                        self.cache,
                        self.pos_cache,
                        self.portfolio,
                        self.risk,
                    );
                    strategy.on_quote(&mut ctx, topic, record);
                }
            }
            _ => {}
        }
    }
}

impl RecordSink<TopOfBook> for MdSink<'_> {
    fn on_notify(&mut self, sink: SinkId, topic: &str, record: &TopOfBook) {
        self.deliver(sink, topic, record);
    }

    fn on_record(&mut self, sink: SinkId, topic: &str, record: &TopOfBook) {
        self.deliver(sink, topic, record);
    }

    fn on_batch_end(&mut self, sink: SinkId) {
        if sink == SINK_STRATEGY {
            if let Some(strategy) = self.strategy.as_deref_mut() {
                let mut ctx = StrategyContext::new(
                    self.events,
                    self.gateway,
                    self.cache,
                    self.pos_cache,
                    self.portfolio,
                    self.risk,
                );
                strategy.on_quote_batch_end(&mut ctx);
            }
        }
    }
}

/// Routes position fabric callbacks to the cache and the strategy.
struct PosSink<'a> {
    cache: &'a mut TopicCache<Position>,
    strategy: Option<&'a mut (dyn Strategy + 'static)>,
    events: &'a mut EventLoop,
    gateway: &'a mut LpGateway,
    md_cache: &'a TopicCache<TopOfBook>,
    portfolio: &'a Portfolio,
    risk: &'a RiskModel,
}

impl PosSink<'_> {
    fn deliver(&mut self, sink: SinkId, topic: &str, record: &Position) {
        match sink {
            SINK_CACHE => self.cache.insert(topic, *record),
            SINK_STRATEGY => {
                if let Some(strategy) = self.strategy.as_deref_mut() {
                    let mut ctx = StrategyContext::new(
                        self.events,
                        self.gateway,
                        self.md_cache,
                        self.cache,
                        self.portfolio,
                        self.risk,
                    );
                    strategy.on_position(&mut ctx, topic, record);
                }
            }
            _ => {}
        }
    }
}

impl RecordSink<Position> for PosSink<'_> {
    fn on_notify(&mut self, sink: SinkId, topic: &str, record: &Position) {
        self.deliver(sink, topic, record);
    }

    fn on_record(&mut self, sink: SinkId, topic: &str, record: &Position) {
        self.deliver(sink, topic, record);
    }

    fn on_batch_end(&mut self, sink: SinkId) {
        if sink == SINK_STRATEGY {
            if let Some(strategy) = self.strategy.as_deref_mut() {
                let mut ctx = StrategyContext::new(
                    self.events,
                    self.gateway,
                    self.md_cache,
                    self.cache,
                    self.portfolio,
                    self.risk,
                );
                strategy.on_position_batch_end(&mut ctx);
            }
        }
    }
}

/// Adapter the replay source writes into: resolves per-symbol entries on
/// the market-data channel and forwards batch boundaries.
struct QuoteWriter<'a> {
    hub: &'a mut Hub<TopOfBook>,
    upstream: ChannelId,
    entries: &'a mut HashMap<Symbol, EntryId>,
    sink: MdSink<'a>,
}

impl QuoteSink for QuoteWriter<'_> {
    fn publish(&mut self, symbol: &str, book: &TopOfBook) {
        let entry = match self.entries.get(symbol) {
            Some(&entry) => entry,
            None => {
                let entry = self.hub.create_entry(self.upstream, symbol, book, &mut self.sink);
                self.entries.insert(symbol.to_owned(), entry);
                entry
            }
        };
        self.hub.publish(entry, book, &mut self.sink);
    }

    fn end_batch(&mut self) {
        self.hub.end_batch(self.upstream, &mut self.sink);
    }
}

/// The simulator: all component state plus the dispatch loop.
pub struct Session {
    events: EventLoop,

    md: Hub<TopOfBook>,
    md_proxy: ProxyId,
    md_upstream: ChannelId,
    md_entries: HashMap<Symbol, EntryId>,
    md_cache: TopicCache<TopOfBook>,

    pos: Hub<Position>,
    pos_proxy: ProxyId,
    pos_upstream: ChannelId,
    pos_entries: HashMap<Asset, EntryId>,
    pos_cache: TopicCache<Position>,

    gateway: LpGateway,
    portfolio: Portfolio,
    risk: RiskModel,
    strategy: Option<Box<dyn Strategy>>,
}

impl Session {
    pub fn new(config: SimConfig) -> Self {
        let mut md = Hub::new();
        let md_proxy = md.add_proxy();
        let md_upstream = md.add_channel(SubscriberOf::Proxy(md_proxy));
        let md_cache_channel = md.add_channel(SubscriberOf::Sink(SINK_CACHE));
        md.proxy_add_front(md_proxy, md_cache_channel, &mut NullSink);

        let mut pos = Hub::new();
        let pos_proxy = pos.add_proxy();
        let pos_upstream = pos.add_channel(SubscriberOf::Proxy(pos_proxy));
        let pos_cache_channel = pos.add_channel(SubscriberOf::Sink(SINK_CACHE));
        pos.proxy_add_front(pos_proxy, pos_cache_channel, &mut NullSink);

        Self {
            events: EventLoop::new(0),
            md,
            md_proxy,
            md_upstream,
            md_entries: HashMap::new(),
            md_cache: TopicCache::new(),
            pos,
            pos_proxy,
            pos_upstream,
            pos_entries: HashMap::new(),
            pos_cache: TopicCache::new(),
            gateway: LpGateway::new(config.lp),
            portfolio: Portfolio::new(),
            risk: RiskModel::new(config.numeraire),
            strategy: None,
        }
    }

    /// Attach a replay source to the loop.
    pub fn add_quote_source(&mut self, source: Box<dyn Replayable>) -> Result<usize, LoopError> {
        self.events.add(source)
    }

    /// Attach an in-memory record set as a replay source.
    pub fn add_quotes(&mut self, records: Vec<QuoteRecord>) -> Result<usize, LoopError> {
        self.add_quote_source(Box::new(QuoteReplayer::new(records)))
    }

    /// Fast-forward to the first market-data record: request an immediate
    /// stop via a chore, then dispatch once. The stop is scheduled only
    /// after the clock has jumped to the first future event, so the first
    /// batch is published (warming the cache) before the loop halts.
    pub fn warm_up(&mut self) {
        self.events.post(0, Action::RequestStop { delay: 0 });
        self.dispatch();
    }

    /// Wire in the strategy: registered behind the cache on both proxies so
    /// its callbacks always observe cache-consistent state, with
    /// retroactive notification of every topic already known. Ends with
    /// `on_start` at the current (warmed-up) clock.
    pub fn attach_strategy(&mut self, strategy: Box<dyn Strategy>) {
        info!(strategy = strategy.name(), "attaching strategy");
        self.strategy = Some(strategy);

        let md_channel = self.md.add_channel(SubscriberOf::Sink(SINK_STRATEGY));
        {
            let Session {
                md,
                md_proxy,
                md_cache,
                pos_cache,
                portfolio,
                risk,
                events,
                gateway,
                strategy,
                ..
            } = self;
            let mut sink = MdSink {
                cache: md_cache,
                strategy: strategy.as_deref_mut(),
                events,
                gateway,
                pos_cache,
                portfolio,
                risk,
            };
            md.proxy_add_back(*md_proxy, md_channel, &mut sink);
        }

        let pos_channel = self.pos.add_channel(SubscriberOf::Sink(SINK_STRATEGY));
        {
            let Session {
                pos,
                pos_proxy,
                pos_cache,
                md_cache,
                portfolio,
                risk,
                events,
                gateway,
                strategy,
                ..
            } = self;
            let mut sink = PosSink {
                cache: pos_cache,
                strategy: strategy.as_deref_mut(),
                events,
                gateway,
                md_cache,
                portfolio,
                risk,
            };
            pos.proxy_add_back(*pos_proxy, pos_channel, &mut sink);
        }

        self.with_strategy(|strategy, ctx| strategy.on_start(ctx));
    }

    /// Run the loop until both queues drain or a stop fires. Re-entrant:
    /// each call re-enables the loop and fast-forwards to the soonest
    /// future event.
    pub fn dispatch(&mut self) {
        self.events.begin_dispatch();
        while self.events.enabled() && self.events.has_pending() {
            while self.events.enabled() {
                let Some(action) = self.events.pop_chore() else {
                    break;
                };
                self.apply(action);
            }
            if self.events.enabled() {
                if let Some(action) = self.events.pop_future() {
                    self.apply(action);
                }
            }
        }
    }

    /// End-of-run report computed over the position cache.
    pub fn summary(&self) -> SessionSummary {
        let pnl = self.risk.pnl(
            self.pos_cache.iter().map(|(asset, p)| (asset, p.qty)),
            &self.md_cache,
        );
        let nop = self.risk.nop(
            self.pos_cache.iter().map(|(asset, p)| (asset, p.qty)),
            &self.md_cache,
        );
        SessionSummary {
            last_event_time: self.events.now(),
            pnl,
            nop,
        }
    }

    #[inline]
    pub fn now(&self) -> Nanos {
        self.events.now()
    }

    pub fn books(&self) -> &TopicCache<TopOfBook> {
        &self.md_cache
    }

    pub fn positions(&self) -> &TopicCache<Position> {
        &self.pos_cache
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn risk(&self) -> &RiskModel {
        &self.risk
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::ReplayNext { slot } => self.apply_replay_next(slot),
            Action::BindPositions { base, quote } => {
                self.bind_position_entry(&base);
                self.bind_position_entry(&quote);
            }
            Action::OrderArrival { exec, order } => self.apply_order_arrival(exec, order),
            Action::FillDelivery {
                exec,
                order_id,
                dealt,
                contra,
            } => self.apply_fill_delivery(exec, order_id, dealt, contra),
            Action::OrderTerminated {
                exec,
                order_id,
                status,
            } => {
                let symbol = self.gateway.exec_symbol(exec).to_owned();
                self.with_strategy(|strategy, ctx| {
                    strategy.on_order_terminated(ctx, &symbol, order_id, status)
                });
            }
            Action::Timer { timer_id } => {
                self.with_strategy(|strategy, ctx| strategy.on_timer(ctx, timer_id));
            }
            Action::RequestStop { delay } => self.events.stop(delay),
            Action::Stop => self.events.disable(),
        }
    }

    /// Dispatch one batch from a replay source, then reschedule or retire it.
    fn apply_replay_next(&mut self, slot: usize) {
        let Some(mut source) = self.events.take_source(slot) else {
            return;
        };
        {
            let Session {
                events,
                md,
                md_upstream,
                md_entries,
                md_cache,
                pos_cache,
                portfolio,
                risk,
                gateway,
                strategy,
                ..
            } = self;
            let mut writer = QuoteWriter {
                hub: md,
                upstream: *md_upstream,
                entries: md_entries,
                sink: MdSink {
                    cache: md_cache,
                    strategy: strategy.as_deref_mut(),
                    events,
                    gateway,
                    pos_cache,
                    portfolio,
                    risk,
                },
            };
            source.dispatch_next(&mut writer);
        }

        let next = source.next_event_time();
        let now = self.events.now();
        self.events.restore_source(slot, source);
        if next == Nanos::MAX {
            self.events.retire_source(slot);
        } else {
            let delta = (next - now).max(0);
            self.events.post(delta, Action::ReplayNext { slot });
        }
    }

    /// Ensure a position publisher entry (and a zero portfolio slot) exists
    /// for `asset`, notifying downstream subscribers of the new topic.
    fn bind_position_entry(&mut self, asset: &str) {
        if self.pos_entries.contains_key(asset) {
            return;
        }
        self.portfolio.apply(asset, 0.0);
        let record = Position::new(self.portfolio.get(asset));

        let Session {
            pos,
            pos_upstream,
            pos_entries,
            pos_cache,
            md_cache,
            portfolio,
            risk,
            events,
            gateway,
            strategy,
            ..
        } = self;
        let mut sink = PosSink {
            cache: pos_cache,
            strategy: strategy.as_deref_mut(),
            events,
            gateway,
            md_cache,
            portfolio,
            risk,
        };
        let entry = pos.create_entry(*pos_upstream, asset, &record, &mut sink);
        pos_entries.insert(asset.to_owned(), entry);
    }

    /// The order reached the venue: ack, then run the matching state
    /// machine and stage its outcome behind the outbound delay. The fill is
    /// scheduled before the terminal status so the id tie-break delivers
    /// them in that order.
    fn apply_order_arrival(&mut self, exec: usize, order: Order) {
        let symbol = self.gateway.exec_symbol(exec).to_owned();
        self.with_strategy(|strategy, ctx| strategy.on_order_ack(ctx, &symbol, &order));

        let now = self.events.now();
        let outcome = self.gateway.process_arrival(
            now,
            exec,
            &order,
            &self.md_cache,
            &self.portfolio,
            &self.risk,
        );

        let outbound = self.gateway.config().outbound_delay;
        if let Some(fill) = outcome.fill {
            self.events.post(
                outbound,
                Action::FillDelivery {
                    exec,
                    order_id: order.order_id,
                    dealt: fill.dealt,
                    contra: fill.contra,
                },
            );
        }
        self.events.post(
            outbound,
            Action::OrderTerminated {
                exec,
                order_id: order.order_id,
                status: outcome.status,
            },
        );
    }

    /// Commit both fill legs, publish base then quote, notify the observer,
    /// and close the position batch so multi-asset reads are consistent.
    fn apply_fill_delivery(&mut self, exec: usize, order_id: OrderId, dealt: f64, contra: f64) {
        let symbol = self.gateway.exec_symbol(exec).to_owned();
        let (base, quote) = {
            let (base, quote) = self.gateway.exec_assets(exec);
            (base.to_owned(), quote.to_owned())
        };

        self.portfolio.apply(&base, dealt);
        self.portfolio.apply(&quote, contra);

        self.publish_position(&base);
        self.publish_position(&quote);

        self.with_strategy(|strategy, ctx| {
            strategy.on_fill(ctx, &symbol, order_id, dealt, contra)
        });

        let Session {
            pos,
            pos_upstream,
            pos_cache,
            md_cache,
            portfolio,
            risk,
            events,
            gateway,
            strategy,
            ..
        } = self;
        let mut sink = PosSink {
            cache: pos_cache,
            strategy: strategy.as_deref_mut(),
            events,
            gateway,
            md_cache,
            portfolio,
            risk,
        };
        pos.end_batch(*pos_upstream, &mut sink);
    }

    fn publish_position(&mut self, asset: &str) {
        self.bind_position_entry(asset);
        let record = Position::new(self.portfolio.get(asset));

        let Session {
            pos,
            pos_entries,
            pos_cache,
            md_cache,
            portfolio,
            risk,
            events,
            gateway,
            strategy,
            ..
        } = self;
        let Some(&entry) = pos_entries.get(asset) else {
            return;
        };
        let mut sink = PosSink {
            cache: pos_cache,
            strategy: strategy.as_deref_mut(),
            events,
            gateway,
            md_cache,
            portfolio,
            risk,
        };
        pos.publish(entry, &record, &mut sink);
    }

    fn with_strategy<F>(&mut self, f: F)
    where
        F: FnOnce(&mut dyn Strategy, &mut StrategyContext),
    {
        let Session {
            events,
            gateway,
            md_cache,
            pos_cache,
            portfolio,
            risk,
            strategy,
            ..
        } = self;
        if let Some(strategy) = strategy.as_deref_mut() {
            let mut ctx =
                StrategyContext::new(events, gateway, md_cache, pos_cache, portfolio, risk);
            f(strategy, &mut ctx);
        }
    }
}
