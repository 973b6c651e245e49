//! End-to-end simulation scenarios
//!
//! Full-pipeline runs through the public API: replayed CSV-shaped records,
//! scripted strategies, and assertions on event timing, positions, and the
//! final summary.

use std::cell::RefCell;
use std::rc::Rc;

use fxsim::{
    LpConfig, OrderStatus, QuoteRecord, Session, Side, SimConfig, Strategy, StrategyContext,
    Tif, TopOfBook, NANOS_PER_MILLI, NANOS_PER_SEC,
};

fn tick(time: i64, symbol: &str, bid: f64, ask: f64) -> QuoteRecord {
    QuoteRecord {
        time,
        symbol: symbol.to_owned(),
        book: TopOfBook::new(1e6, bid, 1e6, ask),
    }
}

fn config(min_gap: i64, max_nop: f64) -> SimConfig {
    SimConfig {
        lp: LpConfig {
            inbound_delay: NANOS_PER_MILLI,
            outbound_delay: NANOS_PER_MILLI,
            min_order_gap: min_gap,
            max_nop,
            price_improvement: true,
        },
        numeraire: "USD".to_owned(),
    }
}

/// (time, event) pairs recorded by the scripted strategy.
type EventLog = Rc<RefCell<Vec<(i64, String)>>>;

/// Sends a fixed list of (absolute time, side, price, qty) IOC orders on one
/// symbol and records every observer callback with its virtual timestamp.
struct ScriptedTaker {
    symbol: String,
    script: Vec<(i64, Side, f64, f64)>,
    next: usize,
    sender: Option<fxsim::OrderSender>,
    log: EventLog,
}

impl ScriptedTaker {
    fn new(symbol: &str, script: Vec<(i64, Side, f64, f64)>, log: EventLog) -> Self {
        Self {
            symbol: symbol.to_owned(),
            script,
            next: 0,
            sender: None,
            log,
        }
    }

    fn arm(&mut self, ctx: &mut StrategyContext) {
        if let Some(&(at, ..)) = self.script.get(self.next) {
            ctx.schedule_timer(at - ctx.now());
        }
    }
}

impl Strategy for ScriptedTaker {
    fn on_start(&mut self, ctx: &mut StrategyContext) {
        self.sender = Some(ctx.order_sender(&self.symbol).unwrap());
        self.arm(ctx);
    }

    fn on_timer(&mut self, ctx: &mut StrategyContext, _timer_id: u64) {
        let (_, side, price, qty) = self.script[self.next];
        self.next += 1;
        let sender = self.sender.unwrap();
        let order_id = ctx.send_order(sender, side, price, qty, Tif::Ioc);
        self.log
            .borrow_mut()
            .push((ctx.now(), format!("send:{}", order_id)));
        self.arm(ctx);
    }

    fn on_order_ack(&mut self, ctx: &mut StrategyContext, _symbol: &str, order: &fxsim::Order) {
        self.log
            .borrow_mut()
            .push((ctx.now(), format!("ack:{}", order.order_id)));
    }

    fn on_fill(
        &mut self,
        ctx: &mut StrategyContext,
        _symbol: &str,
        order_id: u64,
        dealt: f64,
        contra: f64,
    ) {
        self.log.borrow_mut().push((
            ctx.now(),
            format!("fill:{}:{:.1}:{:.1}", order_id, dealt, contra),
        ));
    }

    fn on_order_terminated(
        &mut self,
        ctx: &mut StrategyContext,
        _symbol: &str,
        order_id: u64,
        status: OrderStatus,
    ) {
        self.log
            .borrow_mut()
            .push((ctx.now(), format!("term:{}:{}", order_id, status.as_str())));
    }

    fn name(&self) -> &str {
        "scripted_taker"
    }
}

fn run_scripted(
    config: SimConfig,
    ticks: Vec<QuoteRecord>,
    script: Vec<(i64, Side, f64, f64)>,
) -> (fxsim::SessionSummary, Vec<(i64, String)>, f64, f64) {
    let log: EventLog = Rc::new(RefCell::new(Vec::new()));
    let mut session = Session::new(config);
    session.add_quotes(ticks).unwrap();
    session.warm_up();
    session.attach_strategy(Box::new(ScriptedTaker::new("EUR/USD", script, log.clone())));
    session.dispatch();

    let summary = session.summary();
    let eur = session.portfolio().get("EUR");
    let usd = session.portfolio().get("USD");
    let entries = log.borrow().clone();
    (summary, entries, eur, usd)
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn single_tick_no_trade() {
    let mut session = Session::new(SimConfig::default());
    session
        .add_quotes(vec![tick(1000, "EUR/USD", 1.1000, 1.1002)])
        .unwrap();
    session.warm_up();
    session.dispatch();

    let summary = session.summary();
    assert_eq!(summary.last_event_time, 1000);
    assert_eq!(summary.pnl, 0.0);
    assert_eq!(summary.nop, 0.0);
    assert_eq!(summary.stdout_line(), "lastEventTime:1000,pnl:0,nop:0");
}

#[test]
fn buy_at_top_full_fill_timing_and_positions() {
    let (summary, log, eur, usd) = run_scripted(
        config(0, 1e9),
        vec![
            tick(0, "EUR/USD", 1.1000, 1.1002),
            tick(10 * NANOS_PER_SEC, "EUR/USD", 1.1000, 1.1002),
        ],
        vec![(NANOS_PER_SEC, Side::Buy, 1.1002, 500_000.0)],
    );

    // send at 1s, ack after the 1 ms inbound delay, fill and terminal
    // status after the further 1 ms outbound delay, fill first.
    let expected_ack = 1_001_000_000;
    let expected_fill = 1_002_000_000;
    assert_eq!(log[0], (NANOS_PER_SEC, "send:1".to_owned()));
    assert_eq!(log[1], (expected_ack, "ack:1".to_owned()));
    assert_eq!(
        log[2],
        (expected_fill, "fill:1:500000.0:-550100.0".to_owned())
    );
    assert_eq!(log[3], (expected_fill, "term:1:Done".to_owned()));

    assert!((eur - 500_000.0).abs() < 1e-9);
    assert!((usd + 550_100.0).abs() < 1e-4);

    // dealt and contra cancel out at the matched price
    assert!((eur + usd / 1.1002).abs() < 1e-4);

    assert_eq!(summary.last_event_time, 10 * NANOS_PER_SEC);
    assert!((summary.pnl - (500_000.0 * 1.1001 - 550_100.0)).abs() < 1e-4);
    assert!((summary.nop - 550_100.0).abs() < 1e-3);
}

#[test]
fn buy_above_market_misses() {
    let (_, log, eur, usd) = run_scripted(
        config(0, 1e9),
        vec![
            tick(0, "EUR/USD", 1.1000, 1.1002),
            tick(10 * NANOS_PER_SEC, "EUR/USD", 1.1000, 1.1002),
        ],
        vec![(NANOS_PER_SEC, Side::Buy, 1.0900, 500_000.0)],
    );

    // Done without a fill, delivered at ack + outbound delay.
    assert_eq!(log[1], (1_001_000_000, "ack:1".to_owned()));
    assert_eq!(log[2], (1_002_000_000, "term:1:Done".to_owned()));
    assert!(!log.iter().any(|(_, e)| e.starts_with("fill")));
    assert_eq!(eur, 0.0);
    assert_eq!(usd, 0.0);
}

#[test]
fn min_order_gap_throttles_second_order() {
    let (_, log, eur, _) = run_scripted(
        config(10 * NANOS_PER_SEC, 1e9),
        vec![
            tick(0, "EUR/USD", 1.1000, 1.1002),
            tick(40 * NANOS_PER_SEC, "EUR/USD", 1.1000, 1.1002),
        ],
        vec![
            (15 * NANOS_PER_SEC, Side::Buy, 1.1002, 100.0),
            (20 * NANOS_PER_SEC, Side::Buy, 1.1002, 100.0),
        ],
    );

    let fills: Vec<&String> = log
        .iter()
        .map(|(_, e)| e)
        .filter(|e| e.starts_with("fill"))
        .collect();
    assert_eq!(fills.len(), 1, "only the first order may fill");
    assert!(fills[0].starts_with("fill:1"));

    assert!(log
        .iter()
        .any(|(_, e)| e == "term:2:InternalReject"));
    // Position reflects the first order only.
    assert!((eur - 100.0).abs() < 1e-9);
}

#[test]
fn nop_cap_rejects_increasing_trade() {
    let (_, log, eur, usd) = run_scripted(
        config(0, 100.0),
        vec![
            tick(0, "EUR/USD", 1.1000, 1.1002),
            tick(30 * NANOS_PER_SEC, "EUR/USD", 1.1000, 1.1002),
        ],
        vec![(NANOS_PER_SEC, Side::Buy, 1.1002, 200.0)],
    );

    assert!(log.iter().any(|(_, e)| e == "term:1:InternalReject"));
    assert!(!log.iter().any(|(_, e)| e.starts_with("fill")));
    assert_eq!(eur, 0.0);
    assert_eq!(usd, 0.0);
}

#[test]
fn zero_qty_order_is_internally_rejected() {
    let (_, log, eur, _) = run_scripted(
        config(0, 1e9),
        vec![
            tick(0, "EUR/USD", 1.1000, 1.1002),
            tick(10 * NANOS_PER_SEC, "EUR/USD", 1.1000, 1.1002),
        ],
        vec![(NANOS_PER_SEC, Side::Buy, 1.1002, 0.0)],
    );

    assert!(log.iter().any(|(_, e)| e == "term:1:InternalReject"));
    assert!(!log.iter().any(|(_, e)| e.starts_with("fill")));
    assert_eq!(eur, 0.0);
}

#[test]
fn stop_co_scheduled_with_fill_runs_fill_first() {
    // The last market-data batch lands exactly at the fill delivery time, so
    // source exhaustion schedules the stop at that same instant. The stop's
    // maximum tie-break id orders it after the fill and terminal events.
    let (summary, log, eur, _) = run_scripted(
        config(0, 1e9),
        vec![
            tick(0, "EUR/USD", 1.1000, 1.1002),
            tick(1_002_000_000, "EUR/USD", 1.1000, 1.1002),
        ],
        vec![(NANOS_PER_SEC, Side::Buy, 1.1002, 500_000.0)],
    );

    assert!(log
        .iter()
        .any(|(at, e)| *at == 1_002_000_000 && e.starts_with("fill:1")));
    assert!(log
        .iter()
        .any(|(at, e)| *at == 1_002_000_000 && e == "term:1:Done"));
    assert!((eur - 500_000.0).abs() < 1e-9);
    assert_eq!(summary.last_event_time, 1_002_000_000);
}

#[test]
fn fanout_keeps_cache_current_before_strategy_callbacks() {
    // Strategy registered behind the cache: when its quote callback runs,
    // the cache must already hold the record being delivered.
    struct CoherenceProbe {
        observations: Rc<RefCell<Vec<(String, bool)>>>,
        batch_ends: Rc<RefCell<usize>>,
    }

    impl Strategy for CoherenceProbe {
        fn on_quote(&mut self, ctx: &mut StrategyContext, symbol: &str, book: &TopOfBook) {
            let cached = ctx.book(symbol).copied();
            let coherent = cached.map(|c| c == *book).unwrap_or(false);
            self.observations
                .borrow_mut()
                .push((symbol.to_owned(), coherent));
        }

        fn on_quote_batch_end(&mut self, _ctx: &mut StrategyContext) {
            *self.batch_ends.borrow_mut() += 1;
        }

        fn name(&self) -> &str {
            "coherence_probe"
        }
    }

    let observations = Rc::new(RefCell::new(Vec::new()));
    let batch_ends = Rc::new(RefCell::new(0));

    let mut session = Session::new(SimConfig::default());
    session
        .add_quotes(vec![
            tick(1000, "EUR/USD", 1.1000, 1.1002),
            tick(2000, "EUR/USD", 1.1004, 1.1006),
            tick(2000, "USD/JPY", 150.00, 150.10),
        ])
        .unwrap();
    session.warm_up();
    session.attach_strategy(Box::new(CoherenceProbe {
        observations: observations.clone(),
        batch_ends: batch_ends.clone(),
    }));
    session.dispatch();

    let seen = observations.borrow();
    // Retroactive notify of the warm-up topic, then the live batch; a
    // topic's first appearance delivers its notify plus the publish.
    assert_eq!(
        seen.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
        vec!["EUR/USD", "EUR/USD", "USD/JPY", "USD/JPY"]
    );
    assert!(
        seen.iter().all(|(_, coherent)| *coherent),
        "every callback must observe a cache-consistent record"
    );
    // One live batch produced exactly one boundary for the strategy.
    assert_eq!(*batch_ends.borrow(), 1);
}

#[test]
fn positions_become_visible_only_at_outbound_delivery() {
    // Probe the portfolio from the ack callback (before the outbound delay)
    // and from the fill callback (at delivery).
    struct VisibilityProbe {
        at_ack: Rc<RefCell<Option<f64>>>,
        at_fill: Rc<RefCell<Option<f64>>>,
        sender: Option<fxsim::OrderSender>,
    }

    impl Strategy for VisibilityProbe {
        fn on_start(&mut self, ctx: &mut StrategyContext) {
            self.sender = Some(ctx.order_sender("EUR/USD").unwrap());
            ctx.schedule_timer(NANOS_PER_SEC - ctx.now());
        }

        fn on_timer(&mut self, ctx: &mut StrategyContext, _timer_id: u64) {
            let sender = self.sender.unwrap();
            ctx.send_order(sender, Side::Buy, 1.1002, 1000.0, Tif::Ioc);
        }

        fn on_order_ack(&mut self, ctx: &mut StrategyContext, _symbol: &str, _order: &fxsim::Order) {
            *self.at_ack.borrow_mut() = Some(ctx.position("EUR"));
        }

        fn on_fill(
            &mut self,
            ctx: &mut StrategyContext,
            _symbol: &str,
            _order_id: u64,
            _dealt: f64,
            _contra: f64,
        ) {
            *self.at_fill.borrow_mut() = Some(ctx.position("EUR"));
        }

        fn name(&self) -> &str {
            "visibility_probe"
        }
    }

    let at_ack = Rc::new(RefCell::new(None));
    let at_fill = Rc::new(RefCell::new(None));

    let mut session = Session::new(config(0, 1e9));
    session
        .add_quotes(vec![
            tick(0, "EUR/USD", 1.1000, 1.1002),
            tick(10 * NANOS_PER_SEC, "EUR/USD", 1.1000, 1.1002),
        ])
        .unwrap();
    session.warm_up();
    session.attach_strategy(Box::new(VisibilityProbe {
        at_ack: at_ack.clone(),
        at_fill: at_fill.clone(),
        sender: None,
    }));
    session.dispatch();

    assert_eq!(*at_ack.borrow(), Some(0.0), "no position at ack time");
    assert_eq!(*at_fill.borrow(), Some(1000.0), "position committed at delivery");
}

#[test]
fn position_batch_delivers_both_legs_before_boundary() {
    struct BatchProbe {
        at_boundary: Rc<RefCell<Vec<(f64, f64)>>>,
        sender: Option<fxsim::OrderSender>,
    }

    impl Strategy for BatchProbe {
        fn on_start(&mut self, ctx: &mut StrategyContext) {
            self.sender = Some(ctx.order_sender("EUR/USD").unwrap());
            ctx.schedule_timer(NANOS_PER_SEC - ctx.now());
        }

        fn on_timer(&mut self, ctx: &mut StrategyContext, _timer_id: u64) {
            let sender = self.sender.unwrap();
            ctx.send_order(sender, Side::Buy, 1.1002, 1000.0, Tif::Ioc);
        }

        fn on_position_batch_end(&mut self, ctx: &mut StrategyContext) {
            self.at_boundary
                .borrow_mut()
                .push((ctx.position("EUR"), ctx.position("USD")));
        }

        fn name(&self) -> &str {
            "batch_probe"
        }
    }

    let at_boundary = Rc::new(RefCell::new(Vec::new()));
    let mut session = Session::new(config(0, 1e9));
    session
        .add_quotes(vec![
            tick(0, "EUR/USD", 1.1000, 1.1002),
            tick(10 * NANOS_PER_SEC, "EUR/USD", 1.1000, 1.1002),
        ])
        .unwrap();
    session.warm_up();
    session.attach_strategy(Box::new(BatchProbe {
        at_boundary: at_boundary.clone(),
        sender: None,
    }));
    session.dispatch();

    // Exactly one fill batch, with both legs already applied.
    let boundaries = at_boundary.borrow();
    assert_eq!(boundaries.len(), 1);
    let (eur, usd) = boundaries[0];
    assert!((eur - 1000.0).abs() < 1e-9);
    assert!((usd + 1000.0 * 1.1002).abs() < 1e-6);
}
