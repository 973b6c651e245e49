//! Market Data Replay
//!
//! Replay sources feed the event loop with time-stamped top-of-book records.
//! A source is a lazy, non-restartable sequence: the loop asks for the next
//! event time, tells the source to dispatch everything sharing that
//! timestamp as one batch, and re-schedules until the source reports
//! exhaustion with `Nanos::MAX`.
//!
//! The canonical input is line-delimited CSV, one record per line, ascending
//! by timestamp:
//!
//! ```text
//! timestamp_ns,symbol,bidSize,bidPrice,askSize,askPrice
//! ```
//!
//! The runner loads and validates the file eagerly so malformed input fails
//! at startup, then replays the loaded records lazily.

use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::clock::Nanos;
use crate::events::{Symbol, TopOfBook};

/// Downstream sink for replayed quotes. One `publish` per record; exactly
/// one `end_batch` after each same-timestamp group.
pub trait QuoteSink {
    fn publish(&mut self, symbol: &str, book: &TopOfBook);
    fn end_batch(&mut self);
}

/// A lazy, non-restartable sequence of timestamped events.
///
/// Implementations must emit all events sharing the head timestamp in one
/// `dispatch_next` call and finish the call with `end_batch`, so downstream
/// consumers observe a coherent batch. Non-decreasing timestamps are a
/// precondition.
pub trait Replayable {
    /// Timestamp of the next event; `Nanos::MAX` when exhausted.
    fn next_event_time(&self) -> Nanos;

    /// Emit the head batch to `out` and advance past it.
    fn dispatch_next(&mut self, out: &mut dyn QuoteSink);

    /// Advance past all events strictly before `ts` without dispatching.
    fn skip(&mut self, ts: Nanos);
}

/// Errors raised while loading market data.
#[derive(Debug)]
pub enum FeedError {
    Io(std::io::Error),
    Parse(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Parse(e) => write!(f, "malformed market data: {}", e),
        }
    }
}

impl std::error::Error for FeedError {}

impl From<std::io::Error> for FeedError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for FeedError {
    fn from(e: csv::Error) -> Self {
        if e.is_io_error() {
            match e.into_kind() {
                csv::ErrorKind::Io(io) => Self::Io(io),
                other => Self::Parse(format!("{:?}", other)),
            }
        } else {
            Self::Parse(e.to_string())
        }
    }
}

/// One loaded market-data record.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRecord {
    pub time: Nanos,
    pub symbol: Symbol,
    pub book: TopOfBook,
}

/// CSV row in file column order.
#[derive(Debug, Deserialize)]
struct QuoteRow {
    timestamp_ns: i64,
    symbol: String,
    bid_size: f64,
    bid_price: f64,
    ask_size: f64,
    ask_price: f64,
}

/// Read quote records from any CSV reader (headerless).
pub fn read_quotes<R: Read>(reader: R) -> Result<Vec<QuoteRecord>, FeedError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for (index, row) in csv_reader.deserialize::<QuoteRow>().enumerate() {
        let row = row.map_err(|e| FeedError::Parse(format!("line {}: {}", index + 1, e)))?;
        if row.timestamp_ns < 0 {
            return Err(FeedError::Parse(format!(
                "line {}: negative timestamp {}",
                index + 1,
                row.timestamp_ns
            )));
        }
        records.push(QuoteRecord {
            time: row.timestamp_ns,
            symbol: row.symbol,
            book: TopOfBook::new(row.bid_size, row.bid_price, row.ask_size, row.ask_price),
        });
    }
    Ok(records)
}

/// Load quote records from a CSV file.
pub fn load_quotes_csv(path: &Path) -> Result<Vec<QuoteRecord>, FeedError> {
    let file = std::fs::File::open(path)?;
    let records = read_quotes(std::io::BufReader::new(file))?;
    info!(
        path = %path.display(),
        records = records.len(),
        "loaded market data"
    );
    Ok(records)
}

/// Replay source over loaded quote records.
pub struct QuoteReplayer {
    records: Vec<QuoteRecord>,
    index: usize,
}

impl QuoteReplayer {
    /// Records must already be in ascending time order (the CSV contract);
    /// this is a precondition, checked only in debug builds.
    pub fn new(records: Vec<QuoteRecord>) -> Self {
        debug_assert!(
            records.windows(2).all(|w| w[0].time <= w[1].time),
            "QuoteReplayer: input records out of order"
        );
        Self { records, index: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.records.len().saturating_sub(self.index)
    }
}

impl Replayable for QuoteReplayer {
    fn next_event_time(&self) -> Nanos {
        self.records
            .get(self.index)
            .map(|r| r.time)
            .unwrap_or(Nanos::MAX)
    }

    fn dispatch_next(&mut self, out: &mut dyn QuoteSink) {
        let start_time = self.next_event_time();
        if start_time == Nanos::MAX {
            return;
        }
        while let Some(record) = self.records.get(self.index) {
            if record.time != start_time {
                break;
            }
            out.publish(&record.symbol, &record.book);
            self.index += 1;
        }
        out.end_batch();
    }

    fn skip(&mut self, ts: Nanos) {
        while self.next_event_time() < ts {
            self.index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: Nanos, symbol: &str, bid: f64, ask: f64) -> QuoteRecord {
        QuoteRecord {
            time,
            symbol: symbol.to_owned(),
            book: TopOfBook::new(1e6, bid, 1e6, ask),
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        published: Vec<(String, f64)>,
        batches: usize,
    }

    impl QuoteSink for CollectingSink {
        fn publish(&mut self, symbol: &str, book: &TopOfBook) {
            self.published.push((symbol.to_owned(), book.bid_price));
        }

        fn end_batch(&mut self) {
            self.batches += 1;
        }
    }

    #[test]
    fn test_read_quotes() {
        let data = "1000,EUR/USD,1000000,1.1000,1000000,1.1002\n\
                    2000,USD/JPY,500000,150.10,500000,150.12\n";
        let records = read_quotes(data.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time, 1000);
        assert_eq!(records[0].symbol, "EUR/USD");
        assert_eq!(records[0].book.ask_price, 1.1002);
        assert_eq!(records[1].symbol, "USD/JPY");
    }

    #[test]
    fn test_read_quotes_rejects_garbage() {
        let data = "1000,EUR/USD,1000000,not-a-price,1000000,1.1002\n";
        let err = read_quotes(data.as_bytes()).unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }

    #[test]
    fn test_read_quotes_rejects_short_rows() {
        let data = "1000,EUR/USD,1000000\n";
        assert!(read_quotes(data.as_bytes()).is_err());
    }

    #[test]
    fn test_read_quotes_rejects_negative_timestamp() {
        let data = "-5,EUR/USD,1,1.0,1,1.1\n";
        let err = read_quotes(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("negative timestamp"));
    }

    #[test]
    fn test_same_timestamp_records_form_one_batch() {
        let mut replayer = QuoteReplayer::new(vec![
            record(1000, "EUR/USD", 1.1000, 1.1002),
            record(1000, "USD/JPY", 150.10, 150.12),
            record(2000, "EUR/USD", 1.1001, 1.1003),
        ]);
        let mut sink = CollectingSink::default();

        assert_eq!(replayer.next_event_time(), 1000);
        replayer.dispatch_next(&mut sink);
        assert_eq!(sink.published.len(), 2);
        assert_eq!(sink.batches, 1);

        assert_eq!(replayer.next_event_time(), 2000);
        replayer.dispatch_next(&mut sink);
        assert_eq!(sink.published.len(), 3);
        assert_eq!(sink.batches, 2);

        assert_eq!(replayer.next_event_time(), Nanos::MAX);
    }

    #[test]
    fn test_skip_drops_strictly_earlier_events() {
        let mut replayer = QuoteReplayer::new(vec![
            record(1000, "EUR/USD", 1.0, 1.1),
            record(2000, "EUR/USD", 1.0, 1.1),
            record(3000, "EUR/USD", 1.0, 1.1),
        ]);
        replayer.skip(2000);
        assert_eq!(replayer.next_event_time(), 2000);
        assert_eq!(replayer.remaining(), 2);

        replayer.skip(9000);
        assert_eq!(replayer.next_event_time(), Nanos::MAX);
    }

    #[test]
    fn test_nan_prices_parse() {
        let data = "1000,EUR/USD,0,NaN,1000000,1.1002\n";
        let records = read_quotes(data.as_bytes()).unwrap();
        assert!(records[0].book.bid_price.is_nan());
        assert_eq!(records[0].book.ask_price, 1.1002);
    }
}
