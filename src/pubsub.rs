//! Pub/Sub Dispatch Fabric
//!
//! Single-owner fan-out fabric for one record kind. A `Hub` owns every
//! participant as plain table entries addressed by integer handles:
//!
//! - a *channel* is a fan-in from one producer to one subscriber; it owns
//!   one publisher entry per topic and a got-updates bit that gates batch
//!   boundaries;
//! - a *proxy* is a subscriber that fans each topic out to an ordered list
//!   of downstream channels, with retroactive entry creation for
//!   registrations that arrive after topics are already known;
//! - external subscribers (caches, the strategy) are *sinks*, reached
//!   through a `RecordSink` context passed into every mutating call, so the
//!   fabric never stores pointers back into caller-owned state.
//!
//! Two independent instantiations flow through the simulator: top-of-book
//! records keyed by symbol and position records keyed by asset.
//!
//! # Topic handshake
//!
//! The first `create_entry` for a (channel, topic) pair creates the entry
//! with an installed no-op callback and notifies the channel's subscriber
//! within that same call; the subscriber's real callback is installed before
//! the call returns. Every later `publish` on the entry invokes the
//! installed callback directly and marks the channel updated. `end_batch`
//! forwards a batch boundary only when at least one publish fired since the
//! previous boundary.

use std::collections::{BTreeMap, HashMap};

/// Topic key: a symbol for market data, an asset for positions.
pub type Topic = String;

/// Handle of an external subscriber, resolved by the caller's `RecordSink`.
pub type SinkId = usize;

/// Handle of a channel inside a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub usize);

/// Handle of a proxy inside a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyId(pub usize);

/// Handle of a publisher entry inside a hub. At most one exists per
/// (channel, topic) pair; it is created once and reused for all updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub usize);

/// Who receives `notify` / `end_of_batch` from a channel.
#[derive(Debug, Clone, Copy)]
pub enum SubscriberOf {
    Proxy(ProxyId),
    Sink(SinkId),
}

/// Per-topic callback installed on a publisher entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Callback {
    /// Installed at entry creation; discards updates but still marks the
    /// channel updated.
    Nop,
    /// Re-publish on every downstream entry the proxy holds for the topic.
    Fanout(ProxyId),
    /// Deliver to an external subscriber.
    Sink(SinkId),
}

/// Context through which the hub reaches external subscribers.
pub trait RecordSink<R> {
    /// First appearance of a (channel, topic) pair on a sink-subscribed
    /// channel.
    fn on_notify(&mut self, sink: SinkId, topic: &str, record: &R);

    /// A publish on an entry whose callback targets `sink`.
    fn on_record(&mut self, sink: SinkId, topic: &str, record: &R);

    /// Batch boundary on a sink-subscribed channel that saw updates.
    fn on_batch_end(&mut self, sink: SinkId);
}

struct EntryState<R> {
    channel: ChannelId,
    topic: Topic,
    last: Option<R>,
    callback: Callback,
}

struct Channel {
    subscriber: SubscriberOf,
    entries: HashMap<Topic, EntryId>,
    got_updates: bool,
}

struct ProxyTopic {
    topic: Topic,
    upstream: EntryId,
    /// Downstream entries in downstream registration order.
    entries: Vec<EntryId>,
}

struct ProxyState {
    downstreams: Vec<ChannelId>,
    /// Topics in first-seen order.
    topics: Vec<ProxyTopic>,
    topic_index: HashMap<Topic, usize>,
}

/// Dispatcher-owned table of channels, entries, and proxies for one record
/// kind.
pub struct Hub<R> {
    channels: Vec<Channel>,
    entries: Vec<EntryState<R>>,
    proxies: Vec<ProxyState>,
}

impl<R: Clone> Hub<R> {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            entries: Vec::new(),
            proxies: Vec::new(),
        }
    }

    /// Create a channel delivering to `subscriber`.
    pub fn add_channel(&mut self, subscriber: SubscriberOf) -> ChannelId {
        self.channels.push(Channel {
            subscriber,
            entries: HashMap::new(),
            got_updates: false,
        });
        ChannelId(self.channels.len() - 1)
    }

    /// Create an empty proxy. Register downstreams with `proxy_add_front` /
    /// `proxy_add_back`.
    pub fn add_proxy(&mut self) -> ProxyId {
        self.proxies.push(ProxyState {
            downstreams: Vec::new(),
            topics: Vec::new(),
            topic_index: HashMap::new(),
        });
        ProxyId(self.proxies.len() - 1)
    }

    /// Publisher entry for `topic` on `channel`, creating it on first use.
    /// Creation runs the topic handshake: the channel's subscriber is
    /// notified synchronously and its callback installed before returning.
    pub fn create_entry(
        &mut self,
        channel: ChannelId,
        topic: &str,
        record: &R,
        sink: &mut dyn RecordSink<R>,
    ) -> EntryId {
        if let Some(&entry) = self.channels[channel.0].entries.get(topic) {
            self.entries[entry.0].last = Some(record.clone());
            return entry;
        }

        self.entries.push(EntryState {
            channel,
            topic: topic.to_owned(),
            last: Some(record.clone()),
            callback: Callback::Nop,
        });
        let entry = EntryId(self.entries.len() - 1);
        self.channels[channel.0]
            .entries
            .insert(topic.to_owned(), entry);

        match self.channels[channel.0].subscriber {
            SubscriberOf::Sink(sink_id) => {
                sink.on_notify(sink_id, topic, record);
                self.entries[entry.0].callback = Callback::Sink(sink_id);
            }
            SubscriberOf::Proxy(proxy) => {
                self.proxy_notify(proxy, entry, topic, record, sink);
            }
        }
        entry
    }

    /// Install or replace the callback for `topic` on `channel`, creating
    /// the entry (without a record) if it does not exist yet.
    pub fn subscribe(&mut self, channel: ChannelId, topic: &str, callback: Callback) -> EntryId {
        if let Some(&entry) = self.channels[channel.0].entries.get(topic) {
            self.entries[entry.0].callback = callback;
            return entry;
        }
        self.entries.push(EntryState {
            channel,
            topic: topic.to_owned(),
            last: None,
            callback,
        });
        let entry = EntryId(self.entries.len() - 1);
        self.channels[channel.0]
            .entries
            .insert(topic.to_owned(), entry);
        entry
    }

    /// First appearance of `topic` on a proxy-subscribed channel: create the
    /// per-downstream entries in registration order, remember them, and
    /// subscribe a fan-out callback on the upstream entry.
    fn proxy_notify(
        &mut self,
        proxy: ProxyId,
        upstream: EntryId,
        topic: &str,
        record: &R,
        sink: &mut dyn RecordSink<R>,
    ) {
        if self.proxies[proxy.0].topic_index.contains_key(topic) {
            return;
        }

        let downstreams = self.proxies[proxy.0].downstreams.clone();
        let mut entries = Vec::with_capacity(downstreams.len());
        for downstream in downstreams {
            entries.push(self.create_entry(downstream, topic, record, sink));
        }

        let state = &mut self.proxies[proxy.0];
        state
            .topic_index
            .insert(topic.to_owned(), state.topics.len());
        state.topics.push(ProxyTopic {
            topic: topic.to_owned(),
            upstream,
            entries,
        });

        self.entries[upstream.0].callback = Callback::Fanout(proxy);
    }

    /// Register `downstream` at the head of a proxy's fan-out list.
    pub fn proxy_add_front(
        &mut self,
        proxy: ProxyId,
        downstream: ChannelId,
        sink: &mut dyn RecordSink<R>,
    ) {
        self.proxy_add(proxy, downstream, true, sink);
    }

    /// Register `downstream` at the tail of a proxy's fan-out list.
    pub fn proxy_add_back(
        &mut self,
        proxy: ProxyId,
        downstream: ChannelId,
        sink: &mut dyn RecordSink<R>,
    ) {
        self.proxy_add(proxy, downstream, false, sink);
    }

    /// Registration with retroactive entry creation: every topic the proxy
    /// already knows gets an entry in the new downstream, inserted at the
    /// matching end of the per-topic list, so subsequent fan-out for those
    /// topics behaves as if the downstream had been registered first.
    fn proxy_add(
        &mut self,
        proxy: ProxyId,
        downstream: ChannelId,
        front: bool,
        sink: &mut dyn RecordSink<R>,
    ) {
        if front {
            self.proxies[proxy.0].downstreams.insert(0, downstream);
        } else {
            self.proxies[proxy.0].downstreams.push(downstream);
        }

        for index in 0..self.proxies[proxy.0].topics.len() {
            let topic = self.proxies[proxy.0].topics[index].topic.clone();
            let upstream = self.proxies[proxy.0].topics[index].upstream;
            let Some(record) = self.entries[upstream.0].last.clone() else {
                continue;
            };
            let entry = self.create_entry(downstream, &topic, &record, sink);
            let list = &mut self.proxies[proxy.0].topics[index].entries;
            if front {
                list.insert(0, entry);
            } else {
                list.push(entry);
            }
        }
    }

    /// Re-fire `record` on `entry`: store it as the latest for the topic,
    /// run the installed callback, and mark the owning channel updated.
    pub fn publish(&mut self, entry: EntryId, record: &R, sink: &mut dyn RecordSink<R>) {
        let state = &mut self.entries[entry.0];
        state.last = Some(record.clone());
        let callback = state.callback;
        let channel = state.channel;

        match callback {
            Callback::Nop => {}
            Callback::Sink(sink_id) => {
                let topic = std::mem::take(&mut self.entries[entry.0].topic);
                sink.on_record(sink_id, &topic, record);
                self.entries[entry.0].topic = topic;
            }
            Callback::Fanout(proxy) => {
                let topic = self.entries[entry.0].topic.clone();
                if let Some(&index) = self.proxies[proxy.0].topic_index.get(&topic) {
                    let fanout = self.proxies[proxy.0].topics[index].entries.clone();
                    for downstream_entry in fanout {
                        self.publish(downstream_entry, record, sink);
                    }
                }
            }
        }

        self.channels[channel.0].got_updates = true;
    }

    /// Batch boundary on `channel`. Forwards `end_of_batch` to the
    /// subscriber only when at least one publish fired since the previous
    /// boundary; a proxy subscriber forwards the boundary to every
    /// downstream channel in registration order, each gated by its own bit.
    pub fn end_batch(&mut self, channel: ChannelId, sink: &mut dyn RecordSink<R>) {
        if !std::mem::replace(&mut self.channels[channel.0].got_updates, false) {
            return;
        }
        match self.channels[channel.0].subscriber {
            SubscriberOf::Sink(sink_id) => sink.on_batch_end(sink_id),
            SubscriberOf::Proxy(proxy) => {
                let downstreams = self.proxies[proxy.0].downstreams.clone();
                for downstream in downstreams {
                    self.end_batch(downstream, sink);
                }
            }
        }
    }

    /// Entry handle for `topic` on `channel`, if created.
    pub fn entry(&self, channel: ChannelId, topic: &str) -> Option<EntryId> {
        self.channels[channel.0].entries.get(topic).copied()
    }

    /// Latest record stored on an entry.
    pub fn last_record(&self, entry: EntryId) -> Option<&R> {
        self.entries[entry.0].last.as_ref()
    }
}

impl<R: Clone> Default for Hub<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Passive per-topic cache of the most recent record.
///
/// Registered as a sink on its own channel; the session routes both the
/// first notify and every subsequent publish into `insert`, so `get` always
/// reflects the most recent update. Repeated identical inserts leave the
/// observable state unchanged.
#[derive(Debug, Clone)]
pub struct TopicCache<R> {
    records: BTreeMap<Topic, R>,
}

impl<R> TopicCache<R> {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, topic: &str, record: R) {
        self.records.insert(topic.to_owned(), record);
    }

    pub fn get(&self, topic: &str) -> Option<&R> {
        self.records.get(topic)
    }

    /// Topics in lexicographic order (deterministic iteration).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &R)> {
        self.records.iter().map(|(topic, record)| (topic.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<R> Default for TopicCache<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that records every delivery for assertions.
    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<(SinkId, String, f64)>,
        batch_ends: Vec<SinkId>,
    }

    impl RecordSink<f64> for RecordingSink {
        fn on_notify(&mut self, sink: SinkId, topic: &str, record: &f64) {
            self.calls.push((sink, format!("notify:{}", topic), *record));
        }

        fn on_record(&mut self, sink: SinkId, topic: &str, record: &f64) {
            self.calls.push((sink, topic.to_owned(), *record));
        }

        fn on_batch_end(&mut self, sink: SinkId) {
            self.batch_ends.push(sink);
        }
    }

    fn fanout_hub() -> (Hub<f64>, ChannelId, RecordingSink) {
        // upstream channel -> proxy -> two sink channels (0 front, 1 back)
        let mut hub = Hub::new();
        let mut sink = RecordingSink::default();
        let proxy = hub.add_proxy();
        let upstream = hub.add_channel(SubscriberOf::Proxy(proxy));
        let front = hub.add_channel(SubscriberOf::Sink(0));
        let back = hub.add_channel(SubscriberOf::Sink(1));
        hub.proxy_add_front(proxy, front, &mut sink);
        hub.proxy_add_back(proxy, back, &mut sink);
        (hub, upstream, sink)
    }

    #[test]
    fn test_entry_created_once_per_topic() {
        let mut hub: Hub<f64> = Hub::new();
        let mut sink = RecordingSink::default();
        let ch = hub.add_channel(SubscriberOf::Sink(0));

        let a = hub.create_entry(ch, "EUR/USD", &1.0, &mut sink);
        let b = hub.create_entry(ch, "EUR/USD", &2.0, &mut sink);
        assert_eq!(a, b);
        assert_eq!(hub.last_record(a), Some(&2.0));
        // Only the first creation notifies.
        let notifies = sink.calls.iter().filter(|c| c.1.starts_with("notify")).count();
        assert_eq!(notifies, 1);
    }

    #[test]
    fn test_batch_end_requires_updates() {
        let mut hub: Hub<f64> = Hub::new();
        let mut sink = RecordingSink::default();
        let ch = hub.add_channel(SubscriberOf::Sink(0));
        let entry = hub.create_entry(ch, "EUR/USD", &1.0, &mut sink);

        // No publish since the last boundary: no batch end.
        hub.end_batch(ch, &mut sink);
        assert!(sink.batch_ends.is_empty());

        hub.publish(entry, &1.5, &mut sink);
        hub.end_batch(ch, &mut sink);
        assert_eq!(sink.batch_ends, vec![0]);

        // Bit was cleared; a second boundary without updates is silent.
        hub.end_batch(ch, &mut sink);
        assert_eq!(sink.batch_ends, vec![0]);
    }

    #[test]
    fn test_proxy_fanout_preserves_registration_order() {
        let (mut hub, upstream, mut sink) = fanout_hub();

        let entry = hub.create_entry(upstream, "EUR/USD", &1.0, &mut sink);
        sink.calls.clear();

        hub.publish(entry, &2.0, &mut sink);
        let order: Vec<SinkId> = sink.calls.iter().map(|c| c.0).collect();
        assert_eq!(order, vec![0, 1], "front sink must see the record first");

        hub.end_batch(upstream, &mut sink);
        assert_eq!(sink.batch_ends, vec![0, 1]);
    }

    #[test]
    fn test_late_registration_is_retroactive() {
        let mut hub: Hub<f64> = Hub::new();
        let mut sink = RecordingSink::default();
        let proxy = hub.add_proxy();
        let upstream = hub.add_channel(SubscriberOf::Proxy(proxy));
        let early = hub.add_channel(SubscriberOf::Sink(0));
        hub.proxy_add_back(proxy, early, &mut sink);

        let eur = hub.create_entry(upstream, "EUR/USD", &1.0, &mut sink);
        let jpy = hub.create_entry(upstream, "USD/JPY", &150.0, &mut sink);

        // Register a second downstream after both topics are known.
        let late = hub.add_channel(SubscriberOf::Sink(1));
        hub.proxy_add_back(proxy, late, &mut sink);

        // The late sink was notified of both topics in first-seen order.
        let late_notifies: Vec<&str> = sink
            .calls
            .iter()
            .filter(|c| c.0 == 1)
            .map(|c| c.1.as_str())
            .collect();
        assert_eq!(late_notifies, vec!["notify:EUR/USD", "notify:USD/JPY"]);

        // Subsequent fan-out reaches it like any other downstream.
        sink.calls.clear();
        hub.publish(eur, &1.1, &mut sink);
        hub.publish(jpy, &151.0, &mut sink);
        let late_records: Vec<f64> = sink
            .calls
            .iter()
            .filter(|c| c.0 == 1)
            .map(|c| c.2)
            .collect();
        assert_eq!(late_records, vec![1.1, 151.0]);
    }

    #[test]
    fn test_front_registration_goes_first_for_existing_topics() {
        let mut hub: Hub<f64> = Hub::new();
        let mut sink = RecordingSink::default();
        let proxy = hub.add_proxy();
        let upstream = hub.add_channel(SubscriberOf::Proxy(proxy));
        let back = hub.add_channel(SubscriberOf::Sink(1));
        hub.proxy_add_back(proxy, back, &mut sink);

        let entry = hub.create_entry(upstream, "EUR/USD", &1.0, &mut sink);

        let front = hub.add_channel(SubscriberOf::Sink(0));
        hub.proxy_add_front(proxy, front, &mut sink);

        sink.calls.clear();
        hub.publish(entry, &2.0, &mut sink);
        let order: Vec<SinkId> = sink.calls.iter().map(|c| c.0).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_subscribe_replaces_callback() {
        let mut hub: Hub<f64> = Hub::new();
        let mut sink = RecordingSink::default();
        let ch = hub.add_channel(SubscriberOf::Sink(0));
        let entry = hub.create_entry(ch, "EUR/USD", &1.0, &mut sink);

        hub.subscribe(ch, "EUR/USD", Callback::Sink(7));
        sink.calls.clear();
        hub.publish(entry, &2.0, &mut sink);
        assert_eq!(sink.calls, vec![(7, "EUR/USD".to_owned(), 2.0)]);
    }

    #[test]
    fn test_cache_overwrites_and_is_idempotent() {
        let mut cache: TopicCache<f64> = TopicCache::new();
        cache.insert("EUR/USD", 1.0);
        cache.insert("EUR/USD", 1.1);
        assert_eq!(cache.get("EUR/USD"), Some(&1.1));

        cache.insert("EUR/USD", 1.1);
        assert_eq!(cache.get("EUR/USD"), Some(&1.1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("USD/JPY"), None);
    }
}
