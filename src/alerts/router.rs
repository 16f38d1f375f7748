// =============================================================================
// AlertRouter — de-dup, cooldown, micro-batching, retrying delivery
// =============================================================================
//
// Mirrors the teacher's periodic-checker-loop idiom (exit/monitor.rs): a
// background task wakes on a short interval, collects the mutations it needs
// to make under a lock, then performs I/O after releasing it.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::ConfigError;
use crate::types::Market;

use super::kinds::{AlertKind, AlertRequest, ParseMode};
use super::sink::{AlertSink, SinkOutcome};

const MAX_QUEUE_LEN: usize = 1_000;
const BATCH_DEADLINE: Duration = Duration::from_millis(300);
const BATCH_SIZE_TRIGGER: usize = 3;
const RETRY_DELAYS: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

/// Every topic_key the system can ever produce. Validated against the
/// supplied channel map at startup; an unknown key is fatal (SPEC_FULL.md §6).
fn canonical_topics() -> Vec<String> {
    let mut topics = vec![
        "mega_events".to_string(),
        "liquidations".to_string(),
        "digest_15m".to_string(),
        "digest_30m".to_string(),
        "digest_60m".to_string(),
        "system".to_string(),
    ];
    for market in Market::all() {
        topics.push(format!("confirmed_walls_{}", market.as_str()));
        for side in ["bid", "ask"] {
            topics.push(format!("walls_{}_{}", market.as_str(), side));
        }
        for side in ["buy", "sell"] {
            topics.push(format!("large_trades_{}_{}", market.as_str(), side));
        }
    }
    topics
}

pub struct AlertRouter {
    sink: Arc<dyn AlertSink>,
    channel_map: HashMap<String, String>,
    queues: Mutex<HashMap<(AlertKind, String), VecDeque<AlertRequest>>>,
    cooldowns: Mutex<HashMap<String, Instant>>,
    dropped: AtomicU64,
}

impl AlertRouter {
    /// `channel_map` resolves every canonical topic_key to a concrete sink
    /// channel handle. Missing entries abort startup.
    pub fn new(sink: Arc<dyn AlertSink>, channel_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        for topic in canonical_topics() {
            if !channel_map.contains_key(&topic) {
                return Err(ConfigError::InvalidValue {
                    field: "channel_map".to_string(),
                    reason: format!("no channel handle configured for topic '{topic}'"),
                });
            }
        }
        Ok(Self {
            sink,
            channel_map,
            queues: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue a request. Drops it silently (but counted) if within the
    /// fingerprint's cooldown window, or if the destination queue is full.
    pub fn submit(&self, request: AlertRequest) {
        {
            let mut cooldowns = self.cooldowns.lock();
            if let Some(last_sent_at) = cooldowns.get(&request.fingerprint) {
                if last_sent_at.elapsed() < request.kind.cooldown() {
                    return;
                }
            }
            cooldowns.insert(request.fingerprint.clone(), Instant::now());
        }

        let key = (request.kind, request.channel().to_string());
        let mut queues = self.queues.lock();
        let queue = queues.entry(key).or_default();
        if queue.len() >= MAX_QUEUE_LEN {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(request);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Collect every queue whose flush trigger has fired. Holds the lock
    /// only long enough to drain; never across the subsequent sink calls.
    fn drain_ready(&self) -> Vec<((AlertKind, String), Vec<AlertRequest>)> {
        let mut queues = self.queues.lock();
        let keys: Vec<(AlertKind, String)> = queues.keys().cloned().collect();
        let mut ready = Vec::new();

        for key in keys {
            let should_flush = match queues.get(&key) {
                Some(q) => match q.front() {
                    None => false,
                    Some(first) => q.len() > BATCH_SIZE_TRIGGER || first.produced_at.elapsed() >= BATCH_DEADLINE,
                },
                None => false,
            };
            if should_flush {
                if let Some(q) = queues.get_mut(&key) {
                    let batch: Vec<AlertRequest> = q.drain(..).collect();
                    if !batch.is_empty() {
                        ready.push((key, batch));
                    }
                }
            }
        }
        ready
    }

    /// Background flusher. Runs for the life of the process; intended to be
    /// spawned once as its own task (SPEC_FULL.md §5).
    pub async fn run_flusher(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(50));
        loop {
            interval.tick().await;
            for ((_kind, channel), batch) in self.drain_ready() {
                self.deliver_batch(&channel, batch).await;
            }
        }
    }

    /// Unconditionally drain and deliver every pending queue, ignoring the
    /// usual size/deadline triggers. Called once at shutdown so operator
    /// termination doesn't silently drop in-flight alerts (SPEC_FULL.md §5).
    pub async fn flush_all(&self) {
        let batches: Vec<((AlertKind, String), Vec<AlertRequest>)> = {
            let mut queues = self.queues.lock();
            queues
                .drain()
                .filter(|(_, q)| !q.is_empty())
                .map(|(key, q)| (key, q.into_iter().collect()))
                .collect()
        };
        for ((_kind, channel), batch) in batches {
            self.deliver_batch(&channel, batch).await;
        }
    }

    async fn deliver_batch(&self, topic_key: &str, batch: Vec<AlertRequest>) {
        if batch.is_empty() {
            return;
        }
        let text = if batch.len() > 1 {
            batch.iter().map(|r| r.text.as_str()).collect::<Vec<_>>().join("\n\n")
        } else {
            batch[0].text.clone()
        };
        let handle = match self.channel_map.get(topic_key) {
            Some(h) => h.clone(),
            None => {
                warn!(topic_key, "no channel handle for topic at delivery time, dropping batch");
                return;
            }
        };
        self.deliver_with_retry(&handle, &text).await;
    }

    async fn deliver_with_retry(&self, channel: &str, text: &str) {
        let mut attempt = 0usize;
        loop {
            match self.sink.send(channel, text, ParseMode::PlainText).await {
                SinkOutcome::Sent => return,
                SinkOutcome::Permanent(reason) => {
                    warn!(channel, reason, "alert delivery failed permanently, dropping");
                    return;
                }
                SinkOutcome::Transient(reason) => {
                    if attempt >= RETRY_DELAYS.len() {
                        warn!(channel, reason, attempt, "alert delivery exhausted retries, dropping");
                        return;
                    }
                    warn!(channel, reason, attempt, "alert delivery transient failure, retrying");
                    tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AlertSink for CountingSink {
        async fn send(&self, _channel: &str, _text: &str, _parse_mode: ParseMode) -> SinkOutcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            SinkOutcome::Sent
        }
    }

    fn full_channel_map() -> HashMap<String, String> {
        canonical_topics().into_iter().map(|t| (t.clone(), t)).collect()
    }

    #[test]
    fn rejects_incomplete_channel_map() {
        let sink = Arc::new(CountingSink { calls: AtomicUsize::new(0) });
        let err = AlertRouter::new(sink, HashMap::new());
        assert!(err.is_err());
    }

    #[test]
    fn dedups_within_cooldown() {
        let sink = Arc::new(CountingSink { calls: AtomicUsize::new(0) });
        let router = AlertRouter::new(sink, full_channel_map()).unwrap();
        router.submit(AlertRequest::new(AlertKind::WallNew, "walls_futures_bid", "fp-1", "first"));
        router.submit(AlertRequest::new(AlertKind::WallNew, "walls_futures_bid", "fp-1", "second"));
        let queues = router.queues.lock();
        let q = queues.get(&(AlertKind::WallNew, "walls_futures_bid".to_string())).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn batches_flush_past_size_trigger() {
        let sink = Arc::new(CountingSink { calls: AtomicUsize::new(0) });
        let router = Arc::new(AlertRouter::new(sink.clone(), full_channel_map()).unwrap());
        for i in 0..5 {
            router.submit(AlertRequest::new(AlertKind::WallNew, "walls_spot_ask", format!("fp-{i}"), "x"));
        }
        let ready = router.drain_ready();
        assert_eq!(ready.len(), 1);
        let (_, batch) = &ready[0];
        assert_eq!(batch.len(), 5);
    }
}
