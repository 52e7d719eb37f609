use crate::record::{render_template, FieldValue, LogRecord};
use crate::target::MongoTarget;
use chrono::Utc;
use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events emitted by this crate itself are never captured, otherwise a
/// failing insert would log a warning that is then written again.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Prefix of fields carrying positional message parameters: `arg0`,
/// `arg1`, ... fill `{0}`, `{1}`, ... of the message template. Inside
/// `tracing` macros the placeholders are written escaped:
/// `info!(arg0 = 5, "message number {{0}}")`.
pub const ARGUMENT_PREFIX: &str = "arg";

/// `tracing_subscriber` layer that observes events and forwards them to
/// a [`MongoTarget`] via a bounded channel and background task.
///
/// By default this layer captures events with level `INFO` and above and
/// turns them into [`LogRecord`]s. Network I/O is fully decoupled from
/// application threads to minimize impact on request latency.
pub struct MongoLogLayer {
    sender: mpsc::Sender<LogRecord>,
    min_level: Level,
    capture_stack_trace: bool,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued into channel.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full or closed.
    pub dropped_events: Arc<AtomicU64>,
}

impl MongoLogLayer {
    /// Create a new layer and spawn a background task that pulls
    /// [`LogRecord`]s from a bounded channel and writes them to the
    /// provided [`MongoTarget`] in batches.
    ///
    /// Minimal thresholds are enforced for `buffer`, `batch_size` and
    /// `flush_interval` to avoid degenerate configurations. The task ends
    /// after a final flush once the layer is dropped.
    pub fn new(
        target: Arc<MongoTarget>,
        buffer: usize,
        batch_size: usize,
        flush_interval: Duration,
    ) -> (Self, JoinHandle<()>) {
        let buffer = buffer.max(16);
        let batch_size = batch_size.max(1);
        let flush_interval = flush_interval.max(Duration::from_millis(10));

        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer);

        let handle = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(batch_size);
            let mut ticker = interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(record) => {
                            batch.push(record);
                            if batch.len() >= batch_size {
                                write_batch(&target, &mut batch).await;
                            }
                        }
                        None => {
                            write_batch(&target, &mut batch).await;
                            break;
                        }
                    },
                    _ = ticker.tick() => {
                        write_batch(&target, &mut batch).await;
                    }
                }
            }
        });

        (Self {
            sender: tx,
            min_level: Level::INFO,
            capture_stack_trace: false,
            total_events: Arc::new(AtomicU64::new(0)),
            enqueued_events: Arc::new(AtomicU64::new(0)),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }, handle)
    }

    /// Capture events at `level` and more severe.
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    /// Attach a backtrace of the emitting thread to every captured event.
    pub fn with_stack_traces(mut self, enabled: bool) -> Self {
        self.capture_stack_trace = enabled;
        self
    }
}

/// Write and clear the pending batch. Failures are reported by the target
/// and not retried; retry policy belongs to the database driver.
async fn write_batch(target: &MongoTarget, batch: &mut Vec<LogRecord>) {
    if batch.is_empty() {
        return;
    }
    let _ = target.write_batch(batch).await;
    batch.clear();
}

impl<S> Layer<S> for MongoLogLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if *meta.level() > self.min_level || meta.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let template = visitor.message.unwrap_or_default();
        let parameters = positional(visitor.arguments);
        let formatted_message = render_template(&template, &parameters);

        let frame = match (meta.module_path(), meta.file(), meta.line()) {
            (Some(module), Some(file), Some(line)) => Some(format!("{} ({}:{})", module, file, line)),
            (None, Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            (Some(module), _, _) => Some(module.to_string()),
            _ => None,
        };

        let record = LogRecord {
            timestamp: Utc::now(),
            level: meta.level().to_string(),
            logger: meta.target().to_string(),
            stack_trace: self
                .capture_stack_trace
                .then(|| Backtrace::force_capture().to_string()),
            frame,
            frame_number: 0,
            error: visitor.error,
            template,
            parameters,
            formatted_message,
            properties: visitor.properties,
        };

        match self.sender.try_send(record) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

use tracing::field::{Field, Visit};

/// Splits event fields into message template, positional arguments,
/// the first error and the remaining property bag.
#[derive(Default)]
pub struct FieldVisitor {
    pub message: Option<String>,
    pub arguments: BTreeMap<usize, FieldValue>,
    pub error: Option<FieldValue>,
    pub properties: BTreeMap<String, FieldValue>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: FieldValue) {
        let name = field.name();
        if name == "message" {
            self.message = Some(value.to_string());
        } else if let Some(index) = argument_index(name) {
            self.arguments.insert(index, value);
        } else if name.starts_with("log.") {
            // Metadata injected by `tracing-log`, already part of the record.
        } else {
            let name = name.strip_prefix("r#").unwrap_or(name);
            self.properties.insert(name.to_string(), value);
        }
    }
}

/// Lay out arguments by index so `{N}` always refers to `argN`; skipped
/// indexes hold `Null`.
fn positional(arguments: BTreeMap<usize, FieldValue>) -> Vec<FieldValue> {
    let len = arguments.keys().next_back().map_or(0, |last| last + 1);
    let mut parameters = vec![FieldValue::Null; len];
    for (index, value) in arguments {
        parameters[index] = value;
    }
    parameters
}

fn argument_index(name: &str) -> Option<usize> {
    name.strip_prefix(ARGUMENT_PREFIX)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, FieldValue::F64(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, FieldValue::I64(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, FieldValue::U64(value));
    }

    fn record_i128(&mut self, field: &Field, value: i128) {
        let value = i64::try_from(value)
            .map(FieldValue::I64)
            .unwrap_or_else(|_| FieldValue::Text(value.to_string()));
        self.put(field, value);
    }

    fn record_u128(&mut self, field: &Field, value: u128) {
        let value = u64::try_from(value)
            .map(FieldValue::U64)
            .unwrap_or_else(|_| FieldValue::Text(value.to_string()));
        self.put(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, FieldValue::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, FieldValue::Str(value.to_string()));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if self.error.is_none() {
            self.error = Some(FieldValue::from_error(value));
        } else {
            self.put(field, FieldValue::Text(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, FieldValue::Text(format!("{:?}", value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use crate::config::MongoTargetConfig;
    use bson::Bson;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn target(store: &MemoryConnector) -> Arc<MongoTarget> {
        Arc::new(MongoTarget::with_connector(
            MongoTargetConfig::for_process(Some("app")),
            Arc::new(store.clone()),
        ))
    }

    #[test]
    fn argument_fields_are_recognized() {
        assert_eq!(argument_index("arg0"), Some(0));
        assert_eq!(argument_index("arg12"), Some(12));
        assert_eq!(argument_index("arg"), None);
        assert_eq!(argument_index("argument"), None);
        assert_eq!(argument_index("arg+1"), None);
    }

    #[tokio::test]
    async fn events_are_batched_into_the_target() {
        let store = MemoryConnector::new();
        let (layer, handle) = MongoLogLayer::new(target(&store), 64, 100, Duration::from_secs(60));
        let enqueued = layer.enqueued_events.clone();
        let total = layer.total_events.clone();

        let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let io_error: &(dyn std::error::Error + 'static) = &io_error;

        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app::orders", arg0 = 5, order_id = 42, "message number {{0}}");
            tracing::debug!(target: "app::orders", "below the minimum level");
            tracing::error!(target: "app::orders", error = io_error, "write failed");
        });
        // Dropping the subscriber closes the channel and flushes the batch.
        handle.await.unwrap();

        assert_eq!(total.load(Ordering::Relaxed), 3);
        assert_eq!(enqueued.load(Ordering::Relaxed), 2);
        assert_eq!(store.insert_calls(), 1);

        let docs = store.documents("logs", "app");
        assert_eq!(docs.len(), 2);

        let first = &docs[0];
        assert_eq!(first.get_str("logger").unwrap(), "app::orders");
        assert_eq!(first.get_str("lvl").unwrap(), "INFO");
        assert_eq!(
            first.get_array("msg").unwrap(),
            &vec![Bson::String("message number {0}".into()), Bson::Int32(5)]
        );
        assert_eq!(first.get_document("data").unwrap().get_i32("order_id").unwrap(), 42);
        assert!(first.get_str("frame").unwrap().contains("layer.rs"));
        assert!(!first.contains_key("ex"));

        let second = &docs[1];
        assert_eq!(second.get_str("lvl").unwrap(), "ERROR");
        assert_eq!(second.get_document("ex").unwrap().get_str("message").unwrap(), "disk full");
        assert!(!second.contains_key("data"));
    }

    #[tokio::test]
    async fn formatted_mode_renders_arguments() {
        let store = MemoryConnector::new();
        let target = target(&store);
        target.set_use_formatted_message(true);
        let (layer, handle) = MongoLogLayer::new(target, 64, 100, Duration::from_secs(60));

        tracing::subscriber::with_default(Registry::default().with(layer), || {
            tracing::warn!(target: "app", arg0 = "disk", arg1 = 93, "{{0}} usage at {{1}}%");
        });
        handle.await.unwrap();

        let docs = store.documents("logs", "app");
        assert_eq!(docs[0].get_str("msg").unwrap(), "disk usage at 93%");
    }

    #[test]
    fn skipped_argument_indexes_stay_in_place() {
        let mut arguments = BTreeMap::new();
        arguments.insert(0, FieldValue::from("a"));
        arguments.insert(2, FieldValue::from("c"));

        assert_eq!(
            positional(arguments),
            vec![FieldValue::from("a"), FieldValue::Null, FieldValue::from("c")]
        );
        assert!(positional(BTreeMap::new()).is_empty());
    }

    #[tokio::test]
    async fn sparse_arguments_keep_their_positions() {
        let store = MemoryConnector::new();
        let target = target(&store);
        let (layer, handle) = MongoLogLayer::new(target.clone(), 64, 100, Duration::from_secs(60));

        tracing::subscriber::with_default(Registry::default().with(layer), || {
            tracing::warn!(target: "app", arg0 = "a", arg2 = "c", "{{0}}-{{1}}-{{2}}");
        });
        handle.await.unwrap();

        let docs = store.documents("logs", "app");
        assert_eq!(
            docs[0].get_array("msg").unwrap(),
            &vec![
                Bson::String("{0}-{1}-{2}".into()),
                Bson::String("a".into()),
                Bson::Null,
                Bson::String("c".into()),
            ]
        );

        target.set_use_formatted_message(true);
        let (layer, handle) = MongoLogLayer::new(target, 64, 100, Duration::from_secs(60));
        tracing::subscriber::with_default(Registry::default().with(layer), || {
            tracing::warn!(target: "app", arg0 = "a", arg2 = "c", "{{0}}-{{1}}-{{2}}");
        });
        handle.await.unwrap();

        let docs = store.documents("logs", "app");
        assert_eq!(docs[1].get_str("msg").unwrap(), "a--c");
    }

    #[tokio::test]
    async fn min_level_and_stack_traces_are_configurable() {
        let store = MemoryConnector::new();
        let (layer, handle) = MongoLogLayer::new(target(&store), 64, 100, Duration::from_secs(60));
        let layer = layer.with_min_level(Level::ERROR).with_stack_traces(true);

        tracing::subscriber::with_default(Registry::default().with(layer), || {
            tracing::warn!(target: "app", "filtered out");
            tracing::error!(target: "app", "kept");
        });
        handle.await.unwrap();

        let docs = store.documents("logs", "app");
        assert_eq!(docs.len(), 1);
        assert!(docs[0].get_str("trace").is_ok());
    }

    #[tokio::test]
    async fn own_events_are_not_captured() {
        let store = MemoryConnector::new();
        let (layer, handle) = MongoLogLayer::new(target(&store), 64, 100, Duration::from_secs(60));

        tracing::subscriber::with_default(Registry::default().with(layer), || {
            tracing::warn!(target: "tracing_mongo_sink::repository", "internal");
        });
        handle.await.unwrap();

        assert_eq!(store.open_calls(), 0);
    }
}
