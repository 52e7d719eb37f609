use crate::backend::{make_target_from_config, parse_target_definition, BackendBuildError, DefinitionError};
use crate::config::{ConfigError, MongoTargetConfig};
use crate::layer::MongoLogLayer;
use crate::target::MongoTarget;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Конфигурация слоя логирования.
///
/// Управляет размером внутреннего буфера, максимальным размером батча
/// при записи в MongoDB, частотой принудительного flush, минимальным
/// уровнем событий, а также тем, нужно ли дополнительно печатать логи
/// в консоль через `fmt`‑слой.
///
/// **Поля**
/// - `channel_buffer`: максимальное число [`LogRecord`] в очереди до
///   начала дропа новых записей.
/// - `batch_size`: размер батча для одного `insert_many`.
/// - `flush_interval`: максимальный интервал между flush’ами даже при
///   неполном батче.
/// - `min_level`: самый «подробный» уровень, который ещё попадает в БД.
/// - `capture_stack_trace`: прикладывать backtrace к каждому событию.
/// - `enable_stdout`: если `true`, поверх `MongoLogLayer` добавляется
///   `tracing_subscriber::fmt::Layer` и события печатаются в консоль.
///
/// [`LogRecord`]: crate::record::LogRecord
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub channel_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub min_level: Level,
    pub capture_stack_trace: bool,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            batch_size: 128,
            flush_interval: Duration::from_secs(1),
            min_level: Level::INFO,
            capture_stack_trace: false,
            enable_stdout: true,
        }
    }
}

/// Error type returned when installing the global subscriber.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("invalid log target configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid log target definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Build(#[from] BackendBuildError),

    #[error("global tracing subscriber already set: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Initialize global `tracing` subscriber writing to `target` using the
/// provided [`LayerConfig`].
///
/// **Parameters**
/// - `target`: the [`MongoTarget`] that persists captured events.
/// - `config`: [`LayerConfig`] controlling buffering, batching and
///   filtering behavior of the layer.
///
/// **Effects**
///
/// This installs a [`Registry`] combined with [`MongoLogLayer`] as the
/// global default subscriber, so all `tracing` events in the process
/// are observed by the layer. Must be called inside a Tokio runtime.
pub fn init_tracing_with_config(
    target: Arc<MongoTarget>,
    config: LayerConfig,
) -> Result<(), SetGlobalDefaultError> {
    let (layer, _handle) = MongoLogLayer::new(
        target,
        config.channel_buffer,
        config.batch_size,
        config.flush_interval,
    );
    let layer = layer
        .with_min_level(config.min_level)
        .with_stack_traces(config.capture_stack_trace);

    // Всегда подключаем слой, который пишет в MongoDB. Дополнительно, при
    // `enable_stdout = true`, подключаем `fmt`‑слой, чтобы видеть события
    // в консоли. Для совместимости типов собираем subscriber в двух
    // вариантах.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    }
}

/// Initialize tracing with sensible defaults.
///
/// Equivalent to calling [`init_tracing_with_config`] with
/// [`LayerConfig::default`]. This is the recommended entrypoint for
/// typical microservices.
pub fn init_tracing(target: Arc<MongoTarget>) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(target, LayerConfig::default())
}

/// Build a MongoDB target from `LOG_SINK_MONGO_*` environment variables,
/// naming the collection after the current executable by default, and
/// install it with [`init_tracing_with_config`].
#[cfg(feature = "mongodb")]
pub fn init_from_env(config: LayerConfig) -> Result<Arc<MongoTarget>, InitError> {
    let process_name = current_process_name();
    let target_config = MongoTargetConfig::from_env(process_name.as_deref())?;
    let target = Arc::new(MongoTarget::new(target_config));
    init_tracing_with_config(target.clone(), config)?;
    Ok(target)
}

/// Build the target described by a host configuration entry (see
/// [`parse_target_definition`]) and install it with
/// [`init_tracing_with_config`].
pub fn init_from_definition(
    definition: &serde_json::Value,
    config: LayerConfig,
) -> Result<Arc<MongoTarget>, InitError> {
    let backend = parse_target_definition(definition, current_process_name().as_deref())?;
    let target = make_target_from_config(&backend)?;
    init_tracing_with_config(target.clone(), config)?;
    Ok(target)
}

/// File stem of the running executable, used as default collection name.
pub fn current_process_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    exe.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// Collection-name defaults for the current process, without reading the
/// environment.
pub fn process_config() -> MongoTargetConfig {
    MongoTargetConfig::for_process(current_process_name().as_deref())
}
