use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{error, Level};

use tracing_mongo_sink::config::MongoTargetConfig;
use tracing_mongo_sink::init::{init_tracing_with_config, LayerConfig};
use tracing_mongo_sink::memory::MemoryConnector;
use tracing_mongo_sink::target::MongoTarget;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = MemoryConnector::new();
    let mut config = MongoTargetConfig::for_process(Some("custom_load"));
    config.use_formatted_message = true;
    config.capped_collection_max_items = Some(50_000);
    let target = Arc::new(MongoTarget::with_connector(config, Arc::new(store.clone())));

    let layer_config = LayerConfig {
        channel_buffer: 50_000,
        batch_size: 1_000,
        flush_interval: Duration::from_millis(200),
        min_level: Level::ERROR,
        capture_stack_trace: false,
        enable_stdout: false,
    };

    init_tracing_with_config(target.clone(), layer_config)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(arg0 = i, "custom load test error {{0}}");
    }

    let elapsed = start.elapsed();
    println!("custom config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    sleep(Duration::from_secs(2)).await;
    println!(
        "stored {} documents in {} insert calls, {} failed writes",
        store.documents("logs", "custom_load").len(),
        store.insert_calls(),
        target.failed_writes()
    );
    Ok(())
}
