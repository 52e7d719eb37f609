use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::error;

use tracing_mongo_sink::config::MongoTargetConfig;
use tracing_mongo_sink::init::init_tracing;
use tracing_mongo_sink::memory::MemoryConnector;
use tracing_mongo_sink::target::MongoTarget;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = MemoryConnector::new();
    let target = Arc::new(MongoTarget::with_connector(
        MongoTargetConfig::for_process(Some("default_load")),
        Arc::new(store.clone()),
    ));
    init_tracing(target)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(arg0 = i, "default load test error {{0}}");
    }

    let elapsed = start.elapsed();
    println!("default config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Give background task a little time to drain the channel
    sleep(Duration::from_secs(2)).await;
    println!("stored {} documents", store.documents("logs", "default_load").len());
    Ok(())
}
