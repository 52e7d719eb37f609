use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use tracing_mongo_sink::backend::{make_target_from_config, parse_dsn};
use tracing_mongo_sink::env::{env_or, LOG_SINK_MONGO_URL_ENV};
use tracing_mongo_sink::init::{init_tracing, process_config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1) Point this DSN to your MongoDB instance.
    let dsn = env_or(LOG_SINK_MONGO_URL_ENV, "mongodb://127.0.0.1:27017");

    // 2) Build the target and install the tracing layer. The collection
    //    is created on the first write.
    let cfg = parse_dsn(&dsn, process_config())?;
    let target = make_target_from_config(&cfg)?;
    init_tracing(Arc::clone(&target))?;

    // 3) Emit some events.
    info!("service started");
    error!(arg0 = 123, order_id = 123, "order {{0}} failed");

    // Give the background task a bit of time to flush into MongoDB.
    sleep(Duration::from_secs(2)).await;

    if let Some(err) = target.repository().provisioning_error() {
        eprintln!("log collection unavailable: {}", err);
    }
    Ok(())
}
