use std::sync::Arc;

use tokio::time::Duration;
use tracing_mongo_sink::bson::Bson;
use tracing_mongo_sink::config::MongoTargetConfig;
use tracing_mongo_sink::memory::MemoryConnector;
use tracing_mongo_sink::record::LogRecord;
use tracing_mongo_sink::repository::ProvisioningStatus;
use tracing_mongo_sink::store::CollectionOptions;
use tracing_mongo_sink::target::MongoTarget;

fn record(n: i64) -> LogRecord {
    LogRecord::new("tests::pipeline", "INFO", "message number {0}", vec![n.into()])
}

fn target(store: &MemoryConnector, config: MongoTargetConfig) -> Arc<MongoTarget> {
    Arc::new(MongoTarget::with_connector(config, Arc::new(store.clone())))
}

#[tokio::test]
async fn first_write_provisions_capped_collection_and_index() {
    let store = MemoryConnector::new();
    let target = target(&store, MongoTargetConfig::for_process(Some("orders")));

    target.write_one(&record(1)).await.unwrap();

    let collection = store.collection("logs", "orders").unwrap();
    assert_eq!(
        collection.options,
        CollectionOptions {
            capped: true,
            max_size: Some(8 * 1024 * 1024 * 1024),
            max_documents: None,
        }
    );
    assert_eq!(collection.indexes, vec![vec!["logger".to_string(), "lvl".to_string()]]);
    assert_eq!(collection.documents.len(), 1);
}

#[tokio::test]
async fn message_shape_follows_formatting_mode() {
    let store = MemoryConnector::new();
    let target = target(&store, MongoTargetConfig::for_process(Some("orders")));

    target.write_one(&record(5)).await.unwrap();
    target.set_use_formatted_message(true);
    target.write_one(&record(5)).await.unwrap();

    let docs = store.documents("logs", "orders");
    assert_eq!(
        docs[0].get_array("msg").unwrap(),
        &vec![Bson::String("message number {0}".into()), Bson::Int32(5)]
    );
    assert_eq!(docs[1].get_str("msg").unwrap(), "message number 5");
    assert!(docs.iter().all(|d| !d.contains_key("params")));
}

#[tokio::test]
async fn collection_rename_is_provisioned_independently() {
    let store = MemoryConnector::new();
    let target = target(&store, MongoTargetConfig::for_process(Some("orders")));

    target.write_one(&record(1)).await.unwrap();
    target.set_collection_name("payments");
    target.write_one(&record(2)).await.unwrap();

    assert_eq!(store.open_calls(), 2);
    assert_eq!(store.create_calls(), 2);
    assert_eq!(store.documents("logs", "orders").len(), 1);
    assert_eq!(store.documents("logs", "payments").len(), 1);
    assert_eq!(
        store.collection("logs", "payments").unwrap().indexes,
        vec![vec!["logger".to_string(), "lvl".to_string()]]
    );
}

#[tokio::test]
async fn existing_collection_is_reused_after_restart() {
    let store = MemoryConnector::new();
    store.seed_collection("logs", "orders");
    let target = target(&store, MongoTargetConfig::for_process(Some("orders")));

    target.write_batch(&[record(1), record(2)]).await.unwrap();

    assert_eq!(store.create_calls(), 0);
    assert_eq!(store.index_calls(), 0);
    assert_eq!(store.documents("logs", "orders").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_share_one_provisioning() {
    let store = MemoryConnector::new();
    store.set_create_delay(Duration::from_millis(50));
    let target = target(&store, MongoTargetConfig::for_process(Some("orders")));

    let writers: Vec<_> = (0..8)
        .map(|w| {
            let target = target.clone();
            tokio::spawn(async move {
                let batch: Vec<LogRecord> = (0..10).map(|i| record(w * 100 + i)).collect();
                target.write_batch(&batch).await
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    assert_eq!(store.open_calls(), 1);
    assert_eq!(store.create_calls(), 1);
    assert_eq!(store.index_calls(), 1);
    assert_eq!(store.insert_calls(), 8);

    // Each batch lands contiguously and in order.
    let docs = store.documents("logs", "orders");
    assert_eq!(docs.len(), 80);
    for chunk in docs.chunks(10) {
        let numbers: Vec<i32> = chunk
            .iter()
            .map(|d| d.get_array("msg").unwrap()[1].as_i32().unwrap())
            .collect();
        let first = numbers[0];
        assert_eq!(numbers, (first..first + 10).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn failed_provisioning_is_sticky_until_reconfigured() {
    let store = MemoryConnector::new();
    let target = target(&store, MongoTargetConfig::for_process(Some("orders")));
    store.fail_open("authentication failed");

    for n in 0..5 {
        target.write_one(&record(n)).await.unwrap();
    }
    assert_eq!(target.repository().status(), ProvisioningStatus::Failed);
    assert_eq!(store.open_calls(), 1);
    assert_eq!(store.insert_calls(), 0);

    store.clear_failures();
    target.set_connection_string("mongodb://replacement");
    target.write_one(&record(6)).await.unwrap();

    assert_eq!(target.repository().status(), ProvisioningStatus::Ready);
    assert_eq!(store.open_calls(), 2);
    assert_eq!(store.documents("logs", "orders").len(), 1);
}

#[tokio::test]
async fn empty_collection_name_disables_writes() {
    let store = MemoryConnector::new();
    let mut config = MongoTargetConfig::for_process(Some("orders"));
    config.collection_name = String::new();
    let target = target(&store, config);

    target.write_one(&record(1)).await.unwrap();

    assert_eq!(target.repository().status(), ProvisioningStatus::Failed);
    assert_eq!(
        target.repository().provisioning_error().map(|e| e.to_string()),
        Some("collection name must not be empty".to_string())
    );
    assert_eq!(store.open_calls(), 0);
}
