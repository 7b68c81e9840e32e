use cadence_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointStore, InMemoryCheckpointStore,
};
use serde_json::json;
use std::collections::HashMap;

fn channels(marker: &str) -> HashMap<String, serde_json::Value> {
    [("messages".to_string(), json!([marker]))].into()
}

#[tokio::test]
async fn test_list_preserves_insertion_order() -> anyhow::Result<()> {
    let store = InMemoryCheckpointStore::new();
    let config = CheckpointConfig::new("t1");

    let mut parent: Option<String> = None;
    for step in 0..5 {
        let checkpoint = match &parent {
            None => Checkpoint::new(channels(&step.to_string())),
            Some(p) => Checkpoint::child_of(p.clone(), channels(&step.to_string())),
        };
        parent = Some(checkpoint.id.clone());
        store
            .put(&config, checkpoint, CheckpointMetadata::loop_step(step), vec![])
            .await?;
    }

    let listed = store.list("t1", "").await?;
    assert_eq!(listed.len(), 5);
    let steps: Vec<i64> = listed.iter().filter_map(|t| t.metadata.step).collect();
    assert_eq!(steps, vec![0, 1, 2, 3, 4]);

    // Parent pointers chain back through the insertion order.
    for pair in listed.windows(2) {
        assert_eq!(
            pair[1].checkpoint.parent_id.as_deref(),
            Some(pair[0].checkpoint.id.as_str())
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_concurrent_puts_to_distinct_threads() {
    let store = InMemoryCheckpointStore::new();

    let mut handles = Vec::new();
    for thread in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let config = CheckpointConfig::new(format!("t{thread}"));
            for step in 0..10 {
                store
                    .put(
                        &config,
                        Checkpoint::new(channels("x")),
                        CheckpointMetadata::loop_step(step),
                        vec![],
                    )
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.checkpoint_count().await, 80);
    for thread in 0..8 {
        let listed = store.list(&format!("t{thread}"), "").await.unwrap();
        assert_eq!(listed.len(), 10);
    }
}

#[tokio::test]
async fn test_get_latest_on_fresh_thread_is_none() {
    let store = InMemoryCheckpointStore::new();
    assert!(store.get_latest("nope", "").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_tuple_by_id_after_later_writes() {
    let store = InMemoryCheckpointStore::new();
    let config = CheckpointConfig::new("t1");

    let first = Checkpoint::new(channels("first"));
    let first_id = first.id.clone();
    store
        .put(&config, first, CheckpointMetadata::loop_step(0), vec![])
        .await
        .unwrap();
    store
        .put(
            &config,
            Checkpoint::child_of(first_id.clone(), channels("second")),
            CheckpointMetadata::loop_step(1),
            vec![],
        )
        .await
        .unwrap();

    let addressed = config.with_checkpoint_id(first_id);
    let tuple = store.get_tuple(&addressed).await.unwrap().unwrap();
    assert_eq!(tuple.checkpoint.channel("messages"), Some(&json!(["first"])));
}
