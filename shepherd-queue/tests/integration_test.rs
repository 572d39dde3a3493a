//! Integration tests for shepherd-queue

use serde_json::json;
use shepherd_queue::*;
use std::time::Duration;

fn setup(config: QueueConfig) -> (MessageQueue, MemoryStore, ManualClock) {
    let store = MemoryStore::new();
    let clock = ManualClock::starting_now();
    let queue = MessageQueue::with_config(store.clone(), config).with_clock(clock.clone());
    (queue, store, clock)
}

/// Every sub-structure currently holding `id`.
async fn locations(
    queue: &MessageQueue,
    store: &MemoryStore,
    name: &str,
    id: MessageId,
) -> Vec<&'static str> {
    let config = queue.config();
    let holds = |raws: Vec<String>| {
        raws.iter()
            .filter_map(|raw| Message::from_json(raw).ok())
            .any(|message| message.id == id)
    };

    let mut found = Vec::new();
    if holds(store.list_range(&config.pending_key(name), 0, -1).await.unwrap()) {
        found.push("immediate");
    }
    if holds(everything(store, &config.priority_key(name)).await) {
        found.push("priority");
    }
    if holds(everything(store, &config.delayed_key(name)).await) {
        found.push("delayed");
    }
    if store
        .hash_get(&config.processing_key(name), &id.to_string())
        .await
        .unwrap()
        .is_some()
    {
        found.push("processing");
    }
    if holds(store.list_range(&config.dead_letter_key(), 0, -1).await.unwrap()) {
        found.push("dead_letter");
    }
    found
}

async fn everything(store: &MemoryStore, key: &str) -> Vec<String> {
    store
        .sorted_set_range_by_score(key, f64::NEG_INFINITY, f64::INFINITY)
        .await
        .unwrap()
}

async fn delayed_message(queue: &MessageQueue, store: &MemoryStore, name: &str) -> Message {
    let raws = everything(store, &queue.config().delayed_key(name)).await;
    assert_eq!(raws.len(), 1);
    Message::from_json(&raws[0]).unwrap()
}

#[tokio::test]
async fn test_message_lives_in_one_place() {
    let (queue, store, clock) = setup(QueueConfig::default().with_max_retries(1));

    let id = queue
        .publish("jobs", json!(null), PublishOptions::default().with_delay(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(locations(&queue, &store, "jobs", id).await, vec!["delayed"]);

    clock.advance(Duration::from_secs(5));
    let job = queue.consume(&["jobs"], Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(locations(&queue, &store, "jobs", id).await, vec!["processing"]);

    job.reject(true, Some("boom")).await.unwrap();
    assert_eq!(locations(&queue, &store, "jobs", id).await, vec!["dead_letter"]);

    queue.requeue_dead_letter(id).await.unwrap();
    assert_eq!(locations(&queue, &store, "jobs", id).await, vec!["immediate"]);

    let priority_id = queue
        .publish("jobs", json!(null), PublishOptions::default().with_priority(2))
        .await
        .unwrap();
    assert_eq!(locations(&queue, &store, "jobs", priority_id).await, vec!["priority"]);
}

#[tokio::test]
async fn test_retry_ceiling() {
    let (queue, _, clock) = setup(QueueConfig::default().with_max_retries(3));
    let id = queue
        .publish_job("jobs", "flaky", json!({}), PublishOptions::default())
        .await
        .unwrap();

    let mut deliveries = 0;
    loop {
        clock.advance(Duration::from_secs(3600));
        let Some(job) = queue.consume(&["jobs"], Duration::ZERO).await.unwrap() else {
            break;
        };
        assert_eq!(job.id(), id);
        deliveries += 1;
        assert!(job.reject(true, Some("still failing")).await.unwrap());
    }

    assert_eq!(deliveries, 3);
    let dead = queue.dead_letter_messages(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, id);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].dead_letter_reason.as_deref(), Some("Max retries exceeded"));
    assert_eq!(dead[0].last_error.as_deref(), Some("still failing"));
    assert!(dead[0].dead_letter_timestamp.is_some());
}

#[tokio::test]
async fn test_priority_order() {
    let (queue, _, _) = setup(QueueConfig::default());
    for priority in [5, 1, 9] {
        queue
            .publish("jobs", json!(priority), PublishOptions::default().with_priority(priority))
            .await
            .unwrap();
    }

    let mut order = Vec::new();
    for _ in 0..3 {
        let job = queue.consume(&["jobs"], Duration::ZERO).await.unwrap().unwrap();
        order.push(job.payload().as_u64().unwrap());
        job.ack().await.unwrap();
    }
    assert_eq!(order, vec![9, 5, 1]);
}

#[tokio::test]
async fn test_priority_before_fifo_and_earlier_queue_preferred() {
    let (queue, _, _) = setup(QueueConfig::default());
    queue.publish("low", json!("low-fifo"), PublishOptions::default()).await.unwrap();
    queue
        .publish("low", json!("low-prio"), PublishOptions::default().with_priority(9))
        .await
        .unwrap();
    queue
        .publish("high", json!("high-prio"), PublishOptions::default().with_priority(1))
        .await
        .unwrap();

    let queues = ["high", "low"];
    let mut order = Vec::new();
    while let Some(job) = queue.consume(&queues, Duration::ZERO).await.unwrap() {
        order.push(job.payload().as_str().unwrap().to_string());
        job.ack().await.unwrap();
    }
    assert_eq!(order, vec!["high-prio", "low-prio", "low-fifo"]);
}

#[tokio::test]
async fn test_delay_visibility() {
    let (queue, _, clock) = setup(QueueConfig::default());
    let id = queue
        .publish("jobs", json!(null), PublishOptions::default().with_delay(Duration::from_secs(10)))
        .await
        .unwrap();

    clock.advance(Duration::from_secs(9));
    assert!(queue.consume(&["jobs"], Duration::ZERO).await.unwrap().is_none());

    clock.advance(Duration::from_secs(1));
    let job = queue.consume(&["jobs"], Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(job.id(), id);
}

#[tokio::test]
async fn test_backoff_growth() {
    let config = QueueConfig::default()
        .with_max_retries(4)
        .with_base_retry_delay(Duration::from_secs(60));
    let (queue, store, clock) = setup(config);
    queue.publish("jobs", json!(null), PublishOptions::default()).await.unwrap();

    let mut offsets = Vec::new();
    for _ in 0..3 {
        let job = queue.consume(&["jobs"], Duration::ZERO).await.unwrap().unwrap();
        let rejected_at = clock.now();
        job.reject(true, Some("retry me")).await.unwrap();

        let delayed = delayed_message(&queue, &store, "jobs").await;
        offsets.push((delayed.scheduled_for - rejected_at).num_seconds());
        clock.advance(Duration::from_secs(240));
    }
    assert_eq!(offsets, vec![60, 120, 240]);
}

#[tokio::test]
async fn test_ack_idempotence() {
    let (queue, _, _) = setup(QueueConfig::default());
    queue.publish("jobs", json!(null), PublishOptions::default()).await.unwrap();
    let job = queue.consume(&["jobs"], Duration::ZERO).await.unwrap().unwrap();
    let id = job.id();

    job.ack().await.unwrap();
    queue.ack(id, "jobs").await.unwrap();

    let stats = queue.stats("jobs").await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.dead_letter, 0);
    assert!(!queue.reject(id, "jobs", true, None).await.unwrap());
}

#[tokio::test]
async fn test_dead_letter_requeue_round_trip() {
    let (queue, _, _) = setup(QueueConfig::default());
    let id = queue.publish("jobs", json!({"n": 1}), PublishOptions::default()).await.unwrap();
    let job = queue.consume(&["jobs"], Duration::ZERO).await.unwrap().unwrap();
    job.reject(false, Some("No handler registered for job type: resize"))
        .await
        .unwrap();
    assert_eq!(queue.stats("jobs").await.unwrap().dead_letter, 1);

    assert!(queue.requeue_dead_letter(id).await.unwrap());
    assert!(!queue.requeue_dead_letter(id).await.unwrap());

    let job = queue.consume(&["jobs"], Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(job.id(), id);
    assert_eq!(job.queue(), "jobs");
    assert_eq!(job.attempts(), 0);
    assert!(job.message().last_error.is_none());
    assert!(job.message().dead_letter_reason.is_none());
    assert_eq!(queue.stats("jobs").await.unwrap().dead_letter, 0);
}

#[tokio::test]
async fn test_requeue_only_searches_newest_page() {
    let (queue, _, _) = setup(QueueConfig::default().with_dead_letter_page_size(2));
    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(queue.publish("jobs", json!(n), PublishOptions::default()).await.unwrap());
        let job = queue.consume(&["jobs"], Duration::ZERO).await.unwrap().unwrap();
        job.reject(false, None).await.unwrap();
    }

    assert!(!queue.requeue_dead_letter(ids[0]).await.unwrap());
    assert!(queue.requeue_dead_letter(ids[2]).await.unwrap());

    let newest_first: Vec<MessageId> = queue
        .dead_letter_messages(10)
        .await
        .unwrap()
        .iter()
        .map(|message| message.id)
        .collect();
    assert_eq!(newest_first, vec![ids[1], ids[0]]);
}

#[tokio::test(start_paused = true)]
async fn test_fifo_scenario() {
    let (queue, _, _) = setup(QueueConfig::default());
    for n in 1..=5 {
        queue
            .publish("jobs", json!(format!("m{n}")), PublishOptions::default())
            .await
            .unwrap();
    }

    for n in 1..=5 {
        let job = queue.consume(&["jobs"], Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(job.payload(), &json!(format!("m{n}")));
        job.ack().await.unwrap();
    }
    assert!(queue.consume(&["jobs"], Duration::from_secs(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_consume_wakes_for_late_publish() {
    let (queue, _, _) = setup(QueueConfig::default());
    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.consume(&["jobs"], Duration::from_secs(5)).await })
    };
    tokio::task::yield_now().await;
    let id = queue.publish("jobs", json!(null), PublishOptions::default()).await.unwrap();

    let job = consumer.await.unwrap().unwrap().unwrap();
    assert_eq!(job.id(), id);
}

#[tokio::test(start_paused = true)]
async fn test_dead_letter_expires_as_a_whole() {
    let config = QueueConfig::default().with_dead_letter_ttl(Duration::from_secs(60));
    let (queue, store, _) = setup(config);
    queue.publish("jobs", json!(null), PublishOptions::default()).await.unwrap();
    let job = queue.consume(&["jobs"], Duration::ZERO).await.unwrap().unwrap();
    job.reject(false, None).await.unwrap();

    assert_eq!(store.ttl(&queue.config().dead_letter_key()), Some(Duration::from_secs(60)));
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(queue.stats("jobs").await.unwrap().dead_letter, 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_publish_consume() {
    let prefix = format!("shepherd:test:{}", uuid::Uuid::new_v4());
    let queue = MessageQueue::redis(
        shepherd_redis::RedisConfig::default(),
        QueueConfig::default().with_key_prefix(prefix),
    )
    .await
    .unwrap();

    let id = queue
        .publish_job("jobs", "noop", json!({}), PublishOptions::default())
        .await
        .unwrap();
    let job = queue.consume(&["jobs"], Duration::from_secs(1)).await.unwrap().unwrap();
    assert_eq!(job.id(), id);
    assert_eq!(job.envelope().unwrap().job_type, "noop");
    job.ack().await.unwrap();
    queue.purge("jobs").await.unwrap();
}
