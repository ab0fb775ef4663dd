//! End-to-end runs of the user registry pipeline against in-memory
//! stand-ins for the record source and the broker.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use userflow::pipeline::{
    END, GET_DATA, PROCESS_FEMALE, PROCESS_MALE, Publisher, RecordSource, STREAM_FEMALE,
    STREAM_MALE, UNKNOWN_GENDER, UserRecord, record_key,
};
use userflow::testing::{FlakyPublisher, RecordingPublisher, StaticSource, TestHarness, TestResult, sample_user};
use userflow::{
    ContextStore, DagExecutor, Event, PipelineConfig, RunOutcome, TaskContext, TaskId,
    TaskStatus, build_user_registry,
};

use crate::common::{config_with_interval, recording_bus};

async fn run(
    config: &PipelineConfig,
    source: Arc<dyn RecordSource>,
    publisher: Arc<dyn Publisher>,
) -> TestResult {
    let dag = build_user_registry(config, source, publisher).unwrap();
    TestHarness::new()
        .with_concurrency(config.max_concurrent_tasks)
        .execute(&dag)
        .await
}

#[tokio::test(start_paused = true)]
async fn test_male_record_is_enriched_and_published() {
    let publisher = Arc::new(RecordingPublisher::new());
    let result = run(
        &PipelineConfig::default(),
        Arc::new(StaticSource::sample("male")),
        publisher.clone(),
    )
    .await;

    let dag_result = &result.dag_result;
    assert_eq!(dag_result.outcome, RunOutcome::Success);
    assert_eq!(dag_result.status(STREAM_MALE), Some(&TaskStatus::Succeeded));
    for skipped in [PROCESS_FEMALE, STREAM_FEMALE, UNKNOWN_GENDER] {
        assert_eq!(dag_result.status(skipped), Some(&TaskStatus::Skipped), "{}", skipped);
    }
    assert_eq!(dag_result.status(END), Some(&TaskStatus::Succeeded));

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "users_created");

    let record = &publisher.records()[0];
    assert_eq!(record["business_email"], "a.b@newSet.nig");
    assert_eq!(record["userCompany"], "ab12@newSet");
    assert_eq!(record["id"], "555-0100-0");
    assert_eq!(record["first_name"], "Alex");
    assert_eq!(record["address"], "12 Elm Road, Leeds, West Yorkshire, United Kingdom");
    assert_eq!(record["post_code"], "LS1 4AP");

    let stored: UserRecord = result.get(&record_key(STREAM_MALE)).unwrap();
    assert_eq!(stored.id.as_deref(), Some("555-0100-0"));
}

#[tokio::test(start_paused = true)]
async fn test_female_record_is_enriched_and_published() {
    let publisher = Arc::new(RecordingPublisher::new());
    let result = run(
        &PipelineConfig::default(),
        Arc::new(StaticSource::sample("female")),
        publisher.clone(),
    )
    .await;

    assert!(result.dag_result.success);
    assert_eq!(result.dag_result.status(PROCESS_MALE), Some(&TaskStatus::Skipped));
    assert_eq!(result.dag_result.status(STREAM_MALE), Some(&TaskStatus::Skipped));

    let records = publisher.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["business_email"], "a.b@newSet.wom");
    assert_eq!(records[0]["userCompany"], "ab12@newSet");
    assert_eq!(records[0]["id"], "555-0100-1");
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_gender_takes_fallback_and_succeeds() {
    let publisher = Arc::new(RecordingPublisher::new());
    let result = run(
        &PipelineConfig::default(),
        Arc::new(StaticSource::sample("nonbinary")),
        publisher.clone(),
    )
    .await;

    let dag_result = &result.dag_result;
    assert_eq!(dag_result.outcome, RunOutcome::Success);
    assert_eq!(dag_result.status(UNKNOWN_GENDER), Some(&TaskStatus::Succeeded));
    assert_eq!(
        dag_result.skipped_tasks,
        vec![
            TaskId::new(PROCESS_MALE),
            TaskId::new(PROCESS_FEMALE),
            TaskId::new(STREAM_MALE),
            TaskId::new(STREAM_FEMALE),
        ]
    );
    assert!(dag_result.get_task_result(&TaskId::new(PROCESS_MALE)).is_none());
    assert!(dag_result.get_task_result(&TaskId::new(PROCESS_FEMALE)).is_none());
    assert!(publisher.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_gender_takes_fallback() {
    let mut user = sample_user("male");
    user.gender = None;
    let publisher = Arc::new(RecordingPublisher::new());

    let result = run(
        &PipelineConfig::default(),
        Arc::new(StaticSource::new(user)),
        publisher.clone(),
    )
    .await;

    assert!(result.dag_result.success);
    assert_eq!(
        result.dag_result.status(UNKNOWN_GENDER),
        Some(&TaskStatus::Succeeded)
    );
    assert!(publisher.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_is_retried_once() {
    let publisher = Arc::new(FlakyPublisher::new(1));
    let start = Instant::now();

    let result = run(
        &PipelineConfig::default(),
        Arc::new(StaticSource::sample("male")),
        publisher.clone(),
    )
    .await;
    let elapsed = start.elapsed();

    assert!(result.dag_result.success);
    let stream = result
        .dag_result
        .get_task_result(&TaskId::new(STREAM_MALE))
        .unwrap();
    assert_eq!(stream.attempts, 2);
    assert_eq!(publisher.attempts(), 2);
    assert_eq!(publisher.published().len(), 1);
    // 60s retry delay, then a paced 60s successful attempt
    assert!(
        elapsed >= Duration::from_secs(120) && elapsed < Duration::from_secs(121),
        "got {:?}",
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_publish_exhaustion_fails_run() {
    let publisher = Arc::new(FlakyPublisher::new(u32::MAX));

    let result = run(
        &PipelineConfig::default(),
        Arc::new(StaticSource::sample("female")),
        publisher.clone(),
    )
    .await;

    let dag_result = &result.dag_result;
    assert_eq!(dag_result.outcome, RunOutcome::Failure);
    assert_eq!(dag_result.status(STREAM_FEMALE), Some(&TaskStatus::Failed));
    // the only live path failed, so the join has nothing to run on
    assert_eq!(dag_result.status(END), Some(&TaskStatus::Skipped));
    assert_eq!(publisher.attempts(), 2);

    let summary = dag_result.failure_summary().unwrap();
    assert!(summary.contains("stream_female_to_kafka"));
    assert!(summary.contains("2 attempt(s)"));
    assert!(summary.contains("broker rejected record"));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_exhaustion_skips_everything_downstream() {
    let source = Arc::new(StaticSource::sample("male").failing_first(10));
    let publisher = Arc::new(RecordingPublisher::new());

    let result = run(&PipelineConfig::default(), source.clone(), publisher.clone()).await;

    let dag_result = &result.dag_result;
    assert_eq!(dag_result.outcome, RunOutcome::Failure);
    assert_eq!(dag_result.failed_tasks, vec![TaskId::new(GET_DATA)]);
    assert_eq!(dag_result.skipped_count(), 8);
    assert_eq!(dag_result.status(END), Some(&TaskStatus::Skipped));
    assert_eq!(source.calls(), 2);
    assert!(publisher.published().is_empty());

    let summary = dag_result.failure_summary().unwrap();
    assert!(summary.contains("task 'get_data' failed after 2 attempt(s)"));
    assert!(summary.contains("fetch failed"));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_retry_fetches_again() {
    let source = Arc::new(StaticSource::sample("female").failing_first(1));
    let publisher = Arc::new(RecordingPublisher::new());

    let result = run(&PipelineConfig::default(), source.clone(), publisher.clone()).await;

    assert!(result.dag_result.success);
    assert_eq!(source.calls(), 2);
    assert_eq!(
        result
            .dag_result
            .get_task_result(&TaskId::new(GET_DATA))
            .map(|r| r.attempts),
        Some(2)
    );
    assert_eq!(publisher.published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_publish_is_paced_to_interval() {
    let publisher = Arc::new(RecordingPublisher::new());
    let dag = build_user_registry(
        &PipelineConfig::default(),
        Arc::new(StaticSource::sample("male")),
        publisher.clone(),
    )
    .unwrap();
    let (bus, handler) = recording_bus().await;
    let executor = DagExecutor::default();
    let mut ctx = TaskContext::new(ContextStore::new(), TaskId::new("run"));

    let start = Instant::now();
    let result = executor
        .execute_with_events(&dag, &mut ctx, Some(bus))
        .await;
    let elapsed = start.elapsed();

    assert!(result.success);
    assert!(
        elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61),
        "got {:?}",
        elapsed
    );

    let stream = result
        .get_task_result(&TaskId::new(STREAM_MALE))
        .unwrap();
    assert!(stream.duration >= Duration::from_secs(60));

    // the record went out before the pause, the end ran after it
    assert_eq!(publisher.published().len(), 1);
    let events = handler.events().await;
    let stream_done = events
        .iter()
        .position(|e| matches!(e, Event::TaskCompleted { task_id, .. } if task_id.as_str() == STREAM_MALE))
        .unwrap();
    let end_started = events
        .iter()
        .position(|e| matches!(e, Event::TaskStarted { task_id, .. } if task_id.as_str() == END))
        .unwrap();
    assert!(stream_done < end_started);
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_disables_pacing() {
    let publisher = Arc::new(RecordingPublisher::new());
    let start = Instant::now();

    let result = run(
        &config_with_interval(0),
        Arc::new(StaticSource::sample("female")),
        publisher.clone(),
    )
    .await;

    assert!(result.dag_result.success);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(publisher.published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_store_holds_every_stage() {
    let result = run(
        &config_with_interval(0),
        Arc::new(StaticSource::sample("male")),
        Arc::new(RecordingPublisher::new()),
    )
    .await;

    for stage in ["get_data", "format_data", PROCESS_MALE, STREAM_MALE] {
        assert!(
            result.context.contains_key(&record_key(stage)),
            "missing {}",
            stage
        );
    }
    assert!(!result.context.contains_key(&record_key(PROCESS_FEMALE)));

    let formatted: Value = result.get(&record_key("format_data")).unwrap();
    assert!(formatted.get("business_email").is_none());
}
