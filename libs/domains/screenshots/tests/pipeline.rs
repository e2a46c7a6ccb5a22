//! Screenshot submissions flowing through the worker with fake executors.

use async_trait::async_trait;
use domain_screenshots::{
    ExecutionResult, JobConfig, JobParameters, ScreenshotError, ScreenshotExecutor, ScreenshotJob,
    ScreenshotJobService, ScreenshotProcessor, ScreenshotResult, ScreenshotStream, Submitter,
    ValidatedParams, dedup_key,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use stream_worker::{
    Disposition, DlqReason, MemoryDeadLetterSink, MemoryTransport, SendOptions, StreamDef,
    StreamJob, StreamProducer, StreamWorker, WorkerConfig,
};

/// Replays scripted results, then succeeds. Panics on resources named "explode".
#[derive(Default)]
struct ScriptedExecutor {
    script: Mutex<VecDeque<ScreenshotResult<ExecutionResult>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn with_script(script: Vec<ScreenshotResult<ExecutionResult>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    fn always_failing() -> Self {
        Self::with_script(
            (0..10)
                .map(|_| Err(ScreenshotError::Executor("renderer timed out".to_string())))
                .collect(),
        )
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScreenshotExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        job_id: &str,
        params: &ValidatedParams,
        _config: &JobConfig,
    ) -> ScreenshotResult<ExecutionResult> {
        self.calls.lock().unwrap().push(job_id.to_string());
        if params.resource_id == "explode" {
            panic!("renderer crashed");
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(ExecutionResult::completed(format!(
                "s3://shots/{}.png",
                params.resource_id
            )))
        })
    }

    fn name(&self) -> &'static str {
        "ScriptedExecutor"
    }

    async fn health_check(&self) -> ScreenshotResult<bool> {
        Ok(true)
    }
}

struct Pipeline {
    queue: Arc<MemoryTransport>,
    sink: Arc<MemoryDeadLetterSink>,
    executor: Arc<ScriptedExecutor>,
    service: ScreenshotJobService,
    worker: StreamWorker<ScreenshotJob, ScreenshotProcessor<ScriptedExecutor>>,
}

fn pipeline(executor: ScriptedExecutor) -> Pipeline {
    let queue = Arc::new(MemoryTransport::new(ScreenshotStream::STREAM_NAME));
    let sink = Arc::new(MemoryDeadLetterSink::new());
    let executor = Arc::new(executor);
    let worker = StreamWorker::new(
        queue.clone(),
        sink.clone(),
        ScreenshotProcessor::with_arc(executor.clone()),
        WorkerConfig::from_stream_def::<ScreenshotStream>().with_blocking(None),
    );

    Pipeline {
        service: ScreenshotJobService::new(StreamProducer::new(queue.clone())),
        queue,
        sink,
        executor,
        worker,
    }
}

fn submitter() -> Submitter {
    Submitter::new("user-1", "org-1")
}

fn params(resource: &str) -> JobParameters {
    JobParameters::new(
        resource,
        "plan-1",
        format!("https://preview.example.com/{resource}"),
    )
}

#[tokio::test]
async fn fails_twice_then_succeeds_without_dead_letter() {
    let p = pipeline(ScriptedExecutor::with_script(vec![
        Err(ScreenshotError::Executor("renderer timed out".to_string())),
        Ok(ExecutionResult::failed()),
    ]));
    let job_id = p.service.submit(&submitter(), params("res-1"), None).await.unwrap();

    let mut seen_retry_counts = Vec::new();
    let mut last = None;
    for _ in 0..3 {
        let summary = p.worker.process_next_batch().await.unwrap().unwrap();
        let result = summary.results[0].clone();
        if let Some(body) = p.queue.payload_of(&result.message_id).await {
            let job: ScreenshotJob = serde_json::from_str(&body).unwrap();
            seen_retry_counts.push(job.retry_count());
        }
        last = Some(result);
    }

    let last = last.unwrap();
    assert!(last.success);
    assert_eq!(last.disposition, Disposition::Acked);
    assert_eq!(last.job_id, Some(job_id.to_string()));
    assert_eq!(last.artifact_url.as_deref(), Some("s3://shots/res-1.png"));
    assert_eq!(seen_retry_counts, vec![1, 2]);
    assert_eq!(p.executor.calls(), vec![job_id.to_string(); 3]);
    assert!(p.sink.is_empty().await);
    assert!(p.queue.is_empty().await);
}

#[tokio::test]
async fn always_failing_job_is_dead_lettered_after_max_retries() {
    let p = pipeline(ScriptedExecutor::always_failing());
    let job_id = p.service.submit(&submitter(), params("res-1"), None).await.unwrap();

    while p.worker.process_next_batch().await.unwrap().is_some() {}

    assert_eq!(p.executor.calls().len(), 3);
    let records = p.sink.records().await;
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.dlq_reason, DlqReason::MaxRetriesExceeded);
    assert_eq!(record.original_queue_name, "screenshots:jobs");
    assert_eq!(record.total_retries, 2);
    assert_eq!(record.retry_history.len(), 3);
    assert!(record.final_error.contains("renderer timed out"));

    let job: ScreenshotJob = record.job().unwrap();
    assert_eq!(job.metadata.job_id, job_id);
    assert_eq!(job.metadata.retry_count, 2);
    assert!(p.queue.is_empty().await);
}

#[tokio::test]
async fn missing_preview_url_is_dead_lettered_immediately() {
    let p = pipeline(ScriptedExecutor::default());
    p.service
        .submit(&submitter(), JobParameters::new("res-1", "plan-1", ""), None)
        .await
        .unwrap();

    let summary = p.worker.process_next_batch().await.unwrap().unwrap();

    assert_eq!(summary.results[0].disposition, Disposition::DeadLettered);
    assert!(p.executor.calls().is_empty());

    let records = p.sink.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].dlq_reason, DlqReason::InvalidPayload);
    assert_eq!(records[0].total_retries, 0);
    assert!(records[0].final_error.contains("previewUrl"));
    assert!(p.queue.is_empty().await);
}

#[tokio::test]
async fn validation_failure_keeps_delivered_retry_count() {
    let p = pipeline(ScriptedExecutor::default());
    let mut job = ScreenshotJob::new(
        &submitter(),
        JobParameters::new("res-1", "", "https://preview.example.com/res-1"),
        JobConfig::default(),
    );
    job.metadata.retry_count = 1;
    StreamProducer::new(p.queue.clone())
        .send(&job, SendOptions::immediate())
        .await
        .unwrap();

    p.worker.process_next_batch().await.unwrap().unwrap();

    let records = p.sink.records().await;
    let record = &records[0];
    assert_eq!(record.dlq_reason, DlqReason::InvalidPayload);
    assert_eq!(record.total_retries, 1);
    assert_eq!(record.job::<ScreenshotJob>().unwrap().metadata.retry_count, 1);
}

#[tokio::test]
async fn unsupported_schema_version_is_invalid_payload() {
    let p = pipeline(ScriptedExecutor::default());
    let mut job = ScreenshotJob::new(&submitter(), params("res-1"), JobConfig::default());
    job.metadata.schema_version = "2".to_string();
    StreamProducer::new(p.queue.clone())
        .send(&job, SendOptions::immediate())
        .await
        .unwrap();

    p.worker.process_next_batch().await.unwrap().unwrap();

    assert!(p.executor.calls().is_empty());
    assert_eq!(p.sink.records().await[0].dlq_reason, DlqReason::InvalidPayload);
}

#[tokio::test]
async fn dead_letter_outage_leaves_message_in_queue() {
    let p = pipeline(ScriptedExecutor::default());
    p.service
        .submit(&submitter(), JobParameters::new("res-1", "plan-1", ""), None)
        .await
        .unwrap();

    p.sink.fail_next(1);
    let summary = p.worker.process_next_batch().await.unwrap().unwrap();

    assert_eq!(summary.results[0].disposition, Disposition::Unacknowledged);
    assert!(!summary.results[0].success);
    assert!(p.sink.is_empty().await);
    assert_eq!(p.queue.len().await, 1);
    assert!(p.queue.acked().await.is_empty());
}

#[tokio::test]
async fn panicking_job_does_not_sink_the_batch() {
    let p = pipeline(ScriptedExecutor::default());
    for resource in ["res-1", "explode", "res-3"] {
        p.service.submit(&submitter(), params(resource), None).await.unwrap();
    }

    let summary = p.worker.process_next_batch().await.unwrap().unwrap();

    assert_eq!(summary.len(), 3);
    assert_eq!(summary.failure_count, 1);
    assert_eq!(summary.count(Disposition::Acked), 2);

    let panicked = summary.results.iter().find(|r| !r.success).unwrap();
    assert!(panicked.error.as_deref().unwrap_or_default().contains("renderer crashed"));
    assert_eq!(panicked.disposition, Disposition::Retried);
}

#[tokio::test]
async fn deduplicated_submissions_reach_executor_once() {
    let p = pipeline(ScriptedExecutor::default());
    let key = dedup_key("res-1", "plan-1", "user-1");

    let first = p
        .service
        .submit_deduplicated(&submitter(), params("res-1"), &key, None)
        .await
        .unwrap();
    let second = p
        .service
        .submit_deduplicated(&submitter(), params("res-1"), &key, None)
        .await
        .unwrap();

    while p.worker.process_next_batch().await.unwrap().is_some() {}

    assert_eq!(second.duplicate_of, Some(first.job_id.to_string()));
    assert_eq!(p.executor.calls(), vec![first.job_id.to_string()]);
}

#[tokio::test]
async fn priority_submission_is_processed_with_the_next_batch() {
    let p = pipeline(ScriptedExecutor::default());
    p.service.submit(&submitter(), params("res-1"), None).await.unwrap();
    let urgent = p
        .service
        .submit_with_priority(&submitter(), params("res-2"), None)
        .await
        .unwrap();

    let summary = p.worker.process_next_batch().await.unwrap().unwrap();

    assert_eq!(summary.count(Disposition::Acked), 2);
    assert!(p.executor.calls().contains(&urgent.to_string()));
}
