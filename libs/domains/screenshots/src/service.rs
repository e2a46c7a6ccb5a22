//! Screenshot job service for submitting jobs to the queue.
//!
//! Every submission mints a new job ID and returns it as soon as the job is
//! enqueued. The service never waits for processing and never retries a
//! failed send.

use crate::error::ScreenshotResult;
use crate::models::{JobConfig, JobParameters, PRIORITY_HIGH, ScreenshotJob, Submitter};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use stream_worker::{SendOptions, SendOutcome, StreamProducer};
use tracing::info;
use uuid::Uuid;

/// Receipt for a deduplicated submission.
///
/// `job_id` is always the newly minted ID. When the submission was absorbed by
/// a job already in flight, that job's ID is in `duplicate_of` and `job_id`
/// will never be executed on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupReceipt {
    pub job_id: Uuid,
    pub duplicate_of: Option<String>,
}

impl DedupReceipt {
    /// Whether the submission collapsed into an existing job.
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }

    /// The job that will actually run for this submission.
    pub fn effective_job_id(&self) -> String {
        self.duplicate_of
            .clone()
            .unwrap_or_else(|| self.job_id.to_string())
    }
}

/// One entry of a batch submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub submitter: Submitter,
    pub params: JobParameters,
    pub config: Option<JobConfig>,
}

impl SubmitRequest {
    pub fn new(submitter: Submitter, params: JobParameters) -> Self {
        Self {
            submitter,
            params,
            config: None,
        }
    }
}

/// Derive the deduplication key for a logical screenshot target.
///
/// Two submissions for the same resource, plan and user share a key
/// regardless of their job IDs.
pub fn dedup_key(resource_id: &str, plan_id: &str, submitter_user_id: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [resource_id, plan_id, submitter_user_id] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Service for submitting screenshot jobs.
#[derive(Clone)]
pub struct ScreenshotJobService {
    producer: StreamProducer,
}

impl ScreenshotJobService {
    /// Create a new screenshot job service.
    pub fn new(producer: StreamProducer) -> Self {
        Self { producer }
    }

    /// Enqueue a job with default priority.
    pub async fn submit(
        &self,
        submitter: &Submitter,
        params: JobParameters,
        config: Option<JobConfig>,
    ) -> ScreenshotResult<Uuid> {
        let job = ScreenshotJob::new(submitter, params, config.unwrap_or_default());
        self.enqueue(&job, SendOptions::immediate()).await?;
        Ok(job.metadata.job_id)
    }

    /// Enqueue an urgent job. It is never delayed but does not jump ahead of
    /// jobs already in the queue.
    pub async fn submit_with_priority(
        &self,
        submitter: &Submitter,
        params: JobParameters,
        config: Option<JobConfig>,
    ) -> ScreenshotResult<Uuid> {
        let job = ScreenshotJob::new(submitter, params, config.unwrap_or_default())
            .with_priority(PRIORITY_HIGH);
        self.enqueue(&job, SendOptions::immediate()).await?;
        Ok(job.metadata.job_id)
    }

    /// Enqueue a job that stays invisible to consumers until `delay` elapsed.
    pub async fn submit_delayed(
        &self,
        submitter: &Submitter,
        params: JobParameters,
        delay: Duration,
        config: Option<JobConfig>,
    ) -> ScreenshotResult<Uuid> {
        let job = ScreenshotJob::new(submitter, params, config.unwrap_or_default());
        self.enqueue(&job, SendOptions::delayed(delay)).await?;
        Ok(job.metadata.job_id)
    }

    /// Enqueue a job unless another job with the same key is in flight within
    /// the transport's dedup window.
    pub async fn submit_deduplicated(
        &self,
        submitter: &Submitter,
        params: JobParameters,
        dedup_key: &str,
        config: Option<JobConfig>,
    ) -> ScreenshotResult<DedupReceipt> {
        let job = ScreenshotJob::new(submitter, params, config.unwrap_or_default());
        let outcome = self
            .enqueue(&job, SendOptions::deduplicated(dedup_key))
            .await?;

        let duplicate_of = match outcome {
            SendOutcome::Enqueued { .. } => None,
            SendOutcome::Deduplicated { existing_job_id } => {
                info!(
                    job_id = %job.metadata.job_id,
                    existing_job_id = %existing_job_id,
                    "Screenshot submission absorbed by in-flight job"
                );
                Some(existing_job_id)
            }
        };

        Ok(DedupReceipt {
            job_id: job.metadata.job_id,
            duplicate_of,
        })
    }

    /// Enqueue several independent jobs.
    ///
    /// Every send is attempted. If any fail, the returned error lists each
    /// failed index with its job ID and cause.
    pub async fn submit_batch(&self, requests: Vec<SubmitRequest>) -> ScreenshotResult<Vec<Uuid>> {
        let jobs: Vec<(ScreenshotJob, SendOptions)> = requests
            .into_iter()
            .map(|req| {
                let job = ScreenshotJob::new(
                    &req.submitter,
                    req.params,
                    req.config.unwrap_or_default(),
                );
                (job, SendOptions::immediate())
            })
            .collect();
        let ids = jobs.iter().map(|(job, _)| job.metadata.job_id).collect();

        self.producer.send_batch(jobs).await?;
        Ok(ids)
    }

    async fn enqueue(
        &self,
        job: &ScreenshotJob,
        options: SendOptions,
    ) -> ScreenshotResult<SendOutcome> {
        let outcome = self.producer.send(job, options).await?;
        info!(
            job_id = %job.metadata.job_id,
            resource_id = %job.params.resource_id,
            priority = job.metadata.priority,
            queue = %self.producer.queue_name(),
            "Queued screenshot job"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScreenshotError;
    use crate::models::PRIORITY_DEFAULT;
    use std::sync::Arc;
    use stream_worker::{MemoryTransport, QueueTransport, StreamError};

    fn submitter() -> Submitter {
        Submitter::new("user-1", "org-1")
    }

    fn params(resource: &str) -> JobParameters {
        JobParameters::new(resource, "plan-1", format!("https://preview.example.com/{resource}"))
    }

    fn service() -> (Arc<MemoryTransport>, ScreenshotJobService) {
        let queue = Arc::new(MemoryTransport::new("screenshots:jobs"));
        let service = ScreenshotJobService::new(StreamProducer::new(queue.clone()));
        (queue, service)
    }

    async fn only_job(queue: &MemoryTransport) -> ScreenshotJob {
        let deliveries = queue.receive(10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        deliveries[0].decode().unwrap()
    }

    #[test]
    fn test_dedup_key_depends_on_target_only() {
        let a = dedup_key("res-1", "plan-1", "user-1");
        assert_eq!(a, dedup_key("res-1", "plan-1", "user-1"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, dedup_key("res-1", "plan-2", "user-1"));
        assert_ne!(dedup_key("ab", "c", "u"), dedup_key("a", "bc", "u"));
    }

    #[tokio::test]
    async fn test_submit_enqueues_fresh_job() {
        let (queue, service) = service();

        let job_id = service.submit(&submitter(), params("res-1"), None).await.unwrap();

        let job = only_job(&queue).await;
        assert_eq!(job.metadata.job_id, job_id);
        assert_eq!(job.metadata.retry_count, 0);
        assert_eq!(job.metadata.priority, PRIORITY_DEFAULT);
        assert_eq!(job.metadata.organization_id, "org-1");
    }

    #[tokio::test]
    async fn test_submit_with_priority_marks_job_urgent() {
        let (queue, service) = service();

        service
            .submit_with_priority(&submitter(), params("res-1"), None)
            .await
            .unwrap();

        assert_eq!(only_job(&queue).await.metadata.priority, PRIORITY_HIGH);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_delayed_is_invisible_until_due() {
        let (queue, service) = service();

        service
            .submit_delayed(&submitter(), params("res-1"), Duration::from_secs(30), None)
            .await
            .unwrap();

        assert!(queue.receive(10).await.unwrap().is_empty());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(queue.receive(10).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_delayed_rejects_delay_beyond_cap() {
        use stream_worker::MAX_SEND_DELAY;

        let (queue, service) = service();

        let err = service
            .submit_delayed(
                &submitter(),
                params("res-1"),
                MAX_SEND_DELAY + Duration::from_secs(1),
                None,
            )
            .await
            .unwrap_err();
        match err {
            ScreenshotError::Queue(StreamError::Send { source, .. }) => {
                assert!(matches!(*source, StreamError::DelayOutOfRange { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(queue.delayed_len().await, 0);

        service
            .submit_delayed(&submitter(), params("res-2"), MAX_SEND_DELAY, None)
            .await
            .unwrap();
        assert_eq!(queue.delayed_len().await, 1);
    }

    #[tokio::test]
    async fn test_submit_deduplicated_reports_absorbing_job() {
        let (queue, service) = service();
        let key = dedup_key("res-1", "plan-1", "user-1");

        let first = service
            .submit_deduplicated(&submitter(), params("res-1"), &key, None)
            .await
            .unwrap();
        let second = service
            .submit_deduplicated(&submitter(), params("res-1"), &key, None)
            .await
            .unwrap();

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_ne!(first.job_id, second.job_id);
        assert_eq!(second.effective_job_id(), first.job_id.to_string());
        assert_eq!(queue.len().await, 1);
    }

    struct UnavailableTransport;

    #[async_trait::async_trait]
    impl QueueTransport for UnavailableTransport {
        async fn send(&self, _: &str, _: &str, _: &SendOptions) -> Result<SendOutcome, StreamError> {
            Err(StreamError::Internal("queue unavailable".to_string()))
        }
        async fn receive(&self, _: usize) -> Result<Vec<stream_worker::Delivery>, StreamError> {
            Ok(vec![])
        }
        async fn ack(&self, _: &str) -> Result<(), StreamError> {
            Ok(())
        }
        async fn retry(&self, _: &str, _: &str) -> Result<(), StreamError> {
            Ok(())
        }
        fn queue_name(&self) -> &str {
            "screenshots:jobs"
        }
        async fn info(&self) -> Result<stream_worker::QueueInfo, StreamError> {
            Ok(Default::default())
        }
    }

    #[tokio::test]
    async fn test_submit_surfaces_send_failure_with_payload() {
        let service = ScreenshotJobService::new(StreamProducer::new(Arc::new(UnavailableTransport)));

        let err = service
            .submit_delayed(&submitter(), params("res-1"), Duration::from_secs(5), None)
            .await
            .unwrap_err();

        match err {
            ScreenshotError::Queue(StreamError::Send { payload, options, .. }) => {
                let job: ScreenshotJob = serde_json::from_str(&payload).unwrap();
                assert_eq!(job.params.resource_id, "res-1");
                assert_eq!(options.delay, Some(Duration::from_secs(5)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_batch_reports_every_failed_index() {
        let service = ScreenshotJobService::new(StreamProducer::new(Arc::new(UnavailableTransport)));
        let requests = vec![
            SubmitRequest::new(submitter(), params("res-1")),
            SubmitRequest::new(submitter(), params("res-2")),
        ];

        let err = service.submit_batch(requests).await.unwrap_err();

        match err {
            ScreenshotError::Queue(StreamError::BatchSend { attempted, enqueued, failures }) => {
                assert_eq!(attempted, 2);
                assert!(enqueued.is_empty());
                let indexes: Vec<usize> = failures.iter().map(|f| f.index).collect();
                assert_eq!(indexes, vec![0, 1]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_batch_returns_ids_in_order() {
        let (queue, service) = service();
        let requests = vec![
            SubmitRequest::new(submitter(), params("res-1")),
            SubmitRequest::new(submitter(), params("res-2")),
            SubmitRequest::new(submitter(), params("res-3")),
        ];

        let ids = service.submit_batch(requests).await.unwrap();

        assert_eq!(ids.len(), 3);
        let queued: Vec<Uuid> = queue
            .receive(10)
            .await
            .unwrap()
            .iter()
            .map(|d| d.decode::<ScreenshotJob>().unwrap().metadata.job_id)
            .collect();
        for id in &ids {
            assert!(queued.contains(id));
        }
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let (queue, service) = service();
        assert!(service.submit_batch(vec![]).await.unwrap().is_empty());
        assert!(queue.is_empty().await);
    }

    #[test]
    fn test_queue_error_keeps_stream_error() {
        let err: ScreenshotError = StreamError::Config("bad".to_string()).into();
        assert!(matches!(err, ScreenshotError::Queue(StreamError::Config(_))));
    }
}
