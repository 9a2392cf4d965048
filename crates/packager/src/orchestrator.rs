//! Encode job orchestration.
//!
//! Binds one encode job per rendition and runs them under a selectable
//! concurrency policy. The three policies are one batching code path:
//! fully parallel is one batch of everything, capped runs consecutive
//! batches of at most the cap, sequential is a cap of one. Batches run
//! strictly in sequence; a failure inside a batch stops later batches
//! from ever launching. Jobs already in flight when a sibling fails run
//! to completion, and the batch's first error in ladder order becomes
//! the run's error.

use crate::ladder::RenditionSpec;
use crate::manifest::ManifestFragment;
use crate::params::EncodingParameters;
use ladderpack_config::PolicyKind;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Error type for encode job failures.
#[derive(Debug, Error)]
pub enum JobError {
    /// The external encoder reported failure for one rendition.
    #[error("{height}p encode failed: {message}")]
    EncodeFailed { height: u32, message: String },

    /// The encode task itself died.
    #[error("{height}p encode task panicked: {message}")]
    TaskPanicked { height: u32, message: String },
}

impl JobError {
    /// Rendition height the failure belongs to.
    pub fn height(&self) -> u32 {
        match self {
            JobError::EncodeFailed { height, .. } => *height,
            JobError::TaskPanicked { height, .. } => *height,
        }
    }
}

/// Job state in the encode pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Job has not been dispatched yet.
    Pending,
    /// Job is running on the external encoder.
    Running,
    /// Job produced its manifest fragment.
    Succeeded,
    /// Job failed with the given message. Terminal; never retried.
    Failed(String),
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed(_) => "failed",
        }
    }
}

/// One unit of encode work: a rendition bound to its parameters and
/// output locations.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    /// Unique job identifier.
    pub id: String,
    /// The rendition this job produces.
    pub rendition: RenditionSpec,
    /// Derived encoding parameters.
    pub params: EncodingParameters,
    /// Path to the source video.
    pub input_path: PathBuf,
    /// Directory shared by all jobs of the run.
    pub output_dir: PathBuf,
    /// Current state of the job.
    pub state: JobState,
}

impl EncodeJob {
    /// Create a new job in the pending state.
    pub fn new(
        rendition: RenditionSpec,
        params: EncodingParameters,
        input_path: PathBuf,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rendition,
            params,
            input_path,
            output_dir,
            state: JobState::Pending,
        }
    }

    /// Rendition playlist file name, prefixed by the rendition label so
    /// concurrent jobs sharing the output directory never collide.
    pub fn playlist_name(&self) -> String {
        format!("{}.m3u8", self.rendition.label)
    }

    /// Segment file pattern, label-prefixed for the same reason.
    pub fn segment_pattern(&self) -> String {
        format!("{}_%03d.ts", self.rendition.label)
    }

    /// The manifest fragment this job contributes once it succeeds.
    pub fn fragment(&self) -> ManifestFragment {
        ManifestFragment {
            target_height: self.rendition.target_height,
            width: self.params.width,
            height: self.params.height,
            bandwidth_bits: self.params.bitrate_kbps as u64 * 1000,
            label: self.rendition.label.clone(),
            playlist_path: self.playlist_name(),
        }
    }
}

/// Scheduling policy for a run's encode jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// Dispatch every job at once.
    Parallel,
    /// Consecutive batches of at most this many jobs (0 = derive from CPUs).
    Capped(usize),
    /// One job at a time.
    Sequential,
}

impl ConcurrencyPolicy {
    /// Map the configuration selector onto a policy.
    pub fn from_config(kind: PolicyKind, max_concurrent: u32) -> Self {
        match kind {
            PolicyKind::Parallel => ConcurrencyPolicy::Parallel,
            PolicyKind::Capped => ConcurrencyPolicy::Capped(max_concurrent as usize),
            PolicyKind::Sequential => ConcurrencyPolicy::Sequential,
        }
    }

    /// Effective batch size for a run of `job_count` jobs.
    pub fn batch_size(&self, job_count: usize) -> usize {
        match self {
            ConcurrencyPolicy::Parallel => job_count.max(1),
            ConcurrencyPolicy::Capped(0) => derive_cap(num_cpus::get()),
            ConcurrencyPolicy::Capped(cap) => *cap,
            ConcurrencyPolicy::Sequential => 1,
        }
    }
}

/// Derive a batch cap from the CPU count.
///
/// One external encoder saturates several cores on its own, so the cap
/// stays small even on large machines.
pub fn derive_cap(cores: usize) -> usize {
    (cores / 8).clamp(1, 4)
}

/// The seam to the external encoder.
///
/// Implementations turn one job into either its manifest fragment or a
/// failure; timing is theirs, and the orchestrator awaits them without
/// blocking sibling jobs.
pub trait EncodeRunner: Send + Sync {
    fn run(
        &self,
        job: &EncodeJob,
    ) -> impl Future<Output = Result<ManifestFragment, JobError>> + Send;
}

/// Run every job under the given policy and collect the fragments.
///
/// Fragments are returned in ladder order. On failure the first error in
/// ladder order is returned and no further batch is launched.
pub async fn run_jobs<R>(
    jobs: Vec<EncodeJob>,
    policy: ConcurrencyPolicy,
    runner: Arc<R>,
) -> Result<Vec<ManifestFragment>, JobError>
where
    R: EncodeRunner + 'static,
{
    let batch_size = policy.batch_size(jobs.len());
    let mut fragments = Vec::with_capacity(jobs.len());

    for batch in jobs.chunks(batch_size) {
        let mut handles = Vec::with_capacity(batch.len());

        for job in batch {
            handles.push(tokio::spawn(execute_job(Arc::clone(&runner), job.clone())));
        }

        // Await the whole batch before deciding anything: in-flight siblings
        // of a failing job run to completion.
        let mut batch_error: Option<JobError> = None;
        for (handle, job) in handles.into_iter().zip(batch) {
            match handle.await {
                Ok(Ok(fragment)) => fragments.push(fragment),
                Ok(Err(e)) => {
                    if batch_error.is_none() {
                        batch_error = Some(e);
                    }
                }
                Err(join_err) => {
                    if batch_error.is_none() {
                        batch_error = Some(JobError::TaskPanicked {
                            height: job.rendition.target_height,
                            message: join_err.to_string(),
                        });
                    }
                }
            }
        }

        if let Some(error) = batch_error {
            return Err(error);
        }
    }

    Ok(fragments)
}

/// Drive one job through its state machine on the external encoder.
async fn execute_job<R: EncodeRunner>(
    runner: Arc<R>,
    mut job: EncodeJob,
) -> Result<ManifestFragment, JobError> {
    job.state = JobState::Running;
    tracing::info!(
        job_id = %job.id,
        rendition = %job.rendition.label,
        bitrate_kbps = job.params.bitrate_kbps,
        "encode job started"
    );

    let result = runner.run(&job).await;
    match &result {
        Ok(_) => {
            job.state = JobState::Succeeded;
            tracing::info!(
                job_id = %job.id,
                rendition = %job.rendition.label,
                "encode job finished"
            );
        }
        Err(e) => {
            job.state = JobState::Failed(e.to_string());
            tracing::error!(
                job_id = %job.id,
                rendition = %job.rendition.label,
                error = %e,
                "encode job failed"
            );
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::compute_parameters;
    use crate::probe::fallback_descriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn make_jobs(heights: &[u32]) -> Vec<EncodeJob> {
        let mut source = fallback_descriptor();
        source.height = 2160;
        source.width = 3840;

        heights
            .iter()
            .map(|&h| {
                let rendition = RenditionSpec::new(h);
                let params = compute_parameters(&rendition, &source, 1.0, 0).unwrap();
                EncodeJob::new(
                    rendition,
                    params,
                    PathBuf::from("/tmp/input.mp4"),
                    PathBuf::from("/tmp/out"),
                )
            })
            .collect()
    }

    /// Stub runner recording start/end events and peak concurrency.
    struct RecordingRunner {
        events: Arc<Mutex<Vec<(&'static str, u32)>>>,
        running: AtomicUsize,
        peak: AtomicUsize,
        fail_height: Option<u32>,
    }

    impl RecordingRunner {
        fn new(fail_height: Option<u32>) -> Self {
            Self {
                events: Arc::new(Mutex::new(Vec::new())),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_height,
            }
        }

        async fn events(&self) -> Vec<(&'static str, u32)> {
            self.events.lock().await.clone()
        }

        fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl EncodeRunner for RecordingRunner {
        fn run(
            &self,
            job: &EncodeJob,
        ) -> impl Future<Output = Result<ManifestFragment, JobError>> + Send {
            let events = Arc::clone(&self.events);
            let height = job.rendition.target_height;
            let fragment = job.fragment();
            let fail = self.fail_height == Some(height);

            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_running, Ordering::SeqCst);

            async move {
                events.lock().await.push(("start", height));
                // Spread completion times so jobs finish out of dispatch order.
                tokio::time::sleep(Duration::from_millis(10 + (height % 37) as u64)).await;
                events.lock().await.push(("end", height));
                self.running.fetch_sub(1, Ordering::SeqCst);

                if fail {
                    Err(JobError::EncodeFailed {
                        height,
                        message: "simulated encoder failure".to_string(),
                    })
                } else {
                    Ok(fragment)
                }
            }
        }
    }

    fn batch_boundary_respected(
        events: &[(&'static str, u32)],
        earlier: &[u32],
        later: &[u32],
    ) -> bool {
        let last_end_of_earlier = events
            .iter()
            .enumerate()
            .filter(|(_, (kind, h))| *kind == "end" && earlier.contains(h))
            .map(|(i, _)| i)
            .max();
        let first_start_of_later = events
            .iter()
            .enumerate()
            .filter(|(_, (kind, h))| *kind == "start" && later.contains(h))
            .map(|(i, _)| i)
            .min();

        match (last_end_of_earlier, first_start_of_later) {
            (Some(end), Some(start)) => end < start,
            _ => false,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capped_policy_batches_in_ladder_order() {
        let jobs = make_jobs(&[1080, 720, 540, 480, 360]);
        let runner = Arc::new(RecordingRunner::new(None));

        let fragments = run_jobs(jobs, ConcurrencyPolicy::Capped(2), Arc::clone(&runner))
            .await
            .expect("run should succeed");

        assert_eq!(fragments.len(), 5);
        assert!(runner.peak_concurrency() <= 2);

        // Batches are [1080, 720], [540, 480], [360]; a batch never starts
        // before the previous one fully terminates.
        let events = runner.events().await;
        assert_eq!(events.len(), 10);
        assert!(batch_boundary_respected(&events, &[1080, 720], &[540, 480]));
        assert!(batch_boundary_respected(&events, &[540, 480], &[360]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_policy_dispatches_everything_at_once() {
        let jobs = make_jobs(&[1080, 720, 540, 480, 360]);
        let runner = Arc::new(RecordingRunner::new(None));

        let fragments = run_jobs(jobs, ConcurrencyPolicy::Parallel, Arc::clone(&runner))
            .await
            .expect("run should succeed");

        assert_eq!(fragments.len(), 5);
        assert!(runner.peak_concurrency() >= 2, "jobs never overlapped");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sequential_policy_never_overlaps() {
        let jobs = make_jobs(&[720, 480, 360]);
        let runner = Arc::new(RecordingRunner::new(None));

        run_jobs(jobs, ConcurrencyPolicy::Sequential, Arc::clone(&runner))
            .await
            .expect("run should succeed");

        assert_eq!(runner.peak_concurrency(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capped_one_matches_sequential() {
        let jobs = make_jobs(&[720, 480, 360]);
        let runner = Arc::new(RecordingRunner::new(None));

        run_jobs(jobs, ConcurrencyPolicy::Capped(1), Arc::clone(&runner))
            .await
            .expect("run should succeed");

        assert_eq!(runner.peak_concurrency(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_aborts_later_batches() {
        let jobs = make_jobs(&[1080, 720, 540, 480, 360]);
        let runner = Arc::new(RecordingRunner::new(Some(1080)));

        let result = run_jobs(jobs, ConcurrencyPolicy::Capped(2), Arc::clone(&runner)).await;

        let error = result.expect_err("run must fail");
        assert_eq!(error.height(), 1080);
        assert!(error.to_string().contains("1080p"));

        // Nothing from the later batches ever started.
        let events = runner.events().await;
        for h in [540, 480, 360] {
            assert!(
                !events.iter().any(|(kind, eh)| *kind == "start" && *eh == h),
                "{}p should never have started",
                h
            );
        }
        // The failing job's batch sibling still ran to completion.
        assert!(events.iter().any(|(kind, h)| *kind == "end" && *h == 720));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_failure_is_single_aggregate_error() {
        let jobs = make_jobs(&[1080, 720, 540, 480, 360]);
        let runner = Arc::new(RecordingRunner::new(Some(540)));

        let result = run_jobs(jobs, ConcurrencyPolicy::Parallel, Arc::clone(&runner)).await;

        let error = result.expect_err("run must fail");
        assert_eq!(error.height(), 540);

        // All siblings were dispatched and ran to completion regardless.
        let events = runner.events().await;
        assert_eq!(
            events.iter().filter(|(kind, _)| *kind == "end").count(),
            5
        );
    }

    #[test]
    fn test_policy_batch_sizes() {
        assert_eq!(ConcurrencyPolicy::Parallel.batch_size(5), 5);
        assert_eq!(ConcurrencyPolicy::Capped(2).batch_size(5), 2);
        assert_eq!(ConcurrencyPolicy::Sequential.batch_size(5), 1);
        // Parallel over an empty run still yields a usable chunk size.
        assert_eq!(ConcurrencyPolicy::Parallel.batch_size(0), 1);
        // Cap zero derives from the machine, always at least one.
        assert!(ConcurrencyPolicy::Capped(0).batch_size(5) >= 1);
    }

    #[test]
    fn test_derive_cap_bounds() {
        assert_eq!(derive_cap(1), 1);
        assert_eq!(derive_cap(8), 1);
        assert_eq!(derive_cap(16), 2);
        assert_eq!(derive_cap(32), 4);
        assert_eq!(derive_cap(256), 4);
    }

    #[test]
    fn test_policy_from_config() {
        assert_eq!(
            ConcurrencyPolicy::from_config(PolicyKind::Parallel, 0),
            ConcurrencyPolicy::Parallel
        );
        assert_eq!(
            ConcurrencyPolicy::from_config(PolicyKind::Capped, 3),
            ConcurrencyPolicy::Capped(3)
        );
        assert_eq!(
            ConcurrencyPolicy::from_config(PolicyKind::Sequential, 3),
            ConcurrencyPolicy::Sequential
        );
    }

    #[test]
    fn test_job_naming_is_label_prefixed() {
        let jobs = make_jobs(&[720]);
        assert_eq!(jobs[0].playlist_name(), "720p.m3u8");
        assert_eq!(jobs[0].segment_pattern(), "720p_%03d.ts");
    }

    #[test]
    fn test_fragment_bandwidth_is_bits() {
        let jobs = make_jobs(&[720]);
        let fragment = jobs[0].fragment();
        assert_eq!(
            fragment.bandwidth_bits,
            jobs[0].params.bitrate_kbps as u64 * 1000
        );
        assert_eq!(fragment.playlist_path, "720p.m3u8");
    }

    #[test]
    fn test_job_state_as_str() {
        assert_eq!(JobState::Pending.as_str(), "pending");
        assert_eq!(JobState::Running.as_str(), "running");
        assert_eq!(JobState::Succeeded.as_str(), "succeeded");
        assert_eq!(JobState::Failed("boom".to_string()).as_str(), "failed");
    }
}
