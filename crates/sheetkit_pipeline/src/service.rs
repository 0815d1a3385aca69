//! Job entry points with configuration and cross-job concurrency.

use std::sync::Arc;

use sheetkit_log::sheet_debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::conf::{ConfigStore, SpecPipelineConfig};
use crate::merge::merge_files;
use crate::progress::{ProgressSink, ProgressThrottler};
use crate::report::{ReportJob, ReportJobBuilder};
use crate::spec::{PipelineError, SpecMergeJob, SpecSplitJob};
use crate::split::split_file;

/// Merge/split service.
///
/// Each job holds one permit of the job semaphore from before its first
/// output is created until it returns, whatever the outcome.
#[derive(Debug, Clone)]
pub struct SheetService {
    store: Arc<ConfigStore>,
    sem_jobs: Arc<Semaphore>,
}

impl Default for SheetService {
    fn default() -> Self {
        Self::new(Arc::new(ConfigStore::default()))
    }
}

impl SheetService {
    /// Service over `store`; the permit count comes from its current snapshot.
    pub fn new(store: Arc<ConfigStore>) -> Self {
        let n_permits = store.snapshot().n_max_concurrent_jobs.max(1);
        Self {
            store,
            sem_jobs: Arc::new(Semaphore::new(n_permits)),
        }
    }

    /// Service over a fixed configuration.
    pub fn with_config(config: SpecPipelineConfig) -> Self {
        Self::new(Arc::new(ConfigStore::new(config)))
    }

    /// Backing configuration store.
    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Job permits currently free.
    pub fn n_jobs_available(&self) -> usize {
        self.sem_jobs.available_permits()
    }

    /// Merge `job.files` into one artifact.
    pub async fn merge_files(&self, job: SpecMergeJob, progress: Arc<dyn ProgressSink>) -> ReportJob {
        let config = job.config.clone().unwrap_or_else(|| self.store.snapshot());
        let _permit = match self.acquire_job_permit(&job.cancel).await {
            Ok(permit) => permit,
            Err(e) => return ReportJobBuilder::default().build_from_error(&e),
        };
        let throttler = Arc::new(ProgressThrottler::from_config(progress, &config));
        merge_files(&job, config, throttler).await
    }

    /// Split `job.file` into several artifacts.
    pub async fn split_file(&self, job: SpecSplitJob, progress: Arc<dyn ProgressSink>) -> ReportJob {
        let config = job.config.clone().unwrap_or_else(|| self.store.snapshot());
        let _permit = match self.acquire_job_permit(&job.cancel).await {
            Ok(permit) => permit,
            Err(e) => return ReportJobBuilder::default().build_from_error(&e),
        };
        let throttler = Arc::new(ProgressThrottler::from_config(progress, &config));
        split_file(&job, config, throttler).await
    }

    async fn acquire_job_permit(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, PipelineError> {
        let sem_jobs = self.sem_jobs.clone();
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            permit = sem_jobs.acquire_owned() => {
                permit.map_err(|e| PipelineError::Task(e.to_string()))?
            }
        };
        sheet_debug!(
            "Job permit acquired ({} left)",
            self.sem_jobs.available_permits()
        );
        Ok(permit)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::progress::NoProgress;
    use crate::report::EnumJobStatus;
    use crate::spec::{EnumOutputFormat, EnumSplitMode};

    #[tokio::test]
    async fn service_runs_merge_then_split_with_snapshot_config() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_a = tmp.path().join("a.csv");
        let path_b = tmp.path().join("b.csv");
        std::fs::write(&path_a, "k,v\n1,x\n2,y\n").expect("write");
        std::fs::write(&path_b, "k,v\n3,z\n").expect("write");

        let service = SheetService::with_config(SpecPipelineConfig {
            if_csv_bom: false,
            ..SpecPipelineConfig::default()
        });
        let mut job = SpecMergeJob::new(vec![path_a, path_b], tmp.path().join("merged"));
        job.format_out = EnumOutputFormat::Csv;
        let report = service.merge_files(job, Arc::new(NoProgress)).await;
        assert_eq!(report.status, EnumJobStatus::Succeeded, "{report}");
        let path_merged = report.path_file_out().expect("output").to_path_buf();
        assert_eq!(
            std::fs::read_to_string(&path_merged).expect("read"),
            "k,v\n1,x\n2,y\n3,z\n"
        );
        assert_eq!(service.n_jobs_available(), 2);

        let mut job = SpecSplitJob::new(
            &path_merged,
            tmp.path().join("parts"),
            EnumSplitMode::ByRows { n_rows_per_file: 2 },
        );
        job.format_out = EnumOutputFormat::Csv;
        let report = service.split_file(job, Arc::new(NoProgress)).await;
        assert_eq!(report.status, EnumJobStatus::Succeeded, "{report}");
        assert_eq!(report.paths_file_out.len(), 2);
        assert_eq!(
            std::fs::read_to_string(&report.paths_file_out[1]).expect("read"),
            "k,v\n3,z\n"
        );
    }

    #[tokio::test]
    async fn service_reports_cancellation_while_waiting_for_permit() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_csv = tmp.path().join("a.csv");
        std::fs::write(&path_csv, "h\n1\n").expect("write");
        let service = SheetService::with_config(SpecPipelineConfig {
            n_max_concurrent_jobs: 1,
            ..SpecPipelineConfig::default()
        });
        let _permit = service
            .acquire_job_permit(&CancellationToken::new())
            .await
            .expect("permit");

        let job = SpecMergeJob::new(vec![path_csv], tmp.path().join("out"));
        job.cancel.cancel();
        let report = service.merge_files(job, Arc::new(NoProgress)).await;
        assert_eq!(report.status, EnumJobStatus::Cancelled);
        assert_eq!(report.message, "Operation cancelled");
        assert!(!tmp.path().join("out").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn job_semaphore_with_one_permit_serializes_jobs() {
        let service = SheetService::with_config(SpecPipelineConfig {
            n_max_concurrent_jobs: 1,
            ..SpecPipelineConfig::default()
        });
        assert_eq!(service.config_store().snapshot().n_max_concurrent_jobs, 1);
        let permit = service
            .acquire_job_permit(&CancellationToken::new())
            .await
            .expect("first permit");
        assert_eq!(service.n_jobs_available(), 0);

        let service_waiting = service.clone();
        let handle = tokio::spawn(async move {
            service_waiting
                .acquire_job_permit(&CancellationToken::new())
                .await
                .map(|_| ())
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        drop(permit);
        handle.await.expect("join").expect("second permit");
        assert_eq!(service.n_jobs_available(), 1);

        let _permit = service
            .acquire_job_permit(&CancellationToken::new())
            .await
            .expect("permit");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service
            .acquire_job_permit(&cancel)
            .await
            .expect_err("cancelled while waiting");
        assert!(err.is_cancelled());
    }
}
