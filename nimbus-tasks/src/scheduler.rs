//! Cron scheduler driving the task manager
//!
//! Each schedule entry becomes one cron job that calls `create_task` with
//! its bound arguments. A firing that lands while the previous firing's
//! task is still active is absorbed by create_task's de-duplication, so
//! overlapping runs never pile up.

use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::error::{Result, TaskError};
use crate::manager::TaskManager;
use crate::schedule::{ScheduleDocument, ScheduledJob};

/// Running cron scheduler bound to a task manager
pub struct TaskScheduler {
    scheduler: JobScheduler,
    job_count: usize,
}

impl TaskScheduler {
    /// Build a scheduler from a schedule document and start it. A job with
    /// an invalid cron expression is logged and skipped; the other jobs are
    /// unaffected.
    pub async fn start(document: ScheduleDocument, manager: Arc<TaskManager>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| TaskError::Schedule(format!("failed to create scheduler: {}", e)))?;

        let mut job_count = 0;
        for (job_id, job) in document.jobs {
            match Self::build_job(&job_id, job, manager.clone()) {
                Ok(cron_job) => {
                    scheduler
                        .add(cron_job)
                        .await
                        .map_err(|e| TaskError::Schedule(format!("failed to add job {}: {}", job_id, e)))?;
                    job_count += 1;
                }
                Err(e) => {
                    error!("Skipping schedule job {}: {}", job_id, e);
                }
            }
        }

        scheduler
            .start()
            .await
            .map_err(|e| TaskError::Schedule(format!("failed to start scheduler: {}", e)))?;

        info!("Scheduler started with {} jobs", job_count);
        Ok(Self { scheduler, job_count })
    }

    fn build_job(job_id: &str, job: ScheduledJob, manager: Arc<TaskManager>) -> Result<Job> {
        let job_id = job_id.to_string();
        let cron = job.cron.clone();

        Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let manager = manager.clone();
            let job = job.clone();
            let job_id = job_id.clone();
            Box::pin(async move {
                debug!("Schedule job {} fired", job_id);
                match manager
                    .create_task(&job.project, &job.function, job.args.clone())
                    .await
                {
                    Ok(task) => debug!("Schedule job {} -> task {}", job_id, task.task_id),
                    Err(e) => error!("Schedule job {} failed to create task: {}", job_id, e),
                }
            })
        })
        .map_err(|e| TaskError::Schedule(format!("invalid cron expression '{}': {}", cron, e)))
    }

    /// Number of jobs actually installed
    pub fn job_count(&self) -> usize {
        self.job_count
    }

    /// Stop firing; running tasks are unaffected
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.scheduler.shutdown().await {
            error!("Scheduler shutdown failed: {}", e);
        }
    }
}
