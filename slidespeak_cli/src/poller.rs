use crate::api::{GenerateRequest, SlideApi, TaskStatus};
use crate::error::{Error, Result};
use crate::store::JobLog;
use crate::TaskState;
use std::num::NonZeroU32;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded { url: String, info_url: Option<String> },
    Failed { status: String },
    /// Only produced when a poll limit is configured.
    GaveUp { attempts: u32, last_status: String },
}

/// Waits on a single task until it reaches a terminal state.
pub struct Poller {
    interval: Duration,
    max_polls: Option<NonZeroU32>,
}

impl Poller {
    pub fn new(interval: Duration, max_polls: Option<NonZeroU32>) -> Self {
        Self { interval, max_polls }
    }

    /// Sleeps, fetches the status, records it, and repeats until the task
    /// succeeds or fails. Every observation is written to `log` before the
    /// next poll is issued, so the stored status is always the latest one.
    pub async fn run<A, F>(
        &self,
        api: &A,
        log: &JobLog,
        task_id: &str,
        description: &str,
        mut observer: F,
    ) -> Result<PollOutcome>
    where
        A: SlideApi + ?Sized,
        F: FnMut(&TaskStatus),
    {
        let mut attempts = 0u32;
        let mut last_status = TaskState::Pending.to_string();

        loop {
            if let Some(max) = self.max_polls {
                if attempts >= max.get() {
                    tracing::warn!(task_id, attempts, "giving up on task");
                    return Ok(PollOutcome::GaveUp {
                        attempts,
                        last_status,
                    });
                }
            }

            tokio::time::sleep(self.interval).await;
            attempts += 1;

            let status = api.fetch_status(task_id).await?;
            tracing::debug!(task_id, attempt = attempts, status = %status.task_status, "polled");
            log.upsert(task_id, description, &status.task_status, status.result_url())?;
            observer(&status);

            match TaskState::from(status.task_status.as_str()) {
                TaskState::Success => {
                    let url = match log.find(task_id)? {
                        Some(record) if record.has_url() => record.result_url,
                        _ => {
                            return Err(Error::Api(format!(
                                "task {task_id} succeeded without a result url"
                            )))
                        }
                    };
                    let info_url = Some(status.info_url().to_string()).filter(|u| !u.is_empty());
                    return Ok(PollOutcome::Succeeded { url, info_url });
                }
                TaskState::Failure => {
                    return Ok(PollOutcome::Failed {
                        status: status.task_status,
                    })
                }
                TaskState::Pending | TaskState::Other(_) => last_status = status.task_status,
            }
        }
    }
}

/// Submits a generation request, records it as pending, and polls it to
/// completion.
pub async fn generate<A, F>(
    api: &A,
    log: &JobLog,
    request: &GenerateRequest,
    poller: &Poller,
    observer: F,
) -> Result<(String, PollOutcome)>
where
    A: SlideApi + ?Sized,
    F: FnMut(&TaskStatus),
{
    let task_id = submit(api, log, request).await?;
    let outcome = poller
        .run(api, log, &task_id, &request.plain_text, observer)
        .await?;
    Ok((task_id, outcome))
}

/// Submits without waiting; the task is left `PENDING` in the log.
pub async fn submit<A>(api: &A, log: &JobLog, request: &GenerateRequest) -> Result<String>
where
    A: SlideApi + ?Sized,
{
    log.ensure_initialized()?;
    let submitted = api.submit(request).await?;
    log.upsert(
        &submitted.task_id,
        &request.plain_text,
        &TaskState::Pending.to_string(),
        "",
    )?;
    tracing::info!(task_id = %submitted.task_id, "presentation requested");
    Ok(submitted.task_id)
}
