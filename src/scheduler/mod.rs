//! Scheduler (§4.E): a single long-running task that invokes the
//! MergeEngine at user-configured times, enforcing single-flight execution,
//! cooperative-then-forceful cancellation, and stuck-job recovery on startup.

pub mod cron;
pub mod error;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub use error::SchedulerError;

use crate::archive::ArchiveManager;
use crate::config::Paths;
use crate::merge::{MergeEngine, MergeReport, MergeRequest};
use crate::notifier::{NotifyPayload, Notifier};
use crate::store::{JobFinish, Store};

/// Grace period between a cooperative cancel request and force-failing the
/// job record (§4.E "Cancellation").
const FORCEFUL_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on how long `tick()` sleeps before re-reading settings, even
/// with nothing scheduled (§4.E step 4).
const MAX_WAIT: Duration = Duration::from_secs(60);

struct RunningJob {
    job_id: String,
    cancel: CancellationToken,
    done: Arc<Notify>,
}

pub struct Scheduler {
    store: Arc<Store>,
    merge_engine: Arc<MergeEngine>,
    archive_manager: Arc<ArchiveManager>,
    notifier: Notifier,
    paths: Paths,
    /// Zone `merge_time` is read in before cron evaluation (§3, §6 `TZ`).
    tz: chrono_tz::Tz,
    merge_lock: Arc<tokio::sync::Mutex<()>>,
    running_job: Mutex<Option<RunningJob>>,
    next_run: Mutex<Option<DateTime<Utc>>>,
    wake: Notify,
}

impl Scheduler {
    /// `merge_lock` is owned by the caller (`AppContext`) and shared with the
    /// Facade, so `merge_execute`/`job_execute_now` honour the same
    /// single-flight guarantee as the scheduled path (§5 I1).
    pub fn new(
        store: Arc<Store>,
        merge_engine: Arc<MergeEngine>,
        archive_manager: Arc<ArchiveManager>,
        paths: Paths,
        tz: chrono_tz::Tz,
        merge_lock: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        Self {
            store,
            merge_engine,
            archive_manager,
            notifier: Notifier::new(),
            paths,
            tz,
            merge_lock,
            running_job: Mutex::new(None),
            next_run: Mutex::new(None),
            wake: Notify::new(),
        }
    }

    /// The most recently computed next scheduled run, if any (§6 job-status use).
    pub fn next_scheduled_run(&self) -> Option<DateTime<Utc>> {
        *self.next_run.lock().expect("next_run mutex poisoned")
    }

    pub fn is_busy(&self) -> bool {
        self.merge_lock.try_lock().is_err()
    }

    /// Acquire the single-flight merge lock without running a full scheduled
    /// job (§4.G `merge_execute`: "honours I1 against the Scheduler" but does
    /// not itself create a Job row — that is `job_execute_now`'s job).
    pub fn try_acquire_merge_lock(&self) -> Result<tokio::sync::OwnedMutexGuard<()>, SchedulerError> {
        self.merge_lock.clone().try_lock_owned().map_err(|_| SchedulerError::Busy)
    }

    /// Wake the scheduler loop immediately, e.g. after settings are changed
    /// through the Facade (§4.E step 4 "recompute on wake").
    pub fn notify_settings_changed(&self) {
        self.wake.notify_waiters();
    }

    /// Request cancellation of the in-progress merge, if any. Cooperative
    /// cancellation is signalled immediately; if the merge has not exited
    /// within `FORCEFUL_CANCEL_GRACE`, the Job row is force-marked failed
    /// (§4.E "Cancellation").
    pub fn request_cancel(&self) -> bool {
        let job = self.running_job.lock().expect("running_job mutex poisoned").take();
        let Some(job) = job else {
            return false;
        };

        job.cancel.cancel();

        let store = self.store.clone();
        let job_id = job.job_id.clone();
        let done = job.done.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = done.notified() => {}
                _ = tokio::time::sleep(FORCEFUL_CANCEL_GRACE) => {
                    tracing::warn!(job_id = %job_id, "scheduler: forceful cancel after grace period");
                    let _ = store.finish_job(
                        &job_id,
                        JobFinish {
                            status: Some("failed".to_string()),
                            completed_at: Some(Utc::now().to_rfc3339()),
                            error_message: Some("Cancelled by operator".to_string()),
                            ..Default::default()
                        },
                    );
                }
            }
        });

        true
    }

    /// Run a merge immediately, outside the schedule (§4.G `merge_execute`).
    /// Returns `BusyError` if a merge is already in flight (§8 P5).
    pub async fn execute_now(&self) -> Result<MergeReport, SchedulerError> {
        let guard = self.merge_lock.clone().try_lock_owned().map_err(|_| SchedulerError::Busy)?;

        let settings = self.store.load_settings()?;
        let sources = settings.selected_sources(&self.paths)?;
        let channels = self.store.list_selected_channels()?;

        if sources.is_empty() {
            return Err(SchedulerError::Configuration("no sources selected".to_string()));
        }
        if channels.is_empty() {
            return Err(SchedulerError::Configuration("no channels selected".to_string()));
        }

        self.run_merge_job(&settings, sources, channels, guard).await
    }

    /// The scheduler's main loop: recover stuck jobs, then tick forever
    /// (§4.E steps 1-4).
    pub async fn run(self: Arc<Self>) {
        match self.store.mark_stuck_jobs_failed(Utc::now(), "Stuck job recovered on startup") {
            Ok(0) => {}
            Ok(n) => tracing::warn!(count = n, "scheduler: recovered stuck job(s) on startup"),
            Err(e) => tracing::error!(error = %e, "scheduler: stuck-job recovery failed"),
        }

        loop {
            self.tick().await;
        }
    }

    /// One iteration: recompute the next run from current settings, sleep
    /// until due (capped at `MAX_WAIT`), and execute if due (§4.E step 4).
    async fn tick(&self) {
        let settings = match self.store.load_settings() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "scheduler: failed to load settings");
                self.wait(MAX_WAIT).await;
                return;
            }
        };

        let schedule = match settings.merge_schedule(&self.paths) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "scheduler: invalid merge_schedule");
                self.wait(MAX_WAIT).await;
                return;
            }
        };
        let merge_time = settings.merge_time(&self.paths);
        let merge_days = match settings.merge_days(&self.paths) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "scheduler: invalid merge_days");
                self.wait(MAX_WAIT).await;
                return;
            }
        };

        let expression = match cron::build_expression(schedule, &merge_time, &merge_days) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(error = %e, "scheduler: invalid schedule, will re-check");
                self.wait(MAX_WAIT).await;
                return;
            }
        };

        let now = Utc::now();
        let next = match cron::next_run(&expression, now, self.tz) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "scheduler: could not compute next run");
                self.wait(MAX_WAIT).await;
                return;
            }
        };
        *self.next_run.lock().expect("next_run mutex poisoned") = Some(next);

        let until_due = (next - now).to_std().unwrap_or(Duration::ZERO);
        let sleep_for = until_due.min(MAX_WAIT);
        self.wait(sleep_for).await;

        if Utc::now() < next {
            return;
        }

        let guard = match self.merge_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!("scheduler: due run skipped, a merge is already in progress");
                return;
            }
        };

        let sources = match settings.selected_sources(&self.paths) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "scheduler: invalid selected_sources");
                return;
            }
        };
        let channels = match self.store.list_selected_channels() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "scheduler: failed to load selected channels");
                return;
            }
        };

        if sources.is_empty() || channels.is_empty() {
            tracing::debug!("scheduler: due run skipped, no sources or channels configured");
            return;
        }

        if let Err(e) = self.run_merge_job(&settings, sources, channels, guard).await {
            tracing::error!(error = %e, "scheduler: scheduled merge failed");
        }
    }

    async fn wait(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }

    /// Run one merge to completion, recording the Job row throughout and
    /// notifying on the outcome (§4.E steps 6-11).
    async fn run_merge_job(
        &self,
        settings: &crate::store::Settings,
        sources: Vec<String>,
        channels: std::collections::HashSet<String>,
        _guard: tokio::sync::OwnedMutexGuard<()>,
    ) -> Result<MergeReport, SchedulerError> {
        let started_at = Utc::now();
        let job_id = format!("scheduled_merge_{}", started_at.format("%Y%m%d_%H%M%S"));
        self.store.create_job(&job_id, started_at)?;
        self.store.set_job_running(&job_id)?;

        let cancel = CancellationToken::new();
        let done = Arc::new(Notify::new());
        *self.running_job.lock().expect("running_job mutex poisoned") = Some(RunningJob {
            job_id: job_id.clone(),
            cancel: cancel.clone(),
            done: done.clone(),
        });

        let output_filename = settings.output_filename(&self.paths);
        let feed_type = settings.selected_feed_type(&self.paths)?;
        let request = MergeRequest {
            sources,
            channels: channels.clone(),
            timeframe: settings.merge_timeframe(&self.paths),
            feed_type,
            output_filename: output_filename.clone(),
            download_timeout: Duration::from_secs(settings.download_timeout_secs(&self.paths)),
            merge_timeout: Duration::from_secs(settings.merge_timeout_secs(&self.paths)),
        };

        let merge_result = self.merge_engine.run(request, cancel).await;
        done.notify_waiters();
        *self.running_job.lock().expect("running_job mutex poisoned") = None;

        let outcome = match merge_result {
            Ok(report) => self.finish_success(&job_id, &output_filename, report).await,
            Err(err) => Err(err.into()),
        };

        match &outcome {
            Ok(report) => {
                self.store.finish_job(
                    &job_id,
                    JobFinish {
                        status: Some("success".to_string()),
                        completed_at: Some(Utc::now().to_rfc3339()),
                        merge_filename: Some(output_filename.clone()),
                        channels_included: Some(report.channels_included as i32),
                        programs_included: Some(report.programs_included as i32),
                        file_size: Some(report.file_size_human.clone()),
                        peak_memory_mb: Some(report.peak_memory_mb),
                        days_included: Some(report.days_included as i32),
                        execution_time_seconds: Some(report.execution_time_seconds),
                        ..Default::default()
                    },
                )?;

                if let Some(threshold) = settings.channel_drop_threshold(&self.paths) {
                    let requested = channels.len();
                    if requested > 0 {
                        let dropped_pct = 100 * (requested.saturating_sub(report.channels_included)) / requested;
                        if dropped_pct as u8 > threshold {
                            tracing::warn!(
                                requested,
                                included = report.channels_included,
                                dropped_pct,
                                threshold,
                                "scheduler: channel drop threshold exceeded"
                            );
                        }
                    }
                }

                if let Some(webhook) = settings.discord_webhook(&self.paths) {
                    self.notifier
                        .send(
                            &webhook,
                            NotifyPayload::Success {
                                filename: output_filename.clone(),
                                created: Utc::now().to_rfc3339(),
                                size: report.file_size_human.clone(),
                                channels: report.channels_included,
                                programs: report.programs_included,
                                days: report.days_included,
                                memory_mb: report.peak_memory_mb,
                                duration_seconds: report.execution_time_seconds,
                            },
                        )
                        .await;
                }
            }
            Err(err) => {
                let status = if matches!(err, SchedulerError::Merge(crate::merge::MergeError::MergeTimeout(_))) {
                    "timeout"
                } else {
                    "failed"
                };
                self.store.finish_job(
                    &job_id,
                    JobFinish {
                        status: Some(status.to_string()),
                        completed_at: Some(Utc::now().to_rfc3339()),
                        error_message: Some(err.to_string()),
                        ..Default::default()
                    },
                )?;

                if let Some(webhook) = settings.discord_webhook(&self.paths) {
                    self.notifier
                        .send(
                            &webhook,
                            NotifyPayload::Failure { error_message: err.to_string(), job_id: job_id.clone() },
                        )
                        .await;
                }
            }
        }

        outcome
    }

    /// Promote the merged temp file into place once the merge itself has
    /// succeeded (§4.E step 9, §4.D `promote`).
    async fn finish_success(
        &self,
        job_id: &str,
        output_filename: &str,
        report: MergeReport,
    ) -> Result<MergeReport, SchedulerError> {
        tracing::info!(
            job_id,
            channels = report.channels_included,
            programs = report.programs_included,
            "scheduler: merge succeeded, promoting"
        );
        self.archive_manager
            .promote(
                output_filename,
                report.channels_included as i32,
                report.programs_included as i32,
                report.days_included as i32,
            )
            .await?;
        Ok(report)
    }
}
