use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cds::ArchiveClient;
use crate::config::DEFAULT_MAX_ATTEMPTS;
use crate::error::FetchError;
use crate::fs_util::{discard, ensure_dir, partial_path, promote};
use crate::grid::AcquisitionTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Skip,
    Attempt(u32),
    Done,
    Exhausted,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Attempt(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

#[derive(Debug, Clone)]
pub struct DownloadAttempt {
    pub index: u32,
    pub outcome: AttemptOutcome,
}

pub fn initial_state(destination_exists: bool) -> TaskState {
    if destination_exists {
        TaskState::Skip
    } else {
        TaskState::Attempt(0)
    }
}

pub fn next_state(state: TaskState, outcome: &AttemptOutcome, max_attempts: u32) -> TaskState {
    match (state, outcome) {
        (TaskState::Attempt(_), AttemptOutcome::Success) => TaskState::Done,
        (TaskState::Attempt(index), AttemptOutcome::Failure(_)) => {
            if index + 1 < max_attempts {
                TaskState::Attempt(index + 1)
            } else {
                TaskState::Exhausted
            }
        }
        (terminal, _) => terminal,
    }
}

pub fn retry_backoff(delay: Duration, index: u32) -> Duration {
    delay.checked_mul(index).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Skipped { task: String },
    Started { task: String },
    AttemptFailed { task: String, attempt: u32, cause: String },
    Succeeded { task: String, attempt: u32, elapsed: Duration },
    Exhausted { task: String, attempts: u32 },
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Skipped,
    Pending,
    Downloaded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub year: i32,
    pub month: u8,
    pub path: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|task| task.status == status).count()
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::ZERO,
        }
    }
}

pub fn plan(tasks: &[AcquisitionTask]) -> RunReport {
    let started_at = Utc::now();
    let tasks = tasks
        .iter()
        .map(|task| {
            let status = match initial_state(task.destination.as_std_path().exists()) {
                TaskState::Skip => TaskStatus::Skipped,
                _ => TaskStatus::Pending,
            };
            TaskReport {
                year: task.year,
                month: task.month.number(),
                path: task.destination.to_string(),
                status,
                attempts: 0,
                last_error: None,
            }
        })
        .collect();
    RunReport {
        started_at,
        finished_at: Utc::now(),
        tasks,
    }
}

pub struct Orchestrator<C: ArchiveClient> {
    client: C,
    dataset: String,
    options: RunOptions,
}

impl<C: ArchiveClient> Orchestrator<C> {
    pub fn new(client: C, dataset: impl Into<String>, options: RunOptions) -> Self {
        Self {
            client,
            dataset: dataset.into(),
            options,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn run(
        &self,
        tasks: &[AcquisitionTask],
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, FetchError> {
        let started_at = Utc::now();

        let dirs: BTreeSet<&Utf8Path> = tasks
            .iter()
            .filter_map(|task| task.destination.parent())
            .collect();
        for dir in dirs {
            ensure_dir(dir)?;
        }

        let reports = tasks
            .iter()
            .map(|task| self.run_task(task, sink))
            .collect();

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            tasks: reports,
        })
    }

    fn run_task(&self, task: &AcquisitionTask, sink: &dyn ProgressSink) -> TaskReport {
        let label = task.label();
        let partial = partial_path(&task.destination);
        let started = Instant::now();

        let mut state = initial_state(task.destination.as_std_path().exists());
        let mut attempts = 0u32;
        let mut last_error = None;

        let status = loop {
            match state {
                TaskState::Skip => {
                    info!(task = %label, path = %task.destination, "skipping, already exists");
                    sink.event(ProgressEvent::Skipped {
                        task: label.clone(),
                    });
                    break TaskStatus::Skipped;
                }
                TaskState::Attempt(index) => {
                    if index == 0 {
                        info!(task = %label, path = %task.destination, "starting download");
                        sink.event(ProgressEvent::Started {
                            task: label.clone(),
                        });
                    } else if !self.options.retry_delay.is_zero() {
                        thread::sleep(retry_backoff(self.options.retry_delay, index));
                    }

                    let attempt = self.attempt(task, &partial, index);
                    attempts += 1;
                    if let AttemptOutcome::Failure(cause) = &attempt.outcome {
                        warn!(
                            task = %label,
                            attempt = attempt.index + 1,
                            max_attempts = self.options.max_attempts,
                            "download failed: {cause}"
                        );
                        if let Err(err) = discard(&partial) {
                            error!(task = %label, "could not remove partial artifact: {err}");
                        }
                        sink.event(ProgressEvent::AttemptFailed {
                            task: label.clone(),
                            attempt: attempt.index,
                            cause: cause.clone(),
                        });
                        last_error = Some(cause.clone());
                    }
                    state = next_state(state, &attempt.outcome, self.options.max_attempts);
                }
                TaskState::Done => {
                    info!(task = %label, path = %task.destination, "download successful");
                    sink.event(ProgressEvent::Succeeded {
                        task: label.clone(),
                        attempt: attempts - 1,
                        elapsed: started.elapsed(),
                    });
                    break TaskStatus::Downloaded;
                }
                TaskState::Exhausted => {
                    warn!(task = %label, attempts, "download failed permanently");
                    sink.event(ProgressEvent::Exhausted {
                        task: label.clone(),
                        attempts,
                    });
                    break TaskStatus::Failed;
                }
            }
        };

        TaskReport {
            year: task.year,
            month: task.month.number(),
            path: task.destination.to_string(),
            status,
            attempts,
            last_error,
        }
    }

    fn attempt(&self, task: &AcquisitionTask, partial: &Utf8Path, index: u32) -> DownloadAttempt {
        let result = self
            .client
            .retrieve(&self.dataset, &task.request, partial.as_std_path())
            .and_then(|()| promote(partial, &task.destination));
        let outcome = match result {
            Ok(()) => AttemptOutcome::Success,
            Err(err) => AttemptOutcome::Failure(err.to_string()),
        };
        DownloadAttempt { index, outcome }
    }
}
