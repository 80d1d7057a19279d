use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One job event as returned by `/api/v2/jobs/<id>/job_events/`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: u64,
    #[serde(default)]
    pub counter: u64,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub parent_uuid: Option<String>,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub event_level: u8,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub start_line: u64,
    #[serde(default)]
    pub end_line: u64,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub host: Option<u64>,
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub play: Option<String>,
}

impl JobEvent {
    /// Events whose first line carries a timestamp
    pub fn is_time_event(&self) -> bool {
        matches!(
            self.event.as_str(),
            "playbook_on_task_start" | "playbook_on_play_start" | "playbook_on_stats"
        )
    }

    /// Plays and tasks, whose output can be collapsed
    pub fn is_group(&self) -> bool {
        matches!(
            self.event.as_str(),
            "playbook_on_task_start" | "playbook_on_play_start"
        )
    }
}

/// One page of a paginated collection
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct EventPage {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub results: Vec<JobEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    New,
    #[default]
    Pending,
    Waiting,
    Running,
    Successful,
    Failed,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Waiting | JobStatus::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Failed | JobStatus::Error | JobStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Pending => "pending",
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct JobRelated {
    pub job_events: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Job {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub status: JobStatus,
    pub related: JobRelated,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub job_explanation: String,
    #[serde(default)]
    pub result_traceback: String,
}

impl Job {
    pub fn state(&self) -> JobState {
        JobState {
            status: self.status,
            started: self.started,
            finished: self.finished,
            job_explanation: self.job_explanation.clone(),
            result_traceback: self.result_traceback.clone(),
        }
    }

    pub fn apply_state(&mut self, state: JobState) {
        self.status = state.status;
        self.started = state.started;
        self.finished = state.finished;
        self.job_explanation = state.job_explanation;
        self.result_traceback = state.result_traceback;
    }
}

/// The parts of a job that change while it runs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobState {
    pub status: JobStatus,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub job_explanation: String,
    pub result_traceback: String,
}

impl From<JobStatus> for JobState {
    fn from(status: JobStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}
