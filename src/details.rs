use chrono::{DateTime, Local, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

use crate::job_event::Job;
use crate::render::ELLIPSIS;
use crate::resource::PagedResource;

/// Characters of a long detail shown until it is expanded
pub const DETAIL_LIMIT: usize = 150;

const PREVIOUS_TASK_FAILED: &str = "Previous Task Failed";

#[derive(Debug, Clone, PartialEq)]
pub struct Detail {
    pub label: &'static str,
    pub value: String,
}

impl Detail {
    fn new(label: &'static str, value: impl Into<String>) -> Self {
        Self {
            label,
            value: value.into(),
        }
    }

    pub fn has_more(&self) -> bool {
        self.value.chars().count() > DETAIL_LIMIT
    }

    /// The value cut to `DETAIL_LIMIT` characters unless `expanded`
    pub fn display(&self, expanded: bool) -> String {
        if expanded || !self.has_more() {
            return self.value.clone();
        }
        let mut less: String = self.value.chars().take(DETAIL_LIMIT).collect();
        less.push_str(ELLIPSIS);
        less
    }
}

/// Rows of the details pane. Status and timing come from `job`, which live
/// status messages keep current; static fields come from the job model.
pub fn job_details(resource: &impl PagedResource, job: &Job) -> Vec<Detail> {
    let mut details = vec![
        Detail::new("Status", job.status.as_str()),
        Detail::new("Started", format_time(job.started).unwrap_or_else(|| "Not Started".to_string())),
        Detail::new("Finished", format_time(job.finished).unwrap_or_else(|| "Not Finished".to_string())),
    ];

    for (label, path) in [("Job Type", "job_type"), ("Playbook", "playbook")] {
        if let Some(value) = resource.model_get(path).and_then(Value::as_str) {
            if !value.is_empty() {
                details.push(Detail::new(label, value));
            }
        }
    }

    if !job.job_explanation.is_empty() {
        details.push(Detail::new("Explanation", explanation(&job.job_explanation)));
    }
    if !job.result_traceback.is_empty() {
        details.push(Detail::new("Error Details", job.result_traceback.trim_end()));
    }

    details
}

fn format_time(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
}

#[derive(Deserialize)]
struct FailedTask {
    job_type: String,
    job_name: String,
    job_id: Value,
}

/// Workflow nodes explain a skipped job with the failed task as JSON
fn explanation(raw: &str) -> String {
    let Some((prefix, task)) = raw.split_once(':') else {
        return raw.to_string();
    };
    if prefix != PREVIOUS_TASK_FAILED {
        return raw.to_string();
    }

    match serde_json::from_str::<FailedTask>(task.trim()) {
        Ok(task) => {
            let id = match &task.job_id {
                Value::String(id) => id.clone(),
                other => other.to_string(),
            };
            format!("{} failed for {} with ID {id}", task.job_type, task.job_name)
        }
        Err(e) => {
            debug!("Unreadable failed task in explanation: {e}");
            raw.to_string()
        }
    }
}
