pub mod test_helpers {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, TimeZone, Utc};
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use serde_json::json;

    use crate::api::{ApiError, JobEventsApi, JobRecord, PageQuery};
    use crate::event_source::{KeyCode, SimulatedEventSource, Step};
    use crate::job_event::{EventPage, Job, JobEvent, JobRelated, JobStatus};

    /// Builder for creating test scenarios with simulated user input
    pub struct TestScenarioBuilder {
        steps: Vec<Step>,
    }

    impl Default for TestScenarioBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestScenarioBuilder {
        pub fn new() -> Self {
            Self { steps: Vec::new() }
        }

        pub fn press_char(mut self, c: char) -> Self {
            self.steps.push(Step::Input(SimulatedEventSource::char_key(c)));
            self
        }

        pub fn press_ctrl_char(mut self, c: char) -> Self {
            self.steps
                .push(Step::Input(SimulatedEventSource::ctrl_char_key(c)));
            self
        }

        pub fn press(mut self, code: KeyCode) -> Self {
            self.steps.push(Step::Input(SimulatedEventSource::code_key(code)));
            self
        }

        pub fn press_enter(self) -> Self {
            self.press(KeyCode::Enter)
        }

        pub fn press_esc(self) -> Self {
            self.press(KeyCode::Esc)
        }

        pub fn press_backspace(self) -> Self {
            self.press(KeyCode::Backspace)
        }

        /// Type each character of `text`
        pub fn type_text(mut self, text: &str) -> Self {
            for c in text.chars() {
                self = self.press_char(c);
            }
            self
        }

        /// Open the search box, type the terms and submit
        pub fn search(self, terms: &str) -> Self {
            self.press_char('/').type_text(terms).press_enter()
        }

        pub fn scroll_down(mut self, times: usize) -> Self {
            for _ in 0..times {
                self = self.press_char('j');
            }
            self
        }

        pub fn scroll_up(mut self, times: usize) -> Self {
            for _ in 0..times {
                self = self.press_char('k');
            }
            self
        }

        pub fn half_screen_down(self) -> Self {
            self.press_ctrl_char('d')
        }

        pub fn half_screen_up(self) -> Self {
            self.press_ctrl_char('u')
        }

        pub fn next_page(self) -> Self {
            self.press_char('n')
        }

        pub fn previous_page(self) -> Self {
            self.press_char('p')
        }

        /// Let the app loop run `ticks` times without input
        pub fn idle(mut self, ticks: usize) -> Self {
            self.steps.push(Step::Idle(ticks));
            self
        }

        pub fn quit(self) -> Self {
            self.press_char('q')
        }

        pub fn build(self) -> SimulatedEventSource {
            SimulatedEventSource::from_steps(self.steps)
        }
    }

    pub fn create_test_terminal(width: u16, height: u16) -> Terminal<TestBackend> {
        let backend = TestBackend::new(width, height);
        Terminal::new(backend).unwrap()
    }

    /// Terminal buffer as text, trailing blanks trimmed
    pub fn capture_terminal_state(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut lines = Vec::new();

        for y in 0..buffer.area.height {
            let mut line = String::new();
            for x in 0..buffer.area.width {
                line.push_str(buffer[(x, y)].symbol());
            }
            lines.push(line.trim_end().to_string());
        }

        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        lines.join("\n")
    }

    /// A one-line `runner_on_ok` event whose line span matches its counter
    pub fn job_event(counter: u64, stdout: &str) -> JobEvent {
        JobEvent {
            id: counter + 1000,
            counter,
            uuid: Some(format!("uuid-{counter}")),
            event: "runner_on_ok".to_string(),
            stdout: Some(stdout.to_string()),
            start_line: counter.saturating_sub(1),
            end_line: counter,
            ..Default::default()
        }
    }

    /// A task or play header event opening the group `uuid`
    pub fn group_event(counter: u64, event: &str, uuid: &str, parent: Option<&str>, stdout: &str) -> JobEvent {
        JobEvent {
            uuid: Some(uuid.to_string()),
            parent_uuid: parent.map(str::to_string),
            event: event.to_string(),
            event_level: if event == "playbook_on_play_start" { 1 } else { 2 },
            ..job_event(counter, stdout)
        }
    }

    /// A host result under the task `parent`
    pub fn host_event(counter: u64, parent: &str, stdout: &str) -> JobEvent {
        JobEvent {
            parent_uuid: Some(parent.to_string()),
            event_level: 3,
            ..job_event(counter, stdout)
        }
    }

    /// Start time the mock reports once a job has run
    pub fn started_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    /// Finish time the mock reports for a finished job
    pub fn finished_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap()
    }

    /// In-memory controller for one job
    ///
    /// History pages honour `page`, `page_size`, the free-text `search` key,
    /// `task`/`host_name`/`event` filters, `counter__gt`/`counter__lt` and
    /// `order_by=-counter`. Any other key is rejected the way the controller
    /// rejects an unknown field.
    pub struct MockApi {
        job_id: u64,
        status: Mutex<JobStatus>,
        explanation: Mutex<String>,
        events: Mutex<Vec<JobEvent>>,
        failures: AtomicUsize,
        requests: Mutex<Vec<String>>,
    }

    impl MockApi {
        pub fn new(job_id: u64, status: JobStatus) -> Self {
            Self {
                job_id,
                status: Mutex::new(status),
                explanation: Mutex::new(String::new()),
                events: Mutex::new(Vec::new()),
                failures: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn events_url(&self) -> String {
            format!("/api/v2/jobs/{}/job_events/", self.job_id)
        }

        pub fn push_events(&self, events: Vec<JobEvent>) {
            let mut stored = self.events.lock().unwrap();
            stored.extend(events);
            stored.sort_by_key(|e| e.counter);
        }

        pub fn set_status(&self, status: JobStatus) {
            *self.status.lock().unwrap() = status;
        }

        pub fn set_explanation(&self, explanation: &str) {
            *self.explanation.lock().unwrap() = explanation.to_string();
        }

        /// The next `n` requests of any kind fail with a 503
        pub fn fail_next_requests(&self, n: usize) {
            self.failures.store(n, Ordering::SeqCst);
        }

        /// Query strings of every history page request so far
        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        fn check_failure(&self) -> Result<(), ApiError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ApiError::Status {
                    code: 503,
                    body: "service unavailable".to_string(),
                });
            }
            Ok(())
        }

        fn matches(event: &JobEvent, key: &str, value: &str) -> Result<bool, ApiError> {
            let contains = |field: Option<&str>| {
                field.is_some_and(|f| f.to_lowercase().contains(&value.to_lowercase()))
            };
            match key {
                "page" | "page_size" | "order_by" => Ok(true),
                "counter__gt" | "counter__lt" => {
                    let bound: u64 = value.parse().map_err(|_| {
                        ApiError::Rejected(format!("{key}: Enter a whole number."))
                    })?;
                    Ok(if key == "counter__gt" {
                        event.counter > bound
                    } else {
                        event.counter < bound
                    })
                }
                "search" => Ok(contains(event.stdout.as_deref())),
                "task__icontains" => Ok(contains(event.task.as_deref())),
                "host_name__icontains" => Ok(contains(event.host_name.as_deref())),
                "event" => Ok(event.event == value),
                "not__event" => Ok(event.event != value),
                other => Err(ApiError::Rejected(format!("invalid field name: {other}"))),
            }
        }
    }

    impl JobEventsApi for MockApi {
        fn fetch_job(&self, job_id: u64) -> Result<JobRecord, ApiError> {
            self.check_failure()?;
            if job_id != self.job_id {
                return Err(ApiError::Status {
                    code: 404,
                    body: "Not found.".to_string(),
                });
            }
            let status = *self.status.lock().unwrap();
            let explanation = self.explanation.lock().unwrap().clone();
            let started = (status == JobStatus::Running || status.is_finished()).then(started_at);
            let finished = status.is_finished().then(finished_at);
            let job = Job {
                id: job_id,
                name: "deploy".to_string(),
                status,
                related: JobRelated {
                    job_events: self.events_url(),
                },
                started,
                finished,
                job_explanation: explanation.clone(),
                result_traceback: String::new(),
            };
            let model = json!({
                "id": job_id,
                "name": "deploy",
                "status": status.as_str(),
                "playbook": "site.yml",
                "job_type": "run",
                "started": started.map(|t| t.to_rfc3339()),
                "finished": finished.map(|t| t.to_rfc3339()),
                "job_explanation": explanation,
                "result_traceback": "",
                "related": { "job_events": self.events_url() },
            });
            Ok(JobRecord { job, model })
        }

        fn fetch_events(&self, events_url: &str, query: &PageQuery) -> Result<EventPage, ApiError> {
            self.check_failure()?;
            let queryset = query.to_queryset();
            self.requests
                .lock()
                .unwrap()
                .push(queryset.to_query_string());

            let events = self.events.lock().unwrap();
            let mut filtered = Vec::new();
            for event in events.iter() {
                let mut keep = true;
                for (key, value) in queryset.pairs() {
                    keep &= Self::matches(event, key, value)?;
                }
                if keep {
                    filtered.push(event.clone());
                }
            }
            if queryset.get("order_by") == Some("-counter") {
                filtered.reverse();
            }

            let page_size = queryset
                .get("page_size")
                .and_then(|v| v.parse().ok())
                .unwrap_or(query.page_size)
                .max(1);
            let start = (query.page.saturating_sub(1) as usize) * page_size;
            let end = (start + page_size).min(filtered.len());
            let results = filtered.get(start..end).map(<[_]>::to_vec).unwrap_or_default();

            Ok(EventPage {
                count: filtered.len() as u64,
                next: (end < filtered.len()).then(|| format!("{events_url}?page={}", query.page + 1)),
                previous: (query.page > 1).then(|| format!("{events_url}?page={}", query.page - 1)),
                results,
            })
        }

        fn fetch_events_since(
            &self,
            events_url: &str,
            counter: u64,
            page_size: usize,
        ) -> Result<EventPage, ApiError> {
            self.check_failure()?;
            let events = self.events.lock().unwrap();
            let newer: Vec<JobEvent> = events
                .iter()
                .filter(|e| e.counter > counter)
                .cloned()
                .collect();
            let more = newer.len() > page_size;
            Ok(EventPage {
                count: newer.len() as u64,
                next: more.then(|| format!("{events_url}?page=2")),
                previous: None,
                results: newer.into_iter().take(page_size).collect(),
            })
        }
    }
}
