use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use log::{debug, info, warn};

use crate::api::JobEventsApi;
use crate::job_event::{JobEvent, JobState};

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Event(JobEvent),
    /// Status, start or finish time, or failure details changed
    Status(JobState),
    Error(String),
    /// The job finished and every event has been delivered
    Finished,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub job_id: u64,
    pub events_url: String,
    /// Counter of the last event the view already has
    pub after_counter: u64,
    pub state: JobState,
    pub page_size: usize,
    pub poll_interval: Duration,
    /// When false only the job itself is polled; no events are fetched
    pub stream_events: bool,
}

/// Worker thread polling the controller for new events and status changes
pub struct LiveFeed {
    receiver: Receiver<FeedMessage>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stream_events: bool,
}

impl LiveFeed {
    pub fn start(api: Arc<dyn JobEventsApi>, config: FeedConfig) -> Self {
        let (sender, receiver) = flume::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = stop.clone();
        let stream_events = config.stream_events;

        let handle = thread::Builder::new()
            .name(format!("live-feed-{}", config.job_id))
            .spawn(move || feed_worker(api.as_ref(), config, &sender, &worker_stop))
            .map_err(|e| warn!("Failed to start live feed thread: {e}"))
            .ok();

        Self {
            receiver,
            stop,
            handle,
            stream_events,
        }
    }

    /// Build a feed around an existing channel, without a worker
    pub fn from_receiver(receiver: Receiver<FeedMessage>) -> Self {
        Self {
            receiver,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            stream_events: true,
        }
    }

    /// False for a feed that only watches the job's status
    pub fn streams_events(&self) -> bool {
        self.stream_events
    }

    /// Messages that are ready now, without blocking
    pub fn try_iter(&self) -> impl Iterator<Item = FeedMessage> + '_ {
        self.receiver.try_iter()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop and wait for the worker to exit
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn feed_worker(
    api: &dyn JobEventsApi,
    config: FeedConfig,
    sender: &Sender<FeedMessage>,
    stop: &AtomicBool,
) {
    if config.stream_events {
        info!("Live feed for job {} started after counter {}", config.job_id, config.after_counter);
    } else {
        info!("Watching status of job {}", config.job_id);
    }

    let mut tail = config.after_counter;
    let mut state = config.state.clone();
    let mut failures: u32 = 0;

    while !stop.load(Ordering::Relaxed) {
        let mut caught_up = true;
        let mut failed = false;
        // events can land after the status flips, so finishing needs one
        // more fetch once the job is known to be done
        let finished_before_fetch = state.status.is_finished();

        let fetched = if config.stream_events {
            Some(api.fetch_events_since(&config.events_url, tail, config.page_size))
        } else {
            None
        };
        match fetched {
            None => {}
            Some(Ok(mut page)) => {
                page.results.sort_by_key(|e| e.counter);
                for event in page.results {
                    if event.counter <= tail {
                        continue;
                    }
                    tail = event.counter;
                    if sender.send(FeedMessage::Event(event)).is_err() {
                        return;
                    }
                }
                caught_up = page.next.is_none();
            }
            Some(Err(e)) => {
                failed = true;
                if sender.send(FeedMessage::Error(e.to_string())).is_err() {
                    return;
                }
            }
        }

        match api.fetch_job(config.job_id) {
            Ok(record) if record.job.state() != state => {
                debug!("Job {} status {} -> {}", config.job_id, state.status, record.job.status);
                state = record.job.state();
                if sender.send(FeedMessage::Status(state.clone())).is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                failed = true;
                if sender.send(FeedMessage::Error(e.to_string())).is_err() {
                    return;
                }
            }
        }

        if finished_before_fetch && caught_up && !failed {
            info!("Job {} finished with status {}", config.job_id, state.status);
            let _ = sender.send(FeedMessage::Finished);
            return;
        }

        failures = if failed { failures.saturating_add(1) } else { 0 };
        if caught_up || failed {
            sleep_unless_stopped(backoff(config.poll_interval, failures), stop);
        }
    }

    debug!("Live feed for job {} stopped", config.job_id);
}

/// Poll interval doubled per consecutive failure, capped
fn backoff(interval: Duration, failures: u32) -> Duration {
    let factor = 1u32 << failures.min(16);
    interval.saturating_mul(factor).min(MAX_BACKOFF.max(interval))
}

fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let mut remaining = duration;
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let step = remaining.min(STOP_CHECK_INTERVAL);
        thread::sleep(step);
        remaining -= step;
    }
}
