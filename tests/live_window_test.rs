use std::sync::Arc;
use std::time::{Duration, Instant};

use jobtail::job_event::{JobState, JobStatus};
use jobtail::live_feed::{FeedMessage, LiveFeed};
use jobtail::render::LineKind;
use jobtail::test_utils::test_helpers::{
    MockApi, TestScenarioBuilder, create_test_terminal, finished_at, job_event, started_at,
};
use jobtail::{App, AppConfig, run_app_with_event_source};

fn running_app(page_size: usize, page_limit: usize) -> App {
    let api = Arc::new(MockApi::new(9, JobStatus::Running));
    api.push_events(vec![job_event(1, "line 1"), job_event(2, "line 2")]);
    let config = AppConfig {
        page_size,
        page_limit,
        poll_interval: Duration::from_millis(5),
    };
    App::open(api, 9, config, Vec::new()).unwrap()
}

fn send_range(tx: &flume::Sender<FeedMessage>, counters: std::ops::RangeInclusive<u64>) {
    for c in counters {
        tx.send(FeedMessage::Event(job_event(c, &format!("line {c}"))))
            .unwrap();
    }
}

fn texts(app: &App) -> Vec<&str> {
    app.lines.iter().map(|l| l.text.as_str()).collect()
}

#[test]
fn live_events_fill_pages_and_trim_oldest_lines() {
    let mut app = running_app(2, 2);
    let (tx, rx) = flume::unbounded();
    app.attach_feed(LiveFeed::from_receiver(rx));

    send_range(&tx, 3..=6);
    assert!(app.process_feed());

    assert_eq!(app.lines.len(), 6);
    assert_eq!(app.cache.len(), 2);
    assert_eq!(app.cache.page().count, 3);
    assert_eq!(app.cache.page().current, 3);
    assert_eq!(app.cache.buffer().count, 0);
    assert_eq!(app.cache.pages()[1].lines, 4);

    send_range(&tx, 7..=10);
    app.process_feed();

    // pages 2 and 3 fell out of the window along with four lines
    assert_eq!(
        texts(&app),
        vec!["line 5", "line 6", "line 7", "line 8", "line 9", "line 10"]
    );
    assert_eq!(app.cache.len(), 2);
    assert_eq!(app.cache.page().count, 5);
    assert_eq!(app.scroll_offset, app.lines.len() - 1);
}

#[test]
fn burst_beyond_window_drops_events_and_marks_gap() {
    let mut app = running_app(2, 2);
    let (tx, rx) = flume::unbounded();
    app.attach_feed(LiveFeed::from_receiver(rx));

    send_range(&tx, 3..=6);
    app.process_feed();
    send_range(&tx, 7..=10);
    app.process_feed();

    send_range(&tx, 11..=16);
    app.process_feed();

    let shown = texts(&app);
    assert!(!shown.contains(&"line 11"));
    assert!(!shown.contains(&"line 12"));
    assert_eq!(shown.first(), Some(&"line 9"));
    assert_eq!(shown.last(), Some(&"line 16"));
    assert_eq!(app.lines.len(), 7);
    assert_eq!(app.lines[2].kind, LineKind::Missing);
}

#[test]
fn stale_events_are_ignored() {
    let mut app = running_app(2, 2);
    let (tx, rx) = flume::unbounded();
    app.attach_feed(LiveFeed::from_receiver(rx));

    send_range(&tx, 1..=3);
    app.process_feed();

    assert_eq!(texts(&app), vec!["line 1", "line 2", "line 3"]);
    assert_eq!(app.cache.result().count, 1);
}

#[test]
fn finish_message_ends_live_mode() {
    let mut app = running_app(2, 2);
    let (tx, rx) = flume::unbounded();
    app.attach_feed(LiveFeed::from_receiver(rx));
    assert!(app.search.disabled);

    tx.send(FeedMessage::Status(JobState::from(JobStatus::Successful)))
        .unwrap();
    tx.send(FeedMessage::Finished).unwrap();
    app.process_feed();

    assert!(!app.is_live());
    assert_eq!(app.job.status, JobStatus::Successful);
    assert!(!app.search.disabled);
    assert_eq!(app.notifications.current().unwrap().message, "Job successful");
}

#[test]
fn feed_errors_become_warnings() {
    let mut app = running_app(2, 2);
    let (tx, rx) = flume::unbounded();
    app.attach_feed(LiveFeed::from_receiver(rx));

    tx.send(FeedMessage::Error("HTTP 502: bad gateway".to_string()))
        .unwrap();
    app.process_feed();

    assert!(app.is_live());
    assert_eq!(app.notifications.current().unwrap().message, "HTTP 502: bad gateway");
}

#[test]
fn polling_feed_streams_a_running_job_to_completion() {
    let api = Arc::new(MockApi::new(9, JobStatus::Running));
    api.push_events(vec![job_event(1, "line 1")]);
    let config = AppConfig {
        page_size: 2,
        page_limit: 3,
        poll_interval: Duration::from_millis(5),
    };
    let mut app = App::open(api.clone(), 9, config, Vec::new()).unwrap();
    assert!(app.is_live());

    api.push_events((2..=5).map(|c| job_event(c, &format!("line {c}"))).collect());
    api.set_status(JobStatus::Successful);

    let deadline = Instant::now() + Duration::from_secs(5);
    while app.is_live() && Instant::now() < deadline {
        app.process_feed();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert!(!app.is_live());
    assert_eq!(
        texts(&app),
        vec!["line 1", "line 2", "line 3", "line 4", "line 5"]
    );
    assert_eq!(app.job.status, JobStatus::Successful);
}

fn detail<'a>(details: &'a [jobtail::details::Detail], label: &str) -> Option<&'a str> {
    details
        .iter()
        .find(|d| d.label == label)
        .map(|d| d.value.as_str())
}

#[test]
fn status_message_updates_details() {
    let mut app = running_app(2, 2);
    let (tx, rx) = flume::unbounded();
    app.attach_feed(LiveFeed::from_receiver(rx));
    assert_eq!(detail(&app.details(), "Finished"), Some("Not Finished"));

    tx.send(FeedMessage::Status(JobState {
        status: JobStatus::Failed,
        started: Some(started_at()),
        finished: Some(finished_at()),
        job_explanation: "Job terminated due to error".to_string(),
        result_traceback: String::new(),
    }))
    .unwrap();
    app.process_feed();

    assert_eq!(app.job.finished, Some(finished_at()));
    let details = app.details();
    assert_eq!(detail(&details, "Status"), Some("failed"));
    assert_ne!(detail(&details, "Finished"), Some("Not Finished"));
    assert_eq!(detail(&details, "Explanation"), Some("Job terminated due to error"));
    assert_eq!(detail(&details, "Playbook"), Some("site.yml"));
    assert!(app.is_live());
}

#[test]
fn earlier_pages_are_prepended_after_trim() {
    let api = Arc::new(MockApi::new(9, JobStatus::Running));
    api.push_events((1..=10).map(|c| job_event(c, &format!("line {c}"))).collect());
    let config = AppConfig {
        page_size: 2,
        page_limit: 2,
        poll_interval: Duration::from_millis(5),
    };
    let mut app = App::open(api.clone(), 9, config, Vec::new()).unwrap();
    let (tx, rx) = flume::unbounded();
    app.attach_feed(LiveFeed::from_receiver(rx));

    send_range(&tx, 3..=6);
    app.process_feed();
    send_range(&tx, 7..=10);
    app.process_feed();
    assert_eq!(texts(&app).first(), Some(&"line 5"));

    let mut terminal = create_test_terminal(80, 24);
    let mut events = TestScenarioBuilder::new().previous_page().quit().build();
    run_app_with_event_source(&mut terminal, &mut app, &mut events).unwrap();

    assert_eq!(texts(&app).first(), Some(&"line 3"));
    assert_eq!(app.lines.len(), 8);
    assert!(!app.follow);
    assert_eq!(app.notifications.current().unwrap().message, "Loaded 2 earlier events");
    assert_eq!(
        api.requests().last().unwrap(),
        "page_size=2&page=1&order_by=-counter&counter__lt=5"
    );

    let mut events = TestScenarioBuilder::new()
        .previous_page()
        .previous_page()
        .quit()
        .build();
    run_app_with_event_source(&mut terminal, &mut app, &mut events).unwrap();

    let expected: Vec<String> = (1..=10).map(|c| format!("line {c}")).collect();
    assert_eq!(texts(&app), expected);
    assert!(app.lines.iter().all(|l| l.kind == LineKind::Output));
    assert_eq!(
        app.notifications.current().unwrap().message,
        "At the start of the output"
    );
    assert!(app.is_live());
}
