use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::Local;
use regex::Regex;

use crate::job_event::JobEvent;

// https://github.com/chalk/ansi-regex
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"[\x1b\x{9b}][\[\]()#;?]*(?:(?:(?:[a-zA-Z\d]*(?:;[a-zA-Z\d]*)*)?\x07)",
        r"|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PRZcf-ntqry=><~]))"
    ))
    .expect("Failed to compile ANSI escape regex")
});

pub const ELLIPSIS: &str = "…";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Output,
    /// Placeholder for events skipped between two rendered ones
    Missing,
    /// The event claims more lines than its stdout holds
    Truncated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputLine {
    pub number: Option<u64>,
    pub text: String,
    pub time: Option<String>,
    pub kind: LineKind,
    /// Counter of the event the line came from
    pub counter: Option<u64>,
    pub level: u8,
    /// Enclosing task and play uuids, nearest first
    pub parents: Vec<String>,
    /// Set on the header line of a play or task; the group's uuid
    pub group: Option<String>,
}

impl OutputLine {
    fn output(number: u64, text: &str, source: &LineSource) -> Self {
        Self {
            number: Some(number),
            text: text.to_string(),
            time: None,
            kind: LineKind::Output,
            counter: Some(source.counter),
            level: source.level,
            parents: source.parents.clone(),
            group: None,
        }
    }

    fn missing() -> Self {
        Self {
            number: None,
            text: ELLIPSIS.to_string(),
            time: None,
            kind: LineKind::Missing,
            counter: None,
            level: 0,
            parents: Vec::new(),
            group: None,
        }
    }

    fn truncated(source: &LineSource) -> Self {
        Self {
            number: None,
            text: ELLIPSIS.to_string(),
            time: None,
            kind: LineKind::Truncated,
            counter: Some(source.counter),
            level: source.level,
            parents: source.parents.clone(),
            group: None,
        }
    }
}

/// What every line of one event shares
struct LineSource {
    counter: u64,
    level: u8,
    parents: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendered {
    pub lines: Vec<OutputLine>,
    pub count: usize,
}

impl Rendered {
    fn push(&mut self, line: OutputLine) {
        self.lines.push(line);
        self.count += 1;
    }
}

/// Lines are numbered from each event's `start_line`, so numbering matches
/// the controller's stdout even when a search hides events.
#[derive(Debug, Default)]
pub struct OutputRenderer {
    head: u64,
    /// `start_line` of the head event
    head_start: u64,
    tail: u64,
    /// `end_line` of the tail event, to tell real gaps from filtered-out noise
    tail_end: u64,
    /// Ancestor chain of every play and task seen, keyed by uuid
    groups: HashMap<String, Vec<String>>,
}

impl OutputRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render events newer than the current tail, in counter order
    pub fn append(&mut self, events: Vec<JobEvent>) -> Rendered {
        let mut events: Vec<JobEvent> = events
            .into_iter()
            .filter(|e| self.tail == 0 || e.counter > self.tail)
            .collect();
        events.sort_by_key(|e| e.counter);

        let mut rendered = Rendered::default();
        for event in &events {
            if self.tail != 0 && is_gap(self.tail, self.tail_end, event.counter, event.start_line) {
                rendered.push(OutputLine::missing());
            }
            self.transform_event(event, &mut rendered);
        }
        rendered
    }

    /// Render events older than the current head. The lines go in front of
    /// everything rendered so far.
    pub fn prepend(&mut self, events: Vec<JobEvent>) -> Rendered {
        let (head, head_start) = (self.head, self.head_start);
        let mut events: Vec<JobEvent> = events
            .into_iter()
            .filter(|e| head == 0 || e.counter < head)
            .collect();
        events.sort_by_key(|e| e.counter);

        let mut rendered = Rendered::default();
        let mut previous: Option<(u64, u64)> = None;
        for event in &events {
            if let Some((counter, end_line)) = previous {
                if is_gap(counter, end_line, event.counter, event.start_line) {
                    rendered.push(OutputLine::missing());
                }
            }
            if self.transform_event(event, &mut rendered) {
                previous = Some((event.counter, event.end_line));
            }
        }
        if let Some((counter, end_line)) = previous {
            if head != 0 && is_gap(counter, end_line, head, head_start) {
                rendered.push(OutputLine::missing());
            }
        }
        rendered
    }

    /// Returns false when the event has no stdout and was skipped
    fn transform_event(&mut self, event: &JobEvent, rendered: &mut Rendered) -> bool {
        let Some(stdout) = event.stdout.as_deref() else {
            return false;
        };

        self.track(event);
        let source = LineSource {
            counter: event.counter,
            level: event.event_level,
            parents: self.parents_of(event),
        };
        if event.is_group() {
            if let Some(uuid) = &event.uuid {
                self.groups.insert(uuid.clone(), source.parents.clone());
            }
        }

        let stdout = strip_ansi(stdout);
        let lines: Vec<&str> = stdout
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect();

        // A zero-length stdout still splits into one empty line; it renders nothing
        if lines.len() == 1 && lines[0].is_empty() {
            return true;
        }

        let mut time = event
            .is_time_event()
            .then(|| event.created)
            .flatten()
            .map(|created| created.with_timezone(&Local).format("%H:%M:%S").to_string());
        let mut group = event.is_group().then(|| event.uuid.clone()).flatten();

        let mut number = event.start_line;
        for line in &lines {
            number += 1;
            let mut output = OutputLine::output(number, line, &source);
            if !line.is_empty() {
                output.time = time.take();
                output.group = group.take();
            }
            rendered.push(output);
        }

        let claimed = event.end_line.saturating_sub(event.start_line);
        if claimed > lines.len() as u64 {
            rendered.push(OutputLine::truncated(&source));
        }
        true
    }

    fn parents_of(&self, event: &JobEvent) -> Vec<String> {
        let Some(parent) = &event.parent_uuid else {
            return Vec::new();
        };
        let mut parents = vec![parent.clone()];
        if let Some(ancestors) = self.groups.get(parent) {
            parents.extend(ancestors.iter().cloned());
        }
        parents
    }

    fn track(&mut self, event: &JobEvent) {
        if event.counter == 0 {
            return;
        }
        if self.head == 0 || event.counter < self.head {
            self.head = event.counter;
            self.head_start = event.start_line;
        }
        if self.tail == 0 || event.counter > self.tail {
            self.tail = event.counter;
            self.tail_end = event.end_line;
        }
    }

    /// Move the head forward after the oldest lines were dropped from the view
    pub fn set_head(&mut self, counter: u64, start_line: u64) {
        self.head = counter;
        self.head_start = start_line;
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.head_start = 0;
        self.tail = 0;
        self.tail_end = 0;
        self.groups.clear();
    }

    pub fn head_counter(&self) -> u64 {
        self.head
    }

    pub fn tail_counter(&self) -> u64 {
        self.tail
    }
}

/// Events are adjacent when counters follow on or line numbers continue
fn is_gap(before: u64, before_end: u64, after: u64, after_start: u64) -> bool {
    after != before + 1 && before_end != after_start
}

pub fn strip_ansi(input: &str) -> std::borrow::Cow<'_, str> {
    ANSI_RE.replace_all(input, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(counter: u64, stdout: &str, start_line: u64, end_line: u64) -> JobEvent {
        JobEvent {
            id: counter + 100,
            counter,
            event: "runner_on_ok".to_string(),
            stdout: Some(stdout.to_string()),
            start_line,
            end_line,
            ..Default::default()
        }
    }

    fn texts(rendered: &Rendered) -> Vec<&str> {
        rendered.lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn strips_ansi_and_numbers_lines() {
        let mut renderer = OutputRenderer::new();

        let rendered = renderer.append(vec![event(
            1,
            "\u{1b}[0;32mok: [web1]\u{1b}[0m\r\nchanged: [web2]",
            4,
            6,
        )]);

        assert_eq!(texts(&rendered), vec!["ok: [web1]", "changed: [web2]"]);
        assert_eq!(rendered.lines[0].number, Some(5));
        assert_eq!(rendered.lines[1].number, Some(6));
        assert_eq!(rendered.count, 2);
    }

    #[test]
    fn empty_stdout_renders_nothing_but_advances_tail() {
        let mut renderer = OutputRenderer::new();

        let rendered = renderer.append(vec![event(1, "", 0, 0)]);

        assert_eq!(rendered.count, 0);
        assert_eq!(renderer.tail_counter(), 1);
    }

    #[test]
    fn missing_stdout_is_skipped() {
        let mut renderer = OutputRenderer::new();
        let mut e = event(1, "", 0, 0);
        e.stdout = None;

        assert_eq!(renderer.append(vec![e]).count, 0);
        assert_eq!(renderer.tail_counter(), 0);
    }

    #[test]
    fn sorts_by_counter_and_skips_rendered() {
        let mut renderer = OutputRenderer::new();
        renderer.append(vec![event(2, "b", 1, 2), event(1, "a", 0, 1)]);

        let rendered = renderer.append(vec![event(2, "b", 1, 2), event(3, "c", 2, 3)]);

        assert_eq!(texts(&rendered), vec!["c"]);
        assert_eq!(renderer.head_counter(), 1);
        assert_eq!(renderer.tail_counter(), 3);
    }

    #[test]
    fn gap_inserts_missing_row() {
        let mut renderer = OutputRenderer::new();
        renderer.append(vec![event(1, "a", 0, 1)]);

        let rendered = renderer.append(vec![event(5, "e", 9, 10)]);

        assert_eq!(rendered.lines[0].kind, LineKind::Missing);
        assert_eq!(texts(&rendered), vec![ELLIPSIS, "e"]);
        assert_eq!(rendered.count, 2);
    }

    #[test]
    fn gap_without_lost_lines_has_no_placeholder() {
        let mut renderer = OutputRenderer::new();
        renderer.append(vec![event(1, "a", 0, 1)]);

        let rendered = renderer.append(vec![event(4, "d", 1, 2)]);

        assert_eq!(texts(&rendered), vec!["d"]);
    }

    #[test]
    fn truncated_event_gets_trailing_row() {
        let mut renderer = OutputRenderer::new();

        let rendered = renderer.append(vec![event(1, "first\r\nsecond", 0, 40)]);

        assert_eq!(rendered.count, 3);
        assert_eq!(rendered.lines[2].kind, LineKind::Truncated);
    }

    #[test]
    fn task_start_carries_timestamp_on_first_text_line() {
        let mut renderer = OutputRenderer::new();
        let mut e = event(1, "\r\nTASK [setup] ***", 0, 2);
        e.event = "playbook_on_task_start".to_string();
        e.created = Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 2, 3).unwrap());

        let rendered = renderer.append(vec![e]);

        assert_eq!(rendered.lines[0].time, None);
        let time = rendered.lines[1].time.as_deref().unwrap();
        assert_eq!(time.len(), 8);
        assert!(time.ends_with(":03"));
    }

    fn grouped(counter: u64, kind: &str, uuid: &str, parent: Option<&str>, level: u8, stdout: &str) -> JobEvent {
        JobEvent {
            event: kind.to_string(),
            uuid: Some(uuid.to_string()),
            parent_uuid: parent.map(str::to_string),
            event_level: level,
            ..event(counter, stdout, counter - 1, counter)
        }
    }

    #[test]
    fn lines_carry_their_play_and_task() {
        let mut renderer = OutputRenderer::new();

        let rendered = renderer.append(vec![
            grouped(1, "playbook_on_play_start", "play", None, 1, "PLAY [all]"),
            grouped(2, "playbook_on_task_start", "task", Some("play"), 2, "TASK [ping]"),
            grouped(3, "runner_on_ok", "r1", Some("task"), 3, "ok: [web1]"),
        ]);

        assert_eq!(rendered.lines[0].group.as_deref(), Some("play"));
        assert!(rendered.lines[0].parents.is_empty());
        assert_eq!(rendered.lines[1].group.as_deref(), Some("task"));
        assert_eq!(rendered.lines[1].parents, vec!["play"]);
        assert_eq!(rendered.lines[2].group, None);
        assert_eq!(rendered.lines[2].parents, vec!["task", "play"]);
        assert_eq!(rendered.lines[2].level, 3);
        assert_eq!(rendered.lines[2].counter, Some(3));
    }

    #[test]
    fn prepend_renders_older_events_only() {
        let mut renderer = OutputRenderer::new();
        renderer.append(vec![event(5, "e", 4, 5), event(6, "f", 5, 6)]);

        let rendered = renderer.prepend(vec![event(4, "d", 3, 4), event(3, "c", 2, 3), event(6, "f", 5, 6)]);

        assert_eq!(texts(&rendered), vec!["c", "d"]);
        assert_eq!(renderer.head_counter(), 3);
        assert_eq!(renderer.tail_counter(), 6);
    }

    #[test]
    fn prepend_marks_gap_before_head() {
        let mut renderer = OutputRenderer::new();
        renderer.append(vec![event(9, "i", 20, 21)]);

        let rendered = renderer.prepend(vec![event(1, "a", 0, 1), event(2, "b", 1, 2), event(5, "e", 7, 8)]);

        assert_eq!(texts(&rendered), vec!["a", "b", ELLIPSIS, "e", ELLIPSIS]);
        assert_eq!(rendered.lines[2].kind, LineKind::Missing);
        assert_eq!(rendered.count, 5);
    }

    #[test]
    fn set_head_moves_prepend_boundary() {
        let mut renderer = OutputRenderer::new();
        renderer.append((1..=4).map(|c| event(c, "x", c - 1, c)).collect());

        renderer.set_head(3, 2);
        let rendered = renderer.prepend((1..=4).map(|c| event(c, "y", c - 1, c)).collect());

        assert_eq!(rendered.count, 2);
        assert_eq!(renderer.head_counter(), 1);
    }

    #[test]
    fn clear_resets_counters() {
        let mut renderer = OutputRenderer::new();
        renderer.append(vec![event(3, "x", 0, 1)]);
        renderer.clear();

        assert_eq!(renderer.tail_counter(), 0);
        assert_eq!(renderer.append(vec![event(1, "y", 0, 1)]).count, 1);
    }
}
