use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use ratatui::{
    Frame, Terminal,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::api::{ApiError, JobEventsApi, PageQuery};
use crate::details::{Detail, job_details};
use crate::event_source::{Event, EventSource, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crate::job_event::{EventPage, Job, JobEvent, JobState, JobStatus};
use crate::live_feed::{FeedConfig, FeedMessage, LiveFeed};
use crate::notification::{NotificationLevel, NotificationManager};
use crate::page_cache::{Page, PageCache, PageToken, Placement};
use crate::render::{LineKind, OutputLine, OutputRenderer};
use crate::resource::JobEventsResource;
use crate::search::{JobSearch, OutputQuery, SearchNavigator};

const RELATED: &str = "job_events";
const MAX_EVENTS_PER_FRAME: usize = 50;
const GUTTER_WIDTH: usize = 7;
const DETAILS_WIDTH: u16 = 42;

const SEARCH_KEY_HELP: [&str; 5] = [
    "text              stdout contains text",
    "field:value       field contains value (task, play, host_name)",
    "id:>10 counter:<5 compare numeric fields",
    "-field:value      exclude matches",
    "Enter search  Backspace drop last tag  Esc cancel  c clear all",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Search,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub page_size: usize,
    pub page_limit: usize,
    pub poll_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            page_limit: 5,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Output view for one job. History pages are fetched on key presses; live
/// events are drained from the feed between key events, so the two producers
/// never interleave inside the cache.
pub struct App {
    api: Arc<dyn JobEventsApi>,
    config: AppConfig,
    pub job: Job,
    resource: JobEventsResource,
    pub cache: PageCache<JobEvent>,
    renderer: OutputRenderer,
    pub lines: Vec<OutputLine>,
    pub scroll_offset: usize,
    pub follow: bool,
    pub search: JobSearch,
    pub query: OutputQuery,
    pub input_mode: InputMode,
    pub notifications: NotificationManager,
    /// Next history page to request, `None` once the server has no more
    history: Option<PageQuery>,
    /// Highest counter delivered by either producer
    last_counter: u64,
    feed: Option<LiveFeed>,
    viewport_height: usize,
    /// Plays and tasks folded with `z`
    collapsed: HashSet<String>,
    /// Tasks unfolded with `z` while everything is collapsed
    expanded: HashSet<String>,
    pub collapse_all: bool,
    pub show_details: bool,
    details_expanded: bool,
}

impl App {
    /// Fetch the job and its first page of output, then start following it
    /// if it is still running
    pub fn open(
        api: Arc<dyn JobEventsApi>,
        job_id: u64,
        config: AppConfig,
        search_param: Vec<String>,
    ) -> Result<Self> {
        let record = api
            .fetch_job(job_id)
            .with_context(|| format!("Failed to load job {job_id}"))?;
        info!("Opened job {} ({}) with status {}", record.job.id, record.job.name, record.job.status);

        let resource = JobEventsResource::new(record.model, RELATED, config.page_limit, config.page_size);
        let query = OutputQuery::new(search_param);
        let mut search = JobSearch::new(&query);
        search.on_job_status(&record.job.status);

        let mut app = Self {
            cache: PageCache::new(&resource),
            api,
            config,
            job: record.job,
            resource,
            renderer: OutputRenderer::new(),
            lines: Vec::new(),
            scroll_offset: 0,
            follow: false,
            search,
            query,
            input_mode: InputMode::Normal,
            notifications: NotificationManager::new(),
            history: None,
            last_counter: 0,
            feed: None,
            viewport_height: 0,
            collapsed: HashSet::new(),
            expanded: HashSet::new(),
            collapse_all: false,
            show_details: false,
            details_expanded: false,
        };

        if let Err(e) = app.reload() {
            app.report_reload_error(&e);
        }
        app.start_live_feed();

        Ok(app)
    }

    /// Replace the view with the first page of the active search. Nothing is
    /// touched if the fetch fails.
    pub fn reload(&mut self) -> Result<(), ApiError> {
        let query = PageQuery::first(self.config.page_size, self.query.queryset());
        let page = self.api.fetch_events(&self.job.related.job_events, &query)?;

        self.renderer.clear();
        self.lines.clear();
        self.scroll_offset = 0;
        self.last_counter = 0;
        self.cache.init(&self.resource);
        self.apply_history_page(query, page);
        Ok(())
    }

    fn apply_history_page(&mut self, query: PageQuery, page: EventPage) {
        debug!(
            "History page {} for job {}: {} of {} events",
            query.page,
            self.job.id,
            page.results.len(),
            page.count
        );
        self.resource.set_results(
            page.results
                .iter()
                .filter_map(|event| serde_json::to_value(event).ok())
                .collect(),
        );
        if let Some(max) = page.results.iter().map(|e| e.counter).max() {
            self.last_counter = self.last_counter.max(max);
        }

        let rendered = self.renderer.append(page.results.clone());
        let number = self.cache.page().count + 1;
        self.cache.add(
            Page::numbered(number)
                .with_events(page.results)
                .with_lines(rendered.count),
            Placement::Remote,
        );
        self.lines.extend(rendered.lines);
        self.history = page.next.is_some().then(|| query.next());

        if self.follow {
            self.scroll_to_bottom();
        }
    }

    /// Request the next history page, if the server reported one
    pub fn load_next_page(&mut self) {
        if self.is_live() {
            self.notifications.info("Following live output");
            return;
        }
        let Some(query) = self.history.clone() else {
            self.notifications.info("No more pages");
            return;
        };

        match self.api.fetch_events(&self.job.related.job_events, &query) {
            Ok(page) => self.apply_history_page(query, page),
            Err(e) => {
                error!("Failed to load page {}: {e}", query.page);
                self.notifications
                    .error(format!("Could not load page {}: {e}", query.page));
            }
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.history.is_some()
    }

    /// Fetch the events just before the oldest one shown and put them in
    /// front of the view
    pub fn load_previous_page(&mut self) {
        let head = self.renderer.head_counter();
        if head <= 1 {
            self.notifications.info("At the start of the output");
            return;
        }

        let mut search = self.query.queryset();
        search.remove_key("order_by");
        search.remove_key("page");
        search.push("order_by", "-counter");
        search.push("counter__lt", head.to_string());
        let query = PageQuery::first(self.config.page_size, search);

        match self.api.fetch_events(&self.job.related.job_events, &query) {
            Ok(page) if page.results.is_empty() => {
                self.notifications.info("At the start of the output");
            }
            Ok(page) => self.apply_previous_page(page),
            Err(e) => {
                error!("Failed to load events before counter {head}: {e}");
                self.notifications
                    .error(format!("Could not load earlier output: {e}"));
            }
        }
    }

    fn apply_previous_page(&mut self, page: EventPage) {
        let fetched = page.results.len();
        debug!("Earlier page for job {}: {fetched} events", self.job.id);
        self.resource.set_results(
            page.results
                .iter()
                .filter_map(|event| serde_json::to_value(event).ok())
                .collect(),
        );

        let rendered = self.renderer.prepend(page.results.clone());
        // events without stdout render nothing but still move the head
        if let Some(oldest) = page.results.iter().min_by_key(|e| e.counter) {
            if oldest.counter < self.renderer.head_counter() {
                self.renderer.set_head(oldest.counter, oldest.start_line);
            }
        }

        let number = self.cache.page().count + 1;
        self.cache.add(
            Page::numbered(number)
                .with_events(page.results)
                .with_lines(rendered.count),
            Placement::Remote,
        );

        let shown = rendered.lines.iter().filter(|l| !self.is_hidden(l)).count();
        let newer = std::mem::replace(&mut self.lines, rendered.lines);
        self.lines.extend(newer);
        self.scroll_offset += shown;
        self.follow = false;
        self.notifications
            .info(format!("Loaded {fetched} earlier events"));
    }

    /// Stream a running job. With a search active only its status is
    /// watched, so the filtered view stays put until the job finishes.
    fn start_live_feed(&mut self) {
        if self.job.status.is_finished() {
            return;
        }

        let stream_events = self.search.tags.is_empty();
        let config = FeedConfig {
            job_id: self.job.id,
            events_url: self.job.related.job_events.clone(),
            after_counter: self.last_counter,
            state: self.job.state(),
            page_size: self.config.page_size,
            poll_interval: self.config.poll_interval,
            stream_events,
        };
        let feed = LiveFeed::start(self.api.clone(), config);

        if stream_events {
            self.attach_feed(feed);
        } else {
            self.notifications
                .warn("Live output paused while a search is active");
            self.feed = Some(feed);
        }
    }

    /// Take live messages from `feed` instead of any running one
    pub fn attach_feed(&mut self, feed: LiveFeed) {
        // the feed streams everything after the last history event
        self.history = None;
        self.follow = true;
        self.feed = Some(feed);
    }

    /// Live events are streaming into the view
    pub fn is_live(&self) -> bool {
        self.feed.as_ref().is_some_and(LiveFeed::streams_events)
    }

    /// Some feed, events or status only, is polling the job
    pub fn is_watching(&self) -> bool {
        self.feed.is_some()
    }

    /// Drain the live feed. Returns true when anything changed.
    pub fn process_feed(&mut self) -> bool {
        let Some(feed) = &self.feed else {
            return false;
        };
        let messages: Vec<FeedMessage> = feed.try_iter().collect();
        if messages.is_empty() {
            return false;
        }

        let mut finished = false;
        for message in messages {
            match message {
                FeedMessage::Event(event) => self.buffer_live_event(event),
                FeedMessage::Status(state) => self.on_status(state),
                FeedMessage::Error(message) => {
                    warn!("Live feed: {message}");
                    self.notifications.warn(message);
                }
                FeedMessage::Finished => finished = true,
            }
        }

        self.flush_live_events();

        if finished {
            info!("Job {} output complete", self.job.id);
            let streamed = self.is_live();
            self.feed = None;
            // a filtered view was loaded mid-run and may be missing matches
            if !streamed && !self.search.tags.is_empty() {
                if let Err(e) = self.reload() {
                    self.report_reload_error(&e);
                }
            }
        }
        true
    }

    fn buffer_live_event(&mut self, event: JobEvent) {
        if event.counter <= self.last_counter {
            return;
        }
        self.last_counter = event.counter;
        if let Err(e) = self.cache.add_to_buffer(event) {
            error!("Dropped live event: {e}");
        }
    }

    fn flush_live_events(&mut self) {
        if self.cache.buffer().count == 0 {
            return;
        }

        let rendered = self.renderer.append(self.cache.empty_buffer());
        if rendered.count > 0 {
            if let Err(e) = self.cache.update_line_count(PageToken::Current, rendered.count) {
                debug!("Line count not recorded: {e}");
            }
        }
        self.lines.extend(rendered.lines);

        if self.cache.is_over_capacity() {
            let removed = self.cache.trim().min(self.lines.len());
            let shown = self.lines[..removed]
                .iter()
                .filter(|l| !self.is_hidden(l))
                .count();
            self.lines.drain(..removed);
            self.scroll_offset = self.scroll_offset.saturating_sub(shown);
            if let Some((counter, number)) = self
                .lines
                .iter()
                .find_map(|l| Some((l.counter?, l.number?)))
            {
                self.renderer.set_head(counter, number.saturating_sub(1));
            }
        }

        if self.follow {
            self.scroll_to_bottom();
        }
    }

    fn on_status(&mut self, state: JobState) {
        let status = state.status;
        let changed = status != self.job.status;
        if changed {
            info!("Job {} is now {status}", self.job.id);
        }
        self.job.apply_state(state);
        self.search.on_job_status(&status);
        if changed && status.is_finished() {
            self.notifications.info(format!("Job {status}"));
        }
    }

    /// Rows of the details pane, current as of the last status message
    pub fn details(&self) -> Vec<Detail> {
        job_details(&self.resource, &self.job)
    }

    fn report_reload_error(&mut self, e: &ApiError) {
        error!("Loading job {} output failed: {e}", self.job.id);
        if e.is_rejected() {
            self.search.set_rejected(true);
        }
        self.notifications.error(format!("Loading output failed: {e}"));
    }

    /// Reload after a search transition, putting the old search back on failure
    fn apply_search_transition(&mut self, previous: Vec<String>) {
        if !self.query.take_reload() {
            return;
        }

        match self.reload() {
            Ok(()) => self.search.set_rejected(false),
            Err(e) => {
                self.report_reload_error(&e);
                self.query.restore(previous);
                self.search.sync_tags(&self.query);
            }
        }
        self.search.on_transition_complete();
    }

    fn previous_search_param(&self) -> Vec<String> {
        self.query.search_param().to_vec()
    }

    pub fn submit_search(&mut self) {
        let previous = self.previous_search_param();
        self.search.submit_search(&mut self.query);
        self.apply_search_transition(previous);
    }

    pub fn remove_last_tag(&mut self) {
        let Some(index) = self.search.tags.len().checked_sub(1) else {
            return;
        };
        let previous = self.previous_search_param();
        self.search.remove_search_tag(index, &mut self.query);
        self.apply_search_transition(previous);
    }

    pub fn clear_search(&mut self) {
        if self.search.tags.is_empty() {
            return;
        }
        let previous = self.previous_search_param();
        self.search.clear_search(&mut self.query);
        self.apply_search_transition(previous);
    }

    fn is_group_collapsed(&self, uuid: &str, level: u8) -> bool {
        self.collapsed.contains(uuid)
            || (self.collapse_all && level == 2 && !self.expanded.contains(uuid))
    }

    fn is_hidden(&self, line: &OutputLine) -> bool {
        if line.parents.iter().any(|p| self.collapsed.contains(p)) {
            return true;
        }
        // collapsing everything leaves only play and task headers
        self.collapse_all
            && matches!(line.level, 0 | 3)
            && !line
                .parents
                .first()
                .is_some_and(|p| self.expanded.contains(p))
    }

    /// Lines not folded away, in order. Scrolling counts these.
    pub fn visible_lines(&self) -> Vec<&OutputLine> {
        self.lines.iter().filter(|l| !self.is_hidden(l)).collect()
    }

    /// Fold or unfold the play or task at the top of the view
    pub fn toggle_group(&mut self) {
        let top = self.visible_lines().get(self.scroll_offset).and_then(|line| {
            match &line.group {
                Some(uuid) => Some((uuid.clone(), line.level)),
                None => line
                    .parents
                    .first()
                    .map(|p| (p.clone(), line.level.saturating_sub(1))),
            }
        });
        let Some((uuid, level)) = top else {
            self.notifications.info("Nothing to collapse here");
            return;
        };

        if self.is_group_collapsed(&uuid, level) {
            self.collapsed.remove(&uuid);
            if self.collapse_all {
                self.expanded.insert(uuid.clone());
            }
        } else {
            self.expanded.remove(&uuid);
            self.collapsed.insert(uuid.clone());
        }
        debug!("Toggled group {uuid}");

        if let Some(position) = self
            .visible_lines()
            .iter()
            .position(|l| l.group.as_deref() == Some(uuid.as_str()))
        {
            self.scroll_offset = position;
        }
        self.scroll_offset = self.scroll_offset.min(self.max_scroll());
        self.follow = false;
    }

    pub fn toggle_collapse_all(&mut self) {
        self.collapse_all = !self.collapse_all;
        self.collapsed.clear();
        self.expanded.clear();
        self.scroll_offset = self.scroll_offset.min(self.max_scroll());
    }

    fn max_scroll(&self) -> usize {
        self.visible_lines()
            .len()
            .saturating_sub(self.viewport_height.max(1))
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = (self.scroll_offset + lines).min(self.max_scroll());
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
        self.follow = false;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = self.max_scroll();
    }

    fn half_screen(&self) -> usize {
        (self.viewport_height / 2).max(1)
    }

    /// Returns Some(AppAction::Quit) if the app should quit
    pub fn handle_key_event(&mut self, key: KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(AppAction::Quit);
        }

        match self.input_mode {
            InputMode::Search => self.handle_search_key(key),
            InputMode::Normal => return self.handle_normal_key(key),
        }
        None
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => {
                self.input_mode = InputMode::Normal;
                self.submit_search();
            }
            KeyCode::Esc => {
                self.search.value.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Backspace => {
                if self.search.value.pop().is_none() {
                    self.remove_last_tag();
                }
            }
            KeyCode::Char(c) => self.search.value.push(c),
            _ => {}
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Option<AppAction> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('q') => return Some(AppAction::Quit),
            KeyCode::Char('d') if ctrl => self.scroll_down(self.half_screen()),
            KeyCode::Char('u') if ctrl => self.scroll_up(self.half_screen()),
            KeyCode::Char('j') | KeyCode::Down => self.scroll_down(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_up(1),
            KeyCode::PageDown => self.scroll_down(self.viewport_height.max(1)),
            KeyCode::PageUp => self.scroll_up(self.viewport_height.max(1)),
            KeyCode::Char('g') | KeyCode::Home => {
                self.scroll_offset = 0;
                self.follow = false;
            }
            KeyCode::Char('G') | KeyCode::End => self.scroll_to_bottom(),
            KeyCode::Char('f') => {
                self.follow = !self.follow;
                if self.follow {
                    self.scroll_to_bottom();
                }
            }
            KeyCode::Char('n') => self.load_next_page(),
            KeyCode::Char('p') => self.load_previous_page(),
            KeyCode::Char('z') => self.toggle_group(),
            KeyCode::Char('Z') => self.toggle_collapse_all(),
            KeyCode::Char('d') => self.show_details = !self.show_details,
            KeyCode::Char('D') => self.details_expanded = !self.details_expanded,
            KeyCode::Char('/') => {
                if self.search.disabled {
                    self.notifications.warn(self.search.placeholder);
                } else {
                    self.input_mode = InputMode::Search;
                }
            }
            KeyCode::Char('c') if !self.search.disabled => self.clear_search(),
            KeyCode::Backspace if !self.search.disabled => self.remove_last_tag(),
            KeyCode::Char('?') => self.search.toggle_search_key(),
            KeyCode::Esc => self.notifications.dismiss(),
            _ => {}
        }
        None
    }

    pub fn draw(&mut self, frame: &mut Frame) {
        let key_height = if self.search.key {
            SEARCH_KEY_HELP.len() as u16 + 2
        } else {
            0
        };
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(3),
                Constraint::Length(key_height),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(frame.area());

        self.draw_header(frame, chunks[0]);
        self.draw_tags(frame, chunks[1]);
        if self.show_details {
            let columns = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Min(20), Constraint::Length(DETAILS_WIDTH)])
                .split(chunks[2]);
            self.draw_output(frame, columns[0]);
            self.draw_details(frame, columns[1]);
        } else {
            self.draw_output(frame, chunks[2]);
        }
        if self.search.key {
            let help: Vec<Line> = SEARCH_KEY_HELP.iter().map(|l| Line::from(*l)).collect();
            frame.render_widget(
                Paragraph::new(help).block(Block::default().borders(Borders::ALL).title(" Search syntax ")),
                chunks[3],
            );
        }
        self.draw_search(frame, chunks[4]);
        self.draw_status(frame, chunks[5]);
    }

    fn draw_header(&self, frame: &mut Frame, area: Rect) {
        let status_color = match self.job.status {
            JobStatus::Successful => Color::Green,
            JobStatus::Failed | JobStatus::Error => Color::Red,
            JobStatus::Canceled => Color::Yellow,
            _ => Color::Cyan,
        };
        let mut spans = vec![
            Span::styled(
                format!("Job {} ", self.job.id),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("{} ", self.job.name)),
            Span::styled(self.job.status.as_str(), Style::default().fg(status_color)),
            Span::styled(
                format!(
                    "  pages {} ({} held)  lines {}",
                    self.cache.page().count,
                    self.cache.len(),
                    self.lines.len()
                ),
                Style::default().fg(Color::DarkGray),
            ),
        ];
        if self.is_live() {
            spans.push(Span::styled("  live", Style::default().fg(Color::Green)));
        } else if self.is_watching() {
            spans.push(Span::styled("  watching", Style::default().fg(Color::Yellow)));
        }
        if self.follow {
            spans.push(Span::styled("  follow", Style::default().fg(Color::Magenta)));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_tags(&self, frame: &mut Frame, area: Rect) {
        let line = if self.search.tags.is_empty() {
            Line::from(Span::styled("No filters", Style::default().fg(Color::DarkGray)))
        } else {
            let mut spans = Vec::new();
            for tag in &self.search.tags {
                spans.push(Span::styled(
                    format!("[{tag}]"),
                    Style::default().fg(Color::Black).bg(Color::Blue),
                ));
                spans.push(Span::raw(" "));
            }
            Line::from(spans)
        };
        frame.render_widget(Paragraph::new(line), area);
    }

    fn draw_output(&mut self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title(" Output ");
        let inner = block.inner(area);
        self.viewport_height = inner.height as usize;
        self.scroll_offset = self.scroll_offset.min(self.max_scroll());

        let visible: Vec<Line> = self
            .visible_lines()
            .into_iter()
            .skip(self.scroll_offset)
            .take(self.viewport_height)
            .map(|line| {
                let folded = line
                    .group
                    .as_deref()
                    .map(|uuid| self.is_group_collapsed(uuid, line.level));
                output_line(line, folded)
            })
            .collect();
        frame.render_widget(Paragraph::new(visible).block(block), area);
    }

    fn draw_details(&self, frame: &mut Frame, area: Rect) {
        let details = self.details();
        let title = if !self.details_expanded && details.iter().any(Detail::has_more) {
            " Details (D more) "
        } else {
            " Details "
        };

        let mut lines = Vec::new();
        for detail in &details {
            lines.push(Line::from(Span::styled(
                detail.label,
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD),
            )));
            for text in detail.display(self.details_expanded).lines() {
                lines.push(Line::from(text.to_string()));
            }
        }
        frame.render_widget(
            Paragraph::new(lines)
                .wrap(Wrap { trim: false })
                .block(Block::default().borders(Borders::ALL).title(title)),
            area,
        );
    }

    fn draw_search(&self, frame: &mut Frame, area: Rect) {
        let line = match self.input_mode {
            InputMode::Search => Line::from(vec![
                Span::styled("/", Style::default().fg(Color::Yellow)),
                Span::raw(self.search.value.as_str()),
                Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
            ]),
            InputMode::Normal if self.search.rejected => Line::from(Span::styled(
                "Invalid search filter",
                Style::default().fg(Color::Red),
            )),
            InputMode::Normal => Line::from(Span::styled(
                format!("{} (/)", self.search.placeholder),
                Style::default().fg(Color::DarkGray),
            )),
        };
        frame.render_widget(Paragraph::new(line), area);
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let line = match self.notifications.current() {
            Some(notification) => {
                let color = match notification.level {
                    NotificationLevel::Info => Color::Green,
                    NotificationLevel::Warning => Color::Yellow,
                    NotificationLevel::Error => Color::Red,
                };
                Line::from(Span::styled(
                    notification.message.as_str(),
                    Style::default().fg(color),
                ))
            }
            None => Line::from(Span::styled(
                "j/k scroll  n/p pages  f follow  z/Z fold  d details  / search  ? syntax  q quit",
                Style::default().fg(Color::DarkGray),
            )),
        };
        frame.render_widget(Paragraph::new(line), area);
    }
}

/// `folded` is set on play and task headers
fn output_line(line: &OutputLine, folded: Option<bool>) -> Line<'_> {
    let gutter = match line.number {
        Some(number) => format!("{number:>width$} ", width = GUTTER_WIDTH - 1),
        None => " ".repeat(GUTTER_WIDTH),
    };
    let mut spans = vec![Span::styled(gutter, Style::default().fg(Color::DarkGray))];
    match folded {
        Some(true) => spans.push(Span::styled("▸ ", Style::default().fg(Color::Yellow))),
        Some(false) => spans.push(Span::styled("▾ ", Style::default().fg(Color::DarkGray))),
        None => {}
    }
    match line.kind {
        LineKind::Output => spans.push(Span::raw(line.text.as_str())),
        LineKind::Missing | LineKind::Truncated => spans.push(Span::styled(
            line.text.as_str(),
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )),
    }
    if let Some(time) = &line.time {
        spans.push(Span::styled(format!("  {time}"), Style::default().fg(Color::Cyan)));
    }
    Line::from(spans)
}

pub fn run_app_with_event_source<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    event_source: &mut dyn EventSource,
) -> Result<()>
where
    B::Error: Send + Sync + 'static,
{
    let tick_rate = Duration::from_millis(50);
    let mut last_tick = Instant::now();

    terminal.draw(|f| app.draw(f))?;

    loop {
        let mut events_processed = 0;
        let mut should_quit = false;

        while events_processed < MAX_EVENTS_PER_FRAME && event_source.poll(Duration::ZERO)? {
            let event = event_source.read()?;
            events_processed += 1;

            match event {
                Event::Key(key) => {
                    if app.handle_key_event(key) == Some(AppAction::Quit) {
                        should_quit = true;
                        break;
                    }
                }
                Event::Resize(cols, rows) => debug!("Terminal resized to {cols}x{rows}"),
                _ => {}
            }
        }

        if should_quit {
            info!("Quitting");
            return Ok(());
        }

        let mut needs_redraw = events_processed > 0;
        needs_redraw |= app.process_feed();

        if last_tick.elapsed() >= tick_rate {
            needs_redraw |= app.notifications.update();
            last_tick = Instant::now();
        }

        if needs_redraw {
            terminal.draw(|f| app.draw(f))?;
        }

        if events_processed == 0 {
            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or(Duration::ZERO);
            let _ = event_source.poll(timeout);
        }
    }
}
